//! Node labels and the abstract boxes they are made of.
use std::fmt;
use std::ops::Range;

use crate::registry::Registry;
use crate::types::{BoxId, DataId, LabelId, TupleId, TypeId};
use crate::utils::{pairing2, pairing3, MyHash};

/// A pointer-typed field of a heap node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SelData {
    /// Byte offset of the field inside the node.
    pub offset: usize,
    /// Size of the field in bytes.
    pub size: usize,
    /// Displacement of the pointer stored in the field.
    pub displ: i64,
}

impl SelData {
    pub fn new(offset: usize, size: usize) -> Self {
        Self { offset, size, displ: 0 }
    }
}

impl fmt::Display for SelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.offset, self.size)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BoxKind {
    Selector,
    Nested,
    TypeInfo,
}

/// Element of a node label.
///
/// The derived ordering puts selectors (by offset) before nested boxes and the
/// type annotation last; labels are always built from sorted box sequences.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum AbstractBox {
    /// A single field, arity 1.
    Selector(SelData),
    /// A nested box, arity = number of its ports.
    Nested(BoxId),
    /// Type annotation of the node, arity 0.
    TypeInfo(TypeId),
}

impl AbstractBox {
    pub fn kind(&self) -> BoxKind {
        match self {
            AbstractBox::Selector(_) => BoxKind::Selector,
            AbstractBox::Nested(_) => BoxKind::Nested,
            AbstractBox::TypeInfo(_) => BoxKind::TypeInfo,
        }
    }

    /// Number of children this box occupies in a transition.
    pub fn arity(&self, registry: &Registry) -> usize {
        match self {
            AbstractBox::Selector(_) => 1,
            AbstractBox::Nested(id) => registry.box_def(*id).arity(),
            AbstractBox::TypeInfo(_) => 0,
        }
    }

    /// Byte offsets of the node this box accounts for.
    pub fn output_coverage(&self, registry: &Registry) -> Vec<usize> {
        match self {
            AbstractBox::Selector(sel) => vec![sel.offset],
            AbstractBox::Nested(id) => registry.box_def(*id).coverage().iter().copied().collect(),
            AbstractBox::TypeInfo(_) => vec![],
        }
    }
}

impl MyHash for AbstractBox {
    fn hash(&self) -> u64 {
        match *self {
            AbstractBox::Selector(sel) => pairing3(0, sel.offset as u64, sel.size as u64),
            AbstractBox::Nested(id) => pairing2(1, id.into()),
            AbstractBox::TypeInfo(id) => pairing2(2, id.into()),
        }
    }
}

/// Interned label of a heap node: its boxes in slot order, plus derived data.
#[derive(Debug, Clone)]
pub struct NodeLabel {
    boxes: Vec<AbstractBox>,
    starts: Vec<usize>,
    arity: usize,
    coverage: Vec<Vec<usize>>,
    tag: Vec<usize>,
    type_info: Option<TypeId>,
}

impl NodeLabel {
    pub(crate) fn new(boxes: Vec<AbstractBox>, arities: Vec<usize>, coverage: Vec<Vec<usize>>) -> Self {
        assert_eq!(boxes.len(), arities.len());
        let mut starts = Vec::with_capacity(boxes.len());
        let mut arity = 0;
        for a in &arities {
            starts.push(arity);
            arity += a;
        }
        let mut tag: Vec<usize> = coverage.iter().flatten().copied().collect();
        tag.sort_unstable();
        tag.dedup();
        let type_info = boxes.iter().find_map(|b| match b {
            AbstractBox::TypeInfo(t) => Some(*t),
            _ => None,
        });
        Self {
            boxes,
            starts,
            arity,
            coverage,
            tag,
            type_info,
        }
    }

    pub fn boxes(&self) -> &[AbstractBox] {
        &self.boxes
    }
    /// Total number of children.
    pub fn arity(&self) -> usize {
        self.arity
    }
    /// Sorted byte offsets covered by the label.
    pub fn tag(&self) -> &[usize] {
        &self.tag
    }
    pub fn type_info(&self) -> Option<TypeId> {
        self.type_info
    }

    /// Two labels describe the same kind of node: same covered offsets and same type.
    pub fn same_tag(&self, other: &NodeLabel) -> bool {
        self.tag == other.tag && self.type_info == other.type_info
    }

    /// Children positions occupied by the box at `position`.
    pub fn slots(&self, position: usize) -> Range<usize> {
        let start = self.starts[position];
        let end = self.starts.get(position + 1).copied().unwrap_or(self.arity);
        start..end
    }

    /// Iterate over `(position, selector)` of all selector boxes.
    pub fn selectors(&self) -> impl Iterator<Item = (usize, SelData)> + '_ {
        self.boxes.iter().enumerate().filter_map(|(i, b)| match b {
            AbstractBox::Selector(sel) => Some((i, *sel)),
            _ => None,
        })
    }

    /// Position of the selector box at `offset`.
    pub fn selector_position(&self, offset: usize) -> Option<usize> {
        self.selectors().find(|(_, sel)| sel.offset == offset).map(|(i, _)| i)
    }

    /// Child slot of the selector box at `offset`.
    pub fn selector_slot(&self, offset: usize) -> Option<usize> {
        self.selector_position(offset).map(|i| self.starts[i])
    }

    /// Position of the box (of any kind) accounting for `offset`.
    pub fn covering(&self, offset: usize) -> Option<usize> {
        self.coverage.iter().position(|c| c.contains(&offset))
    }

    /// Whether a selector box (not a nested one) exists for every offset.
    pub fn has_selectors(&self, offsets: impl IntoIterator<Item = usize>) -> bool {
        offsets.into_iter().all(|o| self.selector_position(o).is_some())
    }
}

/// Symbol of a tree automaton transition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Symbol {
    /// Heap node; arity given by the label.
    Node(LabelId),
    /// Data leaf; arity 0.
    Data(DataId),
    /// Synthetic top of a whole configuration; one child per root.
    Vars(TupleId),
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Node(id) => write!(f, "{}", id),
            Symbol::Data(id) => write!(f, "{}", id),
            Symbol::Vars(id) => write!(f, "{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(boxes: Vec<AbstractBox>, arities: Vec<usize>) -> NodeLabel {
        let coverage = boxes
            .iter()
            .map(|b| match b {
                AbstractBox::Selector(sel) => vec![sel.offset],
                _ => vec![],
            })
            .collect();
        NodeLabel::new(boxes, arities, coverage)
    }

    #[test]
    fn test_slots() {
        let l = label(
            vec![
                AbstractBox::Selector(SelData::new(0, 8)),
                AbstractBox::Selector(SelData::new(8, 8)),
                AbstractBox::TypeInfo(TypeId::new(1)),
            ],
            vec![1, 1, 0],
        );
        assert_eq!(l.arity(), 2);
        assert_eq!(l.slots(0), 0..1);
        assert_eq!(l.slots(1), 1..2);
        assert_eq!(l.slots(2), 2..2);
        assert_eq!(l.selector_slot(8), Some(1));
        assert_eq!(l.selector_slot(4), None);
        assert_eq!(l.tag(), &[0, 8]);
        assert_eq!(l.type_info(), Some(TypeId::new(1)));
    }

    #[test]
    fn test_box_order() {
        let mut boxes = vec![
            AbstractBox::TypeInfo(TypeId::new(1)),
            AbstractBox::Nested(BoxId::new(1)),
            AbstractBox::Selector(SelData::new(8, 8)),
            AbstractBox::Selector(SelData::new(0, 8)),
        ];
        boxes.sort();
        assert_eq!(boxes[0], AbstractBox::Selector(SelData::new(0, 8)));
        assert_eq!(boxes[2].kind(), BoxKind::Nested);
        assert_eq!(boxes[3].kind(), BoxKind::TypeInfo);
    }
}
