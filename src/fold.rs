//! Folding heap fragments into boxes, unfolding them back, and discovering
//! new boxes from repeated shapes.
use std::collections::{BTreeSet, HashMap};

use log::{debug, info};

use crate::boxes::{BoxDef, Cutpoint};
use crate::data::Data;
use crate::fa::{build_node, leaf_value, map_refs, ref_leaves, ForestAut};
use crate::label::{AbstractBox, Symbol};
use crate::registry::{Learned, Registry};
use crate::ta::{State, Transition, TreeAut};
use crate::types::BoxId;

/// Result of the fold phase at an abstraction point.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FoldOutcome {
    Unchanged,
    Folded,
    /// A new box was learned and the analysis must start over.
    Restart,
}

/// Boxes tried when folding: basic boxes first, then the others, plus the
/// map from each box to the boxes built on top of it.
#[derive(Debug, Clone, Default)]
pub struct BoxCatalog {
    boxes: Vec<BoxId>,
    hierarchy: HashMap<BoxId, Vec<BoxId>>,
}

impl BoxCatalog {
    pub fn new(registry: &Registry) -> Self {
        let ids = registry.catalog();
        let (basic, hierarchy) = registry.box_hierarchy(&ids);
        let mut boxes = basic.clone();
        boxes.extend(ids.into_iter().filter(|id| !basic.contains(id)));
        Self { boxes, hierarchy }
    }

    pub fn boxes(&self) -> &[BoxId] {
        &self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Boxes nesting `id`.
    pub fn users(&self, id: BoxId) -> &[BoxId] {
        self.hierarchy.get(&id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn push(&mut self, registry: &Registry, id: BoxId) {
        if self.boxes.contains(&id) {
            return;
        }
        for dep in registry.box_def(id).nested_boxes(registry) {
            self.hierarchy.entry(dep).or_default().push(id);
        }
        self.boxes.push(id);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FoldOptions {
    pub discover: bool,
    pub restart_on_new: bool,
}

impl ForestAut {
    /// Fold every non-frame root with every applicable box; then, if
    /// enabled, try to discover new boxes.
    pub fn fold(&mut self, registry: &Registry, catalog: &mut BoxCatalog, options: FoldOptions) -> FoldOutcome {
        let mut folded = false;
        for root in 1..self.roots.len() {
            for id in catalog.boxes().to_vec() {
                if self.fold_box(registry, root, id) {
                    folded = true;
                    self.fold_users(registry, root, id, catalog);
                }
            }
        }

        if options.discover {
            for root in 1..self.roots.len() {
                let Some(candidate) = self.discover_box(registry, root) else {
                    continue;
                };
                let id = match registry.learn_box(candidate) {
                    Learned::New(id) => {
                        info!("Discovered {} at root {}", registry.box_def(id).name(), root);
                        if options.restart_on_new {
                            return FoldOutcome::Restart;
                        }
                        catalog.push(registry, id);
                        id
                    }
                    Learned::Known(id) => id,
                };
                if self.fold_box(registry, root, id) {
                    folded = true;
                }
            }
        }

        if folded {
            FoldOutcome::Folded
        } else {
            FoldOutcome::Unchanged
        }
    }

    fn fold_users(&mut self, registry: &Registry, root: usize, id: BoxId, catalog: &BoxCatalog) {
        for &user in catalog.users(id) {
            if self.fold_box(registry, root, user) {
                self.fold_users(registry, root, user, catalog);
            }
        }
    }

    /// Restriction of `root` to the selectors in `coverage`, with references
    /// renamed box-locally, and the roots its ports stand for.
    fn project(&self, registry: &Registry, root: usize, coverage: &BTreeSet<usize>) -> Option<(TreeAut, Vec<usize>)> {
        let ta = self.root(root)?;
        let tops: Vec<Transition> = ta.top_transitions().cloned().collect();
        if tops.is_empty() {
            return None;
        }
        let mut x = ta.clone();
        let top = x.fresh_state();
        for t in &tops {
            let Symbol::Node(l) = t.label else {
                return None;
            };
            let label = registry.label(l);
            if !label.has_selectors(coverage.iter().copied()) {
                return None;
            }
            let parts = label
                .selectors()
                .filter(|(_, sel)| coverage.contains(&sel.offset))
                .map(|(pos, sel)| (AbstractBox::Selector(sel), vec![t.lhs[label.slots(pos).start]]))
                .collect();
            let (symbol, lhs) = build_node(registry, parts);
            x.add_transition(symbol, lhs, top);
        }
        x.set_accepting(top);
        x.trim();

        let mut ports = Vec::new();
        for (r, displ) in ref_leaves(&x, registry) {
            if displ != 0 {
                return None;
            }
            if r != root && !ports.contains(&r) {
                ports.push(r);
            }
        }
        map_refs(&mut x, registry, |r, displ| {
            let local = if r == root {
                0
            } else {
                ports.iter().position(|&p| p == r).map_or(r, |i| i + 1)
            };
            Data::Ref { root: local, displ }
        });
        Some((x.compact(), ports))
    }

    /// Replace the selectors of `root` covered by box `id` with the box, if
    /// the heap below them is an instance of the box.
    pub fn fold_box(&mut self, registry: &Registry, root: usize, id: BoxId) -> bool {
        if root == 0 {
            return false;
        }
        let def = registry.box_def(id);
        if !def.is_type1() {
            return false;
        }
        let Some((x, ports)) = self.project(registry, root, def.coverage()) else {
            return false;
        };
        if ports.len() != def.arity() || !x.is_included_in(def.output()) {
            return false;
        }

        let Some(ta) = self.root(root) else {
            return false;
        };
        let tops: Vec<Transition> = ta.top_transitions().cloned().collect();
        let mut nta = ta.clone();
        let top = nta.fresh_state();
        for t in tops {
            let Symbol::Node(l) = t.label else {
                return false;
            };
            let label = registry.label(l);
            let mut parts: Vec<(AbstractBox, Vec<State>)> = Vec::new();
            for (pos, b) in label.boxes().iter().enumerate() {
                if let AbstractBox::Selector(sel) = b {
                    if def.coverage().contains(&sel.offset) {
                        continue;
                    }
                }
                parts.push((*b, label.slots(pos).map(|k| t.lhs[k]).collect()));
            }
            let port_states = ports
                .iter()
                .map(|&p| {
                    let s = nta.fresh_state();
                    nta.add_transition(Symbol::Data(registry.intern_value(Data::reference(p))), vec![], s);
                    s
                })
                .collect();
            parts.push((AbstractBox::Nested(id), port_states));
            let (symbol, lhs) = build_node(registry, parts);
            nta.add_transition(symbol, lhs, top);
        }
        nta.set_accepting(top);
        nta.trim();
        self.roots[root] = Some(nta.compact());
        debug!("Folded {} at root {}", def.name(), root);
        true
    }

    /// Replace the nested box at `position` of the top label of `root` by
    /// its content, one configuration per top transition of the box.
    ///
    /// The top of `root` must be deterministic (see [`split_top`](Self::split_top)).
    pub fn unfold(&self, registry: &Registry, root: usize, position: usize) -> Vec<ForestAut> {
        let ta = self.expect_root(root);
        let top = ta.top().clone();
        assert!(!ta.is_used_as_child(top.rhs), "Unfolding below a recursive top");
        let label = self.top_label(registry, root);
        let AbstractBox::Nested(id) = label.boxes()[position] else {
            panic!("Box at position {} of root {} is not nested", position, root);
        };
        let def = registry.box_def(id);
        let port_states: Vec<State> = label.slots(position).map(|k| top.lhs[k]).collect();

        let mut out = Vec::new();
        for box_top in def.output().top_transitions() {
            let Symbol::Node(bl) = box_top.label else {
                continue;
            };
            let mut nta = ta.clone();
            let offset = nta.import(def.output());
            let leaves: Vec<Transition> = nta
                .transitions()
                .filter(|t| t.rhs >= offset && t.is_leaf())
                .cloned()
                .collect();
            for t in leaves {
                let Symbol::Data(d) = t.label else {
                    continue;
                };
                let Data::Ref { root: local, displ } = registry.value(d) else {
                    continue;
                };
                nta.remove(&t);
                if local == 0 {
                    nta.add_transition(Symbol::Data(registry.intern_value(Data::Ref { root, displ })), vec![], t.rhs);
                } else {
                    for pt in ta.transitions_to(port_states[local - 1]) {
                        nta.add_transition(pt.label, pt.lhs.clone(), t.rhs);
                    }
                }
            }

            let mut parts: Vec<(AbstractBox, Vec<State>)> = Vec::new();
            for (pos, b) in label.boxes().iter().enumerate() {
                if pos != position {
                    parts.push((*b, label.slots(pos).map(|k| top.lhs[k]).collect()));
                }
            }
            let box_label = registry.label(bl);
            for (pos, b) in box_label.boxes().iter().enumerate() {
                parts.push((*b, box_label.slots(pos).map(|k| box_top.lhs[k] + offset).collect()));
            }
            let (symbol, lhs) = build_node(registry, parts);
            nta.remove(&top);
            nta.add_transition(symbol, lhs, top.rhs);
            nta.trim();

            let mut fa = self.clone();
            fa.roots[root] = Some(nta);
            out.push(fa);
        }
        debug!("Unfolded {} at root {} into {} configuration(s)", def.name(), root, out.len());
        out
    }

    /// A candidate box for `root`: the selectors of its top pointing to
    /// nodes that point straight back.
    pub fn discover_box(&self, registry: &Registry, root: usize) -> Option<BoxDef> {
        if root == 0 {
            return None;
        }
        let ta = self.root(root)?;
        let top = ta.single_top()?;
        let Symbol::Node(l) = top.label else {
            return None;
        };
        let label = registry.label(l);

        // (offset, target root, backward offset)
        let mut forward: Vec<(usize, usize, usize)> = Vec::new();
        for (pos, sel) in label.selectors() {
            let Some(Data::Ref { root: target, displ: 0 }) = leaf_value(ta, registry, top.lhs[label.slots(pos).start]) else {
                continue;
            };
            if target == root || target == 0 {
                continue;
            }
            if let Some(back) = self.back_selector(registry, target, root) {
                forward.push((sel.offset, target, back));
            }
        }
        if forward.is_empty() {
            return None;
        }

        let coverage: BTreeSet<usize> = forward.iter().map(|f| f.0).collect();
        let (output, ports) = self.project(registry, root, &coverage)?;
        let signature = ports
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let fwd = forward.iter().filter(|f| f.1 == p).map(|f| f.0);
                let bwd = forward.iter().find(|f| f.1 == p).map(|f| f.2);
                Cutpoint::new(i + 1, fwd, bwd)
            })
            .collect();
        debug!("Candidate box at root {} covering {:?}", root, coverage);
        Some(BoxDef::new(output, signature, coverage))
    }

    /// Offset of a selector of `target` holding a plain reference to `origin`.
    fn back_selector(&self, registry: &Registry, target: usize, origin: usize) -> Option<usize> {
        let ta = self.root(target)?;
        let top = ta.single_top()?;
        let Symbol::Node(l) = top.label else {
            return None;
        };
        let label = registry.label(l);
        let found = label.selectors().find_map(|(pos, sel)| {
            match leaf_value(ta, registry, top.lhs[label.slots(pos).start]) {
                Some(Data::Ref { root, displ: 0 }) if root == origin => Some(sel.offset),
                _ => None,
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fa::tests::{node, with_frame, NEXT, PREV};

    use test_log::test;

    /// Frame pointing to both nodes of a two-node doubly-linked list.
    fn dll(registry: &Registry) -> ForestAut {
        let mut fa = with_frame(registry, &[Data::reference(1), Data::reference(2)]);
        node(registry, &mut fa, &[(NEXT, Data::reference(2)), (PREV, Data::NULL)]);
        node(registry, &mut fa, &[(NEXT, Data::NULL), (PREV, Data::reference(1))]);
        fa
    }

    #[test]
    fn test_discover_box() {
        let registry = Registry::new();
        let fa = dll(&registry);
        let candidate = fa.discover_box(&registry, 1).unwrap();
        assert_eq!(candidate.arity(), 1);
        assert_eq!(candidate.coverage(), &BTreeSet::from([0]));
        assert_eq!(candidate.cutpoints()[0].bwd_selector, Some(8));
        assert!(fa.discover_box(&registry, 0).is_none());
    }

    #[test]
    fn test_fold_and_unfold() {
        let registry = Registry::new();
        let mut fa = dll(&registry);
        let id = registry.learn_box(fa.discover_box(&registry, 1).unwrap()).id();
        assert_eq!(registry.box_def(id).name(), "box0");

        assert!(fa.fold_box(&registry, 1, id));
        let label = fa.top_label(&registry, 1);
        assert!(label.selector_position(0).is_none());
        // Selectors sort before nested boxes.
        assert_eq!(label.covering(0), Some(1));
        assert_eq!(label.boxes()[1], AbstractBox::Nested(id));
        // The port still references root 2.
        assert_eq!(fa.nearby_references(&registry, 1), BTreeSet::from([2]));

        // No port: the box does not apply to the last node.
        assert!(!fa.fold_box(&registry, 2, id));

        let isolated = fa.isolate(&registry, 1, 0).unwrap();
        assert_eq!(isolated.len(), 1);
        assert_eq!(isolated[0].read_selector(&registry, 1, 0), Data::reference(2));
        assert_eq!(isolated[0].read_selector(&registry, 1, 8), Data::NULL);
        assert!(isolated[0].is_equivalent(&dll(&registry), &registry));
    }

    #[test]
    fn test_fold_phase_restarts_on_new_box() {
        let registry = Registry::new();
        let options = FoldOptions {
            discover: true,
            restart_on_new: true,
        };

        let mut fa = dll(&registry);
        let mut catalog = BoxCatalog::new(&registry);
        assert!(catalog.is_empty());
        assert_eq!(fa.fold(&registry, &mut catalog, options), FoldOutcome::Restart);

        let mut fa = dll(&registry);
        let mut catalog = BoxCatalog::new(&registry);
        assert_eq!(catalog.boxes().len(), 1);
        assert_eq!(fa.fold(&registry, &mut catalog, options), FoldOutcome::Folded);
        assert_eq!(registry.catalog().len(), 1);
    }

    #[test]
    fn test_fold_phase_without_restart() {
        let registry = Registry::new();
        let options = FoldOptions {
            discover: true,
            restart_on_new: false,
        };
        let mut fa = dll(&registry);
        let mut catalog = BoxCatalog::new(&registry);
        assert_eq!(fa.fold(&registry, &mut catalog, options), FoldOutcome::Folded);
        assert_eq!(catalog.boxes().len(), 1);
    }

    #[test]
    fn test_nothing_to_fold() {
        let registry = Registry::new();
        let mut fa = with_frame(&registry, &[Data::reference(1)]);
        node(&registry, &mut fa, &[(NEXT, Data::NULL)]);
        let mut catalog = BoxCatalog::new(&registry);
        let options = FoldOptions {
            discover: true,
            restart_on_new: true,
        };
        assert_eq!(fa.fold(&registry, &mut catalog, options), FoldOutcome::Unchanged);
    }
}
