//! Canonical registry of data values, node labels, variable tuples, type
//! descriptors and boxes.
//!
//! All objects are hash-consed: interning an object equal to a previously
//! interned one returns the same handle. The registry is the only structure
//! shared by all configurations of an analysis. It uses interior mutability,
//! so every operation takes `&self`.
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use log::debug;

use crate::boxes::{BoxDef, Signature};
use crate::data::Data;
use crate::error::{Error, Result};
use crate::label::{AbstractBox, NodeLabel, SelData};
use crate::table::Table;
use crate::types::{BoxId, DataId, LabelId, TupleId, TypeId};

/// How the box database treats comparable boxes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BoxPolicy {
    /// Keep only maximal boxes per signature; a box subsumed by a known one
    /// is not new, and a new box evicts the boxes it subsumes.
    #[default]
    Antichain,
    /// Keep every box that is not language-equivalent to a known one.
    Set,
}

/// Result of offering a candidate box to the database.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Learned {
    /// An existing box already accounts for the candidate.
    Known(BoxId),
    /// The candidate was added; the box set grew.
    New(BoxId),
}

impl Learned {
    pub fn id(self) -> BoxId {
        match self {
            Learned::Known(id) | Learned::New(id) => id,
        }
    }
}

#[derive(Debug, Clone)]
struct TypeDesc {
    name: String,
    selectors: Vec<usize>,
}

#[derive(Debug)]
pub struct Registry {
    values: RefCell<Table<Data>>,
    labels: RefCell<Table<Vec<AbstractBox>>>,
    label_info: RefCell<Vec<Rc<NodeLabel>>>,
    tuples: RefCell<Table<Vec<Data>>>,
    types: RefCell<Vec<TypeDesc>>,
    type_names: RefCell<HashMap<String, TypeId>>,
    boxes: RefCell<Vec<Rc<BoxDef>>>,
    database: RefCell<HashMap<Signature, Vec<BoxId>>>,
    policy: BoxPolicy,
    learned: Cell<usize>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_policy(BoxPolicy::default())
    }

    pub fn with_policy(policy: BoxPolicy) -> Self {
        Self {
            values: RefCell::new(Table::new(10)),
            labels: RefCell::new(Table::new(10)),
            label_info: RefCell::new(Vec::new()),
            tuples: RefCell::new(Table::new(10)),
            types: RefCell::new(Vec::new()),
            type_names: RefCell::new(HashMap::new()),
            boxes: RefCell::new(Vec::new()),
            database: RefCell::new(HashMap::new()),
            policy,
            learned: Cell::new(0),
        }
    }

    pub fn policy(&self) -> BoxPolicy {
        self.policy
    }

    /// Drop every interned object. Handles obtained before are invalid afterwards.
    pub fn clear(&self) {
        debug!("Clearing registry");
        self.values.borrow_mut().clear();
        self.labels.borrow_mut().clear();
        self.label_info.borrow_mut().clear();
        self.tuples.borrow_mut().clear();
        self.types.borrow_mut().clear();
        self.type_names.borrow_mut().clear();
        self.boxes.borrow_mut().clear();
        self.database.borrow_mut().clear();
        self.learned.set(0);
    }

    // ----- data values -----

    pub fn intern_value(&self, data: Data) -> DataId {
        DataId::new(self.values.borrow_mut().put(data))
    }

    pub fn value(&self, id: DataId) -> Data {
        self.values.borrow()[id.index()]
    }

    // ----- node labels -----

    /// Canonical selector box.
    pub fn selector(&self, sel: SelData) -> AbstractBox {
        AbstractBox::Selector(sel)
    }

    /// Intern the label made of exactly this box sequence (in slot order).
    pub fn intern_label(&self, boxes: Vec<AbstractBox>) -> LabelId {
        if let Some(index) = self.labels.borrow().find(&boxes) {
            return LabelId::new(index);
        }
        let arities = boxes.iter().map(|b| b.arity(self)).collect();
        let coverage = boxes.iter().map(|b| b.output_coverage(self)).collect();
        let info = NodeLabel::new(boxes.clone(), arities, coverage);
        let (index, _) = self.labels.borrow_mut().insert(boxes);
        let mut label_info = self.label_info.borrow_mut();
        label_info.push(Rc::new(info));
        assert_eq!(index, label_info.len());
        LabelId::new(index)
    }

    pub fn label(&self, id: LabelId) -> Rc<NodeLabel> {
        Rc::clone(&self.label_info.borrow()[id.index() - 1])
    }

    pub fn label_count(&self) -> usize {
        self.labels.borrow().len()
    }

    // ----- variable tuples -----

    pub fn intern_tuple(&self, vars: Vec<Data>) -> TupleId {
        TupleId::new(self.tuples.borrow_mut().put(vars))
    }

    pub fn tuple(&self, id: TupleId) -> Vec<Data> {
        self.tuples.borrow()[id.index()].clone()
    }

    // ----- type descriptors -----

    /// Register a named type with the offsets of its selectors.
    pub fn register_type(&self, name: &str, selectors: Vec<usize>) -> Result<TypeId> {
        let mut names = self.type_names.borrow_mut();
        if names.contains_key(name) {
            return Err(Error::TypeExists(name.to_string()));
        }
        let mut types = self.types.borrow_mut();
        types.push(TypeDesc {
            name: name.to_string(),
            selectors,
        });
        let id = TypeId::new(types.len());
        names.insert(name.to_string(), id);
        debug!("Registered type {} as {}", name, id);
        Ok(id)
    }

    pub fn lookup_type(&self, name: &str) -> Result<TypeId> {
        self.type_names
            .borrow()
            .get(name)
            .copied()
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    pub fn type_name(&self, id: TypeId) -> String {
        self.types.borrow()[id.index() - 1].name.clone()
    }

    pub fn type_selectors(&self, id: TypeId) -> Vec<usize> {
        self.types.borrow()[id.index() - 1].selectors.clone()
    }

    // ----- boxes -----

    pub fn box_def(&self, id: BoxId) -> Rc<BoxDef> {
        Rc::clone(&self.boxes.borrow()[id.index() - 1])
    }

    /// Number of boxes ever created, evicted ones included.
    pub fn box_count(&self) -> usize {
        self.boxes.borrow().len()
    }

    /// Offer a discovered candidate box to the database.
    ///
    /// A new box is named `box<N>`, `N` counting the learned boxes.
    pub fn learn_box(&self, candidate: BoxDef) -> Learned {
        let learned = self.insert_box(candidate, || format!("box{}", self.learned.get()));
        if let Learned::New(id) = learned {
            self.learned.set(self.learned.get() + 1);
            debug!("Learned new box {}", self.box_def(id));
        }
        learned
    }

    /// Register a library box under its own name.
    pub fn load_box(&self, name: &str, def: BoxDef) -> BoxId {
        let learned = self.insert_box(def, || name.to_string());
        debug!("Loaded box {} as {:?}", name, learned);
        learned.id()
    }

    fn insert_box(&self, mut candidate: BoxDef, name: impl FnOnce() -> String) -> Learned {
        let signature = candidate.signature();
        let group = self.database.borrow().get(&signature).cloned().unwrap_or_default();
        for &id in &group {
            let existing = self.box_def(id);
            let known = match self.policy {
                BoxPolicy::Antichain => candidate.simplified_less_than(&existing),
                BoxPolicy::Set => {
                    candidate.simplified_less_than(&existing) && existing.simplified_less_than(&candidate)
                }
            };
            if known {
                return Learned::Known(id);
            }
        }

        candidate.finalize(name());
        let candidate = Rc::new(candidate);
        let id = {
            let mut boxes = self.boxes.borrow_mut();
            boxes.push(Rc::clone(&candidate));
            BoxId::new(boxes.len())
        };

        let mut database = self.database.borrow_mut();
        let group = database.entry(signature).or_default();
        if self.policy == BoxPolicy::Antichain {
            group.retain(|&e| {
                let obsolete = self.box_def(e).simplified_less_than(&candidate);
                if obsolete {
                    debug!("Box {} is obsolete", e);
                }
                !obsolete
            });
        }
        group.push(id);
        Learned::New(id)
    }

    /// Boxes currently in the database (evicted boxes excluded), by id.
    pub fn catalog(&self) -> Vec<BoxId> {
        let mut ids: Vec<BoxId> = self.database.borrow().values().flatten().copied().collect();
        ids.sort();
        ids
    }

    /// Groups of the database, one per signature.
    pub fn box_groups(&self) -> Vec<Vec<BoxId>> {
        let mut groups: Vec<Vec<BoxId>> = self.database.borrow().values().cloned().collect();
        groups.sort();
        groups
    }

    /// Split `ids` into basic boxes (nesting no other box) and a map from each
    /// box to the boxes built from it.
    pub fn box_hierarchy(&self, ids: &[BoxId]) -> (Vec<BoxId>, HashMap<BoxId, Vec<BoxId>>) {
        let mut basic = Vec::new();
        let mut hierarchy: HashMap<BoxId, Vec<BoxId>> = HashMap::new();
        for &id in ids {
            let nested: BTreeSet<BoxId> = self.box_def(id).nested_boxes(self);
            if nested.is_empty() {
                basic.push(id);
            }
            for dep in nested {
                hierarchy.entry(dep).or_default().push(id);
            }
        }
        (basic, hierarchy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::Cutpoint;
    use crate::label::Symbol;
    use crate::ta::TreeAut;

    use test_log::test;

    /// Box `origin -[next]-> leaf` where the leaf is one of `values`.
    fn segment(registry: &Registry, values: &[Data]) -> BoxDef {
        let label = registry.intern_label(vec![registry.selector(SelData::new(0, 8))]);
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let leaf = ta.fresh_state();
        for &v in values {
            ta.add_transition(Symbol::Data(registry.intern_value(v)), vec![], leaf);
        }
        ta.add_transition(Symbol::Node(label), vec![leaf], top);
        ta.set_accepting(top);
        BoxDef::new(ta, vec![Cutpoint::new(1, [0], None)], [0])
    }

    fn assert_antichain(registry: &Registry) {
        for group in registry.box_groups() {
            for &a in &group {
                for &b in &group {
                    if a != b {
                        assert!(
                            !registry.box_def(a).simplified_less_than(&registry.box_def(b)),
                            "{} <= {}",
                            a,
                            b
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_intern_value() {
        let registry = Registry::new();
        let a = registry.intern_value(Data::Int(5));
        let b = registry.intern_value(Data::Int(5));
        let c = registry.intern_value(Data::reference(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.value(c), Data::reference(1));
    }

    #[test]
    fn test_intern_label() {
        let registry = Registry::new();
        let ty = registry.register_type("node", vec![0, 8]).unwrap();
        let boxes = vec![
            registry.selector(SelData::new(0, 8)),
            registry.selector(SelData::new(8, 8)),
            AbstractBox::TypeInfo(ty),
        ];
        let a = registry.intern_label(boxes.clone());
        let b = registry.intern_label(boxes);
        assert_eq!(a, b);
        assert_eq!(registry.label_count(), 1);

        let label = registry.label(a);
        assert_eq!(label.arity(), 2);
        assert_eq!(label.tag(), &[0, 8]);
        assert_eq!(label.type_info(), Some(ty));

        let c = registry.intern_label(vec![registry.selector(SelData::new(0, 8))]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nested_label_arity_and_tag() {
        let registry = Registry::new();
        let id = registry.learn_box(segment(&registry, &[Data::reference(1)])).id();
        let label = registry.intern_label(vec![
            registry.selector(SelData::new(8, 8)),
            AbstractBox::Nested(id),
        ]);
        let label = registry.label(label);
        assert_eq!(label.arity(), 2);
        assert_eq!(label.tag(), &[0, 8]);
        assert_eq!(label.covering(0), Some(1));
        assert_eq!(label.selector_slot(0), None);
    }

    #[test]
    fn test_intern_tuple() {
        let registry = Registry::new();
        let a = registry.intern_tuple(vec![Data::Native(1), Data::reference(0)]);
        let b = registry.intern_tuple(vec![Data::Native(1), Data::reference(0)]);
        let c = registry.intern_tuple(vec![Data::Native(2), Data::reference(0)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.tuple(c)[0], Data::Native(2));
    }

    #[test]
    fn test_types() {
        let registry = Registry::new();
        let id = registry.register_type("list", vec![0]).unwrap();
        assert_eq!(registry.lookup_type("list").unwrap(), id);
        assert_eq!(registry.type_name(id), "list");
        assert!(matches!(registry.register_type("list", vec![]), Err(Error::TypeExists(_))));
        assert!(matches!(registry.lookup_type("tree"), Err(Error::TypeNotFound(_))));
    }

    #[test]
    fn test_learn_box_antichain() {
        let registry = Registry::new();
        let small = segment(&registry, &[Data::reference(1)]);
        let large = segment(&registry, &[Data::reference(1), Data::NULL]);
        let other = segment(&registry, &[Data::Int(5)]);

        let a = registry.learn_box(small.clone());
        assert!(matches!(a, Learned::New(_)));
        assert_eq!(registry.box_def(a.id()).name(), "box0");

        // Same box again.
        assert_eq!(registry.learn_box(small.clone()), Learned::Known(a.id()));

        // A larger box evicts the smaller one.
        let b = registry.learn_box(large);
        assert!(matches!(b, Learned::New(_)));
        assert_eq!(registry.box_def(b.id()).name(), "box1");
        assert_eq!(registry.catalog(), vec![b.id()]);
        // Evicted boxes stay addressable.
        assert_eq!(registry.box_def(a.id()).name(), "box0");

        assert_eq!(registry.learn_box(small), Learned::Known(b.id()));

        let c = registry.learn_box(other);
        assert!(matches!(c, Learned::New(_)));
        assert_eq!(registry.catalog().len(), 2);
        assert_antichain(&registry);
    }

    #[test]
    fn test_set_policy_keeps_comparable() {
        let registry = Registry::with_policy(BoxPolicy::Set);
        let small = segment(&registry, &[Data::reference(1)]);
        let large = segment(&registry, &[Data::reference(1), Data::NULL]);
        let a = registry.learn_box(small.clone());
        let b = registry.learn_box(large);
        assert!(matches!(b, Learned::New(_)));
        assert_eq!(registry.catalog().len(), 2);
        assert_eq!(registry.learn_box(small), Learned::Known(a.id()));
    }

    #[test]
    fn test_load_box_keeps_name() {
        let registry = Registry::new();
        let id = registry.load_box("sll", segment(&registry, &[Data::reference(1)]));
        assert_eq!(registry.box_def(id).name(), "sll");
        let learned = registry.learn_box(segment(&registry, &[Data::reference(1)]));
        assert_eq!(learned, Learned::Known(id));
    }

    #[test]
    fn test_box_hierarchy() {
        let registry = Registry::new();
        let inner = registry.learn_box(segment(&registry, &[Data::reference(1)])).id();

        // Outer box nests the inner one at offset 0 and has its own selector at 8.
        let label = registry.intern_label(vec![
            registry.selector(SelData::new(8, 8)),
            AbstractBox::Nested(inner),
        ]);
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let a = ta.fresh_state();
        let b = ta.fresh_state();
        ta.add_transition(Symbol::Data(registry.intern_value(Data::NULL)), vec![], a);
        ta.add_transition(Symbol::Data(registry.intern_value(Data::reference(1))), vec![], b);
        ta.add_transition(Symbol::Node(label), vec![a, b], top);
        ta.set_accepting(top);
        let outer = registry.learn_box(BoxDef::new(ta, vec![Cutpoint::new(1, [0], None)], [0, 8])).id();

        let (basic, hierarchy) = registry.box_hierarchy(&registry.catalog());
        assert_eq!(basic, vec![inner]);
        assert_eq!(hierarchy[&inner], vec![outer]);
    }

    #[test]
    fn test_clear() {
        let registry = Registry::new();
        registry.intern_value(Data::Int(1));
        registry.register_type("list", vec![0]).unwrap();
        registry.learn_box(segment(&registry, &[Data::reference(1)]));
        registry.clear();
        assert!(registry.lookup_type("list").is_err());
        assert!(registry.catalog().is_empty());
        assert_eq!(registry.box_count(), 0);
        assert_eq!(registry.intern_value(Data::Int(2)), DataId::new(1));
    }
}
