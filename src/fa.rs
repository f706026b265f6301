//! Forest automata: the abstract heap configurations.
//!
//! A [`ForestAut`] is an ordered list of roots, each a tree automaton
//! describing the heap reachable from one cutpoint, plus a vector of
//! variables. References between roots are data leaves `Ref { root, displ }`.
//! Freed roots are `None` until the next normalization.
//!
//! By convention variable [`IP_INDEX`] holds the instruction pointer and
//! variable [`ABP_INDEX`] the reference to the current stack frame, which is
//! root 0 after normalization.
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::rc::Rc;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::label::{AbstractBox, NodeLabel, SelData, Symbol};
use crate::registry::Registry;
use crate::ta::{State, Transition, TreeAut};
use crate::types::TypeId;

pub const IP_INDEX: usize = 0;
pub const ABP_INDEX: usize = 1;

/// How transitions are compared when merging states during abstraction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Matcher {
    /// Identical symbols.
    Exact,
    /// Node labels with the same covered offsets and type; other symbols identical.
    #[default]
    Tag,
    /// As `Tag`, and the data leaves below both transitions agree.
    TagOperands,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ForestAut {
    pub(crate) roots: Vec<Option<TreeAut>>,
    pub(crate) variables: Vec<Data>,
}

impl Default for ForestAut {
    fn default() -> Self {
        Self::new()
    }
}

impl ForestAut {
    /// Empty configuration with undefined instruction pointer and frame.
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            variables: vec![Data::Undef; 2],
        }
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    pub fn root(&self, index: usize) -> Option<&TreeAut> {
        self.roots.get(index).and_then(|r| r.as_ref())
    }

    pub(crate) fn expect_root(&self, index: usize) -> &TreeAut {
        match self.root(index) {
            Some(ta) => ta,
            None => panic!("Root {} does not exist", index),
        }
    }

    pub fn set_root(&mut self, index: usize, ta: Option<TreeAut>) {
        self.roots[index] = ta;
    }

    /// Append a root, returning its index.
    pub fn push_root(&mut self, ta: TreeAut) -> usize {
        self.roots.push(Some(ta));
        self.roots.len() - 1
    }

    pub fn variables(&self) -> &[Data] {
        &self.variables
    }

    pub fn var(&self, index: usize) -> Data {
        self.variables[index]
    }

    pub fn set_var(&mut self, index: usize, data: Data) {
        self.variables[index] = data;
    }

    /// Root holding the current stack frame.
    pub fn frame_root(&self) -> usize {
        match self.variables[ABP_INDEX] {
            Data::Ref { root, .. } => root,
            other => panic!("Frame pointer is {}", other),
        }
    }

    /// Create a heap node with the given selectors, all undefined.
    pub fn node_create(&mut self, registry: &Registry, sels: &[SelData], type_info: Option<TypeId>) -> usize {
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let undef = Symbol::Data(registry.intern_value(Data::Undef));
        let mut sels = sels.to_vec();
        sels.sort();
        let mut parts = Vec::with_capacity(sels.len() + 1);
        for sel in sels {
            let leaf = ta.fresh_state();
            ta.add_transition(undef, vec![], leaf);
            parts.push((registry.selector(sel), vec![leaf]));
        }
        if let Some(t) = type_info {
            parts.push((AbstractBox::TypeInfo(t), vec![]));
        }
        let (label, lhs) = build_node(registry, parts);
        ta.add_transition(label, lhs, top);
        ta.set_accepting(top);
        self.push_root(ta)
    }

    /// Release a heap node. References to it become dangling.
    pub fn node_delete(&mut self, root: usize) {
        self.roots[root] = None;
    }

    /// Roots referenced from data leaves of `root`.
    pub fn nearby_references(&self, registry: &Registry, root: usize) -> BTreeSet<usize> {
        match self.root(root) {
            Some(ta) => ref_leaves(ta, registry).into_iter().map(|(r, _)| r).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Label of the (deterministic) top transition of `root`.
    pub fn top_label(&self, registry: &Registry, root: usize) -> Rc<NodeLabel> {
        match self.expect_root(root).top().label {
            Symbol::Node(l) => registry.label(l),
            other => panic!("Root {} has top symbol {}", root, other),
        }
    }

    /// One configuration per top transition of `root`, each with a
    /// deterministic, non-recursive top.
    pub fn split_top(&self, root: usize) -> Vec<ForestAut> {
        let ta = self.expect_root(root);
        let tops: Vec<Transition> = ta.top_transitions().cloned().collect();
        if tops.len() == 1 && ta.accepting().len() == 1 && !ta.is_used_as_child(tops[0].rhs) {
            return vec![self.clone()];
        }
        tops.into_iter()
            .map(|t| {
                let mut nta = ta.clone();
                let top = nta.fresh_state();
                nta.add_transition(t.label, t.lhs, top);
                nta.set_accepting(top);
                nta.trim();
                let mut fa = self.clone();
                fa.roots[root] = Some(nta.compact());
                fa
            })
            .collect()
    }

    /// Make the child at `slot` of the top of `root` a single data leaf,
    /// splitting nondeterminism and moving node subtrees into new roots.
    fn split_child(&self, registry: &Registry, root: usize, slot: usize) -> Vec<ForestAut> {
        let ta = self.expect_root(root);
        let top = ta.top().clone();
        let child = top.lhs[slot];
        let choices: Vec<Transition> = ta.transitions_to(child).cloned().collect();
        if choices.len() == 1 && matches!(choices[0].label, Symbol::Data(_)) {
            return vec![self.clone()];
        }
        choices
            .into_iter()
            .map(|c| {
                let mut fa = self.clone();
                let data = match c.label {
                    Symbol::Data(_) => c.label,
                    Symbol::Node(_) => {
                        let mut sub = ta.clone();
                        let a = sub.fresh_state();
                        sub.add_transition(c.label, c.lhs, a);
                        sub.set_accepting(a);
                        sub.trim();
                        let new_root = fa.push_root(sub.compact());
                        Symbol::Data(registry.intern_value(Data::reference(new_root)))
                    }
                    Symbol::Vars(_) => panic!("Variable tuple inside root {}", root),
                };
                let mut nta = ta.clone();
                let leaf = nta.fresh_state();
                nta.add_transition(data, vec![], leaf);
                replace_child(&mut nta, &top, slot, leaf);
                nta.trim();
                fa.roots[root] = Some(nta);
                fa
            })
            .collect()
    }

    /// Prepare the selector at `offset` of `root` for reading and writing.
    ///
    /// Returns one configuration per way the selector can be concretized:
    /// the top of `root` is deterministic, the selector is not hidden in a
    /// box, and its value is a single data leaf.
    pub fn isolate(&self, registry: &Registry, root: usize, offset: usize) -> Result<Vec<ForestAut>> {
        if self.root(root).is_none() {
            return Err(Error::program("dereferencing released memory"));
        }
        let mut pending = self.split_top(root);
        let mut out = Vec::new();
        while let Some(fa) = pending.pop() {
            let label = fa.top_label(registry, root);
            if let Some(slot) = label.selector_slot(offset) {
                out.extend(fa.split_child(registry, root, slot));
            } else if let Some(position) = label.covering(offset) {
                match label.boxes()[position] {
                    AbstractBox::Nested(_) => {
                        for unfolded in fa.unfold(registry, root, position) {
                            pending.extend(unfolded.split_top(root));
                        }
                    }
                    other => panic!("Box {:?} covers offset {} but is not nested", other, offset),
                }
            } else {
                return Err(Error::program(format!(
                    "dereferencing offset {} which is not a field of the node",
                    offset
                )));
            }
        }
        Ok(out)
    }

    /// Value of the isolated selector at `offset` of `root`.
    pub fn read_selector(&self, registry: &Registry, root: usize, offset: usize) -> Data {
        let ta = self.expect_root(root);
        let top = ta.top();
        let label = self.top_label(registry, root);
        let slot = match label.selector_slot(offset) {
            Some(slot) => slot,
            None => panic!("Selector {} of root {} is not isolated", offset, root),
        };
        match leaf_value(ta, registry, top.lhs[slot]) {
            Some(data) => data,
            None => panic!("Selector {} of root {} is not a data leaf", offset, root),
        }
    }

    /// Overwrite the isolated selector at `offset` of `root`.
    pub fn write_selector(&mut self, registry: &Registry, root: usize, offset: usize, data: Data) {
        let label = self.top_label(registry, root);
        let slot = match label.selector_slot(offset) {
            Some(slot) => slot,
            None => panic!("Selector {} of root {} is not isolated", offset, root),
        };
        let symbol = Symbol::Data(registry.intern_value(data));
        if let Some(ta) = self.roots[root].as_mut() {
            let top = ta.top().clone();
            let leaf = ta.fresh_state();
            ta.add_transition(symbol, vec![], leaf);
            replace_child(ta, &top, slot, leaf);
            ta.trim();
        }
    }

    /// Single automaton over the synthetic `Vars` top symbol, accepting
    /// exactly the tuples of trees of this configuration.
    pub fn to_tree_aut(&self, registry: &Registry) -> TreeAut {
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let undef = Symbol::Data(registry.intern_value(Data::Undef));
        let mut lhs = Vec::with_capacity(self.roots.len());
        for root in &self.roots {
            match root {
                Some(r) => {
                    let offset = ta.import(r);
                    lhs.push(r.final_state() + offset);
                }
                None => {
                    let s = ta.fresh_state();
                    ta.add_transition(undef, vec![], s);
                    lhs.push(s);
                }
            }
        }
        let vars = Symbol::Vars(registry.intern_tuple(self.variables.clone()));
        ta.add_transition(vars, lhs, top);
        ta.set_accepting(top);
        ta
    }

    /// Split an automaton built from [`to_tree_aut`](Self::to_tree_aut)
    /// results back into configurations, one per `Vars` top transition.
    pub fn decompose(accumulator: &TreeAut, registry: &Registry) -> Vec<ForestAut> {
        let undef = Symbol::Data(registry.intern_value(Data::Undef));
        accumulator
            .top_transitions()
            .filter_map(|t| {
                let Symbol::Vars(tuple) = t.label else {
                    return None;
                };
                let roots = t
                    .lhs
                    .iter()
                    .map(|&s| {
                        let ts: Vec<&Transition> = accumulator.transitions_to(s).collect();
                        if ts.len() == 1 && ts[0].label == undef {
                            None
                        } else {
                            Some(accumulator.sub_automaton(s))
                        }
                    })
                    .collect();
                Some(ForestAut {
                    roots,
                    variables: registry.tuple(tuple),
                })
            })
            .collect()
    }

    /// Same set of heaps.
    pub fn is_equivalent(&self, other: &ForestAut, registry: &Registry) -> bool {
        self.to_tree_aut(registry).is_equivalent(&other.to_tree_aut(registry))
    }

    /// Configurations stored in `accumulator` with the same variables and
    /// number of roots as `config`, whose roots pass `compare(index, theirs, ours)`.
    pub fn load_compatible_roots<F>(accumulator: &TreeAut, registry: &Registry, config: &ForestAut, compare: F) -> Vec<ForestAut>
    where
        F: Fn(usize, &TreeAut, &TreeAut) -> bool,
    {
        Self::decompose(accumulator, registry)
            .into_iter()
            .filter(|c| {
                c.roots.len() == config.roots.len()
                    && c.variables == config.variables
                    && c.roots.iter().zip(&config.roots).enumerate().all(|(i, pair)| match pair {
                        (Some(a), Some(b)) => compare(i, a, b),
                        (None, None) => true,
                        _ => false,
                    })
            })
            .collect()
    }

    /// Union the roots of `accelerators` satisfying `predicate` into this configuration.
    pub fn fuse<F>(&mut self, accelerators: &[ForestAut], predicate: F)
    where
        F: Fn(usize) -> bool,
    {
        for i in 0..self.roots.len() {
            if !predicate(i) {
                continue;
            }
            let Some(mut ta) = self.roots[i].take() else {
                continue;
            };
            for acc in accelerators {
                assert_eq!(acc.roots.len(), self.roots.len(), "Fusing incompatible configurations");
                if let Some(other) = &acc.roots[i] {
                    ta = ta.union(other);
                }
            }
            self.roots[i] = Some(ta);
        }
    }

    /// Merge states of `root` indistinguishable up to `height`.
    pub fn height_abstraction(&mut self, registry: &Registry, root: usize, height: usize, matcher: Matcher) {
        let Some(ta) = self.roots.get_mut(root).and_then(|r| r.as_mut()) else {
            return;
        };
        let leaves = data_leaves(ta);
        let same_tag = |a: Symbol, b: Symbol| match (a, b) {
            (Symbol::Node(x), Symbol::Node(y)) => x == y || registry.label(x).same_tag(&registry.label(y)),
            _ => a == b,
        };
        let data_children = |t: &Transition| -> Vec<Symbol> { t.lhs.iter().filter_map(|s| leaves.get(s).copied()).collect() };
        match matcher {
            Matcher::Exact => ta.height_abstraction(height, |a, b| a.label == b.label),
            Matcher::Tag => ta.height_abstraction(height, |a, b| same_tag(a.label, b.label)),
            Matcher::TagOperands => ta.height_abstraction(height, |a, b| {
                same_tag(a.label, b.label) && data_children(a) == data_children(b)
            }),
        }
        ta.trim();
    }

    /// Readable dump of the configuration.
    pub fn dump(&self, registry: &Registry) -> String {
        let mut out = String::new();
        let vars: Vec<String> = self.variables.iter().map(|d| d.to_string()).collect();
        let _ = writeln!(out, "vars: [{}]", vars.join(", "));
        for (i, root) in self.roots.iter().enumerate() {
            match root {
                None => {
                    let _ = writeln!(out, "root {}: (released)", i);
                }
                Some(ta) => {
                    let _ = writeln!(out, "root {}: accepting {:?}", i, ta.accepting());
                    for t in ta.transitions() {
                        let lhs: Vec<String> = t.lhs.iter().map(|s| format!("q{}", s)).collect();
                        let _ = writeln!(
                            out,
                            "  {}({}) -> q{}",
                            describe_symbol(registry, t.label),
                            lhs.join(", "),
                            t.rhs
                        );
                    }
                }
            }
        }
        out
    }
}

/// Whether two roots have the same top symbol and the same sets of symbols
/// directly below it.
pub fn same_top(a: &TreeAut, b: &TreeAut) -> bool {
    fn shape(ta: &TreeAut) -> Option<(Symbol, Vec<BTreeSet<Symbol>>)> {
        let top = ta.single_top()?;
        let children = top
            .lhs
            .iter()
            .map(|&s| ta.transitions_to(s).map(|t| t.label).collect())
            .collect();
        Some((top.label, children))
    }
    match (shape(a), shape(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

pub fn describe_symbol(registry: &Registry, symbol: Symbol) -> String {
    match symbol {
        Symbol::Data(id) => registry.value(id).to_string(),
        Symbol::Vars(id) => {
            let vars: Vec<String> = registry.tuple(id).iter().map(|d| d.to_string()).collect();
            format!("<{}>", vars.join(", "))
        }
        Symbol::Node(id) => {
            let label = registry.label(id);
            let boxes: Vec<String> = label
                .boxes()
                .iter()
                .map(|b| match b {
                    AbstractBox::Selector(sel) => sel.to_string(),
                    AbstractBox::Nested(id) => registry.box_def(*id).name().to_string(),
                    AbstractBox::TypeInfo(t) => format!("type {}", registry.type_name(*t)),
                })
                .collect();
            format!("{{{}}}", boxes.join(", "))
        }
    }
}

/// Intern a node label from `(box, children)` parts, in canonical box order.
pub(crate) fn build_node(registry: &Registry, mut parts: Vec<(AbstractBox, Vec<State>)>) -> (Symbol, Vec<State>) {
    parts.sort_by(|a, b| a.0.cmp(&b.0));
    let boxes = parts.iter().map(|(b, _)| *b).collect();
    let lhs = parts.into_iter().flat_map(|(_, children)| children).collect();
    (Symbol::Node(registry.intern_label(boxes)), lhs)
}

/// Replace the child at `slot` of transition `top` by `child`.
pub(crate) fn replace_child(ta: &mut TreeAut, top: &Transition, slot: usize, child: State) {
    ta.remove(top);
    let mut lhs = top.lhs.clone();
    lhs[slot] = child;
    ta.add_transition(top.label, lhs, top.rhs);
}

/// Value of `state` if it derives exactly one data leaf.
pub(crate) fn leaf_value(ta: &TreeAut, registry: &Registry, state: State) -> Option<Data> {
    let mut ts = ta.transitions_to(state);
    let first = ts.next()?;
    if ts.next().is_some() {
        return None;
    }
    match first.label {
        Symbol::Data(id) => Some(registry.value(id)),
        _ => None,
    }
}

/// States deriving exactly one data leaf, with that leaf's symbol.
fn data_leaves(ta: &TreeAut) -> HashMap<State, Symbol> {
    let mut counts: HashMap<State, (usize, Option<Symbol>)> = HashMap::new();
    for t in ta.transitions() {
        let entry = counts.entry(t.rhs).or_insert((0, None));
        entry.0 += 1;
        if let Symbol::Data(_) = t.label {
            entry.1 = Some(t.label);
        }
    }
    counts
        .into_iter()
        .filter_map(|(s, (n, sym))| if n == 1 { sym.map(|sym| (s, sym)) } else { None })
        .collect()
}

/// References in the data leaves of `ta`, in top-down depth-first order.
pub(crate) fn ref_leaves(ta: &TreeAut, registry: &Registry) -> Vec<(usize, i64)> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    let mut stack: Vec<State> = ta.accepting().iter().rev().copied().collect();
    while let Some(s) = stack.pop() {
        if !visited.insert(s) {
            continue;
        }
        let ts: Vec<&Transition> = ta.transitions_to(s).collect();
        for t in &ts {
            if let Symbol::Data(id) = t.label {
                if let Data::Ref { root, displ } = registry.value(id) {
                    if !out.contains(&(root, displ)) {
                        out.push((root, displ));
                    }
                }
            }
        }
        for t in ts.iter().rev() {
            stack.extend(t.lhs.iter().rev().copied());
        }
    }
    out
}

/// Rename all references of `ta` by `f(root, displ)`.
pub(crate) fn map_refs(ta: &mut TreeAut, registry: &Registry, f: impl Fn(usize, i64) -> Data) {
    ta.map_symbols(|s| match s {
        Symbol::Data(id) => match registry.value(id) {
            Data::Ref { root, displ } => Symbol::Data(registry.intern_value(f(root, displ))),
            _ => s,
        },
        _ => s,
    });
}

/// Whether `symbol` is a reference leaf pointing to `root`.
pub(crate) fn refers_to(registry: &Registry, symbol: Symbol, root: usize) -> bool {
    match symbol {
        Symbol::Data(id) => matches!(registry.value(id), Data::Ref { root: r, .. } if r == root),
        _ => false,
    }
}
