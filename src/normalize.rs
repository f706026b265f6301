//! Canonical form of configurations.
//!
//! Normalization removes dangling references, merges roots that are
//! referenced exactly once into their referrer, rejects garbage, and orders
//! the remaining roots by a depth-first traversal from the variables. Every
//! step is logged in a [`NormalizationRecord`] so that it can be undone when
//! a counterexample is replayed backwards.
use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::data::Data;
use crate::error::{Error, Result};
use crate::fa::{map_refs, ref_leaves, refers_to, ForestAut};
use crate::label::Symbol;
use crate::registry::Registry;
use crate::ta::{State, Transition, TreeAut};

#[derive(Debug, Clone, Eq, PartialEq)]
struct Dangling {
    root: usize,
    state: State,
    symbol: Symbol,
    /// Whether the undefined leaf was not present before.
    added: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
struct Merge {
    into: usize,
    root: usize,
    leaf: State,
    symbol: Symbol,
    offset: State,
    original: TreeAut,
}

impl Merge {
    /// Transitions the merge added to the referrer.
    fn added(&self) -> Vec<Transition> {
        let shift = |t: &Transition| t.lhs.iter().map(|s| s + self.offset).collect::<Vec<_>>();
        let mut out: Vec<Transition> = self
            .original
            .transitions()
            .map(|t| Transition::new(t.label, shift(t), t.rhs + self.offset))
            .collect();
        out.extend(
            self.original
                .top_transitions()
                .map(|t| Transition::new(t.label, shift(t), self.leaf)),
        );
        out
    }
}

/// What [`ForestAut::normalize`] did, in order.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct NormalizationRecord {
    root_count: usize,
    dangling: Vec<Dangling>,
    merges: Vec<Merge>,
    /// `order[new] = old` root index.
    order: Vec<usize>,
}

impl NormalizationRecord {
    /// Number of roots before normalization.
    pub fn root_count(&self) -> usize {
        self.root_count
    }

    /// Number of roots merged into their referrer.
    pub fn merged(&self) -> usize {
        self.merges.len()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Nothing was changed.
    pub fn is_identity(&self) -> bool {
        self.dangling.is_empty()
            && self.merges.is_empty()
            && self.order.len() == self.root_count
            && self.order.iter().enumerate().all(|(i, &o)| i == o)
    }
}

impl ForestAut {
    /// Bring the configuration into canonical form.
    ///
    /// Roots in `interesting` are never merged away. Fails with a program
    /// error if some heap node is not reachable from the variables.
    pub fn normalize(&mut self, registry: &Registry, interesting: &BTreeSet<usize>) -> Result<NormalizationRecord> {
        let mut record = NormalizationRecord {
            root_count: self.roots.len(),
            ..Default::default()
        };

        self.remove_dangling(registry, &mut record);

        while let Some((root, into, leaf, symbol)) = self.find_mergeable(registry, interesting) {
            self.merge_into(root, into, leaf, symbol, &mut record);
        }

        let order = self.dfs_order(registry);
        let reachable: BTreeSet<usize> = order.iter().copied().collect();
        if let Some(garbage) = (0..self.roots.len()).find(|i| self.roots[*i].is_some() && !reachable.contains(i)) {
            debug!("Root {} is not reachable from the variables", garbage);
            return Err(Error::program("garbage detected"));
        }

        let mut index = vec![usize::MAX; self.roots.len()];
        for (new, &old) in order.iter().enumerate() {
            index[old] = new;
        }
        let mut roots = Vec::with_capacity(order.len());
        for &old in &order {
            roots.push(self.roots[old].take());
        }
        self.roots = roots;
        for ta in self.roots.iter_mut().flatten() {
            map_refs(ta, registry, |root, displ| Data::Ref {
                root: index[root],
                displ,
            });
        }
        for v in self.variables.iter_mut() {
            *v = v.map_root(|r| index[r]);
        }
        record.order = order;

        debug!(
            "Normalized {} roots into {} ({} merged, {} dangling)",
            record.root_count,
            self.roots.len(),
            record.merges.len(),
            record.dangling.len()
        );
        Ok(record)
    }

    /// Undo a normalization. Returns `false` if the configuration no longer
    /// has the shape the record was taken from.
    pub fn denormalize(&mut self, registry: &Registry, record: &NormalizationRecord) -> bool {
        let order = &record.order;
        if self.roots.len() != order.len() {
            return false;
        }
        let in_range = |d: &Data| d.as_ref().map_or(true, |(r, _)| r < order.len());
        if !self.variables.iter().all(in_range)
            || !self
                .roots
                .iter()
                .flatten()
                .all(|ta| ref_leaves(ta, registry).iter().all(|&(r, _)| r < order.len()))
        {
            return false;
        }

        let mut roots = vec![None; record.root_count];
        for (new, &old) in order.iter().enumerate() {
            roots[old] = self.roots[new].take();
        }
        self.roots = roots;
        for ta in self.roots.iter_mut().flatten() {
            map_refs(ta, registry, |root, displ| Data::Ref {
                root: order[root],
                displ,
            });
        }
        for v in self.variables.iter_mut() {
            *v = v.map_root(|r| order[r]);
        }

        for m in record.merges.iter().rev() {
            if self.root(m.root).is_some() {
                return false;
            }
            let Some(ta) = self.roots[m.into].as_mut() else {
                return false;
            };
            let added = m.added();
            if !added.iter().all(|t| ta.contains(t)) {
                return false;
            }
            for t in &added {
                ta.remove(t);
            }
            ta.add_transition(m.symbol, vec![], m.leaf);
            self.roots[m.root] = Some(m.original.clone());
        }

        let undef = Symbol::Data(registry.intern_value(Data::Undef));
        for d in record.dangling.iter().rev() {
            let Some(ta) = self.roots[d.root].as_mut() else {
                return false;
            };
            let leaf = Transition::new(undef, vec![], d.state);
            if !ta.contains(&leaf) {
                return false;
            }
            if d.added {
                ta.remove(&leaf);
            }
            ta.add_transition(d.symbol, vec![], d.state);
        }
        true
    }

    fn is_dangling(&self, registry: &Registry, symbol: Symbol) -> bool {
        match symbol {
            Symbol::Data(id) => matches!(registry.value(id), Data::Ref { root, .. } if self.root(root).is_none()),
            _ => false,
        }
    }

    /// Replace references to released nodes by undefined values.
    fn remove_dangling(&mut self, registry: &Registry, record: &mut NormalizationRecord) {
        let undef = Symbol::Data(registry.intern_value(Data::Undef));
        for i in 0..self.roots.len() {
            let dangling: Vec<Transition> = match &self.roots[i] {
                Some(ta) => ta
                    .transitions()
                    .filter(|t| self.is_dangling(registry, t.label))
                    .cloned()
                    .collect(),
                None => continue,
            };
            if let Some(ta) = self.roots[i].as_mut() {
                for t in dangling {
                    ta.remove(&t);
                    let leaf = Transition::new(undef, vec![], t.rhs);
                    let added = !ta.contains(&leaf);
                    ta.insert(leaf);
                    record.dangling.push(Dangling {
                        root: i,
                        state: t.rhs,
                        symbol: t.label,
                        added,
                    });
                }
            }
        }
    }

    /// A root that can be merged into its only referrer:
    /// `(root, referrer, leaf state, leaf symbol)`.
    fn find_mergeable(&self, registry: &Registry, interesting: &BTreeSet<usize>) -> Option<(usize, usize, State, Symbol)> {
        let from_vars: BTreeSet<usize> = self.variables.iter().filter_map(|d| d.as_ref()).map(|(r, _)| r).collect();
        'roots: for j in 0..self.roots.len() {
            if self.roots[j].is_none() || interesting.contains(&j) || from_vars.contains(&j) {
                continue;
            }
            let mut total = 0;
            let mut site = None;
            for (i, ta) in self.roots.iter().enumerate() {
                let Some(ta) = ta else {
                    continue;
                };
                let n = ref_occurrences(ta, registry, j);
                if n > 0 {
                    total += n;
                    site = Some(i);
                }
                if total > 1 {
                    continue 'roots;
                }
            }
            let Some(i) = site else {
                continue;
            };
            if total != 1 || i == j {
                continue;
            }
            let ta = self.roots[i].as_ref()?;
            let leaves: Vec<&Transition> = ta.transitions().filter(|t| refers_to(registry, t.label, j)).collect();
            let [leaf] = leaves.as_slice() else {
                continue;
            };
            let Symbol::Data(id) = leaf.label else {
                continue;
            };
            if registry.value(id).as_ref() != Some((j, 0)) || ta.transitions_to(leaf.rhs).count() != 1 {
                continue;
            }
            return Some((j, i, leaf.rhs, leaf.label));
        }
        None
    }

    fn merge_into(&mut self, root: usize, into: usize, leaf: State, symbol: Symbol, record: &mut NormalizationRecord) {
        let Some(original) = self.roots[root].take() else {
            return;
        };
        let Some(ta) = self.roots[into].as_mut() else {
            panic!("Merging root {} into released root {}", root, into);
        };
        let offset = ta.import(&original);
        for t in original.top_transitions() {
            ta.add_transition(t.label, t.lhs.iter().map(|s| s + offset).collect(), leaf);
        }
        ta.remove(&Transition::new(symbol, vec![], leaf));
        debug!("Merged root {} into root {}", root, into);
        record.merges.push(Merge {
            into,
            root,
            leaf,
            symbol,
            offset,
            original,
        });
    }

    /// Roots reachable from the variables, in depth-first order.
    fn dfs_order(&self, registry: &Registry) -> Vec<usize> {
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<usize> = self.variables.iter().rev().filter_map(|d| d.as_ref()).map(|(r, _)| r).collect();
        while let Some(r) = stack.pop() {
            if !visited.insert(r) {
                continue;
            }
            let Some(ta) = self.root(r) else {
                continue;
            };
            order.push(r);
            stack.extend(ref_leaves(ta, registry).into_iter().rev().map(|(r, _)| r));
        }
        order
    }
}

/// How many times a single tree of `ta` can reference `target`: 0, 1, or 2
/// standing for "more than once".
///
/// Computed as a least fixpoint over the states, so a loop through a state
/// adds references only when some iteration of it brings a new one.
fn ref_occurrences(ta: &TreeAut, registry: &Registry, target: usize) -> usize {
    let mut count: HashMap<State, usize> = HashMap::new();
    loop {
        let mut changed = false;
        for t in ta.transitions() {
            let c = if refers_to(registry, t.label, target) {
                1
            } else {
                t.lhs
                    .iter()
                    .map(|s| count.get(s).copied().unwrap_or(0))
                    .sum::<usize>()
                    .min(2)
            };
            let entry = count.entry(t.rhs).or_insert(0);
            if c > *entry {
                *entry = c;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    ta.accepting()
        .iter()
        .map(|s| count.get(s).copied().unwrap_or(0))
        .max()
        .unwrap_or(0)
}
