//! Bottom-up nondeterministic tree automata over canonical symbols.
//!
//! Transitions have the form `label(lhs...) -> rhs`; a tree is accepted when
//! it can be rewritten bottom-up into one of the accepting states. Symbols are
//! registry handles, so automata built against the same
//! [`Registry`](crate::registry::Registry) can be compared directly.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::label::Symbol;

pub type State = usize;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Transition {
    pub label: Symbol,
    pub lhs: Vec<State>,
    pub rhs: State,
}

impl Transition {
    pub fn new(label: Symbol, lhs: Vec<State>, rhs: State) -> Self {
        Self { label, lhs, rhs }
    }

    /// Whether this is an arity-0 transition.
    pub fn is_leaf(&self) -> bool {
        self.lhs.is_empty()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if !self.lhs.is_empty() {
            let lhs: Vec<String> = self.lhs.iter().map(|s| format!("q{}", s)).collect();
            write!(f, "({})", lhs.join(", "))?;
        }
        write!(f, " -> q{}", self.rhs)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TreeAut {
    transitions: BTreeSet<Transition>,
    accepting: BTreeSet<State>,
    next_state: State,
}

impl TreeAut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh state.
    pub fn fresh_state(&mut self) -> State {
        let s = self.next_state;
        self.next_state += 1;
        s
    }

    /// Upper bound (exclusive) of the used states.
    pub fn next_state(&self) -> State {
        self.next_state
    }

    pub fn add_transition(&mut self, label: Symbol, lhs: Vec<State>, rhs: State) {
        self.insert(Transition::new(label, lhs, rhs));
    }

    pub fn insert(&mut self, t: Transition) {
        let max = t.lhs.iter().copied().chain([t.rhs]).max().unwrap_or(0);
        self.next_state = self.next_state.max(max + 1);
        self.transitions.insert(t);
    }

    pub fn remove(&mut self, t: &Transition) -> bool {
        self.transitions.remove(t)
    }

    pub fn contains(&self, t: &Transition) -> bool {
        self.transitions.contains(t)
    }

    pub fn add_accepting(&mut self, state: State) {
        self.next_state = self.next_state.max(state + 1);
        self.accepting.insert(state);
    }

    /// Make `state` the only accepting state.
    pub fn set_accepting(&mut self, state: State) {
        self.accepting.clear();
        self.add_accepting(state);
    }

    pub fn accepting(&self) -> &BTreeSet<State> {
        &self.accepting
    }

    pub fn is_accepting(&self, state: State) -> bool {
        self.accepting.contains(&state)
    }

    /// The single accepting state.
    ///
    /// # Panics
    ///
    /// Panics if the automaton does not have exactly one accepting state.
    pub fn final_state(&self) -> State {
        assert_eq!(self.accepting.len(), 1, "Expected a single accepting state");
        *self.accepting.iter().next().unwrap()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Transitions leading to `state`.
    pub fn transitions_to(&self, state: State) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| t.rhs == state)
    }

    /// Transitions leading to an accepting state.
    pub fn top_transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter().filter(move |t| self.accepting.contains(&t.rhs))
    }

    /// The only top transition, if the top is deterministic.
    pub fn single_top(&self) -> Option<&Transition> {
        let mut tops = self.top_transitions();
        let first = tops.next()?;
        if tops.next().is_some() || self.accepting.len() != 1 {
            return None;
        }
        Some(first)
    }

    /// The only top transition.
    ///
    /// # Panics
    ///
    /// Panics if the top is not deterministic.
    pub fn top(&self) -> &Transition {
        self.single_top().expect("Top transition is not deterministic")
    }

    /// Whether `state` occurs as a child of some transition.
    pub fn is_used_as_child(&self, state: State) -> bool {
        self.transitions.iter().any(|t| t.lhs.contains(&state))
    }

    /// All states that occur in some transition or are accepting.
    pub fn states(&self) -> BTreeSet<State> {
        let mut states: BTreeSet<State> = self.accepting.clone();
        for t in &self.transitions {
            states.insert(t.rhs);
            states.extend(t.lhs.iter().copied());
        }
        states
    }

    /// Whether the automaton accepts no tree.
    pub fn is_empty_language(&self) -> bool {
        let productive = self.productive();
        !self.accepting.iter().any(|s| productive.contains(s))
    }

    fn productive(&self) -> BTreeSet<State> {
        let mut productive = BTreeSet::new();
        let mut changed = true;
        while changed {
            changed = false;
            for t in &self.transitions {
                if !productive.contains(&t.rhs) && t.lhs.iter().all(|s| productive.contains(s)) {
                    productive.insert(t.rhs);
                    changed = true;
                }
            }
        }
        productive
    }

    /// States reachable top-down from `roots`.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = State>) -> BTreeSet<State> {
        let mut reachable = BTreeSet::new();
        let mut stack: Vec<State> = roots.into_iter().collect();
        while let Some(s) = stack.pop() {
            if !reachable.insert(s) {
                continue;
            }
            for t in self.transitions_to(s) {
                stack.extend(t.lhs.iter().copied().filter(|c| !reachable.contains(c)));
            }
        }
        reachable
    }

    /// Remove useless states: those that derive no tree and those unreachable
    /// from an accepting state.
    pub fn trim(&mut self) {
        let productive = self.productive();
        self.transitions
            .retain(|t| productive.contains(&t.rhs) && t.lhs.iter().all(|s| productive.contains(s)));
        self.accepting.retain(|s| productive.contains(s));
        let reachable = self.reachable_from(self.accepting.iter().copied());
        self.transitions.retain(|t| reachable.contains(&t.rhs));
    }

    /// Copy all transitions of `other` with states shifted past the current
    /// states. Returns the shift.
    pub fn import(&mut self, other: &TreeAut) -> State {
        let offset = self.next_state;
        for t in &other.transitions {
            self.transitions.insert(Transition::new(
                t.label,
                t.lhs.iter().map(|s| s + offset).collect(),
                t.rhs + offset,
            ));
        }
        self.next_state = offset + other.next_state;
        offset
    }

    /// Sub-automaton of the states reachable from `state`, accepting in `state`.
    pub fn sub_automaton(&self, state: State) -> TreeAut {
        let reachable = self.reachable_from([state]);
        let mut ta = TreeAut::new();
        for t in self.transitions.iter().filter(|t| reachable.contains(&t.rhs)) {
            ta.insert(t.clone());
        }
        ta.add_accepting(state);
        ta.compact()
    }

    /// Renumber states densely: accepting states first, then in top-down DFS
    /// order.
    pub fn compact(&self) -> TreeAut {
        let mut index: BTreeMap<State, State> = BTreeMap::new();
        let mut stack: Vec<State> = self.accepting.iter().rev().copied().collect();
        for &s in &self.accepting {
            let n = index.len();
            index.insert(s, n);
        }
        while let Some(s) = stack.pop() {
            for t in self.transitions_to(s) {
                for &c in t.lhs.iter().rev() {
                    if !index.contains_key(&c) {
                        let n = index.len();
                        index.insert(c, n);
                        stack.push(c);
                    }
                }
            }
        }
        let mut ta = TreeAut::new();
        for t in &self.transitions {
            if let Some(&rhs) = index.get(&t.rhs) {
                let lhs = t.lhs.iter().map(|s| index[s]).collect();
                ta.add_transition(t.label, lhs, rhs);
            }
        }
        for s in &self.accepting {
            ta.add_accepting(index[s]);
        }
        ta
    }

    /// Rename every state `s` to `repr[s]` (states missing from `repr` keep their number).
    pub fn merge_states(&mut self, repr: &HashMap<State, State>) {
        let rename = |s: &State| *repr.get(s).unwrap_or(s);
        let transitions = std::mem::take(&mut self.transitions);
        self.transitions = transitions
            .into_iter()
            .map(|t| Transition::new(t.label, t.lhs.iter().map(rename).collect(), rename(&t.rhs)))
            .collect();
        self.accepting = self.accepting.iter().map(rename).collect();
    }

    /// Replace every transition label by `f(label)`.
    pub fn map_symbols(&mut self, mut f: impl FnMut(Symbol) -> Symbol) {
        let transitions = std::mem::take(&mut self.transitions);
        self.transitions = transitions
            .into_iter()
            .map(|t| Transition::new(f(t.label), t.lhs, t.rhs))
            .collect();
    }

    /// Automaton accepting the union of both languages, with a single fresh
    /// accepting state.
    pub fn union(&self, other: &TreeAut) -> TreeAut {
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let mut tops = Vec::new();
        for part in [self, other] {
            let offset = ta.import(part);
            tops.extend(
                part.top_transitions()
                    .map(|t| Transition::new(t.label, t.lhs.iter().map(|s| s + offset).collect(), top)),
            );
        }
        for t in tops {
            ta.insert(t);
        }
        ta.set_accepting(top);
        ta.trim();
        ta
    }

    /// Language inclusion `L(self) ⊆ L(other)`.
    ///
    /// Bottom-up subset construction over `other`, keeping for each state of
    /// `self` only the minimal macro-states that reach it.
    pub fn is_included_in(&self, other: &TreeAut) -> bool {
        let mut by_symbol: HashMap<(Symbol, usize), Vec<&Transition>> = HashMap::new();
        for t in &other.transitions {
            by_symbol.entry((t.label, t.lhs.len())).or_default().push(t);
        }

        let mut reached: HashMap<State, Vec<BTreeSet<State>>> = HashMap::new();
        let mut changed = true;
        while changed {
            changed = false;
            for t in &self.transitions {
                let mut options: Vec<Vec<BTreeSet<State>>> = Vec::with_capacity(t.lhs.len());
                for child in &t.lhs {
                    match reached.get(child) {
                        Some(sets) => options.push(sets.clone()),
                        None => break,
                    }
                }
                if options.len() != t.lhs.len() {
                    continue;
                }
                let candidates = by_symbol.get(&(t.label, t.lhs.len()));
                let mut found = Vec::new();
                for_each_combination(&options, |combo| {
                    let set: BTreeSet<State> = candidates
                        .into_iter()
                        .flatten()
                        .filter(|u| u.lhs.iter().zip(combo).all(|(q, set)| set.contains(q)))
                        .map(|u| u.rhs)
                        .collect();
                    found.push(set);
                });
                for set in found {
                    if self.accepting.contains(&t.rhs) && set.is_disjoint(&other.accepting) {
                        return false;
                    }
                    if insert_minimal(reached.entry(t.rhs).or_default(), set) {
                        changed = true;
                    }
                }
            }
        }
        true
    }

    /// Mutual language inclusion.
    pub fn is_equivalent(&self, other: &TreeAut) -> bool {
        self.is_included_in(other) && other.is_included_in(self)
    }

    /// Merge states that cannot be told apart by looking at most `height`
    /// levels down.
    ///
    /// Starting from the relation relating all states, each round keeps a pair
    /// related only if every transition into one is matched (by `matches`,
    /// with pairwise related children) by a transition into the other, and
    /// vice versa. Related states are then merged.
    pub fn height_abstraction<F>(&mut self, height: usize, matches: F)
    where
        F: Fn(&Transition, &Transition) -> bool,
    {
        let states: Vec<State> = self.states().into_iter().collect();
        let n = states.len();
        if n < 2 {
            return;
        }
        let index: HashMap<State, usize> = states.iter().enumerate().map(|(i, &s)| (s, i)).collect();

        let repr = {
            let mut incoming: Vec<Vec<&Transition>> = vec![Vec::new(); n];
            for t in &self.transitions {
                incoming[index[&t.rhs]].push(t);
            }

            let covers = |ts1: &[&Transition], ts2: &[&Transition], rel: &[Vec<bool>]| {
                ts1.iter().all(|t1| {
                    ts2.iter().any(|t2| {
                        t1.lhs.len() == t2.lhs.len()
                            && matches(t1, t2)
                            && t1.lhs.iter().zip(&t2.lhs).all(|(a, b)| rel[index[a]][index[b]])
                    })
                })
            };

            let mut rel = vec![vec![true; n]; n];
            for _ in 0..height {
                let mut next = rel.clone();
                for i in 0..n {
                    for j in (i + 1)..n {
                        if rel[i][j] && !(covers(&incoming[i], &incoming[j], &rel) && covers(&incoming[j], &incoming[i], &rel)) {
                            next[i][j] = false;
                            next[j][i] = false;
                        }
                    }
                }
                rel = next;
            }

            // Classes of the transitive closure; the smallest state represents its class.
            let mut parent: Vec<usize> = (0..n).collect();
            fn find(parent: &mut [usize], x: usize) -> usize {
                let mut root = x;
                while parent[root] != root {
                    root = parent[root];
                }
                let mut x = x;
                while parent[x] != root {
                    let next = parent[x];
                    parent[x] = root;
                    x = next;
                }
                root
            }
            for i in 0..n {
                for j in (i + 1)..n {
                    if rel[i][j] {
                        let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                        if a != b {
                            parent[a.max(b)] = a.min(b);
                        }
                    }
                }
            }
            let mut repr = HashMap::new();
            for i in 0..n {
                let r = find(&mut parent, i);
                if r != i {
                    repr.insert(states[i], states[r]);
                }
            }
            repr
        };

        if !repr.is_empty() {
            log::debug!("Height abstraction merges {} states", repr.len());
            self.merge_states(&repr);
        }
    }
}

/// Keep `sets` an antichain of minimal sets. Returns whether `set` was added.
fn insert_minimal(sets: &mut Vec<BTreeSet<State>>, set: BTreeSet<State>) -> bool {
    if sets.iter().any(|s| s.is_subset(&set)) {
        return false;
    }
    sets.retain(|s| !set.is_subset(s));
    sets.push(set);
    true
}

fn for_each_combination<T>(options: &[Vec<T>], mut f: impl FnMut(&[&T])) {
    if options.iter().any(|o| o.is_empty()) {
        return;
    }
    let mut indices = vec![0; options.len()];
    loop {
        let combo: Vec<&T> = indices.iter().zip(options).map(|(&i, o)| &o[i]).collect();
        f(&combo);
        // Advance the mixed-radix counter.
        let mut k = 0;
        loop {
            if k == indices.len() {
                return;
            }
            indices[k] += 1;
            if indices[k] < options[k].len() {
                break;
            }
            indices[k] = 0;
            k += 1;
        }
    }
}

impl fmt::Display for TreeAut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accepting: Vec<String> = self.accepting.iter().map(|s| format!("q{}", s)).collect();
        writeln!(f, "accepting: [{}]", accepting.join(", "))?;
        for t in &self.transitions {
            writeln!(f, "  {}", t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataId, LabelId};

    use test_log::test;

    fn node(id: usize) -> Symbol {
        Symbol::Node(LabelId::new(id))
    }
    fn leaf(id: usize) -> Symbol {
        Symbol::Data(DataId::new(id))
    }

    /// Lists `f(f(...f(a)))` with at least `min` occurrences of `f`.
    fn list(min: usize) -> TreeAut {
        let mut ta = TreeAut::new();
        let top = ta.fresh_state();
        let mut states = vec![top];
        for _ in 0..min {
            states.push(ta.fresh_state());
        }
        for w in states.windows(2) {
            ta.add_transition(node(1), vec![w[1]], w[0]);
        }
        let last = *states.last().unwrap();
        ta.add_transition(node(1), vec![last], last);
        ta.add_transition(leaf(1), vec![], last);
        ta.set_accepting(top);
        ta
    }

    #[test]
    fn test_fresh_state_zero_is_first() {
        let mut ta = TreeAut::new();
        assert_eq!(ta.fresh_state(), 0);
        assert_eq!(ta.fresh_state(), 1);
    }

    #[test]
    fn test_trim() {
        let mut ta = TreeAut::new();
        ta.add_transition(leaf(1), vec![], 1);
        ta.add_transition(node(1), vec![1], 0);
        // Unproductive: state 3 has no transitions.
        ta.add_transition(node(2), vec![3], 0);
        // Unreachable.
        ta.add_transition(leaf(2), vec![], 2);
        ta.set_accepting(0);
        ta.trim();
        assert_eq!(ta.len(), 2);
        assert_eq!(ta.states(), BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_inclusion() {
        let l0 = list(0);
        let l1 = list(1);
        let l2 = list(2);
        assert!(l2.is_included_in(&l1));
        assert!(l1.is_included_in(&l0));
        assert!(l2.is_included_in(&l0));
        assert!(!l0.is_included_in(&l1));
        assert!(!l1.is_included_in(&l2));
        assert!(l1.is_included_in(&l1));
    }

    #[test]
    fn test_inclusion_symbols_differ() {
        let mut a = TreeAut::new();
        a.add_transition(leaf(1), vec![], 0);
        a.set_accepting(0);
        let mut b = TreeAut::new();
        b.add_transition(leaf(2), vec![], 0);
        b.set_accepting(0);
        assert!(!a.is_included_in(&b));
        assert!(a.is_included_in(&a.union(&b)));
        assert!(b.is_included_in(&a.union(&b)));
    }

    #[test]
    fn test_inclusion_nondeterministic_other() {
        // other: f(q1, q2) where q1, q2 -> a | b; self: f(a, b).
        let mut other = TreeAut::new();
        for s in [1, 2] {
            other.add_transition(leaf(1), vec![], s);
            other.add_transition(leaf(2), vec![], s);
        }
        other.add_transition(node(1), vec![1, 2], 0);
        other.set_accepting(0);

        let mut this = TreeAut::new();
        this.add_transition(leaf(1), vec![], 1);
        this.add_transition(leaf(2), vec![], 2);
        this.add_transition(node(1), vec![1, 2], 0);
        this.set_accepting(0);

        assert!(this.is_included_in(&other));
        assert!(!other.is_included_in(&this));
    }

    #[test]
    fn test_union_and_compact() {
        let u = list(2).union(&list(1));
        assert!(u.is_equivalent(&list(1)));
        let c = u.compact();
        assert_eq!(c.final_state(), 0);
        assert!(c.is_equivalent(&u));
    }

    #[test]
    fn test_height_abstraction_folds_list() {
        // Exactly three nodes.
        let mut ta = TreeAut::new();
        let s: Vec<State> = (0..4).map(|_| ta.fresh_state()).collect();
        ta.add_transition(leaf(1), vec![], s[3]);
        ta.add_transition(node(1), vec![s[3]], s[2]);
        ta.add_transition(node(1), vec![s[2]], s[1]);
        ta.add_transition(node(1), vec![s[1]], s[0]);
        ta.set_accepting(s[0]);
        let before = ta.clone();

        ta.height_abstraction(1, |a, b| a.label == b.label);
        assert!(before.is_included_in(&ta));
        assert!(ta.is_equivalent(&list(1)));
    }

    #[test]
    fn test_height_abstraction_keeps_distinct_leaves() {
        let mut ta = TreeAut::new();
        ta.add_transition(leaf(1), vec![], 1);
        ta.add_transition(leaf(2), vec![], 2);
        ta.add_transition(node(1), vec![1, 2], 0);
        ta.set_accepting(0);
        let before = ta.clone();
        ta.height_abstraction(3, |a, b| a.label == b.label);
        assert_eq!(ta, before);
    }

    #[test]
    fn test_sub_automaton() {
        let mut ta = TreeAut::new();
        ta.add_transition(leaf(1), vec![], 3);
        ta.add_transition(node(1), vec![3], 2);
        ta.add_transition(node(2), vec![2], 0);
        ta.set_accepting(0);
        let sub = ta.sub_automaton(2);
        assert_eq!(sub.final_state(), 0);
        assert_eq!(sub.len(), 2);
    }

    #[test]
    fn test_combinations() {
        let options = vec![vec![1, 2], vec![3], vec![4, 5]];
        let mut seen = Vec::new();
        for_each_combination(&options, |c| seen.push(c.iter().map(|x| **x).collect::<Vec<_>>()));
        assert_eq!(seen.len(), 4);
        assert!(seen.contains(&vec![2, 3, 5]));

        let mut count = 0;
        for_each_combination::<i32>(&[], |_| count += 1);
        assert_eq!(count, 1);
    }
}
