//! Boxes: reusable parametric heap fragments.
//!
//! A box is a tree automaton describing the part of a node (and everything
//! hanging below it) reachable through a set of covered selectors. Inside the
//! box automaton, references to root `0` denote the node the box is attached
//! to and references to root `k >= 1` denote the `k`-th port. When a box is
//! used inside a node label, each port becomes one child of the transition.
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::Result;
use crate::label::{AbstractBox, Symbol};
use crate::registry::Registry;
use crate::ta::TreeAut;
use crate::types::BoxId;

/// One port of a box together with the selectors that lead to it.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Cutpoint {
    /// Box-local root index of the port (`>= 1`).
    pub root: usize,
    /// Offsets of the covered selectors pointing to the port.
    pub fwd_selectors: BTreeSet<usize>,
    /// Offset of the selector of the port pointing back to the origin, if any.
    pub bwd_selector: Option<usize>,
}

impl Cutpoint {
    pub fn new(root: usize, fwd_selectors: impl IntoIterator<Item = usize>, bwd_selector: Option<usize>) -> Self {
        Self {
            root,
            fwd_selectors: fwd_selectors.into_iter().collect(),
            bwd_selector,
        }
    }
}

/// Input part of a type-2 box.
#[derive(Debug, Clone)]
pub struct BoxInput {
    pub automaton: TreeAut,
    pub signature: Vec<Cutpoint>,
    /// Port through which the input part is entered.
    pub index: usize,
}

/// Numbering-independent fingerprint of a box, used to group comparable boxes.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Signature {
    coverage: Vec<usize>,
    ports: Vec<(Vec<usize>, Option<usize>)>,
    input: Option<(usize, Vec<(Vec<usize>, Option<usize>)>)>,
}

fn port_signature(cutpoints: &[Cutpoint]) -> Vec<(Vec<usize>, Option<usize>)> {
    cutpoints
        .iter()
        .map(|c| (c.fwd_selectors.iter().copied().collect(), c.bwd_selector))
        .collect()
}

#[derive(Debug, Clone)]
pub struct BoxDef {
    name: String,
    output: TreeAut,
    signature: Vec<Cutpoint>,
    coverage: BTreeSet<usize>,
    input: Option<BoxInput>,
    /// Selector translation table: for each port, the first forward selector
    /// and the backward selector.
    selectors: Vec<(Option<usize>, Option<usize>)>,
}

impl BoxDef {
    /// Create a type-1 box (output part only).
    pub fn new(output: TreeAut, signature: Vec<Cutpoint>, coverage: impl IntoIterator<Item = usize>) -> Self {
        let selectors = signature
            .iter()
            .map(|c| (c.fwd_selectors.iter().next().copied(), c.bwd_selector))
            .collect();
        Self {
            name: String::new(),
            output,
            signature,
            coverage: coverage.into_iter().collect(),
            input: None,
            selectors,
        }
    }

    /// Turn this box into a type-2 box with the given input part.
    pub fn with_input(mut self, input: BoxInput) -> Self {
        self.input = Some(input);
        self
    }

    pub(crate) fn finalize(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.output.trim();
        if let Some(input) = &mut self.input {
            input.automaton.trim();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn output(&self) -> &TreeAut {
        &self.output
    }
    pub fn cutpoints(&self) -> &[Cutpoint] {
        &self.signature
    }
    pub fn coverage(&self) -> &BTreeSet<usize> {
        &self.coverage
    }
    pub fn input(&self) -> Option<&BoxInput> {
        self.input.as_ref()
    }
    pub fn selectors(&self) -> &[(Option<usize>, Option<usize>)] {
        &self.selectors
    }

    /// Why the box cannot be used, if it cannot.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.output.is_empty_language() {
            return Err("output part accepts no tree".to_string());
        }
        if self.coverage.is_empty() {
            return Err("covers no selector".to_string());
        }
        if let Some(c) = self.signature.iter().find(|c| c.root == 0) {
            return Err(format!("cutpoint {:?} refers to the box origin", c.fwd_selectors));
        }
        Ok(())
    }

    /// Number of ports.
    pub fn arity(&self) -> usize {
        self.signature.len()
    }

    /// Whether the box has no input part.
    pub fn is_type1(&self) -> bool {
        self.input.is_none()
    }

    pub fn signature(&self) -> Signature {
        Signature {
            coverage: self.coverage.iter().copied().collect(),
            ports: port_signature(&self.signature),
            input: self
                .input
                .as_ref()
                .map(|i| (i.index, port_signature(&i.signature))),
        }
    }

    /// Language-level subsumption between boxes with equal signatures.
    pub fn simplified_less_than(&self, other: &BoxDef) -> bool {
        if self.signature() != other.signature() {
            return false;
        }
        if !self.output.is_included_in(&other.output) {
            return false;
        }
        match (&self.input, &other.input) {
            (None, None) => true,
            (Some(a), Some(b)) => a.automaton.is_included_in(&b.automaton),
            _ => false,
        }
    }

    /// Boxes nested in the node labels of this box.
    pub fn nested_boxes(&self, registry: &Registry) -> BTreeSet<BoxId> {
        let mut nested = BTreeSet::new();
        let automata = std::iter::once(&self.output).chain(self.input.as_ref().map(|i| &i.automaton));
        for ta in automata {
            for t in ta.transitions() {
                if let Symbol::Node(label) = t.label {
                    for b in registry.label(label).boxes() {
                        if let AbstractBox::Nested(id) = b {
                            nested.insert(*id);
                        }
                    }
                }
            }
        }
        nested
    }
}

impl fmt::Display for BoxDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let coverage: Vec<String> = self.coverage.iter().map(|o| o.to_string()).collect();
        writeln!(f, "box {} covering [{}] with {} port(s)", self.name, coverage.join(", "), self.arity())?;
        write!(f, "{}", self.output)
    }
}

/// Front end turning textual box definitions into [`BoxDef`]s.
///
/// `db` maps box names to their definitions, so that a definition may refer
/// to other boxes by name.
pub trait BoxParser {
    fn parse(&self, registry: &Registry, name: &str, db: &HashMap<String, String>) -> Result<BoxDef>;
}
