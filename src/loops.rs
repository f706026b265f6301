//! Loop-entry detection.
//!
//! A block is a loop entry when it is the target of a back edge of the
//! depth-first traversal of the control-flow graph starting at the entry
//! block. Fixpoints are only accumulated (and abstraction only applied) at
//! the first instruction of such blocks.
use std::collections::BTreeSet;

use log::debug;

use crate::program::{BlockId, Fnc, ProgramPoint};

#[derive(Debug, Clone)]
pub struct LoopAnalyser {
    fnc: usize,
    entries: BTreeSet<BlockId>,
}

impl LoopAnalyser {
    pub fn new(index: usize, fnc: &Fnc) -> Self {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::New; fnc.blocks.len()];
        let mut entries = BTreeSet::new();
        // Stack of (block, successors, next successor index).
        let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = Vec::new();
        marks[fnc.entry.0] = Mark::OnStack;
        stack.push((fnc.entry, fnc.successors(fnc.entry), 0));

        while let Some((block, succs, next)) = stack.last_mut() {
            if *next == succs.len() {
                marks[block.0] = Mark::Done;
                stack.pop();
                continue;
            }
            let target = succs[*next];
            *next += 1;
            match marks[target.0] {
                Mark::OnStack => {
                    entries.insert(target);
                }
                Mark::New => {
                    marks[target.0] = Mark::OnStack;
                    stack.push((target, fnc.successors(target), 0));
                }
                Mark::Done => {}
            }
        }

        debug!(
            "Loop entries of {}: {:?}",
            fnc.name,
            entries.iter().map(|b| b.to_string()).collect::<Vec<_>>()
        );
        Self { fnc: index, entries }
    }

    pub fn is_entry_point(&self, point: ProgramPoint) -> bool {
        point.fnc == self.fnc && point.insn == 0 && self.entries.contains(&point.block)
    }

    pub fn entries(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries.iter().copied()
    }
}
