//! The analysis driver.
//!
//! Configurations are explored depth-first from a LIFO worklist. Every
//! successor is normalized; at loop entries it is additionally folded,
//! fused with the compatible configurations already accumulated there and
//! abstracted, and the fixpoint of the loop entry is extended until the
//! inclusion test succeeds. Learning a new box restarts the exploration
//! from the initial configuration with the larger box set.
use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::boxes::BoxParser;
use crate::config::EngineConfig;
use crate::data::Data;
use crate::error::{Error, ProgramError, Result, TraceEntry};
use crate::exec::{Semantics, Successor};
use crate::fa::{same_top, ForestAut, IP_INDEX};
use crate::fixpoint::FixpointState;
use crate::fold::{BoxCatalog, FoldOptions, FoldOutcome};
use crate::frame::Frame;
use crate::loops::LoopAnalyser;
use crate::normalize::NormalizationRecord;
use crate::program::{Location, Program, ProgramPoint};
use crate::registry::Registry;
use crate::ta::TreeAut;
use crate::trace::{DerivationHistory, Item, ItemId, ItemKind};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Step {
    Continue,
    Restart,
}

/// Outcome of replaying a counterexample without abstraction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Replay {
    /// The violation is reproduced.
    Real,
    /// The path is infeasible; the item is the last abstracted configuration on it.
    Spurious(ItemId),
}

/// Fixpoint accumulated at one loop entry.
#[derive(Debug, Clone)]
pub struct FixpointReport {
    pub point: ProgramPoint,
    pub location: Location,
    pub fixpoint: TreeAut,
    pub configurations: Vec<ForestAut>,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub fixpoints: Vec<FixpointReport>,
    pub states_evaluated: usize,
    pub traces_evaluated: usize,
    pub restarts: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    states_evaluated: usize,
    traces_evaluated: usize,
}

pub struct Engine<'p> {
    program: &'p Program,
    config: EngineConfig,
    registry: Registry,
    catalog: BoxCatalog,
    frames: Vec<Frame>,
    loops: Vec<LoopAnalyser>,
    states: Vec<FixpointState>,
    state_index: HashMap<ProgramPoint, usize>,
    queue: Vec<ItemId>,
    history: DerivationHistory,
    rng: ChaCha8Rng,
    debug_flag: bool,
    stats: Stats,
}

impl<'p> Engine<'p> {
    /// Prepare an engine for `program`, registering its struct types.
    pub fn new(program: &'p Program, config: EngineConfig) -> Result<Self> {
        let registry = Registry::with_policy(config.box_policy);
        for s in program.structs() {
            let offsets = program.selectors(s, 0).iter().map(|sel| sel.offset).collect();
            registry.register_type(&program.type_name(s), offsets)?;
        }
        let frames = program.fncs.iter().map(|f| Frame::new(program, f)).collect();
        let loops = program.fncs.iter().enumerate().map(|(i, f)| LoopAnalyser::new(i, f)).collect();
        let catalog = BoxCatalog::new(&registry);
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Ok(Self {
            program,
            config,
            registry,
            catalog,
            frames,
            loops,
            states: Vec::new(),
            state_index: HashMap::new(),
            queue: Vec::new(),
            history: DerivationHistory::new(),
            rng,
            debug_flag: false,
            stats: Stats::default(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load a box library. Boxes are parsed in name order.
    pub fn load_boxes<P: BoxParser>(&mut self, db: &HashMap<String, String>, parser: &P) -> Result<()> {
        let mut names: Vec<&String> = db.keys().collect();
        names.sort();
        for name in names {
            let def = parser.parse(&self.registry, name, db)?;
            def.validate().map_err(|reason| Error::box_definition(name.as_str(), reason))?;
            let id = self.registry.load_box(name, def);
            debug!("Loaded box {} as {:?}", name, id);
        }
        self.catalog = BoxCatalog::new(&self.registry);
        Ok(())
    }

    /// Dump the configuration processed at the next loop entry.
    pub fn set_debug_flag(&mut self) {
        self.debug_flag = true;
    }

    /// Analyse the function named `entry`.
    pub fn run(&mut self, entry: &str) -> Result<Report> {
        let fnc = self
            .program
            .fnc_by_name(entry)
            .ok_or_else(|| Error::UnknownFunction(entry.to_string()))?;
        info!("Analysing {}", entry);

        let mut restarts = 0;
        loop {
            self.reset();
            match self.explore(fnc)? {
                Step::Continue => break,
                Step::Restart => {
                    restarts += 1;
                    if restarts > self.config.max_restarts {
                        return Err(Error::RestartLimit(self.config.max_restarts));
                    }
                    info!("Restarting with {} boxes (restart {})", self.registry.catalog().len(), restarts);
                }
            }
        }

        info!(
            "Analysis of {} finished: {} states evaluated, {} restarts",
            entry, self.stats.states_evaluated, restarts
        );
        Ok(self.report(restarts))
    }

    /// Forget everything but the registry.
    fn reset(&mut self) {
        self.states.clear();
        self.state_index.clear();
        self.queue.clear();
        self.history.init();
        self.catalog = BoxCatalog::new(&self.registry);
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
    }

    fn report(&self, restarts: usize) -> Report {
        let fixpoints = self
            .states
            .iter()
            .filter(|s| s.is_entry_point() && !s.is_empty())
            .map(|s| FixpointReport {
                point: s.point(),
                location: self.program.insn(s.point()).loc.clone(),
                fixpoint: s.fixpoint().clone(),
                configurations: s.configurations(&self.registry),
            })
            .collect();
        Report {
            fixpoints,
            states_evaluated: self.stats.states_evaluated,
            traces_evaluated: self.stats.traces_evaluated,
            restarts,
        }
    }

    fn state(&mut self, point: ProgramPoint) -> usize {
        if let Some(&index) = self.state_index.get(&point) {
            return index;
        }
        let entry = self.loops[point.fnc].is_entry_point(point);
        let index = self.states.len();
        self.states
            .push(FixpointState::new(point, entry, self.config.abstraction_height));
        self.state_index.insert(point, index);
        index
    }

    fn explore(&mut self, fnc: usize) -> Result<Step> {
        let mut fa = ForestAut::new();
        self.frames[fnc].create(&self.registry, &mut fa);
        let start = ProgramPoint::block_start(fnc, self.program.fnc(fnc).entry);
        if self.enqueue(None, start, fa)? == Step::Restart {
            return Ok(Step::Restart);
        }

        while let Some(id) = self.queue.pop() {
            // Dropped by a refinement.
            if !self.history.contains(id) {
                continue;
            }
            if self.process(id)? == Step::Restart {
                return Ok(Step::Restart);
            }
        }
        Ok(Step::Continue)
    }

    fn process(&mut self, id: ItemId) -> Result<Step> {
        self.history.get_mut(id).queued = false;
        self.stats.states_evaluated += 1;
        let state_index = self.history.get(id).point;
        let config = self.history.get(id).config.clone();
        let point = self.states[state_index].point();

        if self.states[state_index].is_entry_point() {
            if self.debug_flag {
                self.debug_flag = false;
                debug!("Configuration at {}:\n{}", point, config.dump(&self.registry));
            }
            if self.states[state_index].test_inclusion(&self.registry, &config) {
                debug!("Item {} at {} is covered by the fixpoint", id, point);
                self.destroy_branch(id);
                return Ok(Step::Continue);
            }
            // Extended as soon as the test fails, so that the loop body is
            // explored against the new fixpoint; collecting the branch later
            // extends it again, which is idempotent.
            self.states[state_index].extend_fixpoint(&self.registry, &config, id);
        }

        let sem = Semantics::new(self.program, &self.registry, point.fnc, &self.frames[point.fnc]);
        let prepared = match sem.prepare(point, &config) {
            Ok(prepared) => prepared,
            Err(Error::Program(e)) => return self.violation(id, e),
            Err(e) => return Err(e),
        };
        let mut steps = Vec::with_capacity(prepared.len());
        for (fa, places) in prepared {
            let result = sem.execute(point, &fa, &places, &mut self.rng);
            steps.push((fa, result));
        }

        // Link every child before any branch is collected.
        let children: Vec<_> = steps
            .into_iter()
            .map(|(fa, result)| {
                let child = self
                    .history
                    .add(Item::new(fa, ItemKind::Semantic, state_index), Some(id));
                (child, result)
            })
            .collect();
        for (child, result) in children {
            let successors = match result {
                Ok(successors) => successors,
                Err(Error::Program(e)) => return self.violation(child, e),
                Err(e) => return Err(e),
            };
            for Successor { target, config } in successors {
                if self.enqueue(Some(child), target, config)? == Step::Restart {
                    return Ok(Step::Restart);
                }
            }
            if self.history.get(child).children.is_empty() {
                self.destroy_branch(child);
            }
        }
        Ok(Step::Continue)
    }

    /// Roots that must survive normalization as separate roots.
    fn interesting(&self, fa: &ForestAut) -> BTreeSet<usize> {
        fa.nearby_references(&self.registry, fa.frame_root())
    }

    /// Normalize a successor (and abstract it at loop entries), record it
    /// and push it on the worklist.
    fn enqueue(&mut self, parent: Option<ItemId>, target: ProgramPoint, mut fa: ForestAut) -> Result<Step> {
        let state_index = self.state(target);
        fa.set_var(IP_INDEX, Data::Native(state_index));

        let interesting = self.interesting(&fa);
        let mut record = match fa.normalize(&self.registry, &interesting) {
            Ok(record) => record,
            Err(Error::Program(e)) => return self.violation_at(parent, e),
            Err(e) => return Err(e),
        };

        if self.states[state_index].is_entry_point() {
            let options = FoldOptions {
                discover: self.config.box_discovery,
                restart_on_new: self.config.restart_on_box_discovery,
            };
            match fa.fold(&self.registry, &mut self.catalog, options) {
                FoldOutcome::Restart => return Ok(Step::Restart),
                FoldOutcome::Folded => {
                    let interesting = self.interesting(&fa);
                    record = match fa.normalize(&self.registry, &interesting) {
                        Ok(record) => record,
                        Err(Error::Program(e)) => return self.violation_at(parent, e),
                        Err(e) => return Err(e),
                    };
                }
                FoldOutcome::Unchanged => {}
            }

            let state = &self.states[state_index];
            let compatible = ForestAut::load_compatible_roots(state.fixpoint(), &self.registry, &fa, |i, a, b| {
                i != 0 || same_top(a, b)
            });
            fa.fuse(&compatible, |i| i != 0);
            for root in 1..fa.root_count() {
                fa.height_abstraction(&self.registry, root, state.abs_height, self.config.matcher);
            }
        }

        let mut item = Item::new(fa, ItemKind::Normalization(record), state_index);
        item.queued = true;
        let id = self.history.add(item, parent);
        self.queue.push(id);
        Ok(Step::Continue)
    }

    /// Remove a finished item and the ancestors it leaves childless.
    fn destroy_branch(&mut self, id: ItemId) {
        let registry = &self.registry;
        let states = &mut self.states;
        self.history.destroy_branch(id, |removed, item| {
            let state = &mut states[item.point];
            if item.is_normalization() && state.is_entry_point() {
                state.extend_fixpoint(registry, &item.config, removed);
            }
        });
    }

    fn violation_at(&mut self, item: Option<ItemId>, e: ProgramError) -> Result<Step> {
        match item {
            Some(item) => self.violation(item, e),
            None => Err(e.into()),
        }
    }

    /// Handle a program error raised while processing `item`.
    fn violation(&mut self, item: ItemId, e: ProgramError) -> Result<Step> {
        self.stats.traces_evaluated += 1;
        let state = &self.states[self.history.get(item).point];
        let location = self.program.insn(state.point()).loc.clone();
        let e = e.at(&location);
        warn!("{}", e);

        let replay = self.replay(item);
        if self.config.refine_spurious {
            if let Replay::Spurious(abstracted) = replay {
                if self.refine(abstracted) {
                    return Ok(Step::Continue);
                }
            }
        }

        let trace = self.trace(item);
        for entry in &trace {
            debug!("trace: {}", entry);
        }
        Err(Error::Program(e.with_trace(trace)))
    }

    /// Normalization items from the root to `item`, oldest first.
    fn path(&self, item: ItemId) -> Vec<ItemId> {
        let mut path: Vec<ItemId> = self
            .history
            .path_to_root(item)
            .into_iter()
            .filter(|&id| self.history.get(id).is_normalization())
            .collect();
        path.reverse();
        path
    }

    /// Instructions executed on the way to `item`.
    pub fn trace(&self, item: ItemId) -> Vec<TraceEntry> {
        self.path(item)
            .into_iter()
            .map(|id| {
                let point = self.states[self.history.get(id).point].point();
                let fnc = self.program.fnc(point.fnc);
                let insn = self.program.insn(point);
                TraceEntry {
                    location: insn.loc.clone(),
                    instruction: fnc.describe_insn(insn),
                }
            })
            .collect()
    }

    /// Normalized successors of every configuration in `configs` at `point`
    /// continuing at `target`, with their normalization records, or the
    /// first program error.
    fn successors(
        &mut self,
        point: ProgramPoint,
        configs: &[ForestAut],
        target: Option<ProgramPoint>,
    ) -> std::result::Result<Vec<(ForestAut, NormalizationRecord)>, ProgramError> {
        let sem = Semantics::new(self.program, &self.registry, point.fnc, &self.frames[point.fnc]);
        let mut out = Vec::new();
        for config in configs {
            let prepared = sem.prepare(point, config).map_err(into_program)?;
            for (fa, places) in prepared {
                let successors = sem.execute(point, &fa, &places, &mut self.rng).map_err(into_program)?;
                for Successor { target: t, config } in successors {
                    if target.is_some_and(|target| target != t) {
                        continue;
                    }
                    let mut config = config;
                    let index = self.state_index.get(&t).copied().unwrap_or(usize::MAX);
                    config.set_var(IP_INDEX, Data::Native(index));
                    let interesting = config.nearby_references(&self.registry, config.frame_root());
                    let record = config.normalize(&self.registry, &interesting).map_err(into_program)?;
                    out.push((config, record));
                }
            }
        }
        Ok(out)
    }

    /// Fold a replayed configuration with the known boxes, without learning
    /// new ones, so that it is comparable with the abstract run.
    fn refold(&mut self, config: &mut ForestAut, record: &mut NormalizationRecord) -> std::result::Result<(), ProgramError> {
        let options = FoldOptions {
            discover: false,
            restart_on_new: false,
        };
        if config.fold(&self.registry, &mut self.catalog, options) == FoldOutcome::Folded {
            let interesting = self.interesting(config);
            *record = config.normalize(&self.registry, &interesting).map_err(into_program)?;
        }
        Ok(())
    }

    /// The last loop-entry item of `path`: the abstraction a spurious path
    /// is blamed on.
    fn spurious(&self, path: &[ItemId]) -> Replay {
        match path
            .iter()
            .rev()
            .find(|&&id| self.states[self.history.get(id).point].is_entry_point())
        {
            Some(&abstracted) => {
                info!("Counterexample through {} is spurious", abstracted);
                Replay::Spurious(abstracted)
            }
            None => Replay::Real,
        }
    }

    /// Re-execute `path` without abstraction. Every position gets the
    /// concrete configurations reaching it, with their normalization
    /// records. The last instruction must fail again.
    fn forward(&mut self, path: &[ItemId]) -> std::result::Result<Vec<Vec<(ForestAut, NormalizationRecord)>>, Replay> {
        let Some(&first) = path.first() else {
            return Err(Replay::Real);
        };
        let start = self.history.get(first);
        let record = match &start.kind {
            ItemKind::Normalization(record) => record.clone(),
            ItemKind::Semantic => NormalizationRecord::default(),
        };
        let mut forward = vec![vec![(start.config.clone(), record)]];

        for (w, pair) in path.windows(2).enumerate() {
            let point = self.states[self.history.get(pair[0]).point].point();
            let to = self.history.get(pair[1]).point;
            let target = self.states[to].point();
            let configs: Vec<ForestAut> = forward[w].iter().map(|(c, _)| c.clone()).collect();
            let mut next = match self.successors(point, &configs, Some(target)) {
                Ok(next) => next,
                // Fails earlier than the abstract run did.
                Err(_) => return Err(Replay::Real),
            };
            if next.is_empty() {
                return Err(self.spurious(&path[..=w]));
            }
            if self.states[to].is_entry_point() {
                for (config, record) in next.iter_mut() {
                    if self.refold(config, record).is_err() {
                        return Err(Replay::Real);
                    }
                }
            }
            forward.push(next);
        }

        let last = self.states[self.history.get(path[path.len() - 1]).point].point();
        let configs: Vec<ForestAut> = forward[forward.len() - 1].iter().map(|(c, _)| c.clone()).collect();
        match self.successors(last, &configs, None) {
            Err(_) => Ok(forward),
            Ok(_) => Err(self.spurious(path)),
        }
    }

    /// Walk the replayed path from the failure back to its start. At every
    /// position, keep a concrete configuration covered by the abstract one
    /// and undo its normalization. Fails with the position where no
    /// concrete configuration is left.
    fn backward(
        &self,
        path: &[ItemId],
        forward: &[Vec<(ForestAut, NormalizationRecord)>],
    ) -> std::result::Result<Vec<ForestAut>, usize> {
        let mut steps = Vec::with_capacity(path.len());
        for (k, (&id, configs)) in path.iter().zip(forward).enumerate().rev() {
            let covering = self.history.get(id).config.to_tree_aut(&self.registry);
            let raw = configs.iter().find_map(|(config, record)| {
                if !config.to_tree_aut(&self.registry).is_included_in(&covering) {
                    return None;
                }
                let mut raw = config.clone();
                raw.denormalize(&self.registry, record).then_some(raw)
            });
            match raw {
                Some(raw) => steps.push(raw),
                None => return Err(k),
            }
        }
        steps.reverse();
        Ok(steps)
    }

    /// Rebuild the concrete counterexample ending in `item`: replay its path
    /// forward without abstraction, then backwards undoing normalization.
    pub fn replay(&mut self, item: ItemId) -> Replay {
        let path = self.path(item);
        let forward = match self.forward(&path) {
            Ok(forward) => forward,
            Err(replay) => return replay,
        };
        match self.backward(&path, &forward) {
            Ok(steps) => {
                for (id, config) in path.iter().zip(&steps) {
                    debug!("Counterexample at {}:\n{}", id, config.dump(&self.registry));
                }
                Replay::Real
            }
            Err(k) => self.spurious(&path[..=k]),
        }
    }

    /// Raise the abstraction height at the loop entry of `abstracted` and
    /// re-explore from the configuration it was derived from. Returns
    /// `false` if the height is already at its bound.
    fn refine(&mut self, abstracted: ItemId) -> bool {
        let state_index = self.history.get(abstracted).point;
        let state = &mut self.states[state_index];
        if state.abs_height >= self.config.max_abstraction_height {
            return false;
        }
        state.abs_height += 1;
        info!("Raising abstraction height at {} to {}", state.point(), state.abs_height);

        // The normalization item the abstracted configuration was computed from.
        let Some(origin) = self
            .history
            .path_to_root(abstracted)
            .into_iter()
            .skip(1)
            .find(|&id| self.history.get(id).is_normalization())
        else {
            return false;
        };

        let mut invalid = HashSet::new();
        self.history.invalidate_subtree(origin, |id, _| {
            invalid.insert(id);
        });
        invalid.insert(origin);
        for state in &mut self.states {
            state.recompute(&self.registry, |id| !invalid.contains(&id));
        }
        self.history.get_mut(origin).queued = true;
        self.queue.push(origin);
        true
    }
}

fn into_program(e: Error) -> ProgramError {
    match e {
        Error::Program(e) => e,
        other => ProgramError::new(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{BoxDef, Cutpoint};
    use crate::label::{SelData, Symbol};
    use crate::program::{BinaryOp, BlockId, FncBuilder, Insn, Operand, ProgramBuilder};

    use test_log::test;

    /// `main() { int i = 0; while (i == 0) { i = nondet(); } }`
    fn nondet_loop() -> Program {
        let mut pb = ProgramBuilder::new();
        let int = pb.int();
        let boolean = pb.bool();
        let mut fb = FncBuilder::new("main");
        let i = fb.var("i", int);
        let c = fb.var("c", boolean);
        let entry = fb.block("entry");
        let head = fb.block("head");
        let body = fb.block("body");
        let exit = fb.block("exit");
        fb.push(entry, Insn::assign(Operand::var(i, int), Operand::int(0, int)));
        fb.push(entry, Insn::jmp(head));
        fb.push(head, Insn::binop(BinaryOp::Eq, Operand::var(c, boolean), Operand::var(i, int), Operand::int(0, int)));
        fb.push(head, Insn::cond(Operand::var(c, boolean), body, exit));
        fb.push(body, Insn::call(Operand::var(i, int), "__nondet", vec![]));
        fb.push(body, Insn::jmp(head));
        fb.push(exit, Insn::ret());
        pb.function(fb.build());
        pb.build()
    }

    #[test]
    fn test_unknown_function() {
        let program = nondet_loop();
        let mut engine = Engine::new(&program, EngineConfig::default()).unwrap();
        assert!(matches!(engine.run("nope"), Err(Error::UnknownFunction(_))));
    }

    #[test]
    fn test_scalar_loop_converges() {
        let program = nondet_loop();
        let mut engine = Engine::new(&program, EngineConfig::default()).unwrap();
        let report = engine.run("main").unwrap();
        assert_eq!(report.restarts, 0);
        assert_eq!(report.fixpoints.len(), 1);
        assert_eq!(report.fixpoints[0].point, ProgramPoint::block_start(0, BlockId(1)));
        // i is 0 on entry and unknown after an iteration.
        assert_eq!(report.fixpoints[0].configurations.len(), 2);
        assert_eq!(report.traces_evaluated, 0);
    }

    #[test]
    fn test_same_seed_same_exploration() {
        let program = nondet_loop();
        let run = || {
            let mut engine = Engine::new(&program, EngineConfig { seed: 7, ..Default::default() }).unwrap();
            engine.run("main").unwrap().states_evaluated
        };
        assert_eq!(run(), run());
    }

    /// `main() { int i = 5; free(i); }`
    fn free_int() -> Program {
        let mut pb = ProgramBuilder::new();
        let int = pb.int();
        let mut fb = FncBuilder::new("main");
        let i = fb.var("i", int);
        let entry = fb.block("entry");
        fb.push(entry, Insn::assign(Operand::var(i, int), Operand::int(5, int)));
        fb.push(entry, Insn::call(Operand::void(), "free", vec![Operand::var(i, int)]));
        fb.push(entry, Insn::ret());
        pb.function(fb.build());
        pb.build()
    }

    #[test]
    fn test_counterexample_reconstructed() {
        let program = free_int();
        let config = EngineConfig {
            refine_spurious: true,
            ..Default::default()
        };
        let mut engine = Engine::new(&program, config).unwrap();
        match engine.run("main") {
            Err(Error::Program(e)) => assert_eq!(e.message, "releasing non-pointer value"),
            other => panic!("expected a violation, got {:?}", other.map(|r| r.states_evaluated)),
        }

        let failing: Vec<ItemId> = engine
            .history
            .iter()
            .filter(|(_, item)| item.children.is_empty())
            .map(|(id, _)| id)
            .collect();
        assert_eq!(failing.len(), 1);
        let path = engine.path(failing[0]);
        assert_eq!(path.len(), 2);

        let forward = engine.forward(&path).unwrap();
        assert_eq!(forward.len(), 2);
        let steps = engine.backward(&path, &forward).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].read_selector(engine.registry(), steps[1].frame_root(), 0), Data::Int(5));
        assert_eq!(engine.replay(failing[0]), Replay::Real);
    }

    /// Every name is a `next` segment, except `broken`, which accepts nothing.
    struct Segments;

    impl BoxParser for Segments {
        fn parse(&self, registry: &Registry, name: &str, _db: &HashMap<String, String>) -> Result<BoxDef> {
            let mut ta = TreeAut::new();
            if name != "broken" {
                let label = registry.intern_label(vec![registry.selector(SelData::new(0, 8))]);
                let top = ta.fresh_state();
                let leaf = ta.fresh_state();
                ta.add_transition(Symbol::Data(registry.intern_value(Data::reference(1))), vec![], leaf);
                ta.add_transition(Symbol::Node(label), vec![leaf], top);
                ta.set_accepting(top);
            }
            Ok(BoxDef::new(ta, vec![Cutpoint::new(1, [0], None)], [0]))
        }
    }

    #[test]
    fn test_load_boxes() {
        let program = nondet_loop();
        let mut engine = Engine::new(&program, EngineConfig::default()).unwrap();
        let db = HashMap::from([("segment".to_string(), String::new())]);
        engine.load_boxes(&db, &Segments).unwrap();
        let catalog = engine.registry().catalog();
        assert_eq!(catalog.len(), 1);
        assert_eq!(engine.registry().box_def(catalog[0]).name(), "segment");

        let db = HashMap::from([("broken".to_string(), String::new())]);
        match engine.load_boxes(&db, &Segments) {
            Err(Error::BoxDefinition { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("expected an invalid box, got {:?}", other),
        }
        assert_eq!(engine.registry().catalog().len(), 1);
    }
}
