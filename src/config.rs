use crate::fa::Matcher;
use crate::registry::BoxPolicy;

/// Tuning knobs of the analysis.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial height of the abstraction at loop entries.
    pub abstraction_height: usize,
    /// Upper bound for heights raised by refinement.
    pub max_abstraction_height: usize,
    /// Learn new boxes from repeated shapes.
    pub box_discovery: bool,
    /// Start over whenever a new box is learned.
    pub restart_on_box_discovery: bool,
    pub max_restarts: usize,
    /// Replay counterexamples and refine the abstraction when they are spurious.
    pub refine_spurious: bool,
    /// Seed of the generator deciding the order of nondeterministic branches.
    pub seed: u64,
    pub box_policy: BoxPolicy,
    pub matcher: Matcher,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            abstraction_height: 1,
            max_abstraction_height: 4,
            box_discovery: true,
            restart_on_box_discovery: true,
            max_restarts: 16,
            refine_spurious: false,
            seed: 0,
            box_policy: BoxPolicy::default(),
            matcher: Matcher::default(),
        }
    }
}
