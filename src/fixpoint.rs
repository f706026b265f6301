//! Per-program-point accumulation of reached configurations.
use log::debug;

use crate::fa::ForestAut;
use crate::program::ProgramPoint;
use crate::registry::Registry;
use crate::ta::TreeAut;
use crate::trace::ItemId;

#[derive(Debug, Clone)]
pub struct FixpointState {
    point: ProgramPoint,
    entry_point: bool,
    /// Height of the abstraction applied at this point.
    pub abs_height: usize,
    /// Union of the `to_tree_aut` images of all members.
    fwd_conf: TreeAut,
    members: Vec<(ItemId, ForestAut)>,
}

impl FixpointState {
    pub fn new(point: ProgramPoint, entry_point: bool, abs_height: usize) -> Self {
        Self {
            point,
            entry_point,
            abs_height,
            fwd_conf: TreeAut::new(),
            members: Vec::new(),
        }
    }

    pub fn point(&self) -> ProgramPoint {
        self.point
    }

    pub fn is_entry_point(&self) -> bool {
        self.entry_point
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Items whose configurations were joined into the fixpoint.
    pub fn members(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }

    /// Whether `config` is already covered.
    pub fn test_inclusion(&self, registry: &Registry, config: &ForestAut) -> bool {
        if self.members.is_empty() {
            return false;
        }
        config.to_tree_aut(registry).is_included_in(&self.fwd_conf)
    }

    /// Join `config` into the fixpoint unless already covered. Returns whether it was added.
    pub fn extend_fixpoint(&mut self, registry: &Registry, config: &ForestAut, item: ItemId) -> bool {
        if self.test_inclusion(registry, config) {
            return false;
        }
        self.join(registry, config);
        self.members.push((item, config.clone()));
        debug!("Fixpoint at {} extended by item {} ({} members)", self.point, item, self.members.len());
        true
    }

    fn join(&mut self, registry: &Registry, config: &ForestAut) {
        let ta = config.to_tree_aut(registry);
        self.fwd_conf = if self.members.is_empty() {
            ta
        } else {
            self.fwd_conf.union(&ta)
        };
    }

    /// Rebuild the accumulator from the members accepted by `keep`.
    pub fn recompute<F>(&mut self, registry: &Registry, mut keep: F)
    where
        F: FnMut(ItemId) -> bool,
    {
        let members = std::mem::take(&mut self.members);
        self.fwd_conf = TreeAut::new();
        for (id, config) in members {
            if keep(id) {
                self.join(registry, &config);
                self.members.push((id, config));
            }
        }
    }

    pub fn fixpoint(&self) -> &TreeAut {
        &self.fwd_conf
    }

    /// The accumulated configurations, split per `Vars` transition.
    pub fn configurations(&self, registry: &Registry) -> Vec<ForestAut> {
        if self.members.is_empty() {
            return Vec::new();
        }
        ForestAut::decompose(&self.fwd_conf, registry)
    }
}
