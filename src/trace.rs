//! Derivation history of explored configurations.
//!
//! Every configuration produced by the engine is recorded as an [`Item`]
//! with a link to the configuration it was derived from. Items form a
//! forest; an item is removed once it is fully processed and has no
//! children left, so that only the paths still needed for counterexample
//! reconstruction are kept. Slots of removed items are reused; an
//! [`ItemId`] carries the generation of its slot, so a stale id never
//! refers to a newer item.
use std::collections::BTreeSet;
use std::fmt;

use log::trace;

use crate::fa::ForestAut;
use crate::normalize::NormalizationRecord;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ItemId {
    index: usize,
    generation: u32,
}

impl ItemId {
    pub fn index(self) -> usize {
        self.index
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}.{}", self.index, self.generation)
        }
    }
}

/// How an item was derived from its parent.
#[derive(Debug, Clone)]
pub enum ItemKind {
    /// The parent, normalized (and possibly abstracted).
    Normalization(NormalizationRecord),
    /// The result of executing the parent's instruction.
    Semantic,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub config: ForestAut,
    pub kind: ItemKind,
    pub parent: Option<ItemId>,
    pub children: BTreeSet<ItemId>,
    /// Index of the fixpoint state (program point) the item belongs to.
    pub point: usize,
    /// Waiting in the engine queue.
    pub queued: bool,
}

impl Item {
    pub fn new(config: ForestAut, kind: ItemKind, point: usize) -> Self {
        Self {
            config,
            kind,
            parent: None,
            children: BTreeSet::new(),
            point,
            queued: false,
        }
    }

    pub fn is_normalization(&self) -> bool {
        matches!(self.kind, ItemKind::Normalization(_))
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    item: Option<Item>,
}

#[derive(Debug, Default)]
pub struct DerivationHistory {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl DerivationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all items.
    pub fn init(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of allocated slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record `item` as a child of `parent`.
    pub fn add(&mut self, mut item: Item, parent: Option<ItemId>) -> ItemId {
        item.parent = parent;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.item = Some(item);
                ItemId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    item: Some(item),
                });
                ItemId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        if let Some(p) = parent {
            self.get_mut(p).children.insert(id);
        }
        self.live += 1;
        trace!("Added item {} with parent {:?}", id, parent);
        id
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.try_get(id).is_some()
    }

    pub fn try_get(&self, id: ItemId) -> Option<&Item> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.item.as_ref())
    }

    fn try_get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.item.as_mut())
    }

    /// # Panics
    ///
    /// Panics if the item was removed.
    pub fn get(&self, id: ItemId) -> &Item {
        match self.try_get(id) {
            Some(item) => item,
            None => panic!("Item {} was removed", id),
        }
    }

    pub fn get_mut(&mut self, id: ItemId) -> &mut Item {
        match self.try_get_mut(id) {
            Some(item) => item,
            None => panic!("Item {} was removed", id),
        }
    }

    /// Live items, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &Item)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.item.as_ref().map(|item| {
                let id = ItemId {
                    index,
                    generation: slot.generation,
                };
                (id, item)
            })
        })
    }

    /// Live item holding a configuration equal to `config`.
    pub fn find(&self, config: &ForestAut) -> Option<ItemId> {
        self.iter().find(|(_, item)| item.config == *config).map(|(id, _)| id)
    }

    /// Remove a childless item, unlinking it from its parent.
    pub fn remove(&mut self, id: ItemId) -> Item {
        let item = match self
            .slots
            .get_mut(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.item.take())
        {
            Some(item) => item,
            None => panic!("Item {} was removed", id),
        };
        assert!(item.children.is_empty(), "Removing item {} with children", id);
        if let Some(p) = item.parent {
            if let Some(parent) = self.try_get_mut(p) {
                parent.children.remove(&id);
            }
        }
        self.free.push(id.index);
        self.live -= 1;
        item
    }

    /// Remove `id` and then, walking up, every ancestor left without
    /// children. `removed` is called for each removed ancestor.
    pub fn destroy_branch<F>(&mut self, id: ItemId, mut removed: F)
    where
        F: FnMut(ItemId, Item),
    {
        let mut parent = self.remove(id).parent;
        while let Some(p) = parent {
            if !self.get(p).children.is_empty() || self.get(p).queued {
                break;
            }
            let item = self.remove(p);
            parent = item.parent;
            removed(p, item);
        }
    }

    /// Remove every descendant of `id`, keeping `id` itself. `removed` is
    /// called for each of them, children before parents.
    pub fn invalidate_subtree<F>(&mut self, id: ItemId, mut removed: F)
    where
        F: FnMut(ItemId, Item),
    {
        let mut stack: Vec<ItemId> = self.get(id).children.iter().copied().collect();
        let mut order = Vec::new();
        while let Some(c) = stack.pop() {
            order.push(c);
            stack.extend(self.get(c).children.iter().copied());
        }
        for c in order.into_iter().rev() {
            let item = self.remove(c);
            removed(c, item);
        }
    }

    /// `id` and its ancestors, `id` first.
    pub fn path_to_root(&self, id: ItemId) -> Vec<ItemId> {
        let mut path = vec![id];
        let mut current = self.get(id).parent;
        while let Some(p) = current {
            path.push(p);
            current = self.get(p).parent;
        }
        path
    }
}
