//! Changesets: the evolving partitioning of items into atomic commits.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    item::{ChangesetId, ItemId, SymbolId},
    symbol::SymbolClass,
    Error,
};

/// A set of revisions intended to commit together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionChangeset {
    pub id: ChangesetId,
    pub items: Vec<ItemId>,
}

/// A revision changeset whose position in the commit order is frozen: its
/// only dependencies are its immediate neighbors in the chosen order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedChangeset {
    pub id: ChangesetId,
    pub items: Vec<ItemId>,
    /// The nominal commit time: the latest CVS timestamp of any member.
    pub timestamp: u64,
    pub prev: Option<ChangesetId>,
    pub next: Option<ChangesetId>,
}

/// The branch creations or tag placements of one symbol. A split symbol
/// yields several changesets for the same symbol, committed in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolChangeset {
    pub id: ChangesetId,
    pub symbol: SymbolId,
    pub class: SymbolClass,
    pub items: Vec<ItemId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Changeset {
    Revision(RevisionChangeset),
    Ordered(OrderedChangeset),
    Symbol(SymbolChangeset),
}

impl Changeset {
    pub fn id(&self) -> ChangesetId {
        match self {
            Changeset::Revision(c) => c.id,
            Changeset::Ordered(c) => c.id,
            Changeset::Symbol(c) => c.id,
        }
    }

    pub fn items(&self) -> &[ItemId] {
        match self {
            Changeset::Revision(c) => &c.items,
            Changeset::Ordered(c) => &c.items,
            Changeset::Symbol(c) => &c.items,
        }
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Changeset::Symbol(_))
    }

    pub fn is_tag(&self) -> bool {
        matches!(
            self,
            Changeset::Symbol(SymbolChangeset {
                class: SymbolClass::Tag,
                ..
            })
        )
    }
}

/// One record of the dependency index: the per-item facts the graph passes
/// need, without loading full items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDep {
    pub id: ItemId,
    /// Zero for branch and tag items, which have no time of their own.
    pub timestamp: u64,
    pub deps: Vec<ItemId>,
}

/// The changeset store plus the item → changeset map, written together so
/// that consistency between the two can be verified on load.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChangesetStore {
    pub changesets: Vec<Changeset>,
    pub item_map: HashMap<ItemId, ChangesetId>,
    next_id: u32,
}

impl ChangesetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> ChangesetId {
        let id = ChangesetId::from(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a changeset and maps its items to it.
    pub fn push(&mut self, changeset: Changeset) {
        for item in changeset.items() {
            self.item_map.insert(*item, changeset.id());
        }
        self.changesets.push(changeset);
    }

    pub fn get(&self, id: ChangesetId) -> Option<&Changeset> {
        // Ids are dense but splits append out of order, so scan-free access
        // needs the position map built by `by_id`.
        self.changesets.iter().find(|c| c.id() == id)
    }

    /// An id → index map for passes that mutate changesets in place.
    pub fn positions(&self) -> HashMap<ChangesetId, usize> {
        self.changesets
            .iter()
            .enumerate()
            .map(|(index, changeset)| (changeset.id(), index))
            .collect()
    }

    pub fn changeset_of(&self, item: ItemId) -> Result<ChangesetId, Error> {
        self.item_map
            .get(&item)
            .copied()
            .ok_or(Error::UnknownItem(item))
    }

    /// Checks that every listed member maps back to its changeset; a
    /// disagreement means a pass corrupted the partitioning.
    pub fn verify(&self) -> Result<(), Error> {
        for changeset in &self.changesets {
            for item in changeset.items() {
                let mapped = self.item_map.get(item).copied();
                if mapped != Some(changeset.id()) {
                    return Err(Error::MembershipMismatch {
                        item: *item,
                        listed: changeset.id(),
                        mapped,
                    });
                }
            }
        }
        Ok(())
    }

    /// Replaces the changeset at `index` with two halves produced by a split,
    /// remapping the moved items.
    pub fn apply_split(&mut self, index: usize, first: Changeset, second: Changeset) {
        for item in first.items() {
            self.item_map.insert(*item, first.id());
        }
        for item in second.items() {
            self.item_map.insert(*item, second.id());
        }
        self.changesets[index] = first;
        self.changesets.push(second);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_verify() {
        let mut store = ChangesetStore::new();
        let id = store.allocate_id();
        store.push(Changeset::Revision(RevisionChangeset {
            id,
            items: vec![ItemId::from(1), ItemId::from(2)],
        }));

        assert!(store.verify().is_ok());
        assert_eq!(store.changeset_of(ItemId::from(2)).unwrap(), id);
        assert!(store.changeset_of(ItemId::from(3)).is_err());
    }

    #[test]
    fn test_verify_catches_membership_mismatch() {
        let mut store = ChangesetStore::new();
        let a = store.allocate_id();
        let b = store.allocate_id();
        store.push(Changeset::Revision(RevisionChangeset {
            id: a,
            items: vec![ItemId::from(1)],
        }));
        store.push(Changeset::Revision(RevisionChangeset {
            id: b,
            items: vec![ItemId::from(1)],
        }));

        assert!(matches!(
            store.verify(),
            Err(Error::MembershipMismatch { .. })
        ));
    }

    #[test]
    fn test_apply_split_remaps_items() {
        let mut store = ChangesetStore::new();
        let id = store.allocate_id();
        store.push(Changeset::Revision(RevisionChangeset {
            id,
            items: vec![ItemId::from(1), ItemId::from(2)],
        }));

        let second_id = store.allocate_id();
        store.apply_split(
            0,
            Changeset::Revision(RevisionChangeset {
                id,
                items: vec![ItemId::from(1)],
            }),
            Changeset::Revision(RevisionChangeset {
                id: second_id,
                items: vec![ItemId::from(2)],
            }),
        );

        assert!(store.verify().is_ok());
        assert_eq!(store.changeset_of(ItemId::from(1)).unwrap(), id);
        assert_eq!(store.changeset_of(ItemId::from(2)).unwrap(), second_id);
    }
}
