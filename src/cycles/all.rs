//! Breaking every remaining cycle in the full graph. The revision order is
//! frozen by now, so only symbol changesets may be split: each split just
//! inserts the symbol's commit points at different positions along the
//! revision chain.

use cvs_svn_fast_export_state::{
    changeset::{ChangesetStore, ItemDep},
    Artifact, ChangesetStage, Layout,
};

use crate::{config::Config, error::Error, graph};

use super::{deps_by_item, split_one_symbol_changeset};

pub(crate) const NAME: &str = "break-all-cycles";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::SymbolsAcyclic))?;
    store.verify()?;
    let deps: Vec<ItemDep> = layout.read_bincode(Artifact::DepIndex)?;

    let splits = break_cycles(&mut store, &deps)?;
    log::info!("broke remaining cycles with {} splits", splits);

    store.verify()?;
    layout.write_bincode(NAME, Artifact::Changesets(ChangesetStage::Acyclic), &store)?;
    Ok(())
}

fn break_cycles(store: &mut ChangesetStore, deps: &[ItemDep]) -> Result<u32, Error> {
    let by_item = deps_by_item(deps);

    let mut splits = 0;
    loop {
        let full = graph::full_graph(store, deps);
        let cycle = match full.toposort_by(|a, b| a.cmp(b)) {
            Ok(_) => return Ok(splits),
            Err(stall) => stall.nodes,
        };

        split_one_symbol_changeset(store, &by_item, &cycle)?;
        splits += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvs_svn_fast_export_state::{
        changeset::{Changeset, OrderedChangeset, SymbolChangeset},
        item::{ChangesetId, ItemId, SymbolId},
        symbol::SymbolClass,
    };

    fn dep(id: u32, timestamp: u64, deps: &[u32]) -> ItemDep {
        ItemDep {
            id: ItemId::from(id),
            timestamp,
            deps: deps.iter().copied().map(ItemId::from).collect(),
        }
    }

    fn ordered(
        store: &mut ChangesetStore,
        items: &[u32],
        timestamp: u64,
        prev: Option<ChangesetId>,
    ) -> ChangesetId {
        let id = store.allocate_id();
        store.push(Changeset::Ordered(OrderedChangeset {
            id,
            items: items.iter().copied().map(ItemId::from).collect(),
            timestamp,
            prev,
            next: None,
        }));
        id
    }

    fn branch(store: &mut ChangesetStore, symbol: u32, items: &[u32]) -> ChangesetId {
        let id = store.allocate_id();
        store.push(Changeset::Symbol(SymbolChangeset {
            id,
            symbol: SymbolId::from(symbol),
            class: SymbolClass::Branch,
            items: items.iter().copied().map(ItemId::from).collect(),
        }));
        id
    }

    // A branch creation spanning two files, where one file's branch commit
    // is in a revision changeset that the other file's creation copies from:
    // the creation must be split around that revision changeset.
    #[test]
    fn test_mixed_cycle_splits_the_symbol_changeset() {
        let mut store = ChangesetStore::new();
        let c0 = ordered(&mut store, &[0], 10, None);
        let c1 = ordered(&mut store, &[1], 20, Some(c0));
        let s = branch(&mut store, 0, &[30, 31]);

        let deps = vec![
            dep(0, 10, &[]),
            dep(1, 20, &[30]), // the branch commit depends on the creation in F1
            dep(30, 0, &[0]),  // creation in F1 copies from revision 0
            dep(31, 0, &[1]),  // creation in F2 copies from revision 1
        ];

        let splits = break_cycles(&mut store, &deps).unwrap();
        assert_eq!(splits, 1);
        store.verify().unwrap();

        let order = graph::full_graph(&store, &deps)
            .toposort_by(|a, b| a.cmp(b))
            .unwrap();
        let position = |changeset: ChangesetId| {
            order.iter().position(|id| *id == changeset).unwrap()
        };
        let creation_f1 = store.changeset_of(ItemId::from(30)).unwrap();
        let creation_f2 = store.changeset_of(ItemId::from(31)).unwrap();

        // Each file's copy source exists before that file's sub-creation.
        assert!(position(c0) < position(creation_f1));
        assert!(position(creation_f1) < position(c1));
        assert!(position(c1) < position(creation_f2));
        assert_ne!(creation_f1, creation_f2);
        assert_eq!(store.changeset_of(ItemId::from(30)).unwrap(), s);
    }

    #[test]
    fn test_ordered_chain_alone_is_acyclic() {
        let mut store = ChangesetStore::new();
        let c0 = ordered(&mut store, &[0], 10, None);
        ordered(&mut store, &[1], 20, Some(c0));
        let deps = vec![dep(0, 10, &[]), dep(1, 20, &[0])];

        assert_eq!(break_cycles(&mut store, &deps).unwrap(), 0);
    }
}
