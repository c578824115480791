//! The final topological sort: produce the committed order of the whole
//! graph and assign strictly monotonic commit timestamps.
//!
//! When several changesets are ready, symbol changesets go first so that
//! branch and tag copies appear as soon as their sources exist. Timestamps
//! start from each changeset's nominal time, are bumped to previous + 1 when
//! not strictly increasing, and are treated as bogus (also previous + 1)
//! when they lie in the future relative to the wall clock at the start of
//! the pass.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use cvs_svn_fast_export_state::{
    changeset::{ChangesetStore, ItemDep},
    item::ChangesetId,
    Artifact, ChangesetStage, Layout,
};

use crate::{config::Config, error::Error, graph};

pub(crate) const NAME: &str = "final-topo-sort";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::Acyclic))?;
    store.verify()?;
    let deps: Vec<ItemDep> = layout.read_bincode(Artifact::DepIndex)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(u64::MAX);

    let order = commit_order(&store, &deps)?;
    let stamped = assign_timestamps(&store, &deps, &order, now);

    let mut writer = layout.line_writer(NAME, Artifact::Order)?;
    for (id, timestamp) in &stamped {
        writer.write_record(format!("{} {}", u32::from(*id), timestamp).as_bytes())?;
    }
    let committed = writer.commit()?;
    log::info!("committed order fixed for {} changesets", committed);
    Ok(())
}

fn commit_order(store: &ChangesetStore, deps: &[ItemDep]) -> Result<Vec<ChangesetId>, Error> {
    let times = graph::nominal_timestamps(store, deps);
    let positions = store.positions();

    let rank = |id: &ChangesetId| {
        let changeset = &store.changesets[positions[id]];
        let kind = if changeset.is_symbol() { 0u8 } else { 1 };
        (kind, times[id], *id)
    };

    graph::full_graph(store, deps)
        .toposort_by(|a, b| rank(a).cmp(&rank(b)))
        .map_err(|stall| Error::UnbreakableCycle {
            changesets: stall.nodes,
        })
}

fn assign_timestamps(
    store: &ChangesetStore,
    deps: &[ItemDep],
    order: &[ChangesetId],
    now: u64,
) -> Vec<(ChangesetId, u64)> {
    let times = graph::nominal_timestamps(store, deps);
    let by_item = crate::cycles::deps_by_item(deps);
    let positions = store.positions();

    let mut assigned: HashMap<ChangesetId, u64> = HashMap::new();
    let mut stamped = Vec::with_capacity(order.len());
    let mut previous: Option<u64> = None;

    for id in order {
        let changeset = &store.changesets[positions[id]];

        // Revisions carry CVS time; a symbol commit inherits the latest
        // commit time of its copy sources.
        let nominal = if changeset.is_symbol() {
            changeset
                .items()
                .iter()
                .filter_map(|item| by_item.get(item))
                .flat_map(|dep| dep.deps.iter())
                .filter_map(|source| store.item_map.get(source))
                .filter_map(|source_changeset| assigned.get(source_changeset))
                .max()
                .copied()
                .unwrap_or(0)
        } else {
            times[id]
        };

        let timestamp = match previous {
            Some(previous) if nominal <= previous || nominal > now => previous + 1,
            None if nominal > now => now,
            _ => nominal,
        };

        assigned.insert(*id, timestamp);
        previous = Some(timestamp);
        stamped.push((*id, timestamp));
    }

    stamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvs_svn_fast_export_state::{
        changeset::{Changeset, OrderedChangeset, SymbolChangeset},
        item::{ItemId, SymbolId},
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
        next: Option<ChangesetId>,
    ) -> ChangesetId {
        let id = store.allocate_id();
        store.push(Changeset::Ordered(OrderedChangeset {
            id,
            items: items.iter().copied().map(ItemId::from).collect(),
            timestamp,
            prev,
            next,
        }));
        id
    }

    #[test]
    fn test_backwards_timestamps_are_monotonized() {
        // CVS times 1000 then 999: committed as 1000 then 1001.
        let mut store = ChangesetStore::new();
        let c0 = ordered(&mut store, &[0], 1000, None, None);
        let c1 = ordered(&mut store, &[1], 999, Some(c0), None);
        if let Changeset::Ordered(c) = &mut store.changesets[0] {
            c.next = Some(c1);
        }
        let deps = vec![dep(0, 1000, &[]), dep(1, 999, &[0])];

        let order = commit_order(&store, &deps).unwrap();
        let stamped = assign_timestamps(&store, &deps, &order, 1_000_000);
        assert_eq!(stamped, vec![(c0, 1000), (c1, 1001)]);
    }

    #[test]
    fn test_future_timestamps_are_clamped() {
        let mut store = ChangesetStore::new();
        let c0 = ordered(&mut store, &[0], 100, None, None);
        let c1 = ordered(&mut store, &[1], 5000, Some(c0), None);
        let deps = vec![dep(0, 100, &[]), dep(1, 5000, &[0])];

        let order = commit_order(&store, &deps).unwrap();
        let stamped = assign_timestamps(&store, &deps, &order, 200);
        assert_eq!(stamped, vec![(c0, 100), (c1, 101)]);
    }

    #[test]
    fn test_symbols_commit_as_soon_as_ready_and_inherit_source_times() {
        // Revision changesets at t=10 and t=20; a tag whose only source is
        // in the first one. The tag commits between them, at 10 + 1.
        let mut store = ChangesetStore::new();
        let c0 = ordered(&mut store, &[0], 10, None, None);
        let c1 = ordered(&mut store, &[1], 20, Some(c0), None);
        if let Changeset::Ordered(c) = &mut store.changesets[0] {
            c.next = Some(c1);
        }
        let tag = store.allocate_id();
        store.push(Changeset::Symbol(SymbolChangeset {
            id: tag,
            symbol: SymbolId::from(0),
            class: SymbolClass::Tag,
            items: vec![ItemId::from(2)],
        }));

        let deps = vec![dep(0, 10, &[]), dep(1, 20, &[0]), dep(2, 0, &[0])];

        let order = commit_order(&store, &deps).unwrap();
        assert_eq!(order, vec![c0, tag, c1]);

        let stamped = assign_timestamps(&store, &deps, &order, 1_000_000);
        assert_eq!(stamped, vec![(c0, 10), (tag, 11), (c1, 20)]);

        // Monotonic throughout.
        for pair in stamped.windows(2) {
            assert!(pair[1].1 > pair[0].1);
        }
    }
}
