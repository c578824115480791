//! Breaking cycles among revision changesets. Cycles here come from
//! interleaved non-atomic CVS commits and from accidental metadata collisions
//! inside the commit threshold.

use std::collections::HashMap;

use cvs_svn_fast_export_state::{
    changeset::{Changeset, ChangesetStore, ItemDep, RevisionChangeset},
    item::{ChangesetId, ItemId},
    Artifact, ChangesetStage, Layout,
};

use crate::{config::Config, error::Error, graph};

use super::{deps_by_item, entering_items, exiting_items, severs};

pub(crate) const NAME: &str = "break-revision-cycles";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::Initial))?;
    store.verify()?;
    let deps: Vec<ItemDep> = layout.read_bincode(Artifact::DepIndex)?;

    let splits = break_cycles(&mut store, &deps)?;
    log::info!("broke revision-changeset cycles with {} splits", splits);

    store.verify()?;
    layout.write_bincode(
        NAME,
        Artifact::Changesets(ChangesetStage::RevisionsAcyclic),
        &store,
    )?;
    Ok(())
}

fn break_cycles(store: &mut ChangesetStore, deps: &[ItemDep]) -> Result<u32, Error> {
    let by_item = deps_by_item(deps);

    let mut splits = 0;
    loop {
        let times = graph::nominal_timestamps(store, deps);
        let subgraph = graph::revision_subgraph(store, deps);
        let cycle = match subgraph.toposort_by(|a, b| (times[a], *a).cmp(&(times[b], *b))) {
            Ok(_) => return Ok(splits),
            Err(stall) => stall.nodes,
        };

        split_one(store, &by_item, &cycle)?;
        splits += 1;
    }
}

struct Candidate {
    position: usize,
    balance: i64,
    changeset: ChangesetId,
    first: Vec<ItemId>,
    second: Vec<ItemId>,
}

/// Scores every timestamp-ordered boundary of every changeset on the cycle
/// and applies the best severing split: most balanced first, then lowest
/// changeset id.
fn split_one(
    store: &mut ChangesetStore,
    by_item: &HashMap<ItemId, &ItemDep>,
    cycle: &[ChangesetId],
) -> Result<(), Error> {
    let positions = store.positions();

    let mut best: Option<Candidate> = None;
    for (i, &c) in cycle.iter().enumerate() {
        let pred = cycle[(i + cycle.len() - 1) % cycle.len()];
        let succ = cycle[(i + 1) % cycle.len()];

        let changeset = &store.changesets[positions[&c]];
        let members = match changeset {
            Changeset::Revision(rc) => &rc.items,
            _ => continue,
        };

        let entering = entering_items(store, by_item, changeset, pred);
        let exiting = exiting_items(store, by_item, c, &store.changesets[positions[&succ]]);
        if entering.is_empty() || exiting.is_empty() {
            continue;
        }

        let mut ordered = members.clone();
        ordered.sort_by_key(|item| {
            (
                by_item.get(item).map(|dep| dep.timestamp).unwrap_or(0),
                *item,
            )
        });

        for k in 1..ordered.len() {
            let (left, right) = ordered.split_at(k);
            if !severs(left, right, &entering, &exiting) {
                continue;
            }

            let balance = (k as i64 * 2 - ordered.len() as i64).abs();
            let better = match &best {
                None => true,
                Some(candidate) => (balance, c) < (candidate.balance, candidate.changeset),
            };
            if better {
                best = Some(Candidate {
                    position: positions[&c],
                    balance,
                    changeset: c,
                    first: left.to_vec(),
                    second: right.to_vec(),
                });
            }
        }
    }

    match best {
        Some(candidate) => {
            let id = match &store.changesets[candidate.position] {
                Changeset::Revision(rc) => rc.id,
                other => unreachable!("revision split applied to {:?}", other.id()),
            };
            let second_id = store.allocate_id();
            log::debug!(
                "splitting revision changeset {} into {} + {}",
                id,
                id,
                second_id
            );
            store.apply_split(
                candidate.position,
                Changeset::Revision(RevisionChangeset {
                    id,
                    items: candidate.first,
                }),
                Changeset::Revision(RevisionChangeset {
                    id: second_id,
                    items: candidate.second,
                }),
            );
            Ok(())
        }
        None => Err(Error::UnbreakableCycle {
            changesets: cycle.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvs_svn_fast_export_state::item::ItemId;

    fn dep(id: u32, timestamp: u64, deps: &[u32]) -> ItemDep {
        ItemDep {
            id: ItemId::from(id),
            timestamp,
            deps: deps.iter().copied().map(ItemId::from).collect(),
        }
    }

    fn revision_changeset(store: &mut ChangesetStore, items: &[u32]) -> ChangesetId {
        let id = store.allocate_id();
        store.push(Changeset::Revision(RevisionChangeset {
            id,
            items: items.iter().copied().map(ItemId::from).collect(),
        }));
        id
    }

    // Interleaved commits: two files whose revisions pair up crosswise into
    // two changesets that depend on each other.
    #[test]
    fn test_interleaved_commits_cycle_is_split() {
        let mut store = ChangesetStore::new();
        // File F1: item 0 (1.1, t=0) then item 1 (1.2, t=10).
        // File F2: item 2 (1.1, t=5) then item 3 (1.2, t=15).
        // Changeset A groups {0, 3}, changeset B groups {2, 1}.
        let a = revision_changeset(&mut store, &[0, 3]);
        let b = revision_changeset(&mut store, &[2, 1]);

        let deps = vec![
            dep(0, 0, &[]),
            dep(1, 10, &[0]),
            dep(2, 5, &[]),
            dep(3, 15, &[2]),
        ];

        let splits = break_cycles(&mut store, &deps).unwrap();
        assert_eq!(splits, 1);
        store.verify().unwrap();
        assert_eq!(store.changesets.len(), 3);

        // The result is acyclic and honors both files' revision orders.
        let times = crate::graph::nominal_timestamps(&store, &deps);
        let order = crate::graph::revision_subgraph(&store, &deps)
            .toposort_by(|x, y| (times[x], *x).cmp(&(times[y], *y)))
            .unwrap();
        let position = |item: u32| {
            let changeset = store.changeset_of(ItemId::from(item)).unwrap();
            order.iter().position(|id| *id == changeset).unwrap()
        };
        assert!(position(0) < position(1));
        assert!(position(2) < position(3));

        // The original ids survived the split.
        assert!(order.contains(&a) && order.contains(&b));
    }

    #[test]
    fn test_acyclic_store_needs_no_splits() {
        let mut store = ChangesetStore::new();
        revision_changeset(&mut store, &[0]);
        revision_changeset(&mut store, &[1]);
        let deps = vec![dep(0, 0, &[]), dep(1, 10, &[0])];

        assert_eq!(break_cycles(&mut store, &deps).unwrap(), 0);
        assert_eq!(store.changesets.len(), 2);
    }

    #[test]
    fn test_unbreakable_cycle_reports_changesets() {
        // Item 0 depends on item 1 and vice versa: no boundary can sever the
        // chain because each changeset's entering and exiting items coincide.
        let mut store = ChangesetStore::new();
        revision_changeset(&mut store, &[0]);
        revision_changeset(&mut store, &[1]);
        let deps = vec![dep(0, 0, &[1]), dep(1, 10, &[0])];

        assert!(matches!(
            break_cycles(&mut store, &deps),
            Err(Error::UnbreakableCycle { .. })
        ));
    }
}
