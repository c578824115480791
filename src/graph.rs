//! Construction of the changeset dependency graphs from the item-level
//! dependency index. An edge `A → B` exists when some item of `B` depends on
//! an item of `A`; the graph passes differ only in which nodes and edges they
//! admit.

use std::collections::HashMap;

use changeset_graph::Graph;
use cvs_svn_fast_export_state::changeset::{Changeset, ChangesetStore, ItemDep};
use cvs_svn_fast_export_state::item::{ChangesetId, ItemId};

/// The revision-changeset subgraph: nodes are revision changesets, edges are
/// revision-to-revision dependencies only.
pub(crate) fn revision_subgraph(store: &ChangesetStore, deps: &[ItemDep]) -> Graph<ChangesetId> {
    build(store, deps, is_revision, |from, to| {
        is_revision(from) && is_revision(to)
    })
}

/// The symbol-changeset subgraph: only edges with symbol changesets at both
/// ends ("split branch creation" chains).
pub(crate) fn symbol_subgraph(store: &ChangesetStore, deps: &[ItemDep]) -> Graph<ChangesetId> {
    build(store, deps, Changeset::is_symbol, |from, to| {
        from.is_symbol() && to.is_symbol()
    })
}

/// The full graph: every changeset. Revision ordering is carried by the
/// prev/next chain of ordered changesets; item-level edges between two
/// ordered changesets are subsumed by the chain and skipped.
pub(crate) fn full_graph(store: &ChangesetStore, deps: &[ItemDep]) -> Graph<ChangesetId> {
    let mut graph = build(store, deps, |_| true, |from, to| {
        !(is_ordered(from) && is_ordered(to))
    });

    for changeset in &store.changesets {
        if let Changeset::Ordered(ordered) = changeset {
            if let Some(prev) = ordered.prev {
                graph.add_edge(prev, ordered.id);
            }
        }
    }

    graph
}

fn build<N, F>(store: &ChangesetStore, deps: &[ItemDep], node: N, admit: F) -> Graph<ChangesetId>
where
    N: Fn(&Changeset) -> bool,
    F: Fn(&Changeset, &Changeset) -> bool,
{
    let by_id: HashMap<ChangesetId, &Changeset> = store
        .changesets
        .iter()
        .map(|changeset| (changeset.id(), changeset))
        .collect();

    let mut graph = Graph::new();
    for changeset in &store.changesets {
        if node(changeset) {
            graph.add_node(changeset.id());
        }
    }

    for dep in deps {
        let to = match store.item_map.get(&dep.id) {
            Some(to) => *to,
            None => continue,
        };
        for item in &dep.deps {
            let from = match store.item_map.get(item) {
                Some(from) => *from,
                None => continue,
            };
            if from == to {
                continue;
            }
            if let (Some(&from_cs), Some(&to_cs)) = (by_id.get(&from), by_id.get(&to)) {
                if admit(from_cs, to_cs) {
                    graph.add_edge(from, to);
                }
            }
        }
    }

    graph
}

/// Nominal timestamps: the latest member timestamp of every changeset.
/// Symbol changesets stay at zero; their commit time is derived from their
/// sources during the final sort.
pub(crate) fn nominal_timestamps(
    store: &ChangesetStore,
    deps: &[ItemDep],
) -> HashMap<ChangesetId, u64> {
    let time_of: HashMap<ItemId, u64> = deps.iter().map(|dep| (dep.id, dep.timestamp)).collect();

    let mut timestamps: HashMap<ChangesetId, u64> = HashMap::new();
    for changeset in &store.changesets {
        let max = changeset
            .items()
            .iter()
            .filter_map(|item| time_of.get(item).copied())
            .max()
            .unwrap_or(0);
        timestamps.insert(changeset.id(), max);
    }
    timestamps
}

fn is_revision(changeset: &Changeset) -> bool {
    matches!(changeset, Changeset::Revision(_))
}

fn is_ordered(changeset: &Changeset) -> bool {
    matches!(changeset, Changeset::Ordered(_))
}
