//! The revision topological sort: fix the commit order of revision
//! changesets, then freeze it by rewriting each one as an ordered changeset
//! whose only dependencies are its neighbors in the chosen order. Later
//! passes may reposition symbol changesets, never revisions.

use cvs_svn_fast_export_state::{
    changeset::{Changeset, ChangesetStore, ItemDep, OrderedChangeset},
    Artifact, ChangesetStage, Layout,
};

use crate::{config::Config, error::Error, graph};

pub(crate) const NAME: &str = "revision-topo-sort";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::RevisionsAcyclic))?;
    store.verify()?;
    let deps: Vec<ItemDep> = layout.read_bincode(Artifact::DepIndex)?;

    freeze_order(&mut store, &deps)?;

    layout.write_bincode(NAME, Artifact::Changesets(ChangesetStage::Ordered), &store)?;
    Ok(())
}

fn freeze_order(store: &mut ChangesetStore, deps: &[ItemDep]) -> Result<(), Error> {
    let times = graph::nominal_timestamps(store, deps);

    // The previous pass guarantees acyclicity; a stall here is a programmer
    // error, not an archive pathology.
    let order = graph::revision_subgraph(store, deps)
        .toposort_by(|a, b| (times[a], *a).cmp(&(times[b], *b)))
        .map_err(|stall| Error::UnbreakableCycle {
            changesets: stall.nodes,
        })?;
    log::info!("fixed the order of {} revision changesets", order.len());

    let positions = store.positions();
    for (index, id) in order.iter().enumerate() {
        let position = positions[id];
        if let Changeset::Revision(rc) = &store.changesets[position] {
            store.changesets[position] = Changeset::Ordered(OrderedChangeset {
                id: rc.id,
                items: rc.items.clone(),
                timestamp: times[id],
                prev: if index > 0 {
                    Some(order[index - 1])
                } else {
                    None
                },
                next: order.get(index + 1).copied(),
            });
        }
    }
    Ok(())
}
