//! Breaking cycles whose edges run entirely between symbol changesets.
//! These appear when branch creations are split across files such that each
//! branch sprouts from the other's creation in some file.

use cvs_svn_fast_export_state::{
    changeset::{ChangesetStore, ItemDep},
    Artifact, ChangesetStage, Layout,
};

use crate::{config::Config, error::Error, graph};

use super::{deps_by_item, split_one_symbol_changeset};

pub(crate) const NAME: &str = "break-symbol-cycles";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::Ordered))?;
    store.verify()?;
    let deps: Vec<ItemDep> = layout.read_bincode(Artifact::DepIndex)?;

    let splits = break_cycles(&mut store, &deps)?;
    log::info!("broke symbol-changeset cycles with {} splits", splits);

    store.verify()?;
    layout.write_bincode(
        NAME,
        Artifact::Changesets(ChangesetStage::SymbolsAcyclic),
        &store,
    )?;
    Ok(())
}

fn break_cycles(store: &mut ChangesetStore, deps: &[ItemDep]) -> Result<u32, Error> {
    let by_item = deps_by_item(deps);

    let mut splits = 0;
    loop {
        let subgraph = graph::symbol_subgraph(store, deps);
        let cycle = match subgraph.toposort_by(|a, b| a.cmp(b)) {
            Ok(_) => return Ok(splits),
            Err(stall) => stall.nodes,
        };

        split_one_symbol_changeset(store, &by_item, &cycle)?;
        splits += 1;
    }
}
