//! The two external-sort passes. Stream keys are fixed-width hex, so the
//! plain lexicographic sort groups revisions by (metadata, timestamp) and
//! symbols by symbol id.

use cvs_svn_fast_export_state::{Artifact, Layout};

use crate::{config::Config, error::Error};

pub(crate) const REVISIONS_NAME: &str = "sort-revisions";
pub(crate) const SYMBOLS_NAME: &str = "sort-symbols";

pub(crate) fn run_revisions(config: &Config, layout: &Layout) -> Result<(), Error> {
    sort_stream(
        config,
        layout,
        REVISIONS_NAME,
        Artifact::RevisionStream,
        Artifact::SortedRevisionStream,
    )
}

pub(crate) fn run_symbols(config: &Config, layout: &Layout) -> Result<(), Error> {
    sort_stream(
        config,
        layout,
        SYMBOLS_NAME,
        Artifact::SymbolStream,
        Artifact::SortedSymbolStream,
    )
}

fn sort_stream(
    config: &Config,
    layout: &Layout,
    pass: &str,
    from: Artifact,
    to: Artifact,
) -> Result<(), Error> {
    let reader = layout.stream_reader(from)?;
    let mut writer = layout.line_writer(pass, to)?;

    let sorter = ext_sort::Sorter::new(config.sort_buffer_bytes);
    let records = sorter.sort(reader, &mut writer)?;
    writer.commit()?;

    log::info!("{}: sorted {} records", pass, records);
    Ok(())
}
