use std::path::PathBuf;

use cvs_svn_fast_export_state::item::{ChangesetId, MetadataId};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("malformed record in {stream} stream: {detail}")]
    BadStream { stream: &'static str, detail: String },

    #[error("cannot collect {path}: {reason}")]
    Collect { path: PathBuf, reason: String },

    #[error("metadata {id} cannot be re-encoded with any configured encoding")]
    Encoding { id: MetadataId },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sort(#[from] ext_sort::Error),

    #[error(transparent)]
    State(#[from] cvs_svn_fast_export_state::Error),

    #[error("symbol {symbol} is excluded but has non-excluded blockers: {blockers}")]
    SymbolPolicy { symbol: String, blockers: String },

    #[error("symbol {symbol} is forced to be a tag but has commits in {files} file(s)")]
    TagWithCommits { symbol: String, files: u32 },

    #[error("no split can break the dependency cycle through changesets {changesets:?}")]
    UnbreakableCycle { changesets: Vec<ChangesetId> },
}
