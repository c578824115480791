use std::{io, path::PathBuf};

use thiserror::Error;

use crate::item::{ChangesetId, ItemId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{path} has a bad header: {detail}")]
    BadHeader { path: PathBuf, detail: String },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("item {item} is listed by changeset {listed} but mapped to {mapped:?}")]
    MembershipMismatch {
        item: ItemId,
        listed: ChangesetId,
        mapped: Option<ChangesetId>,
    },

    #[error("store has no record for key {0}")]
    MissingKey(String),

    #[error(transparent)]
    Serialization(#[from] bincode::Error),

    #[error("item {0} is referenced but not stored")]
    UnknownItem(ItemId),
}
