//! The polymorphic item set: revisions, branch creations, and tag placements
//! share one id space and one minimal contract (id, file, dependencies), so
//! that the dependency graphs can be built without caring which kind of event
//! an id refers to.

use derive_more::{Display, From, Into};
use rcs_parse::RevNum;
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct ProjectId(u32);

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct FileId(u32);

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct SymbolId(u32);

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct MetadataId(u32);

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct ItemId(u32);

#[derive(
    Debug, Display, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From,
    Into,
)]
pub struct ChangesetId(u32);

/// A file tracked by the archive, with its repository-relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRecord {
    pub id: FileId,
    pub project: ProjectId,
    pub path: std::path::PathBuf,
}

/// A line of development: trunk, or one named branch.
///
/// The derived ordering (trunk first, then branches by symbol id) is also the
/// tie-break used when electing preferred parents, so it is part of the
/// observable behavior.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lod {
    Trunk,
    Branch(SymbolId),
}

/// One revision of one file on one line of development.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvsRevision {
    pub id: ItemId,
    pub file: FileId,
    pub lod: Lod,
    pub rev: RevNum,
    pub timestamp: u64,
    pub metadata: MetadataId,
    /// Whether this revision marks the file absent.
    pub dead: bool,
    /// The revision this one was committed on top of.
    pub prev: Option<ItemId>,
    /// The revision that overwrote this one on the same line of development.
    pub next: Option<ItemId>,
    /// For the first commit on a branch, the branch creation it depends on.
    pub on_branch: Option<ItemId>,
    /// Symbol items (branches/tags) whose copy source this revision is.
    pub opens: Vec<ItemId>,
    /// Symbol items whose copy source this revision overwrote.
    pub closes: Vec<ItemId>,
}

/// The act of opening a branch in one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvsBranch {
    pub id: ItemId,
    pub symbol: SymbolId,
    pub file: FileId,
    /// The item the branch is copied from: a revision, or the creation of the
    /// parent branch when the branch sprouts at its very base. `None` for a
    /// branch severed from trunk (file added on the branch).
    pub source: Option<ItemId>,
    /// The line of development the branch sprouts from after preferred-parent
    /// election.
    pub source_lod: Lod,
    /// The first commit made on the branch in this file, if any.
    pub first_commit: Option<ItemId>,
    /// Symbol items that sprout directly from this branch creation.
    pub opens: Vec<ItemId>,
}

/// The act of placing a tag in one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvsTag {
    pub id: ItemId,
    pub symbol: SymbolId,
    pub file: FileId,
    pub source: Option<ItemId>,
    pub source_lod: Lod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CvsItem {
    Revision(CvsRevision),
    Branch(CvsBranch),
    Tag(CvsTag),
}

impl CvsItem {
    pub fn id(&self) -> ItemId {
        match self {
            CvsItem::Revision(r) => r.id,
            CvsItem::Branch(b) => b.id,
            CvsItem::Tag(t) => t.id,
        }
    }

    pub fn file(&self) -> FileId {
        match self {
            CvsItem::Revision(r) => r.file,
            CvsItem::Branch(b) => b.file,
            CvsItem::Tag(t) => t.file,
        }
    }

    /// The items this one causally depends on: a revision depends on its
    /// predecessor and (for the first commit on a branch) on the branch
    /// creation; a branch or tag depends on its copy source.
    pub fn dependencies(&self) -> Vec<ItemId> {
        match self {
            CvsItem::Revision(r) => r.prev.iter().chain(r.on_branch.iter()).copied().collect(),
            CvsItem::Branch(b) => b.source.into_iter().collect(),
            CvsItem::Tag(t) => t.source.into_iter().collect(),
        }
    }

    /// The symbol a branch or tag item belongs to.
    pub fn symbol(&self) -> Option<SymbolId> {
        match self {
            CvsItem::Revision(_) => None,
            CvsItem::Branch(b) => Some(b.symbol),
            CvsItem::Tag(t) => Some(t.symbol),
        }
    }

    pub fn as_revision(&self) -> Option<&CvsRevision> {
        match self {
            CvsItem::Revision(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_revision_mut(&mut self) -> Option<&mut CvsRevision> {
        match self {
            CvsItem::Revision(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_branch(&self) -> Option<&CvsBranch> {
        match self {
            CvsItem::Branch(b) => Some(b),
            _ => None,
        }
    }

    /// Serializes the item into the newline-free form used by the sortable
    /// streams.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(hex::encode(bincode::serialize(self)?))
    }

    pub fn decode(encoded: &[u8]) -> Result<CvsItem, Error> {
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::Corrupt(format!("undecodable stream payload: {}", e)))?;
        Ok(bincode::deserialize(&bytes)?)
    }
}
