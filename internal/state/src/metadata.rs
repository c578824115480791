//! Metadata interning.
//!
//! Author and log text are interned by a 20-byte digest so that revisions
//! which belong to the same logical commit share one metadata id. The digest
//! optionally covers the project id and the branch name; widening the digest
//! input narrows which revisions may later coalesce into one changeset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::item::{MetadataId, ProjectId};

pub type MetadataDigest = [u8; 20];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub digest: MetadataDigest,
    pub author: Vec<u8>,
    pub log: Vec<u8>,
}

/// The interning table built during collection and rewritten, text
/// canonicalized, by the metadata cleaning pass.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MetadataTable {
    records: Vec<Metadata>,
    by_digest: HashMap<MetadataDigest, MetadataId>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns one (author, log) pair, returning the stable metadata id.
    ///
    /// `project` is folded into the digest when cross-project commits are
    /// disallowed, `branch` when cross-branch commits are disallowed.
    pub fn intern(
        &mut self,
        author: &[u8],
        log: &[u8],
        project: Option<ProjectId>,
        branch: Option<&str>,
    ) -> MetadataId {
        let mut hasher = Sha1::new();
        hasher.update(author);
        hasher.update(b"\0");
        hasher.update(log);
        if let Some(project) = project {
            hasher.update(b"\0");
            hasher.update(u32::from(project).to_le_bytes());
        }
        if let Some(branch) = branch {
            hasher.update(b"\0");
            hasher.update(branch.as_bytes());
        }
        let digest: MetadataDigest = hasher.finalize().into();

        if let Some(id) = self.by_digest.get(&digest) {
            return *id;
        }

        let id = MetadataId::from(self.records.len() as u32);
        self.records.push(Metadata {
            digest,
            author: author.to_vec(),
            log: log.to_vec(),
        });
        self.by_digest.insert(digest, id);
        id
    }

    pub fn get(&self, id: MetadataId) -> Option<&Metadata> {
        self.records.get(u32::from(id) as usize)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataId, &Metadata)> {
        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| (MetadataId::from(index as u32), record))
    }

    /// Replaces the text of one record, keeping its id and digest. Used by
    /// the cleaning pass after re-encoding.
    pub fn replace_text(&mut self, id: MetadataId, author: Vec<u8>, log: Vec<u8>) {
        let record = &mut self.records[u32::from(id) as usize];
        record.author = author;
        record.log = log;
    }
}
