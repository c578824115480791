//! Per-project symbol records: usage statistics accumulated during
//! collection, and the global classification produced by collation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::item::{Lod, ProjectId, SymbolId};

/// Usage statistics for one symbol in one project.
///
/// Symbols are distinct per project even when their names collide, so that a
/// fill of `RELEASE_1` in one project never picks up files from another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolStats {
    pub id: SymbolId,
    pub project: ProjectId,
    pub name: String,
    /// Files in which the symbol is used as a tag.
    pub tag_uses: u32,
    /// Files in which the symbol is used as a branch.
    pub branch_uses: u32,
    /// Files carrying at least one commit on the branch.
    pub branch_commit_files: u32,
    /// Symbols that sprouted from this branch; this symbol may only be
    /// excluded if all of them are.
    pub blockers: BTreeSet<SymbolId>,
    /// Histogram over the lines of development that could have been this
    /// symbol's parent, summed across files.
    pub possible_parents: BTreeMap<Lod, u32>,
}

impl SymbolStats {
    fn new(id: SymbolId, project: ProjectId, name: String) -> Self {
        Self {
            id,
            project,
            name,
            tag_uses: 0,
            branch_uses: 0,
            branch_commit_files: 0,
            blockers: BTreeSet::new(),
            possible_parents: BTreeMap::new(),
        }
    }

    /// The preferred parent: the line of development with project-wide
    /// majority agreement. Ties go to trunk, then to the lowest symbol id;
    /// the choice is arbitrary but must be deterministic.
    pub fn preferred_parent(&self) -> Option<Lod> {
        self.possible_parents
            .iter()
            .max_by(|(lod_a, count_a), (lod_b, count_b)| {
                count_a.cmp(count_b).then(lod_b.cmp(lod_a))
            })
            .map(|(lod, _)| *lod)
    }
}

/// The interner for symbol ids, keyed by project and name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    stats: Vec<SymbolStats>,
    #[serde(skip)]
    by_key: HashMap<(ProjectId, String), SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, project: ProjectId, name: &str) -> SymbolId {
        if let Some(id) = self.by_key.get(&(project, name.to_string())) {
            return *id;
        }

        let id = SymbolId::from(self.stats.len() as u32);
        self.stats
            .push(SymbolStats::new(id, project, name.to_string()));
        self.by_key.insert((project, name.to_string()), id);
        id
    }

    pub fn get(&self, id: SymbolId) -> Option<&SymbolStats> {
        self.stats.get(u32::from(id) as usize)
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut SymbolStats {
        &mut self.stats[u32::from(id) as usize]
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SymbolStats> {
        self.stats.iter()
    }
}

/// The global classification of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolClass {
    Branch,
    Tag,
    Excluded,
}

/// A symbol after collation, reusing the id allocated during collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedSymbol {
    pub id: SymbolId,
    pub project: ProjectId,
    pub name: String,
    pub class: SymbolClass,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_per_project() {
        let mut table = SymbolTable::new();
        let a = table.intern(ProjectId::from(0), "RELEASE_1");
        let b = table.intern(ProjectId::from(1), "RELEASE_1");
        let c = table.intern(ProjectId::from(0), "RELEASE_1");

        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_preferred_parent_majority_and_ties() {
        let mut table = SymbolTable::new();
        let id = table.intern(ProjectId::from(0), "B");
        let other = SymbolId::from(9);

        assert_eq!(table.get(id).unwrap().preferred_parent(), None);

        {
            let stats = table.get_mut(id);
            stats.possible_parents.insert(Lod::Trunk, 2);
            stats.possible_parents.insert(Lod::Branch(other), 3);
        }
        assert_eq!(
            table.get(id).unwrap().preferred_parent(),
            Some(Lod::Branch(other))
        );

        // On an exact tie, trunk wins.
        table.get_mut(id).possible_parents.insert(Lod::Trunk, 3);
        assert_eq!(table.get(id).unwrap().preferred_parent(), Some(Lod::Trunk));
    }
}
