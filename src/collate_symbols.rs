//! The collation pass: decide, per project, whether each symbol is converted
//! as a branch, as a tag, or not at all. Forced rules win over heuristics,
//! and exclusions are validated against blockers before anything downstream
//! runs.

use std::collections::HashMap;

use cvs_svn_fast_export_state::{
    item::SymbolId,
    symbol::{SymbolClass, SymbolStats, SymbolTable, TypedSymbol},
    Artifact, Layout,
};
use itertools::Itertools;

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "collate-symbols";

pub(crate) fn run(config: &Config, layout: &Layout) -> Result<(), Error> {
    let stats: SymbolTable = layout.read_bincode(Artifact::SymbolStats)?;
    let typed = collate(config, &stats)?;

    let excluded = typed
        .iter()
        .filter(|t| t.class == SymbolClass::Excluded)
        .count();
    log::info!(
        "collated {} symbols ({} excluded)",
        typed.len(),
        excluded
    );

    layout.write_bincode(NAME, Artifact::TypedSymbols, &typed)?;
    Ok(())
}

fn collate(config: &Config, stats: &SymbolTable) -> Result<Vec<TypedSymbol>, Error> {
    let typed: Vec<TypedSymbol> = stats
        .iter()
        .map(|s| {
            classify(config, s).map(|class| TypedSymbol {
                id: s.id,
                project: s.project,
                name: s.name.clone(),
                class,
            })
        })
        .collect::<Result<_, _>>()?;

    // An exclusion is only sound if everything that ever sprouted from the
    // symbol is excluded too.
    let class_of: HashMap<SymbolId, SymbolClass> =
        typed.iter().map(|t| (t.id, t.class)).collect();
    for s in stats.iter() {
        if class_of[&s.id] != SymbolClass::Excluded {
            continue;
        }
        let live: Vec<&str> = s
            .blockers
            .iter()
            .filter(|blocker| class_of.get(blocker) != Some(&SymbolClass::Excluded))
            .filter_map(|blocker| stats.get(*blocker).map(|b| b.name.as_str()))
            .collect();
        if !live.is_empty() {
            return Err(Error::SymbolPolicy {
                symbol: s.name.clone(),
                blockers: live.iter().join(", "),
            });
        }
    }

    Ok(typed)
}

fn classify(config: &Config, stats: &SymbolStats) -> Result<SymbolClass, Error> {
    if config.excluded_symbols.contains(&stats.name) {
        return Ok(SymbolClass::Excluded);
    }
    if config.forced_branches.contains(&stats.name) {
        return Ok(SymbolClass::Branch);
    }
    if config.forced_tags.contains(&stats.name) {
        if stats.branch_commit_files > 0 {
            return Err(Error::TagWithCommits {
                symbol: stats.name.clone(),
                files: stats.branch_commit_files,
            });
        }
        return Ok(SymbolClass::Tag);
    }

    // Heuristic default: commits pin a symbol to branch-hood; otherwise the
    // dominant use wins, with ties going to the cheaper tag.
    if stats.branch_commit_files > 0 || stats.branch_uses > stats.tag_uses {
        Ok(SymbolClass::Branch)
    } else {
        Ok(SymbolClass::Tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvs_svn_fast_export_state::item::ProjectId;

    fn table(entries: &[(&str, u32, u32, u32, &[&str])]) -> SymbolTable {
        let mut table = SymbolTable::new();
        let ids: Vec<SymbolId> = entries
            .iter()
            .map(|(name, ..)| table.intern(ProjectId::from(0), name))
            .collect();

        for (index, (_, tag_uses, branch_uses, commit_files, blockers)) in
            entries.iter().enumerate()
        {
            let blocker_ids: Vec<SymbolId> = blockers
                .iter()
                .map(|name| {
                    let position = entries.iter().position(|(n, ..)| n == name).unwrap();
                    ids[position]
                })
                .collect();

            let stats = table.get_mut(ids[index]);
            stats.tag_uses = *tag_uses;
            stats.branch_uses = *branch_uses;
            stats.branch_commit_files = *commit_files;
            stats.blockers.extend(blocker_ids);
        }

        table
    }

    fn class_of(typed: &[TypedSymbol], name: &str) -> SymbolClass {
        typed.iter().find(|t| t.name == name).unwrap().class
    }

    #[test]
    fn test_heuristic_defaults() {
        let config = Config::default();
        let stats = table(&[
            ("mostly-tag", 5, 1, 0, &[]),
            ("mostly-branch", 1, 5, 0, &[]),
            ("tie", 3, 3, 0, &[]),
            ("committed", 5, 1, 1, &[]),
        ]);

        let typed = collate(&config, &stats).unwrap();
        assert_eq!(class_of(&typed, "mostly-tag"), SymbolClass::Tag);
        assert_eq!(class_of(&typed, "mostly-branch"), SymbolClass::Branch);
        assert_eq!(class_of(&typed, "tie"), SymbolClass::Tag);
        assert_eq!(class_of(&typed, "committed"), SymbolClass::Branch);
    }

    #[test]
    fn test_forced_rules_override_heuristics() {
        let mut config = Config::default();
        config.forced_branches.insert(String::from("as-branch"));
        config.forced_tags.insert(String::from("as-tag"));
        let stats = table(&[("as-branch", 5, 0, 0, &[]), ("as-tag", 0, 5, 0, &[])]);

        let typed = collate(&config, &stats).unwrap();
        assert_eq!(class_of(&typed, "as-branch"), SymbolClass::Branch);
        assert_eq!(class_of(&typed, "as-tag"), SymbolClass::Tag);
    }

    #[test]
    fn test_forced_tag_with_commits_is_rejected() {
        let mut config = Config::default();
        config.forced_tags.insert(String::from("busy"));
        let stats = table(&[("busy", 0, 3, 2, &[])]);

        assert!(matches!(
            collate(&config, &stats),
            Err(Error::TagWithCommits { .. })
        ));
    }

    #[test]
    fn test_excluded_symbol_with_live_blocker_aborts() {
        // Excluding T while branch B still sprouts from it must fail, naming
        // both parties.
        let mut config = Config::default();
        config.excluded_symbols.insert(String::from("T"));
        let stats = table(&[("T", 0, 2, 0, &["B"]), ("B", 0, 1, 1, &[])]);

        match collate(&config, &stats) {
            Err(Error::SymbolPolicy { symbol, blockers }) => {
                assert_eq!(symbol, "T");
                assert_eq!(blockers, "B");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_exclusion_is_sound_when_blockers_are_excluded_too() {
        let mut config = Config::default();
        config.excluded_symbols.insert(String::from("T"));
        config.excluded_symbols.insert(String::from("B"));
        let stats = table(&[("T", 0, 2, 0, &["B"]), ("B", 0, 1, 1, &[])]);

        let typed = collate(&config, &stats).unwrap();
        assert_eq!(class_of(&typed, "T"), SymbolClass::Excluded);
        assert_eq!(class_of(&typed, "B"), SymbolClass::Excluded);
    }
}
