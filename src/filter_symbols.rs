//! The filtering pass: apply the global symbol classification to each file's
//! bundle, elect preferred parents, compute symbol openings and closings, and
//! flatten the surviving items into the two sortable streams.
//!
//! This is the last point at which all items of one file are in memory
//! together; everything downstream works on streams and stores.

use std::collections::{BTreeMap, HashMap, HashSet};

use cvs_svn_fast_export_state::{
    item::{CvsBranch, CvsItem, CvsTag, FileId, ItemId, Lod, SymbolId},
    symbol::{SymbolClass, SymbolTable, TypedSymbol},
    Artifact, Layout,
};

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "filter-symbols";

pub(crate) fn run(_config: &Config, layout: &Layout) -> Result<(), Error> {
    let stats: SymbolTable = layout.read_bincode(Artifact::SymbolStats)?;
    let typed: Vec<TypedSymbol> = layout.read_bincode(Artifact::TypedSymbols)?;

    let classes: HashMap<SymbolId, SymbolClass> =
        typed.iter().map(|t| (t.id, t.class)).collect();
    let preferred = preferred_parents(&stats, &classes);

    let mut items = layout.store::<FileId, Vec<CvsItem>>(Artifact::Items)?;
    let mut revisions = layout.line_writer(NAME, Artifact::RevisionStream)?;
    let mut symbols = layout.line_writer(NAME, Artifact::SymbolStream)?;

    let mut files: Vec<FileId> = items.keys().copied().collect();
    files.sort();

    let mut kept = 0u64;
    for file in files {
        let bundle = items.get(&file)?;
        for item in filter_bundle(bundle, &classes, &preferred) {
            kept += 1;
            match &item {
                CvsItem::Revision(r) => revisions.write_record(
                    format!(
                        "{:08x} {:016x} {}",
                        u32::from(r.metadata),
                        r.timestamp,
                        item.encode()?
                    )
                    .as_bytes(),
                )?,
                _ => symbols.write_record(
                    format!(
                        "{:08x} {}",
                        u32::from(item.symbol().expect("symbol items have a symbol")),
                        item.encode()?
                    )
                    .as_bytes(),
                )?,
            }
        }
    }

    log::info!("filtered to {} items", kept);
    revisions.commit()?;
    symbols.commit()?;
    Ok(())
}

/// The project-wide preferred parent of every symbol, with parents that were
/// excluded dropped so files fall back to their actual parent.
fn preferred_parents(
    stats: &SymbolTable,
    classes: &HashMap<SymbolId, SymbolClass>,
) -> HashMap<SymbolId, Lod> {
    stats
        .iter()
        .filter_map(|s| s.preferred_parent().map(|parent| (s.id, parent)))
        .filter(|(_, parent)| match parent {
            Lod::Trunk => true,
            Lod::Branch(branch) => classes.get(branch) != Some(&SymbolClass::Excluded),
        })
        .collect()
}

fn filter_bundle(
    bundle: Vec<CvsItem>,
    classes: &HashMap<SymbolId, SymbolClass>,
    preferred: &HashMap<SymbolId, Lod>,
) -> Vec<CvsItem> {
    let mut items: BTreeMap<ItemId, CvsItem> =
        bundle.into_iter().map(|item| (item.id(), item)).collect();

    drop_excluded(&mut items, classes);
    retype(&mut items, classes);
    adjust_sprouts(&mut items, preferred);
    compute_openings(&mut items);

    items.into_iter().map(|(_, item)| item).collect()
}

/// Removes items of excluded symbols and revisions on excluded branches.
/// Anything sprouting from the removed subtrees is itself excluded (the
/// blocker rule), so a single sweep suffices.
fn drop_excluded(items: &mut BTreeMap<ItemId, CvsItem>, classes: &HashMap<SymbolId, SymbolClass>) {
    let excluded = |symbol: SymbolId| classes.get(&symbol) != Some(&SymbolClass::Branch)
        && classes.get(&symbol) != Some(&SymbolClass::Tag);

    items.retain(|_, item| match item {
        CvsItem::Revision(r) => match r.lod {
            Lod::Trunk => true,
            Lod::Branch(branch) => !excluded(branch),
        },
        CvsItem::Branch(b) => !excluded(b.symbol),
        CvsItem::Tag(t) => !excluded(t.symbol),
    });

    let valid: HashSet<ItemId> = items.keys().copied().collect();
    let live = |id: &Option<ItemId>| id.filter(|id| valid.contains(id));
    for item in items.values_mut() {
        match item {
            CvsItem::Revision(r) => {
                r.prev = live(&r.prev);
                r.next = live(&r.next);
                r.on_branch = live(&r.on_branch);
            }
            CvsItem::Branch(b) => {
                b.source = live(&b.source);
                b.first_commit = live(&b.first_commit);
            }
            CvsItem::Tag(t) => {
                t.source = live(&t.source);
            }
        }
    }
}

/// Converts per-file items whose kind disagrees with the global
/// classification: a branch never committed to becomes a tag placement, a
/// tagged revision of a branch symbol becomes a commitless branch creation.
fn retype(items: &mut BTreeMap<ItemId, CvsItem>, classes: &HashMap<SymbolId, SymbolClass>) {
    let ids: Vec<ItemId> = items.keys().copied().collect();
    for id in ids {
        let replacement = match &items[&id] {
            CvsItem::Branch(b) if classes.get(&b.symbol) == Some(&SymbolClass::Tag) => {
                if b.first_commit.is_some() {
                    // Collation refuses tags with commits; a branch that
                    // still has one here means the rules were inconsistent.
                    log::warn!("keeping committed branch for tag symbol {}", b.symbol);
                    continue;
                }
                Some(CvsItem::Tag(CvsTag {
                    id: b.id,
                    symbol: b.symbol,
                    file: b.file,
                    source: b.source,
                    source_lod: b.source_lod,
                }))
            }
            CvsItem::Tag(t) if classes.get(&t.symbol) == Some(&SymbolClass::Branch) => {
                Some(CvsItem::Branch(CvsBranch {
                    id: t.id,
                    symbol: t.symbol,
                    file: t.file,
                    source: t.source,
                    source_lod: t.source_lod,
                    first_commit: None,
                    opens: Vec::new(),
                }))
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            items.insert(id, replacement);
        }
    }
}

/// Retargets each symbol's per-file copy source toward the project-wide
/// preferred parent. When the preferred parent is a branch whose creation
/// shares this symbol's base revision, the symbol sprouts from that branch
/// creation instead of from the revision.
fn adjust_sprouts(items: &mut BTreeMap<ItemId, CvsItem>, preferred: &HashMap<SymbolId, Lod>) {
    let ids: Vec<ItemId> = items.keys().copied().collect();
    for id in ids {
        let (symbol, source, actual) = match &items[&id] {
            CvsItem::Branch(b) => (b.symbol, b.source, b.source_lod),
            CvsItem::Tag(t) => (t.symbol, t.source, t.source_lod),
            CvsItem::Revision(_) => continue,
        };
        let source = match source {
            Some(source) => source,
            None => continue,
        };
        let chosen = match preferred.get(&symbol) {
            Some(&chosen) if chosen != actual => chosen,
            _ => continue,
        };
        let parent = match chosen {
            Lod::Branch(parent) => parent,
            // The base revision cannot move; a trunk preference over a branch
            // sprout stays with the file's actual parent.
            Lod::Trunk => continue,
        };

        let parent_item = items.values().find_map(|item| match item {
            CvsItem::Branch(b) if b.symbol == parent && b.source == Some(source) => Some(b.id),
            _ => None,
        });
        if let Some(parent_item) = parent_item {
            match items.get_mut(&id) {
                Some(CvsItem::Branch(b)) => {
                    b.source = Some(parent_item);
                    b.source_lod = chosen;
                }
                Some(CvsItem::Tag(t)) => {
                    t.source = Some(parent_item);
                    t.source_lod = chosen;
                }
                _ => {}
            }
        }
    }
}

/// Records, on each source item, which symbols it opens, and on the source's
/// successor, which symbols that successor closes.
fn compute_openings(items: &mut BTreeMap<ItemId, CvsItem>) {
    let ids: Vec<ItemId> = items.keys().copied().collect();
    for id in ids {
        let source = match &items[&id] {
            CvsItem::Branch(b) => b.source,
            CvsItem::Tag(t) => t.source,
            CvsItem::Revision(_) => continue,
        };
        let source = match source {
            Some(source) => source,
            None => continue,
        };

        let follower = match &items[&source] {
            CvsItem::Revision(r) => r.next,
            CvsItem::Branch(b) => b.first_commit,
            CvsItem::Tag(_) => None,
        };

        match items.get_mut(&source) {
            Some(CvsItem::Revision(r)) => r.opens.push(id),
            Some(CvsItem::Branch(b)) => b.opens.push(id),
            _ => {}
        }
        if let Some(follower) = follower {
            if let Some(r) = items.get_mut(&follower).and_then(CvsItem::as_revision_mut) {
                r.closes.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvs_svn_fast_export_state::item::{CvsRevision, MetadataId};

    fn revision(id: u32, lod: Lod, prev: Option<u32>, next: Option<u32>) -> CvsItem {
        CvsItem::Revision(CvsRevision {
            id: ItemId::from(id),
            file: FileId::from(0),
            lod,
            rev: "1.1".parse().unwrap(),
            timestamp: u64::from(id) * 10,
            metadata: MetadataId::from(0),
            dead: false,
            prev: prev.map(ItemId::from),
            next: next.map(ItemId::from),
            on_branch: None,
            opens: Vec::new(),
            closes: Vec::new(),
        })
    }

    fn branch(id: u32, symbol: u32, source: Option<u32>, first_commit: Option<u32>) -> CvsItem {
        CvsItem::Branch(CvsBranch {
            id: ItemId::from(id),
            symbol: SymbolId::from(symbol),
            file: FileId::from(0),
            source: source.map(ItemId::from),
            source_lod: Lod::Trunk,
            first_commit: first_commit.map(ItemId::from),
            opens: Vec::new(),
        })
    }

    fn tag(id: u32, symbol: u32, source: Option<u32>) -> CvsItem {
        CvsItem::Tag(CvsTag {
            id: ItemId::from(id),
            symbol: SymbolId::from(symbol),
            file: FileId::from(0),
            source: source.map(ItemId::from),
            source_lod: Lod::Trunk,
        })
    }

    fn classes(entries: &[(u32, SymbolClass)]) -> HashMap<SymbolId, SymbolClass> {
        entries
            .iter()
            .map(|(id, class)| (SymbolId::from(*id), *class))
            .collect()
    }

    fn find(items: &[CvsItem], id: u32) -> &CvsItem {
        items
            .iter()
            .find(|item| item.id() == ItemId::from(id))
            .unwrap()
    }

    #[test]
    fn test_excluded_branch_takes_its_revisions_along() {
        let bundle = vec![
            revision(0, Lod::Trunk, None, None),
            branch(1, 0, Some(0), Some(2)),
            revision(2, Lod::Branch(SymbolId::from(0)), None, None),
        ];

        let have = filter_bundle(
            bundle,
            &classes(&[(0, SymbolClass::Excluded)]),
            &HashMap::new(),
        );

        assert_eq!(have.len(), 1);
        assert_eq!(have[0].id(), ItemId::from(0));
    }

    #[test]
    fn test_retype_commitless_branch_to_tag() {
        let bundle = vec![revision(0, Lod::Trunk, None, None), branch(1, 0, Some(0), None)];

        let have = filter_bundle(bundle, &classes(&[(0, SymbolClass::Tag)]), &HashMap::new());
        assert!(matches!(find(&have, 1), CvsItem::Tag(_)));
    }

    #[test]
    fn test_retype_tag_to_branch() {
        let bundle = vec![revision(0, Lod::Trunk, None, None), tag(1, 0, Some(0))];

        let have = filter_bundle(bundle, &classes(&[(0, SymbolClass::Branch)]), &HashMap::new());
        match find(&have, 1) {
            CvsItem::Branch(b) => assert!(b.first_commit.is_none()),
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn test_sprout_adjustment_retargets_to_parent_branch() {
        // Tag 1 (symbol 1) and branch 2 (symbol 0) both sprout from revision
        // 0; symbol 1's preferred parent is branch symbol 0, so the tag is
        // re-sourced to the branch creation.
        let bundle = vec![
            revision(0, Lod::Trunk, None, None),
            tag(1, 1, Some(0)),
            branch(2, 0, Some(0), None),
        ];
        let preferred: HashMap<SymbolId, Lod> =
            [(SymbolId::from(1), Lod::Branch(SymbolId::from(0)))]
                .iter()
                .copied()
                .collect();

        let have = filter_bundle(
            bundle,
            &classes(&[(0, SymbolClass::Branch), (1, SymbolClass::Tag)]),
            &preferred,
        );

        match find(&have, 1) {
            CvsItem::Tag(t) => {
                assert_eq!(t.source, Some(ItemId::from(2)));
                assert_eq!(t.source_lod, Lod::Branch(SymbolId::from(0)));
            }
            other => panic!("unexpected item: {:?}", other),
        }
        // The branch creation now opens the tag.
        match find(&have, 2) {
            CvsItem::Branch(b) => assert_eq!(b.opens, vec![ItemId::from(1)]),
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn test_openings_and_closings() {
        // Tag 2 sprouts from revision 0, which revision 1 overwrites.
        let bundle = vec![
            revision(0, Lod::Trunk, None, Some(1)),
            revision(1, Lod::Trunk, Some(0), None),
            tag(2, 0, Some(0)),
        ];

        let have = filter_bundle(bundle, &classes(&[(0, SymbolClass::Tag)]), &HashMap::new());

        match find(&have, 0) {
            CvsItem::Revision(r) => assert_eq!(r.opens, vec![ItemId::from(2)]),
            other => panic!("unexpected item: {:?}", other),
        }
        match find(&have, 1) {
            CvsItem::Revision(r) => assert_eq!(r.closes, vec![ItemId::from(2)]),
            other => panic!("unexpected item: {:?}", other),
        }
    }
}
