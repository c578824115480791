//! Emission of the commit plan consumed by the repository sink, plus the
//! openings/closings log the sink uses to pick optimal copy sources for
//! symbol fills.
//!
//! The plan is a line protocol in commit order:
//!
//! ```text
//! commit <changeset> <timestamp> meta <metadata>
//!   M <revnum> <path>
//!   D <revnum> <path>
//! symbol <changeset> <timestamp> <name> <branch|tag>
//!   copy <path> @<source-changeset>
//!   copy <path> fresh
//! ```
//!
//! `M` modifies a file to the given revision's content (resolved by the
//! revision content reader), `D` deletes it; `fresh` marks a copy with no
//! source (a file that first appeared on the branch).

use std::{collections::HashMap, io::Write, path::PathBuf};

use cvs_svn_fast_export_state::{
    changeset::{Changeset, ChangesetStore},
    item::{ChangesetId, CvsItem, FileId, ItemId, PathRecord, SymbolId},
    symbol::{SymbolClass, TypedSymbol},
    Artifact, ChangesetStage, Layout, Store,
};

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "output";

pub(crate) fn write_plan<W: Write>(
    config: &Config,
    layout: &Layout,
    writer: &mut W,
) -> Result<(), Error> {
    let store: ChangesetStore =
        layout.read_bincode(Artifact::Changesets(ChangesetStage::Acyclic))?;
    store.verify()?;
    let mut items: Store<ItemId, CvsItem> = layout.store(Artifact::GroupedItems)?;

    let paths: Vec<PathRecord> = layout.read_bincode(Artifact::Paths)?;
    let path_of: HashMap<FileId, PathBuf> =
        paths.into_iter().map(|record| (record.id, record.path)).collect();
    let typed: Vec<TypedSymbol> = layout.read_bincode(Artifact::TypedSymbols)?;
    let name_of: HashMap<SymbolId, String> =
        typed.into_iter().map(|symbol| (symbol.id, symbol.name)).collect();

    let order = read_order(layout)?;
    let positions = store.positions();

    // (symbol, svn revnum, is-closing, per-file symbol item).
    let mut events: Vec<(SymbolId, usize, bool, ItemId)> = Vec::new();

    for (index, (id, timestamp)) in order.iter().enumerate() {
        let revnum = index + 1;
        let changeset = &store.changesets[positions[id]];

        match changeset {
            Changeset::Symbol(symbol_changeset) => {
                let name = name_of
                    .get(&symbol_changeset.symbol)
                    .map(String::as_str)
                    .unwrap_or("?");
                let kind = match symbol_changeset.class {
                    SymbolClass::Branch => "branch",
                    _ => "tag",
                };
                writeln!(writer, "symbol {} {} {} {}", id, timestamp, name, kind)?;

                for member in changeset.items() {
                    let item = items.get(member)?;
                    let path = display_path(&path_of, item.file());
                    match item_source(&item) {
                        Some(source) => {
                            let source_changeset = store.changeset_of(source)?;
                            writeln!(writer, "  copy {} @{}", path, source_changeset)?;
                        }
                        None => writeln!(writer, "  copy {} fresh", path)?,
                    }
                    if let CvsItem::Branch(branch) = &item {
                        for opened in &branch.opens {
                            events.push((
                                opened_symbol(&mut items, *opened)?,
                                revnum,
                                false,
                                *opened,
                            ));
                        }
                    }
                }
            }
            _ => {
                let mut members = Vec::new();
                let mut meta = None;
                for member in changeset.items() {
                    let item = items.get(member)?;
                    if let CvsItem::Revision(revision) = &item {
                        meta = meta.or(Some(revision.metadata));
                        for opened in &revision.opens {
                            events.push((
                                opened_symbol(&mut items, *opened)?,
                                revnum,
                                false,
                                *opened,
                            ));
                        }
                        for closed in &revision.closes {
                            events.push((
                                opened_symbol(&mut items, *closed)?,
                                revnum,
                                true,
                                *closed,
                            ));
                        }

                        let path = display_path(&path_of, revision.file);
                        let is_cvsignore =
                            path == ".cvsignore" || path.ends_with("/.cvsignore");
                        if !config.keep_cvsignore && is_cvsignore {
                            log::debug!("leaving {} to the sink's ignore handling", path);
                            continue;
                        }
                        members.push(format!(
                            "  {} {} {}",
                            if revision.dead { "D" } else { "M" },
                            revision.rev,
                            path
                        ));
                    }
                }

                writeln!(
                    writer,
                    "commit {} {} meta {}",
                    id,
                    timestamp,
                    meta.map(u32::from).unwrap_or(0)
                )?;
                for member in members {
                    writeln!(writer, "{}", member)?;
                }
            }
        }
    }

    write_openings_closings(layout, events)?;
    Ok(())
}

fn read_order(layout: &Layout) -> Result<Vec<(ChangesetId, u64)>, Error> {
    let mut order = Vec::new();
    for record in layout.line_reader(Artifact::Order)? {
        let record = record?;
        let text = String::from_utf8_lossy(&record);
        let mut fields = text.split_whitespace();
        let parsed = match (fields.next(), fields.next()) {
            (Some(id), Some(timestamp)) => {
                id.parse::<u32>().ok().zip(timestamp.parse::<u64>().ok())
            }
            _ => None,
        };
        match parsed {
            Some((id, timestamp)) => order.push((ChangesetId::from(id), timestamp)),
            None => {
                return Err(Error::BadStream {
                    stream: "order",
                    detail: text.into_owned(),
                })
            }
        }
    }
    Ok(order)
}

fn item_source(item: &CvsItem) -> Option<ItemId> {
    match item {
        CvsItem::Branch(branch) => branch.source,
        CvsItem::Tag(tag) => tag.source,
        CvsItem::Revision(_) => None,
    }
}

fn opened_symbol(items: &mut Store<ItemId, CvsItem>, id: ItemId) -> Result<SymbolId, Error> {
    items.get(&id)?.symbol().ok_or_else(|| Error::BadStream {
        stream: "openings",
        detail: format!("item {} opened as a symbol is not one", id),
    })
}

fn display_path(paths: &HashMap<FileId, PathBuf>, file: FileId) -> String {
    paths
        .get(&file)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("<file {}>", file))
}

/// Lines `SYMBOL_ID SVN_REVNUM {O,C} CVS_SYMBOL_ID`, hex fields, sorted by
/// symbol id and then revnum.
fn write_openings_closings(
    layout: &Layout,
    mut events: Vec<(SymbolId, usize, bool, ItemId)>,
) -> Result<(), Error> {
    events.sort();

    let mut writer = layout.line_writer(NAME, Artifact::OpeningsClosings)?;
    for (symbol, revnum, closing, item) in events {
        writer.write_record(
            format!(
                "{:x} {:x} {} {:x}",
                u32::from(symbol),
                revnum,
                if closing { "C" } else { "O" },
                u32::from(item)
            )
            .as_bytes(),
        )?;
    }
    writer.commit()?;
    Ok(())
}
