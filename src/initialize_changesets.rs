//! The changeset-formation pass: draft revision changesets from the sorted
//! revision stream, split any draft with internal dependencies, and group the
//! sorted symbol stream into one changeset per symbol.
//!
//! Besides the changeset store itself, this pass writes the item store laid
//! out grouped by changeset (for disk locality downstream) and the dependency
//! index the graph passes run on.

use std::collections::HashMap;

use cvs_svn_fast_export_state::{
    changeset::{Changeset, ChangesetStore, ItemDep, RevisionChangeset, SymbolChangeset},
    item::{CvsItem, CvsRevision, ItemId, SymbolId},
    symbol::{SymbolClass, TypedSymbol},
    Artifact, ChangesetStage, Layout, StoreWriter,
};

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "initialize-changesets";

pub(crate) fn run(config: &Config, layout: &Layout) -> Result<(), Error> {
    let typed: Vec<TypedSymbol> = layout.read_bincode(Artifact::TypedSymbols)?;
    let classes: HashMap<SymbolId, SymbolClass> =
        typed.iter().map(|t| (t.id, t.class)).collect();

    let mut store = ChangesetStore::new();
    let mut grouped = layout.store_writer::<ItemId, CvsItem>(NAME, Artifact::GroupedItems)?;
    let mut deps: Vec<ItemDep> = Vec::new();

    let threshold = config.commit_threshold.as_secs();
    let mut pending: Vec<CvsRevision> = Vec::new();
    for record in layout.line_reader(Artifact::SortedRevisionStream)? {
        let revision = parse_revision_record(&record?)?;
        if let Some(last) = pending.last() {
            if breaks_draft(last, &revision, threshold) {
                flush_revisions(&mut pending, &mut store, &mut grouped, &mut deps)?;
            }
        }
        pending.push(revision);
    }
    flush_revisions(&mut pending, &mut store, &mut grouped, &mut deps)?;

    let mut symbol_items: Vec<CvsItem> = Vec::new();
    for record in layout.line_reader(Artifact::SortedSymbolStream)? {
        let item = parse_symbol_record(&record?)?;
        let symbol = item.symbol().expect("symbol stream items have a symbol");
        if symbol_items
            .last()
            .map(|last| last.symbol() != Some(symbol))
            .unwrap_or(false)
        {
            flush_symbols(&mut symbol_items, &classes, &mut store, &mut grouped, &mut deps)?;
        }
        symbol_items.push(item);
    }
    flush_symbols(&mut symbol_items, &classes, &mut store, &mut grouped, &mut deps)?;

    store.verify()?;
    log::info!(
        "initialized {} changesets over {} items",
        store.changesets.len(),
        store.item_map.len()
    );

    grouped.commit()?;
    layout.write_bincode(NAME, Artifact::DepIndex, &deps)?;
    layout.write_bincode(NAME, Artifact::Changesets(ChangesetStage::Initial), &store)?;
    Ok(())
}

/// A draft changeset ends when the metadata changes or the time gap exceeds
/// the threshold. A gap of exactly the threshold stays in the draft.
fn breaks_draft(last: &CvsRevision, next: &CvsRevision, threshold: u64) -> bool {
    last.metadata != next.metadata || next.timestamp.saturating_sub(last.timestamp) > threshold
}

fn flush_revisions(
    pending: &mut Vec<CvsRevision>,
    store: &mut ChangesetStore,
    grouped: &mut StoreWriter<ItemId, CvsItem>,
    deps: &mut Vec<ItemDep>,
) -> Result<(), Error> {
    if pending.is_empty() {
        return Ok(());
    }

    let mut draft = std::mem::take(pending);
    draft.sort_by(|a, b| {
        (a.timestamp, a.file, &a.rev).cmp(&(b.timestamp, b.file, &b.rev))
    });

    for group in split_internal(draft) {
        let id = store.allocate_id();
        let mut items = Vec::with_capacity(group.len());
        for revision in group {
            items.push(revision.id);
            let item = CvsItem::Revision(revision);
            deps.push(ItemDep {
                id: item.id(),
                timestamp: item.as_revision().map(|r| r.timestamp).unwrap_or(0),
                deps: item.dependencies(),
            });
            grouped.push(item.id(), &item)?;
        }
        store.push(Changeset::Revision(RevisionChangeset { id, items }));
    }
    Ok(())
}

/// Splits a draft until no member depends on another member. The split point
/// is the boundary severing the most internal edges, with ties going to the
/// most balanced split.
fn split_internal(mut members: Vec<CvsRevision>) -> Vec<Vec<CvsRevision>> {
    let index_of: HashMap<ItemId, usize> = members
        .iter()
        .enumerate()
        .map(|(index, member)| (member.id, index))
        .collect();

    let mut edges: Vec<(usize, usize)> = Vec::new();
    for (index, member) in members.iter().enumerate() {
        if let Some(prev) = member.prev {
            if let Some(&dep) = index_of.get(&prev) {
                edges.push((dep.min(index), dep.max(index)));
            }
        }
    }
    if edges.is_empty() {
        return vec![members];
    }

    let len = members.len();
    let best = (1..len)
        .max_by_key(|&k| {
            let severed = edges.iter().filter(|(a, b)| *a < k && k <= *b).count();
            let balance = (k as i64 - len as i64 / 2).abs();
            (severed, std::cmp::Reverse(balance))
        })
        .expect("drafts with internal edges have at least two members");

    let right = members.split_off(best);
    let mut groups = split_internal(members);
    groups.extend(split_internal(right));
    groups
}

fn flush_symbols(
    pending: &mut Vec<CvsItem>,
    classes: &HashMap<SymbolId, SymbolClass>,
    store: &mut ChangesetStore,
    grouped: &mut StoreWriter<ItemId, CvsItem>,
    deps: &mut Vec<ItemDep>,
) -> Result<(), Error> {
    if pending.is_empty() {
        return Ok(());
    }

    let items = std::mem::take(pending);
    let symbol = items[0].symbol().expect("symbol stream items have a symbol");
    let class = match classes.get(&symbol) {
        Some(&class) => class,
        None => {
            log::warn!("symbol {} was never collated; inferring from items", symbol);
            if items[0].as_branch().is_some() {
                SymbolClass::Branch
            } else {
                SymbolClass::Tag
            }
        }
    };

    let id = store.allocate_id();
    let mut member_ids = Vec::with_capacity(items.len());
    for item in items {
        member_ids.push(item.id());
        deps.push(ItemDep {
            id: item.id(),
            timestamp: 0,
            deps: item.dependencies(),
        });
        grouped.push(item.id(), &item)?;
    }
    store.push(Changeset::Symbol(SymbolChangeset {
        id,
        symbol,
        class,
        items: member_ids,
    }));
    Ok(())
}

fn parse_revision_record(record: &[u8]) -> Result<CvsRevision, Error> {
    let payload = record
        .split(|c| *c == b' ')
        .nth(2)
        .ok_or_else(|| Error::BadStream {
            stream: "revision",
            detail: String::from("expected three fields"),
        })?;
    match CvsItem::decode(payload)? {
        CvsItem::Revision(revision) => Ok(revision),
        other => Err(Error::BadStream {
            stream: "revision",
            detail: format!("unexpected item {:?}", other.id()),
        }),
    }
}

fn parse_symbol_record(record: &[u8]) -> Result<CvsItem, Error> {
    let payload = record
        .split(|c| *c == b' ')
        .nth(1)
        .ok_or_else(|| Error::BadStream {
            stream: "symbol",
            detail: String::from("expected two fields"),
        })?;
    let item = CvsItem::decode(payload)?;
    match item {
        CvsItem::Revision(_) => Err(Error::BadStream {
            stream: "symbol",
            detail: format!("unexpected revision {:?}", item.id()),
        }),
        _ => Ok(item),
    }
}
