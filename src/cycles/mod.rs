//! The stall-and-split cycle breakers. All three passes share the same
//! skeleton: traverse the relevant subgraph topologically, and whenever the
//! traversal stalls, split one changeset on the reported cycle so that the
//! offending edge pair no longer runs through a single node.
//!
//! Splitting is sound because changesets are internally dependency-free: the
//! two halves of a split never depend on each other directly, only through
//! their items' edges to other changesets.

use std::collections::{HashMap, HashSet};

use cvs_svn_fast_export_state::{
    changeset::{Changeset, ChangesetStore, ItemDep, SymbolChangeset},
    item::{ChangesetId, ItemId},
    symbol::SymbolClass,
};

use crate::error::Error;

pub(crate) mod all;
pub(crate) mod revision;
pub(crate) mod symbol;

pub(crate) fn deps_by_item(deps: &[ItemDep]) -> HashMap<ItemId, &ItemDep> {
    deps.iter().map(|dep| (dep.id, dep)).collect()
}

/// Items of `changeset` that depend on an item of `pred`.
fn entering_items(
    store: &ChangesetStore,
    by_item: &HashMap<ItemId, &ItemDep>,
    changeset: &Changeset,
    pred: ChangesetId,
) -> HashSet<ItemId> {
    changeset
        .items()
        .iter()
        .filter(|item| {
            by_item
                .get(*item)
                .map(|dep| {
                    dep.deps
                        .iter()
                        .any(|d| store.item_map.get(d) == Some(&pred))
                })
                .unwrap_or(false)
        })
        .copied()
        .collect()
}

/// Items of changeset `c` that items of `succ` depend on.
fn exiting_items(
    store: &ChangesetStore,
    by_item: &HashMap<ItemId, &ItemDep>,
    c: ChangesetId,
    succ: &Changeset,
) -> HashSet<ItemId> {
    let mut exiting = HashSet::new();
    for item in succ.items() {
        if let Some(dep) = by_item.get(item) {
            for d in &dep.deps {
                if store.item_map.get(d) == Some(&c) {
                    exiting.insert(*d);
                }
            }
        }
    }
    exiting
}

// A split severs the pred → c → succ chain when neither half carries both an
// entering and an exiting item.
fn severs(
    left: &[ItemId],
    right: &[ItemId],
    entering: &HashSet<ItemId>,
    exiting: &HashSet<ItemId>,
) -> bool {
    let has_both = |half: &[ItemId]| {
        half.iter().any(|item| entering.contains(item))
            && half.iter().any(|item| exiting.contains(item))
    };
    !has_both(left) && !has_both(right)
}

/// Splits one branch changeset on `cycle` by moving the items that depend on
/// the cycle predecessor into a second changeset for the same symbol. Tags
/// are never candidates: nothing can depend on a tag, so a tag changeset
/// cannot sit on a cycle.
pub(super) fn split_one_symbol_changeset(
    store: &mut ChangesetStore,
    by_item: &HashMap<ItemId, &ItemDep>,
    cycle: &[ChangesetId],
) -> Result<(), Error> {
    let positions = store.positions();

    let mut split: Option<(usize, Vec<ItemId>, Vec<ItemId>)> = None;
    for (i, &c) in cycle.iter().enumerate() {
        let pred = cycle[(i + cycle.len() - 1) % cycle.len()];
        let succ = cycle[(i + 1) % cycle.len()];

        let changeset = &store.changesets[positions[&c]];
        let branch = match changeset {
            Changeset::Symbol(s) if s.class == SymbolClass::Branch => s,
            _ => continue,
        };

        let entering = entering_items(store, by_item, changeset, pred);
        let exiting = exiting_items(store, by_item, c, &store.changesets[positions[&succ]]);
        if entering.is_empty()
            || exiting.is_empty()
            || entering.len() == branch.items.len()
            || entering.intersection(&exiting).next().is_some()
        {
            continue;
        }

        let first: Vec<ItemId> = branch
            .items
            .iter()
            .filter(|item| !entering.contains(*item))
            .copied()
            .collect();
        let second: Vec<ItemId> = branch
            .items
            .iter()
            .filter(|item| entering.contains(*item))
            .copied()
            .collect();
        split = Some((positions[&c], first, second));
        break;
    }

    match split {
        Some((position, first, second)) => {
            apply_symbol_split(store, position, first, second);
            Ok(())
        }
        None => Err(Error::UnbreakableCycle {
            changesets: cycle.to_vec(),
        }),
    }
}

fn apply_symbol_split(
    store: &mut ChangesetStore,
    position: usize,
    first: Vec<ItemId>,
    second: Vec<ItemId>,
) {
    let (id, symbol, class) = match &store.changesets[position] {
        Changeset::Symbol(s) => (s.id, s.symbol, s.class),
        other => unreachable!("symbol split applied to {:?}", other.id()),
    };
    let second_id = store.allocate_id();
    log::debug!(
        "splitting symbol changeset {} into {} + {}",
        id,
        id,
        second_id
    );

    store.apply_split(
        position,
        Changeset::Symbol(SymbolChangeset {
            id,
            symbol,
            class,
            items: first,
        }),
        Changeset::Symbol(SymbolChangeset {
            id: second_id,
            symbol,
            class,
            items: second,
        }),
    );
}
