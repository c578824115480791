//! The collection pass: parse every RCS file under every project root, build
//! the per-file item bundles with their intra-file dependency edges, intern
//! metadata, and accumulate per-symbol usage statistics.
//!
//! This is the only pass that sees raw RCS structure. Vendor-branch and
//! branch-addition anomalies are normalized here, once, so every downstream
//! pass can treat the item graph as clean.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    convert::Infallible,
    ffi::OsStr,
    fs,
    os::unix::prelude::OsStrExt,
    path::{Path, PathBuf},
};

use cvs_svn_fast_export_state::{
    item::{
        CvsBranch, CvsItem, CvsRevision, CvsTag, FileId, ItemId, Lod, PathRecord, ProjectId,
        SymbolId,
    },
    metadata::MetadataTable,
    symbol::SymbolTable,
    Artifact, Layout,
};
use rcs_parse::RevNum;
use walkdir::WalkDir;

use crate::{config::Config, error::Error};

pub(crate) const NAME: &str = "collect";

pub(crate) fn run(config: &Config, layout: &Layout) -> Result<(), Error> {
    let mut collector = Collector::new(config);
    let mut items = layout.store_writer::<FileId, Vec<CvsItem>>(NAME, Artifact::Items)?;

    for (project_index, root) in config.projects.iter().enumerate() {
        let project = ProjectId::from(project_index as u32);

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Collect {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file()
                || !entry.path().as_os_str().as_bytes().ends_with(b",v")
            {
                continue;
            }

            let path = entry.path();
            log::trace!("collecting {}", path.display());
            match collector.collect_file(project, root, path) {
                Ok((file, bundle)) => items.push(file, &bundle)?,
                Err(e) if config.ignore_errors => {
                    log::warn!("skipping {}: {}", path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    log::info!(
        "collected {} files, {} symbols, {} metadata records",
        items.len(),
        collector.symbols.len(),
        collector.metadata.len()
    );

    items.commit()?;
    layout.write_bincode(NAME, Artifact::Paths, &collector.paths)?;
    layout.write_bincode(NAME, Artifact::SymbolStats, &collector.symbols)?;
    layout.write_bincode(NAME, Artifact::Metadata, &collector.metadata)?;
    Ok(())
}

/// Accumulates the cross-file tables while files are collected one at a time.
struct Collector<'a> {
    config: &'a Config,
    paths: Vec<PathRecord>,
    symbols: SymbolTable,
    metadata: MetadataTable,
    next_item: u32,
}

impl<'a> Collector<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            paths: Vec::new(),
            symbols: SymbolTable::new(),
            metadata: MetadataTable::new(),
            next_item: 0,
        }
    }

    fn collect_file(
        &mut self,
        project: ProjectId,
        root: &Path,
        path: &Path,
    ) -> Result<(FileId, Vec<CvsItem>), Error> {
        let bytes = fs::read(path)?;
        let file = FileId::from(self.paths.len() as u32);

        let mut sink = FileCollector::new(file);
        rcs_parse::parse(&bytes, &mut sink).map_err(|e| Error::Collect {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        self.paths.push(PathRecord {
            id: file,
            project,
            path: munge_raw_path(path, root),
        });

        let bundle = sink.into_items(self, project, path)?;
        Ok((file, bundle))
    }

    fn allocate_item(&mut self) -> ItemId {
        let id = ItemId::from(self.next_item);
        self.next_item += 1;
        id
    }
}

/// The per-file sink driven by the RCS parser. Holds the raw revision records
/// until the whole file has been seen, then builds the normalized bundle.
struct FileCollector {
    file: FileId,
    head: Option<RevNum>,
    symbols: Vec<(String, RevNum)>,
    revisions: HashMap<RevNum, RevRecord>,
    order: Vec<RevNum>,
}

struct RevRecord {
    date: u64,
    author: Vec<u8>,
    dead: bool,
    next: Option<RevNum>,
    log: Vec<u8>,
}

impl FileCollector {
    fn new(file: FileId) -> Self {
        Self {
            file,
            head: None,
            symbols: Vec::new(),
            revisions: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl rcs_parse::Sink for FileCollector {
    type Error = Infallible;

    fn define_admin(
        &mut self,
        head: Option<&RevNum>,
        _default_branch: Option<&RevNum>,
    ) -> Result<(), Self::Error> {
        self.head = head.cloned();
        Ok(())
    }

    fn define_symbol(&mut self, name: &[u8], revision: &RevNum) -> Result<(), Self::Error> {
        self.symbols
            .push((String::from_utf8_lossy(name).into_owned(), revision.clone()));
        Ok(())
    }

    fn define_revision(
        &mut self,
        revision: &RevNum,
        date: u64,
        author: &[u8],
        state: Option<&[u8]>,
        _branches: &[RevNum],
        next: Option<&RevNum>,
    ) -> Result<(), Self::Error> {
        self.order.push(revision.clone());
        self.revisions.insert(
            revision.clone(),
            RevRecord {
                date,
                author: author.to_vec(),
                dead: state == Some(b"dead".as_ref()),
                next: next.cloned(),
                log: Vec::new(),
            },
        );
        Ok(())
    }

    fn set_revision_info(
        &mut self,
        revision: &RevNum,
        log: &[u8],
        _text: &[u8],
    ) -> Result<(), Self::Error> {
        if let Some(record) = self.revisions.get_mut(revision) {
            record.log = log.to_vec();
        }
        Ok(())
    }
}

impl FileCollector {
    fn into_items(
        self,
        collector: &mut Collector,
        project: ProjectId,
        path: &Path,
    ) -> Result<Vec<CvsItem>, Error> {
        if self.revisions.is_empty() {
            return Ok(Vec::new());
        }

        match &self.head {
            Some(head) if self.revisions.contains_key(head) => {}
            _ => {
                return Err(Error::Collect {
                    path: path.to_path_buf(),
                    reason: String::from("head revision missing or undefined"),
                })
            }
        }

        let mut builder = FileBuilder {
            items: BTreeMap::new(),
            rev_items: HashMap::new(),
            branch_items: HashMap::new(),
        };

        let branch_symbols = self.name_branches(collector, project);
        self.build_revisions(collector, project, &branch_symbols, &mut builder);
        self.link_revisions(&mut builder);
        self.build_symbols(collector, project, &branch_symbols, &mut builder);

        builder.normalize_vendor_branch(collector);
        builder.normalize_added_on_branch();
        builder.normalize_late_added_on_branch(collector);
        if collector.config.trunk_only {
            builder.graft_to_trunk();
        }
        builder.repair_dangling();

        builder.accumulate_stats(collector);

        Ok(builder.items.into_iter().map(|(_, item)| item).collect())
    }

    /// Maps every branch number that appears in the file to a symbol id,
    /// synthesizing a name for branches that carry revisions but no symbol.
    fn name_branches(
        &self,
        collector: &mut Collector,
        project: ProjectId,
    ) -> HashMap<Vec<u32>, SymbolId> {
        let mut branch_symbols: HashMap<Vec<u32>, SymbolId> = HashMap::new();

        for (name, num) in &self.symbols {
            if num.is_branch() {
                let id = collector.symbols.intern(project, name);
                branch_symbols
                    .entry(num.components().to_vec())
                    .or_insert(id);
            }
        }

        let mut unnamed: Vec<RevNum> = self
            .revisions
            .keys()
            .filter_map(|num| num.branch_prefix())
            .filter(|prefix| !branch_symbols.contains_key(prefix.components()))
            .collect();
        unnamed.sort();
        unnamed.dedup();
        for prefix in unnamed {
            let name = format!("unlabeled-{}", prefix);
            log::warn!("branch {} has no symbolic name; using {}", prefix, name);
            branch_symbols.insert(
                prefix.components().to_vec(),
                collector.symbols.intern(project, &name),
            );
        }

        branch_symbols
    }

    fn build_revisions(
        &self,
        collector: &mut Collector,
        project: ProjectId,
        branch_symbols: &HashMap<Vec<u32>, SymbolId>,
        builder: &mut FileBuilder,
    ) {
        let project_key = if collector.config.cross_project_commits {
            None
        } else {
            Some(project)
        };

        for num in &self.order {
            let record = &self.revisions[num];
            let lod = lod_of(num, branch_symbols);

            let branch_key = if collector.config.cross_branch_commits {
                None
            } else {
                match lod {
                    Lod::Trunk => None,
                    Lod::Branch(symbol) => collector
                        .symbols
                        .get(symbol)
                        .map(|stats| stats.name.clone()),
                }
            };

            let metadata = collector.metadata.intern(
                &record.author,
                &record.log,
                project_key,
                branch_key.as_deref(),
            );

            let id = collector.allocate_item();
            builder.rev_items.insert(num.clone(), id);
            builder.items.insert(
                id,
                CvsItem::Revision(CvsRevision {
                    id,
                    file: self.file,
                    lod,
                    rev: num.clone(),
                    timestamp: record.date,
                    metadata,
                    dead: record.dead,
                    prev: None,
                    next: None,
                    on_branch: None,
                    opens: Vec::new(),
                    closes: Vec::new(),
                }),
            );
        }
    }

    /// Builds the predecessor/successor edges. On trunk, a delta's `next`
    /// points backwards in time; on branches it points forwards.
    fn link_revisions(&self, builder: &mut FileBuilder) {
        for num in &self.order {
            let next = match &self.revisions[num].next {
                Some(next) => next,
                None => continue,
            };
            let (this_item, next_item) = match (
                builder.rev_items.get(num).copied(),
                builder.rev_items.get(next).copied(),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };

            let (earlier, later) = if num.is_trunk_revision() {
                (next_item, this_item)
            } else {
                (this_item, next_item)
            };
            builder.revision_mut(later).prev = Some(earlier);
            builder.revision_mut(earlier).next = Some(later);
        }
    }

    fn build_symbols(
        &self,
        collector: &mut Collector,
        project: ProjectId,
        branch_symbols: &HashMap<Vec<u32>, SymbolId>,
        builder: &mut FileBuilder,
    ) {
        // Synthesized branch names are not in self.symbols; emit them too so
        // unlabeled branches still get creation items.
        let mut all: Vec<(SymbolId, RevNum)> = self
            .symbols
            .iter()
            .map(|(name, num)| (collector.symbols.intern(project, name), num.clone()))
            .collect();
        for (components, symbol) in branch_symbols {
            if !all.iter().any(|(_, num)| num.components() == components.as_slice()) {
                // Reconstruct the branch number from its components.
                if let Some(num) = self
                    .revisions
                    .keys()
                    .filter_map(|num| num.branch_prefix())
                    .find(|prefix| prefix.components() == components.as_slice())
                {
                    all.push((*symbol, num));
                }
            }
        }

        for (symbol, num) in all {
            if num.is_branch() {
                let source = num
                    .base_revision()
                    .and_then(|base| builder.rev_items.get(&base).copied());
                let source_lod = num
                    .base_revision()
                    .map(|base| lod_of(&base, branch_symbols))
                    .unwrap_or(Lod::Trunk);
                if source.is_none() {
                    log::warn!("branch {} has no base revision in {}", num, self.file);
                    continue;
                }

                let primary = !builder
                    .branch_items
                    .contains_key(num.components());
                let first_commit = if primary {
                    num.first_on_branch()
                        .and_then(|first| builder.rev_items.get(&first).copied())
                } else {
                    None
                };

                let id = collector.allocate_item();
                builder.items.insert(
                    id,
                    CvsItem::Branch(CvsBranch {
                        id,
                        symbol,
                        file: self.file,
                        source,
                        source_lod,
                        first_commit,
                        opens: Vec::new(),
                    }),
                );
                builder
                    .branch_items
                    .entry(num.components().to_vec())
                    .or_default()
                    .push(id);
                if let Some(first) = first_commit {
                    builder.revision_mut(first).on_branch = Some(id);
                }
            } else {
                match builder.rev_items.get(&num).copied() {
                    Some(source) if !builder.revision(source).dead => {
                        let id = collector.allocate_item();
                        builder.items.insert(
                            id,
                            CvsItem::Tag(CvsTag {
                                id,
                                symbol,
                                file: self.file,
                                source: Some(source),
                                source_lod: lod_of(&num, branch_symbols),
                            }),
                        );
                    }
                    Some(_) => log::debug!("ignoring tag on dead revision {}", num),
                    None => log::warn!("tag references missing revision {}", num),
                }
            }
        }
    }
}

fn lod_of(num: &RevNum, branch_symbols: &HashMap<Vec<u32>, SymbolId>) -> Lod {
    match num.branch_prefix() {
        Some(prefix) => match branch_symbols.get(prefix.components()) {
            Some(symbol) => Lod::Branch(*symbol),
            None => Lod::Trunk,
        },
        None => Lod::Trunk,
    }
}

/// The in-progress bundle for one file.
struct FileBuilder {
    items: BTreeMap<ItemId, CvsItem>,
    rev_items: HashMap<RevNum, ItemId>,
    branch_items: HashMap<Vec<u32>, Vec<ItemId>>,
}

impl FileBuilder {
    fn revision(&self, id: ItemId) -> &CvsRevision {
        self.items[&id].as_revision().expect("id is a revision")
    }

    fn revision_mut(&mut self, id: ItemId) -> &mut CvsRevision {
        self.items
            .get_mut(&id)
            .and_then(CvsItem::as_revision_mut)
            .expect("id is a revision")
    }

    fn find_revision(&self, components: &[u32]) -> Option<ItemId> {
        self.rev_items
            .iter()
            .find(|(num, _)| num.components() == components)
            .map(|(_, id)| *id)
    }

    fn remove_revision(&mut self, id: ItemId) {
        let num = self.revision(id).rev.clone();
        self.items.remove(&id);
        self.rev_items.remove(&num);
    }

    /// If the head of trunk came from a vendor import, make trunk depend on
    /// the vendor chain and drop the synthetic `1.1` unless its log differs
    /// from the import's.
    fn normalize_vendor_branch(&mut self, collector: &Collector) {
        let one_one = match self.find_revision(&[1, 1]) {
            Some(id) => id,
            None => return,
        };
        let first_vendor = match self.find_revision(&[1, 1, 1, 1]) {
            Some(id) => id,
            None => return,
        };

        // Walk to the end of the vendor chain.
        let mut last_vendor = first_vendor;
        while let Some(next) = self.revision(last_vendor).next {
            last_vendor = next;
        }

        if let Some(one_two) = self.find_revision(&[1, 2]) {
            self.revision_mut(one_two).prev = Some(last_vendor);
        }

        let same_log = {
            let log_of = |id: ItemId| {
                collector
                    .metadata
                    .get(self.revision(id).metadata)
                    .map(|m| m.log.clone())
                    .unwrap_or_default()
            };
            log_of(one_one) == log_of(first_vendor)
        };
        if !same_log {
            return;
        }

        let vendor_lod = self.revision(first_vendor).lod;
        let vendor_branches: HashSet<ItemId> = self
            .branch_items
            .get([1u32, 1, 1].as_ref())
            .into_iter()
            .flatten()
            .copied()
            .collect();

        self.remove_revision(one_one);
        for item in self.items.values_mut() {
            match item {
                CvsItem::Branch(b) if b.source == Some(one_one) => {
                    if vendor_branches.contains(&b.id) {
                        // The vendor branch cannot source from its own chain.
                        b.source = None;
                    } else {
                        b.source = Some(first_vendor);
                        b.source_lod = vendor_lod;
                    }
                }
                CvsItem::Tag(t) if t.source == Some(one_one) => {
                    t.source = Some(first_vendor);
                    t.source_lod = vendor_lod;
                }
                _ => {}
            }
        }
    }

    /// If the file first appeared on a branch, CVS left a dead `1.1` on
    /// trunk: drop it and detach the branch.
    fn normalize_added_on_branch(&mut self) {
        let one_one = match self.find_revision(&[1, 1]) {
            Some(id) => id,
            None => return,
        };
        if !self.revision(one_one).dead {
            return;
        }

        let sprouting: Vec<ItemId> = self
            .items
            .values()
            .filter_map(CvsItem::as_branch)
            .filter(|b| b.source == Some(one_one))
            .map(|b| b.id)
            .collect();
        if sprouting.is_empty() {
            return;
        }

        self.remove_revision(one_one);
        for id in sprouting {
            if let Some(CvsItem::Branch(b)) = self.items.get_mut(&id) {
                b.source = None;
            }
        }
        if let Some(one_two) = self.find_revision(&[1, 2]) {
            self.revision_mut(one_two).prev = None;
        }
    }

    /// Modern CVS inserts a dead revision at the fork point when a file is
    /// added on a branch after the branch was made: remove it and sever the
    /// branch from trunk.
    fn normalize_late_added_on_branch(&mut self, collector: &Collector) {
        let branches: Vec<ItemId> = self
            .items
            .values()
            .filter_map(CvsItem::as_branch)
            .filter(|b| b.source.is_some())
            .map(|b| b.id)
            .collect();

        for branch in branches {
            let first = match self.items[&branch].as_branch().and_then(|b| b.first_commit) {
                Some(first) => first,
                None => continue,
            };

            let (dead, added_on_branch, second) = {
                let rev = self.revision(first);
                let log = collector
                    .metadata
                    .get(rev.metadata)
                    .map(|m| m.log.as_slice())
                    .unwrap_or_default();
                (
                    rev.dead,
                    contains(log, b"was added on branch"),
                    rev.next,
                )
            };
            if !dead || !added_on_branch {
                continue;
            }

            self.remove_revision(first);
            if let Some(CvsItem::Branch(b)) = self.items.get_mut(&branch) {
                b.source = None;
                b.first_commit = second;
            }
            if let Some(second) = second {
                let rev = self.revision_mut(second);
                rev.prev = None;
                rev.on_branch = Some(branch);
            }
        }
    }

    /// Trunk-only conversion: default-branch (vendor) revisions become trunk
    /// revisions; everything else off trunk is dropped, symbols included.
    fn graft_to_trunk(&mut self) {
        let one_one = self.find_revision(&[1, 1]);
        let first_vendor = self.find_revision(&[1, 1, 1, 1]);

        let vendor_revisions: Vec<ItemId> = self
            .items
            .values()
            .filter_map(CvsItem::as_revision)
            .filter(|r| r.rev.is_vendor_revision())
            .map(|r| r.id)
            .collect();
        for id in vendor_revisions {
            let rev = self.revision_mut(id);
            rev.lod = Lod::Trunk;
            rev.on_branch = None;
        }
        if let (Some(one_one), Some(first_vendor)) = (one_one, first_vendor) {
            self.revision_mut(first_vendor).prev = Some(one_one);
        }

        let keep: HashSet<ItemId> = self
            .items
            .values()
            .filter_map(CvsItem::as_revision)
            .filter(|r| r.lod == Lod::Trunk)
            .map(|r| r.id)
            .collect();
        self.items.retain(|id, item| {
            matches!(item, CvsItem::Revision(_)) && keep.contains(id)
        });
        self.rev_items.retain(|_, id| keep.contains(id));
        self.branch_items.clear();
    }

    /// Clears references to items removed by the normalizations.
    fn repair_dangling(&mut self) {
        let valid: HashSet<ItemId> = self.items.keys().copied().collect();
        let live = |id: &Option<ItemId>| id.filter(|id| valid.contains(id));

        for item in self.items.values_mut() {
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

    /// Accumulates symbol statistics from the normalized bundle: usage
    /// counts, blockers, and the possible-parents histogram.
    fn accumulate_stats(&self, collector: &mut Collector) {
        for item in self.items.values() {
            match item {
                CvsItem::Branch(b) => {
                    let stats = collector.symbols.get_mut(b.symbol);
                    stats.branch_uses += 1;
                    if b.first_commit.is_some() {
                        stats.branch_commit_files += 1;
                    }
                }
                CvsItem::Tag(t) => {
                    collector.symbols.get_mut(t.symbol).tag_uses += 1;
                }
                CvsItem::Revision(_) => {}
            }
        }

        for item in self.items.values() {
            let (symbol, source) = match item {
                CvsItem::Branch(b) => (b.symbol, b.source),
                CvsItem::Tag(t) => (t.symbol, t.source),
                CvsItem::Revision(_) => continue,
            };
            let source = match source.and_then(|id| self.items[&id].as_revision()) {
                Some(rev) => rev,
                None => continue,
            };

            if let Lod::Branch(parent) = source.lod {
                collector.symbols.get_mut(parent).blockers.insert(symbol);
            }

            let mut candidates = vec![source.lod];
            for other in self.items.values() {
                if let CvsItem::Branch(other) = other {
                    if other.symbol != symbol && other.source == Some(source.id) {
                        candidates.push(Lod::Branch(other.symbol));
                    }
                }
            }
            for candidate in candidates {
                *collector
                    .symbols
                    .get_mut(symbol)
                    .possible_parents
                    .entry(candidate)
                    .or_insert(0) += 1;
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len().max(1))
        .any(|window| window == needle)
}

/// Strips CVSROOT-specific components of the file path: the project root
/// prefix, the `,v` suffix, and a trailing `Attic` directory.
fn munge_raw_path(input: &Path, prefix: &Path) -> PathBuf {
    let unprefixed = input.strip_prefix(prefix).unwrap_or(input);

    if let Some(input_file) = unprefixed.file_name() {
        let file = strip_comma_v_suffix(input_file).unwrap_or_else(|| PathBuf::from(input_file));
        strip_attic_suffix(unprefixed)
            .map(|path| path.join(&file))
            .unwrap_or_else(|| input_file.into())
    } else {
        unprefixed.into()
    }
}

fn strip_attic_suffix(path: &Path) -> Option<&Path> {
    path.parent().and_then(|parent| {
        if parent.ends_with(OsStr::from_bytes(b"Attic")) {
            parent.parent()
        } else {
            Some(parent)
        }
    })
}

fn strip_comma_v_suffix(file: &OsStr) -> Option<PathBuf> {
    file.as_bytes()
        .strip_suffix(b",v")
        .map(|stripped| PathBuf::from(OsStr::from_bytes(stripped)))
}
