use std::{collections::HashSet, path::PathBuf, time::Duration};

/// Explicit configuration for every pass. There is no global state; the
/// pipeline hands each pass a reference to one of these.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Project roots, one per project, in project-id order.
    pub projects: Vec<PathBuf>,

    /// Allow one changeset to span projects. When disallowed, the project id
    /// is folded into the metadata digest so revisions from different
    /// projects can never share a changeset.
    pub cross_project_commits: bool,

    /// Allow one changeset to span branches, with the same digest mechanics.
    pub cross_branch_commits: bool,

    /// Convert trunk only: graft default-branch revisions onto trunk and
    /// drop every branch and tag.
    pub trunk_only: bool,

    /// The window within which two same-metadata file commits are presumed
    /// to belong to one logical changeset.
    pub commit_threshold: Duration,

    /// Candidate encodings for metadata text, tried in order.
    pub encodings: Vec<String>,

    /// Forced symbol classifications and exclusions, by symbol name.
    pub forced_branches: HashSet<String>,
    pub forced_tags: HashSet<String>,
    pub excluded_symbols: HashSet<String>,

    /// Emit `.cvsignore` files into the commit plan instead of leaving them
    /// to the sink's ignore-property handling.
    pub keep_cvsignore: bool,

    /// Log and skip unparseable RCS files instead of aborting.
    pub ignore_errors: bool,

    /// In-memory budget per external-sort run.
    pub sort_buffer_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            cross_project_commits: false,
            cross_branch_commits: false,
            trunk_only: false,
            commit_threshold: Duration::from_secs(300),
            encodings: vec![String::from("utf-8")],
            forced_branches: HashSet::new(),
            forced_tags: HashSet::new(),
            excluded_symbols: HashSet::new(),
            keep_cvsignore: false,
            ignore_errors: false,
            sort_buffer_bytes: ext_sort::DEFAULT_RUN_BYTES,
        }
    }
}
