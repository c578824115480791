use std::{io, path::PathBuf, time::Duration};

use cvs_svn_fast_export_state::Layout;
use structopt::StructOpt;

mod clean_metadata;
mod collate_symbols;
mod collect;
mod config;
mod cycles;
mod error;
mod filter_symbols;
mod final_topo;
mod graph;
mod initialize_changesets;
mod output;
mod pipeline;
mod revision_topo;
mod sort;

use config::Config;

#[derive(Debug, StructOpt)]
struct Opt {
    #[structopt(
        long,
        parse(from_os_str),
        help = "directory for intermediate state files"
    )]
    state_dir: PathBuf,

    #[structopt(
        long = "project",
        parse(from_os_str),
        required = true,
        help = "root of a project within the CVS repository (repeatable)"
    )]
    projects: Vec<PathBuf>,

    #[structopt(
        long,
        default_value = "300s",
        parse(try_from_str = parse_duration::parse::parse),
        help = "maximum time between file commits before they'll be considered different changesets"
    )]
    commit_threshold: Duration,

    #[structopt(long, help = "allow changesets spanning projects")]
    cross_project_commits: bool,

    #[structopt(long, help = "allow changesets spanning branches")]
    cross_branch_commits: bool,

    #[structopt(long, help = "convert trunk only, dropping branches and tags")]
    trunk_only: bool,

    #[structopt(
        long = "encoding",
        default_value = "utf-8",
        help = "candidate encoding for metadata text (repeatable, tried in order)"
    )]
    encodings: Vec<String>,

    #[structopt(long = "force-branch", help = "symbol to convert as a branch (repeatable)")]
    forced_branches: Vec<String>,

    #[structopt(long = "force-tag", help = "symbol to convert as a tag (repeatable)")]
    forced_tags: Vec<String>,

    #[structopt(long = "exclude", help = "symbol to exclude from conversion (repeatable)")]
    excluded_symbols: Vec<String>,

    #[structopt(long, help = "emit .cvsignore files into the commit plan")]
    keep_cvsignore: bool,

    #[structopt(long, help = "log and skip unparseable RCS files")]
    ignore_errors: bool,

    #[structopt(long, help = "discard intermediate state and start over")]
    restart: bool,

    #[structopt(
        long,
        default_value = "67108864",
        help = "in-memory budget per external sort run, in bytes"
    )]
    sort_buffer: usize,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let config = Config {
        projects: opt.projects,
        cross_project_commits: opt.cross_project_commits,
        cross_branch_commits: opt.cross_branch_commits,
        trunk_only: opt.trunk_only,
        commit_threshold: opt.commit_threshold,
        encodings: opt.encodings,
        forced_branches: opt.forced_branches.into_iter().collect(),
        forced_tags: opt.forced_tags.into_iter().collect(),
        excluded_symbols: opt.excluded_symbols.into_iter().collect(),
        keep_cvsignore: opt.keep_cvsignore,
        ignore_errors: opt.ignore_errors,
        sort_buffer_bytes: opt.sort_buffer,
    };

    let layout = Layout::open(&opt.state_dir)?;
    if opt.restart {
        layout.reset()?;
    }

    pipeline::run(&config, &layout)?;

    let stdout = io::stdout();
    output::write_plan(&config, &layout, &mut stdout.lock())?;

    Ok(())
}
