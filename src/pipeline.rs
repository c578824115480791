//! The pass pipeline. Passes run in a fixed order; each one reads only
//! artifacts of earlier passes and commits its own atomically, so an
//! interrupted run resumes at the boundary of the last completed pass.

use cvs_svn_fast_export_state::Layout;

use crate::{
    clean_metadata, collate_symbols, collect, config::Config, cycles, error::Error,
    filter_symbols, final_topo, initialize_changesets, revision_topo, sort,
};

struct Pass {
    name: &'static str,
    run: fn(&Config, &Layout) -> Result<(), Error>,
}

const PASSES: [Pass; 12] = [
    Pass {
        name: collect::NAME,
        run: collect::run,
    },
    Pass {
        name: clean_metadata::NAME,
        run: clean_metadata::run,
    },
    Pass {
        name: collate_symbols::NAME,
        run: collate_symbols::run,
    },
    Pass {
        name: filter_symbols::NAME,
        run: filter_symbols::run,
    },
    Pass {
        name: sort::REVISIONS_NAME,
        run: sort::run_revisions,
    },
    Pass {
        name: sort::SYMBOLS_NAME,
        run: sort::run_symbols,
    },
    Pass {
        name: initialize_changesets::NAME,
        run: initialize_changesets::run,
    },
    Pass {
        name: cycles::revision::NAME,
        run: cycles::revision::run,
    },
    Pass {
        name: revision_topo::NAME,
        run: revision_topo::run,
    },
    Pass {
        name: cycles::symbol::NAME,
        run: cycles::symbol::run,
    },
    Pass {
        name: cycles::all::NAME,
        run: cycles::all::run,
    },
    Pass {
        name: final_topo::NAME,
        run: final_topo::run,
    },
];

pub(crate) fn run(config: &Config, layout: &Layout) -> Result<(), Error> {
    for pass in &PASSES {
        if layout.pass_complete(pass.name)? {
            log::info!("pass {} already complete; skipping", pass.name);
            continue;
        }

        log::info!("pass {} starting", pass.name);
        (pass.run)(config, layout)?;
        layout.mark_pass_complete(pass.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output;
    use cvs_svn_fast_export_state::Artifact;
    use std::fs;

    // A tiny two-file archive: identical commit pairs in both files, and a
    // tag on the first revision of a.
    const FILE_A: &str = "head 1.2;
access;
symbols
 REL:1.1;
locks; strict;
comment @# @;

1.2
date 2021.01.01.00.10.00; author adam; state Exp;
branches;
next 1.1;

1.1
date 2021.01.01.00.00.00; author adam; state Exp;
branches;
next ;

desc
@@

1.2
log
@second change
@
text
@new content
@

1.1
log
@first change
@
text
@d1 1
@
";

    const FILE_B: &str = "head 1.2;
access;
symbols;
locks; strict;

1.2
date 2021.01.01.00.10.00; author adam; state Exp;
branches;
next 1.1;

1.1
date 2021.01.01.00.00.00; author adam; state Exp;
branches;
next ;

desc
@@

1.2
log
@second change
@
text
@new content
@

1.1
log
@first change
@
text
@d1 1
@
";

    #[test]
    fn test_full_pipeline_on_tiny_archive() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("proj");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("a,v"), FILE_A).unwrap();
        fs::write(project.join("b,v"), FILE_B).unwrap();

        let mut config = Config::default();
        config.projects = vec![project];
        let layout = Layout::open(dir.path().join("state")).unwrap();

        run(&config, &layout).unwrap();

        // Commit order: the two 1.1 revisions together, the tag, then the
        // two 1.2 revisions; timestamps strictly monotonic.
        let order: Vec<(u32, u64)> = layout
            .line_reader(Artifact::Order)
            .unwrap()
            .map(|record| {
                let record = record.unwrap();
                let text = String::from_utf8(record).unwrap();
                let mut fields = text.split_whitespace();
                (
                    fields.next().unwrap().parse().unwrap(),
                    fields.next().unwrap().parse().unwrap(),
                )
            })
            .collect();
        assert_eq!(order.len(), 3);
        for pair in order.windows(2) {
            assert!(pair[1].1 > pair[0].1);
        }

        // Resuming a finished run is a no-op with an identical result.
        let first = fs::read(layout.path(Artifact::Order)).unwrap();
        run(&config, &layout).unwrap();
        assert_eq!(fs::read(layout.path(Artifact::Order)).unwrap(), first);

        // The plan names both kinds of commits, in order.
        let mut plan = Vec::new();
        output::write_plan(&config, &layout, &mut plan).unwrap();
        let plan = String::from_utf8(plan).unwrap();

        let commit_lines: Vec<&str> = plan
            .lines()
            .filter(|line| !line.starts_with("  "))
            .collect();
        assert_eq!(commit_lines.len(), 3);
        assert!(commit_lines[0].starts_with("commit "));
        assert!(commit_lines[1].starts_with("symbol "));
        assert!(commit_lines[1].contains("REL tag"));
        assert!(commit_lines[2].starts_with("commit "));

        assert!(plan.contains("M 1.1 a"));
        assert!(plan.contains("M 1.1 b"));
        assert!(plan.contains("M 1.2 a"));
        assert!(plan.contains("copy a @"));

        // The openings/closings log records the tag being opened at r1 and
        // closed at r3 (where 1.2 overwrote the tagged state).
        let openings: Vec<String> = layout
            .line_reader(Artifact::OpeningsClosings)
            .unwrap()
            .map(|record| String::from_utf8(record.unwrap()).unwrap())
            .collect();
        assert_eq!(openings.len(), 2);
        assert!(openings[0].contains(" 1 O "));
        assert!(openings[1].contains(" 3 C "));
    }
}
