//! Event-driven parsing of RCS (`,v`) files.
//!
//! Unlike parsers that build a whole-file value, this crate drives a [`Sink`]
//! as structures are recognized: symbols from the admin header, then one
//! summary per delta, then the log and text of each delta. Consumers that only
//! need the revision graph never pay for an in-memory map of every delta text.

use nom::Finish;

mod error;
mod num;
mod parser;
mod sink;

pub use error::Error;
pub use num::RevNum;
pub use sink::Sink;

/// Parses a full RCS file, feeding `sink` as each structure is recognized.
///
/// Callbacks are invoked in file order: `define_admin` once, `define_symbol`
/// per symbolic name, `define_revision` per delta summary, and
/// `set_revision_info` per delta text. A sink error aborts the parse.
pub fn parse<S: Sink>(input: &[u8], sink: &mut S) -> Result<(), Error<S::Error>> {
    let (mut rest, admin) = complete(parser::admin(input))?;

    sink.define_admin(admin.head.as_ref(), admin.branch.as_ref())
        .map_err(Error::Sink)?;
    for (name, revision) in &admin.symbols {
        sink.define_symbol(name, revision).map_err(Error::Sink)?;
    }

    loop {
        let parsed: Result<_, Error<S::Error>> = complete(parser::delta(rest));
        let (next, delta) = match parsed {
            Ok(parsed) => parsed,
            // The delta section ends at the `desc` keyword; there is no
            // terminator of its own.
            Err(_) => break,
        };
        sink.define_revision(
            &delta.revision,
            parser::date_to_epoch(&delta.date)?,
            &delta.author,
            delta.state.as_deref(),
            &delta.branches,
            delta.next.as_ref(),
        )
        .map_err(Error::Sink)?;
        rest = next;
    }

    let (desc_rest, _desc) = complete(parser::desc(rest))?;
    rest = desc_rest;
    while !rest.iter().all(u8::is_ascii_whitespace) {
        let (next, text) = complete(parser::delta_text(rest))?;
        sink.set_revision_info(&text.revision, &text.log, &text.text)
            .map_err(Error::Sink)?;
        rest = next;
    }

    Ok(())
}

fn complete<O, E>(
    result: nom::IResult<&[u8], O>,
) -> Result<(&[u8], O), Error<E>> {
    Finish::finish(result).map_err(|e| Error::Parse {
        location: excerpt(e.input),
        kind: e.code,
    })
}

// Error locations are for humans; a screenful of context is plenty.
fn excerpt(input: &[u8]) -> Vec<u8> {
    input[..input.len().min(64)].to_vec()
}
