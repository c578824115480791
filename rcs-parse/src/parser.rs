use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{multispace0, multispace1},
    combinator::{map, map_opt, opt, value},
    multi::{fold_many0, many0},
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::{num::RevNum, Error};

#[derive(Debug)]
pub(crate) struct Admin {
    pub head: Option<RevNum>,
    pub branch: Option<RevNum>,
    pub symbols: Vec<(Vec<u8>, RevNum)>,
}

#[derive(Debug)]
pub(crate) struct Delta {
    pub revision: RevNum,
    pub date: Vec<u8>,
    pub author: Vec<u8>,
    pub state: Option<Vec<u8>>,
    pub branches: Vec<RevNum>,
    pub next: Option<RevNum>,
}

#[derive(Debug)]
pub(crate) struct DeltaText {
    pub revision: RevNum,
    pub log: Vec<u8>,
    pub text: Vec<u8>,
}

pub(crate) fn admin(input: &[u8]) -> IResult<&[u8], Admin> {
    map(
        preceded(
            multispace0,
            tuple((
                phrase_opt(b"head", num),
                opt(phrase_opt(b"branch", num)),
                phrase(b"access", many0(preceded(multispace1, id))),
                phrase(
                    b"symbols",
                    many0(separated_pair(
                        delimited(multispace0, sym, multispace0),
                        tag(b":"),
                        delimited(multispace0, num, multispace0),
                    )),
                ),
                phrase(
                    b"locks",
                    many0(separated_pair(
                        delimited(multispace0, id, multispace0),
                        tag(b":"),
                        delimited(multispace0, num, multispace0),
                    )),
                ),
                opt(tuple((tag(b"strict"), multispace0, tag(b";"), multispace0))),
                opt(phrase(b"integrity", opt(string))),
                opt(phrase(b"comment", string)),
                opt(phrase(b"expand", string)),
            )),
        ),
        |(head, branch, _access, symbols, _locks, _strict, _integrity, _comment, _expand)| Admin {
            head,
            branch: branch.flatten(),
            symbols,
        },
    )(input)
}

pub(crate) fn delta(input: &[u8]) -> IResult<&[u8], Delta> {
    map(
        preceded(
            multispace0,
            tuple((
                terminated(num, multispace1),
                phrase_after_space(b"date", numlike_owned),
                phrase_after_space(b"author", id),
                phrase_after_space(b"state", opt(id)),
                phrase(b"branches", many0(preceded(multispace1, num))),
                phrase_after_space(b"next", opt(num)),
                opt(phrase_after_space(b"commitid", sym)),
            )),
        ),
        |(revision, date, author, state, branches, next, _commit_id)| Delta {
            revision,
            date,
            author,
            state,
            branches,
            next,
        },
    )(input)
}

pub(crate) fn desc(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    preceded(
        tuple((multispace0, tag(b"desc"), multispace1)),
        string,
    )(input)
}

pub(crate) fn delta_text(input: &[u8]) -> IResult<&[u8], DeltaText> {
    map(
        preceded(
            multispace0,
            tuple((
                num,
                preceded(multispace1, tag(b"log")),
                delimited(multispace1, string, multispace1),
                tag(b"text"),
                delimited(multispace1, string, multispace0),
            )),
        ),
        |(revision, _, log, _, text)| DeltaText {
            revision,
            log,
            text,
        },
    )(input)
}

/// Converts an RCS `Y.m.d.H.M.S` date to seconds since the epoch. Two-digit
/// years are relative to 1900; all dates are read as UTC.
pub(crate) fn date_to_epoch<E>(date: &[u8]) -> Result<u64, Error<E>> {
    let invalid = || Error::InvalidDate(String::from_utf8_lossy(date).into_owned());

    let parts = std::str::from_utf8(date)
        .map_err(|_| invalid())?
        .split('.')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<u32>, _>>()?;
    if parts.len() != 6 {
        return Err(invalid());
    }

    let year = if parts[0] < 100 {
        parts[0] + 1900
    } else {
        parts[0]
    };

    let timestamp = chrono::NaiveDate::from_ymd_opt(year as i32, parts[1], parts[2])
        .and_then(|date| date.and_hms_opt(parts[3], parts[4], parts[5]))
        .ok_or_else(invalid)?
        .timestamp();

    Ok(timestamp.max(0) as u64)
}

// An admin or delta phrase: `keyword value... ;`.
fn phrase<'a, O>(
    keyword: &'static [u8],
    inner: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], O> {
    delimited(
        tag(keyword),
        inner,
        tuple((multispace0, tag(b";"), multispace0)),
    )
}

// A phrase whose value must be separated from the keyword by whitespace.
fn phrase_after_space<'a, O>(
    keyword: &'static [u8],
    inner: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], O> {
    delimited(
        tuple((tag(keyword), multispace1)),
        inner,
        tuple((multispace0, tag(b";"), multispace0)),
    )
}

// A phrase whose value may be omitted entirely: `head ;`.
fn phrase_opt<'a, O>(
    keyword: &'static [u8],
    inner: impl FnMut(&'a [u8]) -> IResult<&'a [u8], O>,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], Option<O>> {
    delimited(
        tag(keyword),
        opt(preceded(multispace1, inner)),
        tuple((multispace0, tag(b";"), multispace0)),
    )
}

fn is_idchar(c: u8) -> bool {
    c > b' ' && c < 0x7f && !matches!(c, b'$' | b',' | b'.' | b':' | b';' | b'@')
}

fn numlike(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(|c| c == b'.' || (b'0'..=b'9').contains(&c))(input)
}

fn numlike_owned(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(numlike, Vec::from)(input)
}

fn num(input: &[u8]) -> IResult<&[u8], RevNum> {
    map_opt(numlike, RevNum::from_bytes)(input)
}

fn id(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(take_while1(|c| is_idchar(c) || c == b'.'), Vec::from)(input)
}

fn sym(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map(take_while1(is_idchar), Vec::from)(input)
}

fn string(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    delimited(
        tag(b"@"),
        fold_many0(
            alt((string_literal, string_escape)),
            Vec::new,
            |mut v, fragment: &[u8]| {
                v.extend_from_slice(fragment);
                v
            },
        ),
        tag(b"@"),
    )(input)
}

fn string_literal(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_till1(|c| c == b'@')(input)
}

fn string_escape(input: &[u8]) -> IResult<&[u8], &[u8]> {
    value(&b"@"[..], tag(b"@@"))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin() {
        let input = b"head\t1.4;\nbranch\t1.1.1;\naccess;\nsymbols\n\tV1:1.1.0.2\n\tR1:1.2;\nlocks; strict;\ncomment\t@# @;\n\n1.4\n";
        let (rest, have) = admin(input).unwrap();
        assert_eq!(have.head, Some(rev("1.4")));
        assert_eq!(have.branch, Some(rev("1.1.1")));
        assert_eq!(
            have.symbols,
            vec![(b"V1".to_vec(), rev("1.1.2")), (b"R1".to_vec(), rev("1.2"))]
        );
        assert!(rest.starts_with(b"1.4"));
    }

    #[test]
    fn test_admin_empty_head() {
        let (_, have) = admin(b"head;\naccess;\nsymbols;\nlocks; strict;\n").unwrap();
        assert!(have.head.is_none());
        assert!(have.symbols.is_empty());
    }

    #[test]
    fn test_delta() {
        let input = b"1.2\ndate\t2021.08.20.17.34.26;\tauthor adam;\tstate Exp;\nbranches\n\t1.2.2.1\n\t1.2.4.1;\nnext\t1.1;\n";
        let (_, have) = delta(input).unwrap();
        assert_eq!(have.revision, rev("1.2"));
        assert_eq!(have.date, b"2021.08.20.17.34.26".to_vec());
        assert_eq!(have.author, b"adam".to_vec());
        assert_eq!(have.state.as_deref(), Some(b"Exp".as_ref()));
        assert_eq!(have.branches, vec![rev("1.2.2.1"), rev("1.2.4.1")]);
        assert_eq!(have.next, Some(rev("1.1")));
    }

    #[test]
    fn test_delta_dead_and_empty_next() {
        let input = b"1.1\ndate\t98.03.12.04.00.00;\tauthor jo;\tstate dead;\nbranches;\nnext\t;\n";
        let (_, have) = delta(input).unwrap();
        assert_eq!(have.state.as_deref(), Some(b"dead".as_ref()));
        assert!(have.next.is_none());
    }

    #[test]
    fn test_desc_and_delta_text() {
        assert_eq!(desc(b"desc\n@@\n").unwrap().1, b"");

        let (_, have) = delta_text(b"1.2\nlog\n@fix @@ handling@\ntext\n@d1 1\n@\n").unwrap();
        assert_eq!(have.revision, rev("1.2"));
        assert_eq!(have.log, b"fix @ handling".to_vec());
        assert_eq!(have.text, b"d1 1\n".to_vec());
    }

    #[test]
    fn test_date_to_epoch() {
        assert_eq!(
            date_to_epoch::<std::convert::Infallible>(b"2021.08.20.17.34.26").unwrap(),
            1629480866
        );
        // Two-digit years are 1900-relative.
        assert_eq!(
            date_to_epoch::<std::convert::Infallible>(b"70.01.01.00.00.10").unwrap(),
            10
        );
        assert!(date_to_epoch::<std::convert::Infallible>(b"2021.13.01.00.00.00").is_err());
    }

    fn rev(s: &str) -> RevNum {
        s.parse().unwrap()
    }
}
