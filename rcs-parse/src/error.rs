use std::num::ParseIntError;

use nom::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("date {0:?} is not a valid RCS date")]
    InvalidDate(String),

    #[error("parse error of kind {kind:?} at {location:?}")]
    Parse { location: Vec<u8>, kind: ErrorKind },

    #[error(transparent)]
    ParseInt(#[from] ParseIntError),

    #[error("sink error: {0}")]
    Sink(E),
}
