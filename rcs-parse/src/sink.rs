use crate::num::RevNum;

/// The receiver of parse events.
///
/// Implementations build whatever per-file model they need; the parser itself
/// keeps nothing. Dates are delivered as seconds since the epoch and should be
/// treated as untrusted.
pub trait Sink {
    type Error: std::error::Error;

    /// Called once, before any other callback, with the head revision and the
    /// default branch from the admin header.
    fn define_admin(
        &mut self,
        head: Option<&RevNum>,
        default_branch: Option<&RevNum>,
    ) -> Result<(), Self::Error>;

    /// Called once per symbolic name in the admin header.
    fn define_symbol(&mut self, name: &[u8], revision: &RevNum) -> Result<(), Self::Error>;

    /// Called once per delta summary, in file order.
    fn define_revision(
        &mut self,
        revision: &RevNum,
        date: u64,
        author: &[u8],
        state: Option<&[u8]>,
        branches: &[RevNum],
        next: Option<&RevNum>,
    ) -> Result<(), Self::Error>;

    /// Called once per delta text section with the log message and the
    /// delta/text payload.
    fn set_revision_info(
        &mut self,
        revision: &RevNum,
        log: &[u8],
        text: &[u8],
    ) -> Result<(), Self::Error>;
}
