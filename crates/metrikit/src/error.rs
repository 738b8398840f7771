use thiserror::Error;

/// Failure kinds shared by the whole crate.
///
/// Every fallible operation reports through this enum; there is no panic
/// path in non-test code. Searches that are expected to miss (global to
/// local lookups, cell-with-nodes queries) return `Option` instead of
/// `NotFound` so that the common case stays quiet at the call site.
#[derive(Debug, Error)]
pub enum Error {
    #[error("null input")]
    Null,
    #[error("invalid precondition: {0}")]
    Invalid(&'static str),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("division by zero in {0}")]
    DivZero(&'static str),
    #[error("assertion failed: {0}")]
    Failure(&'static str),
    #[error("buffer limit exceeded: {0}")]
    IncreaseLimit(&'static str),
    #[error("not implemented: {0}")]
    Implement(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
