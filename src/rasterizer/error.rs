//! Pipeline result kinds

use thiserror::Error;

/// Every fallible pipeline operation fails with one of these kinds.
/// The payload names what was wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown error: {0}")]
    Unknown(&'static str),
    #[error("invalid parameters: {0}")]
    InvalidParameters(&'static str),
    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
