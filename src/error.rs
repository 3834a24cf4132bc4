use thiserror::Error;

/// Every failure the core reports to the adapter maps to one of: no-space,
/// I/O error, not-found, or invalid-argument. Exhaustion is kept distinct
/// from I/O failure so callers can surface a "no space" condition instead
/// of a generic error.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("no free inodes or data blocks available")]
    Exhausted,
    #[error("entry not found")]
    NotFound,
    #[error("not a directory")]
    NotDirectory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("block store does not contain a recognized filesystem")]
    InvalidMagic,
    #[error("content length exceeds addressing capacity")]
    TooLarge,
    #[error("block storage failure")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;
