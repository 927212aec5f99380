//! Error taxonomy for the indexer.
//!
//! Every user-facing failure is eventually flattened into a reply string by
//! the daemon; nothing in this enum crosses the IPC boundary as-is.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CxrefError>;

#[derive(Debug, Error)]
pub enum CxrefError {
    /// A command argument is missing or unparsable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The path does not exist or cannot be canonicalized.
    #[error("{} doesn't exist", .0.display())]
    ResolutionFailure(PathBuf),

    /// No translation unit, cursor, or symbol at the requested place.
    #[error("not found: {0}")]
    NotFound(String),

    /// The front-end could not produce a translation unit.
    #[error("failed to parse {}", .0.display())]
    ParseFailure(PathBuf),

    /// An operation was aborted before completion.
    #[error("cancelled")]
    Cancelled,

    /// A facade capability returned a state we have no answer for.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_failure_names_the_path() {
        let err = CxrefError::ResolutionFailure(PathBuf::from("/no/such/file.cpp"));
        assert_eq!(err.to_string(), "/no/such/file.cpp doesn't exist");
    }

    #[test]
    fn io_errors_convert() {
        fn open() -> Result<std::fs::File> {
            Ok(std::fs::File::open("/definitely/not/here")?)
        }
        assert!(matches!(open(), Err(CxrefError::Io(_))));
    }
}
