//! Error types for rotating writers

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for rotating writer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned synchronously from a write.
///
/// Failures closing handles the caller no longer controls are never returned
/// here; they go to the writer's [`ErrorSink`](crate::ErrorSink).
#[derive(Debug, Error)]
pub enum Error {
    /// The writer has been closed.
    #[error("writer is closed")]
    Closed,

    /// Computing the target path or rotation identifier failed.
    #[error("failed to resolve write target: {0}")]
    Resolve(#[source] io::Error),

    /// The handle factory failed to open the target.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// The target that could not be opened
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// The rotation callback failed.
    #[error("failed to rotate {}: {source}", path.display())]
    Rotation {
        /// The path that was being retired
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Writing to the resolved handle failed.
    #[error("failed to write to {}: {source}", path.display())]
    Write {
        /// The target being written
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Closed => io::ErrorKind::UnexpectedEof,
            Error::Resolve(source)
            | Error::Open { source, .. }
            | Error::Rotation { source, .. }
            | Error::Write { source, .. } => source.kind(),
        };
        Self::new(kind, err)
    }
}
