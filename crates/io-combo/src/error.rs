//! Error types for I/O compositions and stores.

use std::io;

use thiserror::Error;

use crate::Capability;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The composition does not carry the primitive needed for the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(Capability),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// Seeking relative to the end of a store whose size is not known.
    #[error("cannot seek relative to the end of a store of unknown size")]
    UnknownSize,

    /// The store has already been closed.
    #[error("store is closed")]
    Closed,
}

impl Error {
    /// Returns the missing capability if `err` was produced by an unsupported
    /// operation, looking through `std::io::Error` wrapping.
    #[must_use]
    pub fn unsupported_capability(err: &io::Error) -> Option<Capability> {
        match err.get_ref()?.downcast_ref::<Self>()? {
            Self::Unsupported(capability) => Some(*capability),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Unsupported(_) => io::ErrorKind::Unsupported,
            Error::Io(_, source) => source.kind(),
            Error::UnknownSize => io::ErrorKind::InvalidInput,
            Error::Closed => io::ErrorKind::BrokenPipe,
        };
        Self::new(kind, err)
    }
}
