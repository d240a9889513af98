//! Output sinks that rotate their backing file according to a
//! caller-computed key.
//!
//! - [`StaticRotatingWriter`] computes a target path per write and shares
//!   reference-counted handles between concurrent writers, closing each
//!   handle once nothing writes to it anymore.
//! - [`DynamicRotatingWriter`] keeps a single handle open and rotates it when
//!   a caller-computed identifier changes, running a rotation callback such
//!   as [`serial_rotation`] on the retired file.
//!
//! Failures closing handles the caller no longer controls are reported
//! asynchronously through an [`ErrorSink`] instead of being returned from
//! writes.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod dynamic_writer;
mod error;
mod handle;
mod rotation;
mod sink;
mod static_writer;

pub use dynamic_writer::{DynamicRotatingWriter, HeadPathBuilder, IdBuilder, RotationCallback};
pub use error::{Error, Result};
pub use proven_io_combo::ContextualWrite;
#[cfg(unix)]
pub use handle::DEFAULT_FILE_MODE;
pub use handle::{
    FileHandle, HandleFactory, MemoryHandle, SharedHandle, WriteHandle, open_file_handle,
};
pub use rotation::{backup_path, rotate_backups, serial_rotation, size_rotation};
pub use sink::{CloseFailure, ErrorSink};
pub use static_writer::{PathBuilder, StaticRotatingWriter};
