//! Composable I/O primitives.
//!
//! - [`IoCombo`] joins objects providing individual primitives (sequential,
//!   positional and contextual reads and writes, seek, flush, close, size,
//!   name) into one object with a fixed capability set.
//! - [`CloseHook`] runs a callback after a successful explicit close.
//! - [`RandomAccessStore`] models blobs accessed by offset, with memory and
//!   temporary-file backed implementations and a [`StoreCursor`] providing
//!   `Read`/`Write`/`Seek` on top of them.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod close_hook;
mod combo;
mod error;
mod store;

pub use close_hook::CloseHook;
pub use combo::{
    Capability, Close, ContextualRead, ContextualWrite, IoCombo, ReadAt, Size, WriteAt,
};
pub use error::{Error, Result};
pub use store::{
    MemoryStore, MemoryStoreFactory, RandomAccessStore, StoreCursor, StoreFactory, TempFileStore,
    TempFileStoreFactory,
};
