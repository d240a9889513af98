//! Random-access blobs and a cursor emulating sequential access over them.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::combo::{self, Capability};
use crate::error::{Error, Result};

/// An I/O channel for a blob accessed by absolute offsets.
pub trait RandomAccessStore: Send {
    /// Reads into `buf` starting at `offset`. Returns fewer bytes than
    /// requested when the end of the blob is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails or the store is closed.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes `buf` at `offset`, growing the blob as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails or the store is closed.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Releases the store.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the underlying resource fails.
    fn close(&mut self) -> Result<()>;

    /// Size of the blob in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for stores that do not track a size.
    fn size(&self) -> Result<u64> {
        Err(Error::Unsupported(Capability::Size))
    }

    /// Name of the blob, usually a file path.
    fn name(&self) -> Option<&Path> {
        None
    }
}

impl<T: RandomAccessStore + ?Sized> RandomAccessStore for Box<T> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        (**self).write_at(buf, offset)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn name(&self) -> Option<&Path> {
        (**self).name()
    }
}

/// Creates [`RandomAccessStore`]s.
pub trait StoreFactory {
    /// Creates a fresh, empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing resource cannot be allocated.
    fn create(&self) -> Result<Box<dyn RandomAccessStore>>;
}

/// A [`RandomAccessStore`] backed by a growable byte buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    buf: Vec<u8>,
}

impl MemoryStore {
    /// Creates an empty `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(16),
        }
    }

    /// The bytes stored so far.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

fn to_index(offset: u64) -> Result<usize> {
    usize::try_from(offset).map_err(|_| {
        Error::Io(
            "offset out of range",
            io::Error::from(io::ErrorKind::InvalidInput),
        )
    })
}

impl RandomAccessStore for MemoryStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let start = to_index(offset)?.min(self.buf.len());
        let end = start.saturating_add(buf.len()).min(self.buf.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.buf[start..end]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let start = to_index(offset)?;
        let end = start.checked_add(buf.len()).ok_or_else(|| {
            Error::Io(
                "offset out of range",
                io::Error::from(io::ErrorKind::InvalidInput),
            )
        })?;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.buf.len() as u64)
    }
}

/// Creates [`MemoryStore`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryStoreFactory;

impl StoreFactory for MemoryStoreFactory {
    fn create(&self) -> Result<Box<dyn RandomAccessStore>> {
        Ok(Box::new(MemoryStore::new()))
    }
}

/// A [`RandomAccessStore`] backed by a temporary file.
///
/// Without a collection channel the file is deleted when the store is closed
/// or dropped. With one, closing keeps the file on disk and hands its path to
/// the channel, whose receiver becomes responsible for removing it.
pub struct TempFileStore {
    file: Option<NamedTempFile>,
    path: PathBuf,
    gc: Option<flume::Sender<PathBuf>>,
}

impl TempFileStore {
    fn file(&mut self) -> Result<&mut NamedTempFile> {
        self.file.as_mut().ok_or(Error::Closed)
    }
}

impl RandomAccessStore for TempFileStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Io("error seeking temp file", e))?;

        let mut read = 0;
        while read < buf.len() {
            match file.read(&mut buf[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Error::Io("error reading temp file", e)),
            }
        }
        Ok(read)
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Io("error seeking temp file", e))?;
        file.write_all(buf)
            .map_err(|e| Error::Io("error writing temp file", e))?;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        match self.gc.take() {
            Some(gc) => {
                let (file, path) = file
                    .keep()
                    .map_err(|e| Error::Io("error keeping temp file", e.error))?;
                drop(file);
                if gc.send(path).is_err() {
                    warn!(path = %self.path.display(), "temp file collector is gone");
                }
            }
            None => {
                file.close()
                    .map_err(|e| Error::Io("error removing temp file", e))?;
            }
        }

        debug!(path = %self.path.display(), "closed temp file store");
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        let metadata = file
            .as_file()
            .metadata()
            .map_err(|e| Error::Io("error reading temp file metadata", e))?;
        Ok(metadata.len())
    }

    fn name(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

impl fmt::Debug for TempFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFileStore")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .finish_non_exhaustive()
    }
}

/// Creates [`TempFileStore`]s.
#[derive(Clone, Debug, Default)]
pub struct TempFileStoreFactory {
    dir: Option<PathBuf>,
    prefix: String,
    gc: Option<flume::Sender<PathBuf>>,
}

impl TempFileStoreFactory {
    /// Creates a factory placing files in the system temporary directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places files in `dir` instead of the system temporary directory.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Prefixes generated file names with `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Hands closed files to `gc` instead of deleting them.
    #[must_use]
    pub fn with_collector(mut self, gc: flume::Sender<PathBuf>) -> Self {
        self.gc = Some(gc);
        self
    }

    /// Creates a concrete [`TempFileStore`].
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn create_temp_file(&self) -> Result<TempFileStore> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let file = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::Io("error creating temp file", e))?;

        let path = file.path().to_path_buf();
        debug!(path = %path.display(), "created temp file store");

        Ok(TempFileStore {
            file: Some(file),
            path,
            gc: self.gc.clone(),
        })
    }
}

impl StoreFactory for TempFileStoreFactory {
    fn create(&self) -> Result<Box<dyn RandomAccessStore>> {
        Ok(Box::new(self.create_temp_file()?))
    }
}

/// A store shared between the slots of an [`IoCombo`](crate::IoCombo).
#[derive(Clone)]
pub(crate) struct SharedStore(Arc<Mutex<Box<dyn RandomAccessStore>>>);

impl SharedStore {
    pub(crate) fn new(store: Box<dyn RandomAccessStore>) -> Self {
        Self(Arc::new(Mutex::new(store)))
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.0.lock().name().map(|path| path.display().to_string())
    }
}

impl combo::ReadAt for SharedStore {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        Ok(RandomAccessStore::read_at(&mut **self.0.lock(), buf, offset)?)
    }
}

impl combo::WriteAt for SharedStore {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        Ok(RandomAccessStore::write_at(&mut **self.0.lock(), buf, offset)?)
    }
}

impl combo::Close for SharedStore {
    fn close(&mut self) -> io::Result<()> {
        Ok(RandomAccessStore::close(&mut **self.0.lock())?)
    }
}

impl combo::Size for SharedStore {
    fn size(&self) -> io::Result<u64> {
        Ok(RandomAccessStore::size(&**self.0.lock())?)
    }
}

/// Emulates sequential, seekable access over a [`RandomAccessStore`].
///
/// The store size is taken from the store when it can report one, and is
/// otherwise learned once a read hits the end of the blob.
#[derive(Debug)]
pub struct StoreCursor<S> {
    store: S,
    position: u64,
    size: Option<u64>,
}

impl<S: RandomAccessStore> StoreCursor<S> {
    /// Creates a cursor positioned at the start of `store`.
    pub fn new(store: S) -> Self {
        let size = store.size().ok();
        Self {
            store,
            position: 0,
            size,
        }
    }

    /// Current position.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Size of the store if known.
    pub const fn known_size(&self) -> Option<u64> {
        self.size
    }

    /// Gets a reference to the underlying store.
    pub const fn get_ref(&self) -> &S {
        &self.store
    }

    /// Unwraps the underlying store.
    pub fn into_inner(self) -> S {
        self.store
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close.
    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

impl<S: RandomAccessStore> Read for StoreCursor<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.store.read_at(buf, self.position)?;
        self.position += n as u64;
        if n < buf.len() {
            self.size = Some(self.position);
        }
        Ok(n)
    }
}

impl<S: RandomAccessStore> Write for StoreCursor<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.store.write_at(buf, self.position)?;
        self.position += n as u64;
        if let Some(size) = self.size.as_mut() {
            *size = (*size).max(self.position);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: RandomAccessStore> Seek for StoreCursor<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let size = self.size.ok_or(Error::UnknownSize)?;
                size.checked_add_signed(delta)
            }
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        Ok(self.position)
    }
}
