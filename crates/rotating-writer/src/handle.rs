//! Writable handles produced by handle factories.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use proven_io_combo::{Capability, Close};

/// Permission bits for files created by [`open_file_handle`], before umask.
#[cfg(unix)]
pub const DEFAULT_FILE_MODE: u32 = 0o666;

/// An open, writable backing resource shared between writers.
///
/// Writes take `&self` so that several writers attached to the same handle
/// can proceed without the owning engine serializing them.
pub trait WriteHandle: Send + Sync + 'static {
    /// Writes `buf`, returning the number of bytes accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the handle is closed.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Closes the handle. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the resource fails.
    fn close(&self) -> io::Result<()>;

    /// Current size of the backing resource in bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`io::ErrorKind::Unsupported`] for handles that cannot
    /// report a size.
    fn size(&self) -> io::Result<u64> {
        Err(proven_io_combo::Error::Unsupported(Capability::Size).into())
    }
}

/// Opens the handle for a target path, given the per-write context.
pub type HandleFactory<C> =
    Box<dyn Fn(&Path, &C) -> io::Result<Arc<dyn WriteHandle>> + Send + Sync>;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "handle is closed")
}

/// Default handle factory: opens `path` for create-or-append.
///
/// # Errors
///
/// Returns an error if the file cannot be opened.
pub fn open_file_handle<C>(path: &Path, _ctx: &C) -> io::Result<Arc<dyn WriteHandle>> {
    Ok(Arc::new(FileHandle::open(path)?))
}

/// A handle over a file opened in append mode.
#[derive(Debug)]
pub struct FileHandle {
    path: PathBuf,
    file: RwLock<Option<File>>,
}

impl FileHandle {
    /// Opens `path` for create-or-append.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(DEFAULT_FILE_MODE);
        }
        let file = options.open(&path)?;

        Ok(Self {
            path,
            file: RwLock::new(Some(file)),
        })
    }

    /// The path this handle was opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WriteHandle for FileHandle {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let guard = self.file.read();
        let mut file = guard.as_ref().ok_or_else(closed_error)?;
        file.write(buf)
    }

    fn close(&self) -> io::Result<()> {
        let file = self.file.write().take();
        match file {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }

    fn size(&self) -> io::Result<u64> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(closed_error)?;
        Ok(file.metadata()?.len())
    }
}

/// Adapts any [`Write`] + [`Close`] object, such as an
/// [`IoCombo`](proven_io_combo::IoCombo), into a [`WriteHandle`] by
/// serializing access through a mutex.
///
/// The wrapped object is dropped once closed.
pub struct SharedHandle<W> {
    inner: Mutex<Option<W>>,
}

impl<W> SharedHandle<W>
where
    W: Write + Close + Send + 'static,
{
    /// Wraps `inner`.
    pub const fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(Some(inner)),
        }
    }
}

impl<W> WriteHandle for SharedHandle<W>
where
    W: Write + Close + Send + 'static,
{
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .as_mut()
            .ok_or_else(closed_error)?
            .write(buf)
    }

    fn close(&self) -> io::Result<()> {
        let inner = self.inner.lock().take();
        match inner {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}

impl<W> fmt::Debug for SharedHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("open", &self.inner.lock().is_some())
            .finish()
    }
}

/// A handle accumulating writes in memory.
#[derive(Debug, Default)]
pub struct MemoryHandle {
    buf: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryHandle {
    /// Creates an empty, open handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything written so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().clone()
    }

    /// Whether [`WriteHandle::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl WriteHandle for MemoryHandle {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(closed_error());
        }
        self.buf.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.buf.lock().len() as u64)
    }
}
