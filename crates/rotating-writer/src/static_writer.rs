//! Writer multiplexing writes onto per-path handles.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::ContextualWrite;
use crate::error::{Error, Result};
use crate::handle::{HandleFactory, WriteHandle};
use crate::sink::{CloseFailure, ErrorSink};

/// Computes the target path for a write from its context.
pub type PathBuilder<C> = Box<dyn Fn(&C) -> io::Result<PathBuf> + Send + Sync>;

struct WriterEntry {
    path: PathBuf,
    handle: Arc<dyn WriteHandle>,
    refs: AtomicUsize,
    // The reference the registry itself holds until the next sweep.
    resident: AtomicBool,
}

impl WriterEntry {
    fn new(path: PathBuf, handle: Arc<dyn WriteHandle>) -> Self {
        Self {
            path,
            handle,
            refs: AtomicUsize::new(1),
            resident: AtomicBool::new(true),
        }
    }

    fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` when the last reference was released.
    fn del_ref(&self) -> bool {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "writer entry reference count underflow");
        previous == 1
    }

    /// Drops the registry's own reference, at most once.
    fn evict(&self) -> bool {
        self.resident.swap(false, Ordering::AcqRel) && self.del_ref()
    }
}

#[derive(Default)]
struct Registry {
    entries: HashMap<PathBuf, Arc<WriterEntry>>,
    closed: bool,
}

/// Writer whose target is computed per write, for example one file per log
/// category.
///
/// Handles are reference counted: a handle stays open across back-to-back
/// writes to the same path, is released by the next write that opens a
/// different path, and is never closed while a write to it is in flight.
/// The registry lock covers lookup and bookkeeping only; bytes are written
/// outside it, so writes to different paths proceed in parallel.
pub struct StaticRotatingWriter<C = ()> {
    path_builder: PathBuilder<C>,
    factory: HandleFactory<C>,
    registry: Mutex<Registry>,
    sink: ErrorSink,
}

impl<C> StaticRotatingWriter<C> {
    /// Creates a new `StaticRotatingWriter`.
    ///
    /// Failures closing released handles are posted to `close_errors`; pass
    /// `None` to have them discarded in the background.
    pub fn new(
        path_builder: impl Fn(&C) -> io::Result<PathBuf> + Send + Sync + 'static,
        factory: impl Fn(&Path, &C) -> io::Result<Arc<dyn WriteHandle>> + Send + Sync + 'static,
        close_errors: Option<flume::Sender<CloseFailure>>,
    ) -> Self {
        Self {
            path_builder: Box::new(path_builder),
            factory: Box::new(factory),
            registry: Mutex::new(Registry::default()),
            sink: ErrorSink::new(close_errors),
        }
    }

    /// Writes `buf` to the handle for the path computed from `ctx`.
    ///
    /// # Errors
    ///
    /// Fails if the writer is closed, the path cannot be computed, the handle
    /// cannot be opened, or the write itself fails.
    pub fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> Result<usize> {
        let path = (self.path_builder)(ctx).map_err(Error::Resolve)?;
        let guard = self.attach(path, ctx)?;

        guard
            .entry
            .handle
            .write(buf)
            .map_err(|source| Error::Write {
                path: guard.entry.path.clone(),
                source,
            })
    }

    /// Closes every open handle regardless of in-flight writes, then closes
    /// the error sink. Later writes fail with [`Error::Closed`].
    ///
    /// Calling `close` more than once is a no-op.
    pub fn close(&self) {
        let entries = {
            let mut registry = self.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            std::mem::take(&mut registry.entries)
        };

        for entry in entries.into_values() {
            self.sink.close_handle(&entry.path, &entry.handle);
        }

        self.sink.close();
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.registry.lock().entries.len()
    }

    fn attach(&self, path: PathBuf, ctx: &C) -> Result<EntryGuard<'_, C>> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(Error::Closed);
        }

        let existing = registry.entries.get(&path).cloned();
        let entry = match existing {
            Some(entry) => entry,
            None => {
                self.sweep(&mut registry);

                let handle = (self.factory)(&path, ctx).map_err(|source| Error::Open {
                    path: path.clone(),
                    source,
                })?;
                debug!(path = %path.display(), "opened handle");

                let entry = Arc::new(WriterEntry::new(path.clone(), handle));
                registry.entries.insert(path, Arc::clone(&entry));
                entry
            }
        };

        entry.add_ref();
        Ok(EntryGuard {
            writer: self,
            entry,
        })
    }

    /// Releases the registry's reference on every entry, closing those with
    /// no write in flight.
    fn sweep(&self, registry: &mut Registry) {
        registry.entries.retain(|_, entry| {
            if entry.evict() {
                self.sink.close_handle(&entry.path, &entry.handle);
                false
            } else {
                true
            }
        });
    }

    fn detach(&self, entry: &Arc<WriterEntry>) {
        let mut registry = self.registry.lock();

        // Entries drained by `close` are no longer ours to release.
        let registered = registry
            .entries
            .get(&entry.path)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if !registered {
            return;
        }

        if entry.del_ref() {
            registry.entries.remove(&entry.path);
            self.sink.close_handle(&entry.path, &entry.handle);
        }
    }
}

/// Permission to use an entry's handle; releases the reference on drop.
struct EntryGuard<'a, C> {
    writer: &'a StaticRotatingWriter<C>,
    entry: Arc<WriterEntry>,
}

impl<C> Drop for EntryGuard<'_, C> {
    fn drop(&mut self) {
        self.writer.detach(&self.entry);
    }
}

impl<C> ContextualWrite<C> for StaticRotatingWriter<C> {
    fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> io::Result<usize> {
        Ok(Self::write_with_ctx(self, buf, ctx)?)
    }
}

impl<C: Default> io::Write for &StaticRotatingWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_with_ctx(buf, &C::default())?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Default> io::Write for StaticRotatingWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_with_ctx(buf, &C::default())?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C> Drop for StaticRotatingWriter<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C> fmt::Debug for StaticRotatingWriter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("StaticRotatingWriter")
            .field("open_handles", &registry.entries.len())
            .field("closed", &registry.closed)
            .finish_non_exhaustive()
    }
}
