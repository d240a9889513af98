//! Writer with a single current handle, rotated when its identifier changes.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::ContextualWrite;
use crate::error::{Error, Result};
use crate::handle::{HandleFactory, WriteHandle};
use crate::sink::{CloseFailure, ErrorSink};

/// Computes the rotation identifier for a write. Receives the current
/// handle, if any, so that identifiers can depend on its size.
pub type IdBuilder<C> =
    Box<dyn Fn(Option<&dyn WriteHandle>, &C) -> io::Result<String> + Send + Sync>;

/// Computes the path for a rotation identifier.
pub type HeadPathBuilder<C> = Box<dyn Fn(&str, &C) -> io::Result<PathBuf> + Send + Sync>;

/// Invoked with the retired identifier and path after the old handle is
/// closed and before the new one is opened.
pub type RotationCallback<C> = Box<dyn Fn(&str, &Path, &C) -> io::Result<()> + Send + Sync>;

#[derive(Clone)]
struct Current {
    id: String,
    path: Arc<Path>,
    handle: Arc<dyn WriteHandle>,
}

#[derive(Default)]
struct DynamicState {
    current: Option<Current>,
    closed: bool,
}

/// Writer that keeps exactly one handle open, rotating it whenever the
/// identifier computed for a write differs from the current one.
///
/// Rotation closes the current handle, runs the rotation callback on the
/// retired path (see [`serial_rotation`](crate::serial_rotation)), and
/// opens the path computed for the new identifier. All writes are
/// serialized.
pub struct DynamicRotatingWriter<C = ()> {
    id_builder: IdBuilder<C>,
    factory: HandleFactory<C>,
    path_builder: HeadPathBuilder<C>,
    rotation: Option<RotationCallback<C>>,
    state: Mutex<DynamicState>,
    sink: ErrorSink,
}

impl<C> DynamicRotatingWriter<C> {
    /// Creates a new `DynamicRotatingWriter` without a rotation callback.
    ///
    /// Failures closing retired handles are posted to `close_errors`; pass
    /// `None` to have them discarded in the background.
    pub fn new(
        id_builder: impl Fn(Option<&dyn WriteHandle>, &C) -> io::Result<String> + Send + Sync + 'static,
        factory: impl Fn(&Path, &C) -> io::Result<Arc<dyn WriteHandle>> + Send + Sync + 'static,
        path_builder: impl Fn(&str, &C) -> io::Result<PathBuf> + Send + Sync + 'static,
        close_errors: Option<flume::Sender<CloseFailure>>,
    ) -> Self {
        Self {
            id_builder: Box::new(id_builder),
            factory: Box::new(factory),
            path_builder: Box::new(path_builder),
            rotation: None,
            state: Mutex::new(DynamicState::default()),
            sink: ErrorSink::new(close_errors),
        }
    }

    /// Sets the callback run on every rotation.
    #[must_use]
    pub fn with_rotation(
        mut self,
        rotation: impl Fn(&str, &Path, &C) -> io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.rotation = Some(Box::new(rotation));
        self
    }

    /// Writes `buf` to the current handle, rotating first if the identifier
    /// computed from `ctx` changed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] after [`close`](Self::close). Rotation,
    /// path computation and open failures leave no handle open; the next
    /// write opens afresh.
    pub fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }

        let id = (self.id_builder)(state.current.as_ref().map(|c| &*c.handle), ctx)
            .map_err(Error::Resolve)?;

        let current = match state.current.as_ref() {
            Some(current) if current.id == id => current.clone(),
            _ => self.rotate(&mut state, id, ctx)?,
        };

        current.handle.write(buf).map_err(|source| Error::Write {
            path: current.path.to_path_buf(),
            source,
        })
    }

    /// Closes the current handle and the error sink. Later writes fail with
    /// [`Error::Closed`]. Calling `close` more than once is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        if let Some(current) = state.current.take() {
            self.sink.close_handle(&current.path, &current.handle);
        }
        state.closed = true;
        drop(state);

        self.sink.close();
    }

    /// Identifier of the current handle, if one is open.
    #[must_use]
    pub fn current_id(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|c| c.id.clone())
    }

    /// Path of the current handle, if one is open.
    #[must_use]
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|c| c.path.to_path_buf())
    }

    fn rotate(&self, state: &mut DynamicState, id: String, ctx: &C) -> Result<Current> {
        if let Some(retired) = state.current.take() {
            self.sink.close_handle(&retired.path, &retired.handle);

            if let Some(rotation) = &self.rotation {
                debug!(id = %retired.id, path = %retired.path.display(), "rotating");
                rotation(&retired.id, &retired.path, ctx).map_err(|source| Error::Rotation {
                    path: retired.path.to_path_buf(),
                    source,
                })?;
            }
        }

        let path: Arc<Path> = (self.path_builder)(&id, ctx)
            .map_err(Error::Resolve)?
            .into();
        let handle = (self.factory)(&path, ctx).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(%id, path = %path.display(), "opened handle");

        let current = Current { id, path, handle };
        state.current = Some(current.clone());
        Ok(current)
    }
}

impl<C> ContextualWrite<C> for DynamicRotatingWriter<C> {
    fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> io::Result<usize> {
        Ok(Self::write_with_ctx(self, buf, ctx)?)
    }
}

impl<C: Default> io::Write for &DynamicRotatingWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_with_ctx(buf, &C::default())?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Default> io::Write for DynamicRotatingWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_with_ctx(buf, &C::default())?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C> Drop for DynamicRotatingWriter<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C> fmt::Debug for DynamicRotatingWriter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DynamicRotatingWriter")
            .field("current_id", &state.current.as_ref().map(|c| &c.id))
            .field("current_path", &state.current.as_ref().map(|c| &c.path))
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use tracing_test::traced_test;

    use crate::handle::MemoryHandle;

    type Opened = Arc<parking_lot::Mutex<Vec<Arc<MemoryHandle>>>>;

    fn memory_factory(
        opened: &Opened,
    ) -> impl Fn(&Path, &u32) -> io::Result<Arc<dyn WriteHandle>> + Send + Sync + 'static {
        let opened = Arc::clone(opened);
        move |_path: &Path, _ctx: &u32| {
            let handle = Arc::new(MemoryHandle::new());
            opened.lock().push(Arc::clone(&handle));
            Ok(handle as Arc<dyn WriteHandle>)
        }
    }

    fn id_from_ctx(_: Option<&dyn WriteHandle>, ctx: &u32) -> io::Result<String> {
        Ok(ctx.to_string())
    }

    fn head_path(id: &str, _: &u32) -> io::Result<PathBuf> {
        Ok(PathBuf::from(format!("head-{id}")))
    }

    #[test]
    #[traced_test]
    fn test_rotates_on_id_change() {
        let opened = Opened::default();
        let rotations = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&rotations);

        let writer = DynamicRotatingWriter::new(id_from_ctx, memory_factory(&opened), head_path, None)
            .with_rotation(move |id: &str, path: &Path, _: &u32| {
                recorded.lock().push((id.to_string(), path.to_path_buf()));
                Ok(())
            });

        writer.write_with_ctx(b"a", &1).unwrap();
        writer.write_with_ctx(b"b", &1).unwrap();
        writer.write_with_ctx(b"c", &2).unwrap();
        writer.write_with_ctx(b"d", &2).unwrap();

        let handles = opened.lock().clone();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles[0].contents(), b"ab");
        assert!(handles[0].is_closed());
        assert_eq!(handles[1].contents(), b"cd");
        assert!(!handles[1].is_closed());

        assert_eq!(
            *rotations.lock(),
            vec![("1".to_string(), PathBuf::from("head-1"))]
        );
        assert_eq!(writer.current_id().as_deref(), Some("2"));
        assert_eq!(writer.current_path(), Some(PathBuf::from("head-2")));
        assert!(logs_contain("rotating"));

        writer.close();
        assert!(handles[1].is_closed());
        assert_eq!(writer.current_path(), None);
    }

    #[test]
    fn test_rotation_failure_leaves_no_handle() {
        let opened = Opened::default();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&attempts);

        let writer = DynamicRotatingWriter::new(id_from_ctx, memory_factory(&opened), head_path, None)
            .with_rotation(move |_: &str, _: &Path, _: &u32| {
                counted.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::other("rename failed"))
            });

        writer.write_with_ctx(b"a", &1).unwrap();
        let err = writer.write_with_ctx(b"b", &2).unwrap_err();
        assert_matches!(&err, Error::Rotation { path, .. } if path == Path::new("head-1"));
        assert_eq!(writer.current_path(), None);
        assert!(opened.lock()[0].is_closed());

        // Nothing left to retire, so the next write opens without rotating.
        writer.write_with_ctx(b"c", &2).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(opened.lock().len(), 2);
        assert_eq!(opened.lock()[1].contents(), b"c");
    }

    #[test]
    fn test_factory_failure_leaves_no_handle() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let failing = Arc::clone(&fail);
        let writer = DynamicRotatingWriter::new(
            id_from_ctx,
            move |_: &Path, _: &u32| {
                if failing.load(Ordering::SeqCst) {
                    Err(io::Error::from(io::ErrorKind::NotFound))
                } else {
                    Ok(Arc::new(MemoryHandle::new()) as Arc<dyn WriteHandle>)
                }
            },
            head_path,
            None,
        );

        assert_matches!(writer.write_with_ctx(b"a", &1), Err(Error::Open { .. }));
        assert_eq!(writer.current_id(), None);

        fail.store(false, Ordering::SeqCst);
        assert_eq!(writer.write_with_ctx(b"a", &1).unwrap(), 1);
        assert_eq!(writer.current_id().as_deref(), Some("1"));
    }

    #[test]
    fn test_write_after_close_is_end_of_stream() {
        let opened = Opened::default();
        let mut writer =
            DynamicRotatingWriter::new(id_from_ctx, memory_factory(&opened), head_path, None);

        writer.write_all(b"zero").unwrap();
        writer.close();
        writer.close();

        assert_matches!(writer.write_with_ctx(b"x", &0), Err(Error::Closed));
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert_eq!(opened.lock()[0].contents(), b"zero");
    }

    #[test]
    fn test_close_failures_reach_supplied_sink() {
        struct FailingClose;

        impl WriteHandle for FailingClose {
            fn write(&self, buf: &[u8]) -> io::Result<usize> {
                Ok(buf.len())
            }

            fn close(&self) -> io::Result<()> {
                Err(io::Error::other("flush failed"))
            }
        }

        let (tx, rx) = flume::unbounded();
        let writer = DynamicRotatingWriter::new(
            id_from_ctx,
            |_: &Path, _: &u32| Ok(Arc::new(FailingClose) as Arc<dyn WriteHandle>),
            head_path,
            Some(tx),
        );

        writer.write_with_ctx(b"a", &1).unwrap();
        // Close failures during rotation are not the writer's problem.
        writer.write_with_ctx(b"b", &2).unwrap();
        writer.close();

        let paths: Vec<PathBuf> = rx.iter().map(|failure| failure.path).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("head-1"), PathBuf::from("head-2")]
        );
    }
}
