//! Asynchronous reporting of failures closing handles.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::handle::WriteHandle;

const DRAIN_THREAD_NAME: &str = "rotating-writer-close-errors";

/// A failure closing a handle the caller no longer controls.
pub struct CloseFailure {
    /// The target the handle was opened for.
    pub path: PathBuf,
    /// The handle that failed to close.
    pub handle: Arc<dyn WriteHandle>,
    /// The close error.
    pub error: io::Error,
}

impl fmt::Debug for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseFailure")
            .field("path", &self.path)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Receives deferred close failures from a rotating writer.
///
/// When constructed without a sender, failures are discarded by a background
/// drain thread so that closing handles never blocks on a missing consumer.
/// The drain thread is joined by [`ErrorSink::close`].
pub struct ErrorSink {
    sender: Mutex<Option<flume::Sender<CloseFailure>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl ErrorSink {
    /// Creates a sink posting to `sender`, or to a self-draining channel
    /// when `sender` is `None`.
    #[must_use]
    pub fn new(sender: Option<flume::Sender<CloseFailure>>) -> Self {
        if let Some(sender) = sender {
            return Self {
                sender: Mutex::new(Some(sender)),
                drain: Mutex::new(None),
            };
        }

        let (sender, receiver) = flume::unbounded::<CloseFailure>();
        let drain = thread::Builder::new()
            .name(DRAIN_THREAD_NAME.to_string())
            .spawn(move || {
                for failure in receiver.iter() {
                    debug!(
                        path = %failure.path.display(),
                        error = %failure.error,
                        "discarding close failure"
                    );
                }
            });

        let drain = match drain {
            Ok(drain) => Some(drain),
            Err(e) => {
                // Posting to a channel without a receiver fails fast, so
                // failures are logged rather than queued.
                warn!("failed to spawn close error drain: {e}");
                None
            }
        };

        Self {
            sender: Mutex::new(Some(sender)),
            drain: Mutex::new(drain),
        }
    }

    /// Posts a failure. Never returns an error; failures that cannot be
    /// delivered are logged.
    pub fn post(&self, failure: CloseFailure) {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            warn!(
                path = %failure.path.display(),
                error = %failure.error,
                "close failure reported after sink was closed"
            );
            return;
        };

        if let Err(flume::SendError(failure)) = sender.send(failure) {
            warn!(
                path = %failure.path.display(),
                error = %failure.error,
                "close failure dropped: receiver disconnected"
            );
        }
    }

    /// Closes `handle`, routing any failure to the sink.
    pub fn close_handle(&self, path: &Path, handle: &Arc<dyn WriteHandle>) {
        match handle.close() {
            Ok(()) => debug!(path = %path.display(), "closed handle"),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to close handle");
                self.post(CloseFailure {
                    path: path.to_path_buf(),
                    handle: Arc::clone(handle),
                    error,
                });
            }
        }
    }

    /// Closes the channel and joins the drain thread, if any. Idempotent.
    pub fn close(&self) {
        drop(self.sender.lock().take());

        let drain = self.drain.lock().take();
        if let Some(drain) = drain
            && drain.join().is_err()
        {
            warn!("close error drain panicked");
        }
    }

    /// Whether [`ErrorSink::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Drop for ErrorSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("closed", &self.is_closed())
            .field("draining", &self.drain.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::handle::MemoryHandle;

    struct FailingClose;

    impl WriteHandle for FailingClose {
        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn close(&self) -> io::Result<()> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_supplied_sender_receives_failures() {
        let (tx, rx) = flume::unbounded();
        let sink = ErrorSink::new(Some(tx));
        let handle: Arc<dyn WriteHandle> = Arc::new(FailingClose);

        sink.close_handle(Path::new("a.log"), &handle);
        sink.close();

        let failure = rx.recv().unwrap();
        assert_eq!(failure.path, PathBuf::from("a.log"));
        assert_eq!(failure.error.to_string(), "disk on fire");
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_successful_close_posts_nothing() {
        let (tx, rx) = flume::unbounded();
        let sink = ErrorSink::new(Some(tx));
        let handle: Arc<dyn WriteHandle> = Arc::new(MemoryHandle::new());

        sink.close_handle(Path::new("b.log"), &handle);
        sink.close();

        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_default_sink_drains_without_blocking() {
        let sink = ErrorSink::new(None);
        let handle: Arc<dyn WriteHandle> = Arc::new(FailingClose);

        for _ in 0..1000 {
            sink.close_handle(Path::new("c.log"), &handle);
        }

        sink.close();
        sink.close();
        assert!(sink.is_closed());
    }

    #[test]
    fn test_post_after_close_is_harmless() {
        let sink = ErrorSink::new(None);
        sink.close();

        sink.post(CloseFailure {
            path: PathBuf::from("late.log"),
            handle: Arc::new(MemoryHandle::new()),
            error: io::Error::other("late"),
        });
    }
}
