//! Close notification decorator.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::combo::{Close, Size};

/// Wraps a [`Close`] implementor so that `callback` runs after each
/// successful explicit close.
///
/// All other primitives the wrapped value provides pass straight through.
pub struct CloseHook<T, F> {
    inner: T,
    callback: F,
}

impl<T, F> CloseHook<T, F>
where
    T: Close,
    F: FnMut(&T),
{
    /// Creates a new `CloseHook` around `inner`.
    pub const fn new(inner: T, callback: F) -> Self {
        Self { inner, callback }
    }
}

impl<T, F> CloseHook<T, F> {
    /// Gets a reference to the wrapped value.
    pub const fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped value.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwraps the value, dropping the callback.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T, F> Close for CloseHook<T, F>
where
    T: Close,
    F: FnMut(&T),
{
    fn close(&mut self) -> io::Result<()> {
        self.inner.close()?;
        (self.callback)(&self.inner);
        Ok(())
    }
}

impl<T: Read, F> Read for CloseHook<T, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<T: Write, F> Write for CloseHook<T, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Seek, F> Seek for CloseHook<T, F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl<T: Size, F> Size for CloseHook<T, F> {
    fn size(&self) -> io::Result<u64> {
        self.inner.size()
    }
}

impl<T: fmt::Debug, F> fmt::Debug for CloseHook<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseHook")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}
