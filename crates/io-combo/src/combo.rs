//! Composition of optional I/O primitives into a single object.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::error::Error;
use crate::store::SharedStore;

/// A primitive an [`IoCombo`] may or may not carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Sequential reads.
    Read,
    /// Reads at an absolute offset.
    ReadAt,
    /// Reads given a caller context.
    ContextualRead,
    /// Sequential writes.
    Write,
    /// Writes at an absolute offset.
    WriteAt,
    /// Writes given a caller context.
    ContextualWrite,
    /// Repositioning.
    Seek,
    /// Flushing buffered writes.
    Flush,
    /// Explicit close.
    Close,
    /// Reporting the size of the underlying blob.
    Size,
    /// Reporting a name for the underlying blob.
    Name,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::ReadAt => "read at",
            Self::ContextualRead => "contextual read",
            Self::Write => "write",
            Self::WriteAt => "write at",
            Self::ContextualWrite => "contextual write",
            Self::Seek => "seek",
            Self::Flush => "flush",
            Self::Close => "close",
            Self::Size => "size",
            Self::Name => "name",
        };
        f.write_str(name)
    }
}

/// An I/O channel that can be closed explicitly, surfacing any error.
pub trait Close {
    /// Closes the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing the underlying resource fails.
    fn close(&mut self) -> io::Result<()>;
}

/// An I/O channel backed by a blob of a known size.
pub trait Size {
    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> io::Result<u64>;
}

/// Reads at absolute offsets, independent of any cursor.
pub trait ReadAt {
    /// Reads into `buf` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying read fails.
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

/// Writes at absolute offsets, independent of any cursor.
pub trait WriteAt {
    /// Writes `buf` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

/// A writer accepting an opaque per-write context alongside the bytes.
pub trait ContextualWrite<C> {
    /// Writes `buf`, resolving the destination from `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be resolved or written.
    fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> io::Result<usize>;
}

/// A reader accepting an opaque per-read context.
pub trait ContextualRead<C> {
    /// Reads into `buf`, resolving the source from `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be resolved or read.
    fn read_with_ctx(&self, buf: &mut [u8], ctx: &C) -> io::Result<usize>;
}

impl<C, T: ContextualWrite<C> + ?Sized> ContextualWrite<C> for Arc<T> {
    fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> io::Result<usize> {
        (**self).write_with_ctx(buf, ctx)
    }
}

impl<C, T: ContextualRead<C> + ?Sized> ContextualRead<C> for Arc<T> {
    fn read_with_ctx(&self, buf: &mut [u8], ctx: &C) -> io::Result<usize> {
        (**self).read_with_ctx(buf, ctx)
    }
}

impl Close for File {
    fn close(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl Size for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(unix)]
impl WriteAt for File {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(self, buf, offset)
    }
}

impl Close for Vec<u8> {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Size for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

type Flusher = Box<dyn FnMut() -> io::Result<()> + Send>;

/// Combines objects implementing individual I/O primitives into one object
/// that provides all of them.
///
/// The capability set is fixed when the combo is built. Calling a primitive
/// that was not supplied fails with [`Error::Unsupported`], surfaced as
/// [`io::ErrorKind::Unsupported`] through the `std::io` traits.
///
/// `C` is the context type of the contextual primitives. Combos without
/// contextual primitives start from [`IoCombo::new`]; others from
/// [`IoCombo::default`].
pub struct IoCombo<C = ()> {
    reader: Option<Box<dyn Read + Send>>,
    reader_at: Option<Box<dyn ReadAt + Send>>,
    contextual_reader: Option<Box<dyn ContextualRead<C> + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    writer_at: Option<Box<dyn WriteAt + Send>>,
    contextual_writer: Option<Box<dyn ContextualWrite<C> + Send>>,
    seeker: Option<Box<dyn Seek + Send>>,
    flusher: Option<Flusher>,
    closer: Option<Box<dyn Close + Send>>,
    sizer: Option<Box<dyn Size + Send>>,
    name: Option<String>,
}

impl<C> Default for IoCombo<C> {
    fn default() -> Self {
        Self {
            reader: None,
            reader_at: None,
            contextual_reader: None,
            writer: None,
            writer_at: None,
            contextual_writer: None,
            seeker: None,
            flusher: None,
            closer: None,
            sizer: None,
            name: None,
        }
    }
}

impl IoCombo {
    /// Creates a combo without any capability.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> IoCombo<C> {
    /// Adds the read primitive.
    #[must_use]
    pub fn with_reader(mut self, reader: impl Read + Send + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Adds the positional read primitive.
    #[must_use]
    pub fn with_reader_at(mut self, reader: impl ReadAt + Send + 'static) -> Self {
        self.reader_at = Some(Box::new(reader));
        self
    }

    /// Adds the contextual read primitive.
    #[must_use]
    pub fn with_contextual_reader(
        mut self,
        reader: impl ContextualRead<C> + Send + 'static,
    ) -> Self {
        self.contextual_reader = Some(Box::new(reader));
        self
    }

    /// Adds the write primitive.
    #[must_use]
    pub fn with_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    /// Adds the positional write primitive.
    #[must_use]
    pub fn with_writer_at(mut self, writer: impl WriteAt + Send + 'static) -> Self {
        self.writer_at = Some(Box::new(writer));
        self
    }

    /// Adds the contextual write primitive.
    #[must_use]
    pub fn with_contextual_writer(
        mut self,
        writer: impl ContextualWrite<C> + Send + 'static,
    ) -> Self {
        self.contextual_writer = Some(Box::new(writer));
        self
    }

    /// Adds the seek primitive.
    #[must_use]
    pub fn with_seeker(mut self, seeker: impl Seek + Send + 'static) -> Self {
        self.seeker = Some(Box::new(seeker));
        self
    }

    /// Adds the flush primitive, which takes precedence over flushing the
    /// writer.
    #[must_use]
    pub fn with_flusher(
        mut self,
        flusher: impl FnMut() -> io::Result<()> + Send + 'static,
    ) -> Self {
        self.flusher = Some(Box::new(flusher));
        self
    }

    /// Adds the close primitive.
    #[must_use]
    pub fn with_closer(mut self, closer: impl Close + Send + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    /// Adds the size primitive.
    #[must_use]
    pub fn with_sizer(mut self, sizer: impl Size + Send + 'static) -> Self {
        self.sizer = Some(Box::new(sizer));
        self
    }

    /// Adds positional read and write, close and size backed by `store`,
    /// and names the combo after the store unless it is already named.
    #[must_use]
    pub fn with_store(mut self, store: impl crate::RandomAccessStore + 'static) -> Self {
        let shared = SharedStore::new(Box::new(store));
        if self.name.is_none() {
            self.name = shared.name();
        }

        self.reader_at = Some(Box::new(shared.clone()));
        self.writer_at = Some(Box::new(shared.clone()));
        self.sizer = Some(Box::new(shared.clone()));
        self.closer = Some(Box::new(shared));
        self
    }

    /// Names the combo.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the combo carries `capability`.
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Read => self.reader.is_some(),
            Capability::ReadAt => self.reader_at.is_some(),
            Capability::ContextualRead => self.contextual_reader.is_some(),
            Capability::Write => self.writer.is_some(),
            Capability::WriteAt => self.writer_at.is_some(),
            Capability::ContextualWrite => self.contextual_writer.is_some(),
            Capability::Seek => self.seeker.is_some(),
            Capability::Flush => self.flusher.is_some() || self.writer.is_some(),
            Capability::Close => self.closer.is_some(),
            Capability::Size => self.sizer.is_some(),
            Capability::Name => self.name.is_some(),
        }
    }

    /// The name given to the combo, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<C> fmt::Debug for IoCombo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCombo")
            .field("read", &self.reader.is_some())
            .field("read_at", &self.reader_at.is_some())
            .field("contextual_read", &self.contextual_reader.is_some())
            .field("write", &self.writer.is_some())
            .field("write_at", &self.writer_at.is_some())
            .field("contextual_write", &self.contextual_writer.is_some())
            .field("seek", &self.seeker.is_some())
            .field("flush", &self.flusher.is_some())
            .field("close", &self.closer.is_some())
            .field("size", &self.sizer.is_some())
            .field("name", &self.name)
            .finish()
    }
}

impl<C> Read for IoCombo<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(Error::Unsupported(Capability::Read).into()),
        }
    }
}

impl<C> ReadAt for IoCombo<C> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self.reader_at.as_mut() {
            Some(reader) => reader.read_at(buf, offset),
            None => Err(Error::Unsupported(Capability::ReadAt).into()),
        }
    }
}

impl<C> ContextualRead<C> for IoCombo<C> {
    fn read_with_ctx(&self, buf: &mut [u8], ctx: &C) -> io::Result<usize> {
        match self.contextual_reader.as_ref() {
            Some(reader) => reader.read_with_ctx(buf, ctx),
            None => Err(Error::Unsupported(Capability::ContextualRead).into()),
        }
    }
}

impl<C> Write for IoCombo<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(Error::Unsupported(Capability::Write).into()),
        }
    }

    /// Runs the flush primitive if there is one, otherwise flushes the
    /// writer.
    fn flush(&mut self) -> io::Result<()> {
        if let Some(flusher) = self.flusher.as_mut() {
            return flusher();
        }
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Err(Error::Unsupported(Capability::Flush).into()),
        }
    }
}

impl<C> WriteAt for IoCombo<C> {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<usize> {
        match self.writer_at.as_mut() {
            Some(writer) => writer.write_at(buf, offset),
            None => Err(Error::Unsupported(Capability::WriteAt).into()),
        }
    }
}

impl<C> ContextualWrite<C> for IoCombo<C> {
    fn write_with_ctx(&self, buf: &[u8], ctx: &C) -> io::Result<usize> {
        match self.contextual_writer.as_ref() {
            Some(writer) => writer.write_with_ctx(buf, ctx),
            None => Err(Error::Unsupported(Capability::ContextualWrite).into()),
        }
    }
}

impl<C> Seek for IoCombo<C> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.seeker.as_mut() {
            Some(seeker) => seeker.seek(pos),
            None => Err(Error::Unsupported(Capability::Seek).into()),
        }
    }
}

impl<C> Close for IoCombo<C> {
    /// Flushes first when the combo can flush, then closes the closer if
    /// there is one. A combo without a closer closes successfully.
    fn close(&mut self) -> io::Result<()> {
        if self.supports(Capability::Flush) {
            self.flush()?;
        }
        match self.closer.as_mut() {
            Some(closer) => closer.close(),
            None => Ok(()),
        }
    }
}

impl<C> Size for IoCombo<C> {
    fn size(&self) -> io::Result<u64> {
        match self.sizer.as_ref() {
            Some(sizer) => sizer.size(),
            None => Err(Error::Unsupported(Capability::Size).into()),
        }
    }
}
