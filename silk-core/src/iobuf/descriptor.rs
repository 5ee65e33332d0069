//! Abstract descriptors the IO buffer reads from and writes to

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("descriptor is not {}", what))
}

/// Capability set of a byte source or sink.
///
/// Only the operations a descriptor supports need implementing; the rest
/// report `Unsupported`. A descriptor whose `seek` fails is treated as a
/// pipe. Resources are released when the descriptor is dropped, after
/// `close` has had a chance to report errors.
pub trait Descriptor {
    /// Read up to `buf.len()` bytes; 0 means end of data
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("readable"))
    }

    /// Write up to `buf.len()` bytes
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("writable"))
    }

    /// Reposition the descriptor
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(unsupported("seekable"))
    }

    /// Push buffered bytes to the underlying sink
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Render an error produced by this descriptor
    fn strerror(&self, err: &io::Error) -> String {
        err.to_string()
    }

    /// Finish any trailing framing before the descriptor is dropped
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Descriptor for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }
}

impl Descriptor for Cursor<Vec<u8>> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(self, pos)
    }
}

/// Read-only, non-seekable descriptor over any reader (pipes, stdin)
pub struct ReadOnly<R>(pub R);

impl<R: Read> Descriptor for ReadOnly<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Write-only, non-seekable descriptor over any writer (pipes, stdout)
pub struct WriteOnly<W>(pub W);

impl<W: Write> Descriptor for WriteOnly<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Seekable in-memory descriptor with a shared backing buffer.
///
/// Clones share the same bytes and position, so a caller can keep a handle
/// and inspect what an IO buffer wrote after the buffer is gone.
#[derive(Clone, Default)]
pub struct MemoryDescriptor {
    inner: Arc<Mutex<Cursor<Vec<u8>>>>,
}

impl MemoryDescriptor {
    /// Empty buffer positioned at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding `data`, positioned at 0
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Cursor::new(data))),
        }
    }

    /// Copy of the current contents
    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().get_ref().clone()
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.inner.lock().get_ref().len()
    }

    /// Whether the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the shared position back to the start
    pub fn rewind(&self) {
        self.inner.lock().set_position(0);
    }
}

impl Descriptor for MemoryDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut *self.inner.lock(), buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut *self.inner.lock(), buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Seek::seek(&mut *self.inner.lock(), pos)
    }
}

/// `std::io` view of a descriptor, for code written against `Read`/`Write`
pub struct RawIo<'a>(pub &'a mut dyn Descriptor);

impl Read for RawIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for RawIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_descriptor_shares_bytes() {
        let mut writer = MemoryDescriptor::new();
        let observer = writer.clone();
        writer.write(b"abc").unwrap();
        assert_eq!(observer.contents(), b"abc");

        observer.rewind();
        let mut buf = [0u8; 2];
        assert_eq!(writer.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
    }

    #[test]
    fn test_pipe_descriptors_refuse_seek() {
        let mut reader = ReadOnly(&b"xyz"[..]);
        assert_eq!(
            reader.seek(SeekFrom::Current(0)).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
        assert!(reader.write(b"q").is_err());

        let mut sink = WriteOnly(Vec::new());
        assert_eq!(sink.write(b"q").unwrap(), 1);
        assert!(sink.read(&mut [0u8; 1]).is_err());
    }
}
