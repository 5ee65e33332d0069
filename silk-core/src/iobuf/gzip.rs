//! Whole-file gzip wrapper around a byte source or sink

use super::Descriptor;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Descriptor that inflates a gzip source or deflates into a gzip sink.
///
/// Gzip streams cannot seek, so an IO buffer over this descriptor always
/// reads block by block.
pub enum GzipDescriptor {
    Reader(MultiGzDecoder<Box<dyn Read>>),
    Writer(Option<GzEncoder<Box<dyn Write>>>),
}

impl GzipDescriptor {
    /// Decompress everything read from `inner`; concatenated members are
    /// read as one stream
    pub fn reader(inner: impl Read + 'static) -> Self {
        GzipDescriptor::Reader(MultiGzDecoder::new(Box::new(inner)))
    }

    /// Compress everything written into `inner` at `level` (0-9)
    pub fn writer(inner: impl Write + 'static, level: u32) -> Self {
        GzipDescriptor::Writer(Some(GzEncoder::new(
            Box::new(inner),
            Compression::new(level.min(9)),
        )))
    }

    /// Whether `bytes` begin with the gzip magic number
    pub fn is_gzip_magic(bytes: &[u8]) -> bool {
        bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
    }
}

impl Descriptor for GzipDescriptor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            GzipDescriptor::Reader(decoder) => decoder.read(buf),
            GzipDescriptor::Writer(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "gzip writer is not readable",
            )),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            GzipDescriptor::Writer(Some(encoder)) => encoder.write(buf),
            GzipDescriptor::Writer(None) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "gzip stream already finished",
            )),
            GzipDescriptor::Reader(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "gzip reader is not writable",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            GzipDescriptor::Writer(Some(encoder)) => encoder.flush(),
            _ => Ok(()),
        }
    }

    fn strerror(&self, err: &io::Error) -> String {
        format!("gzip: {}", err)
    }

    fn close(&mut self) -> io::Result<()> {
        if let GzipDescriptor::Writer(slot) = self {
            if let Some(encoder) = slot.take() {
                let mut inner = encoder.finish()?;
                inner.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;
    use crate::iobuf::IoBuf;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_gzip_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.gz");

        let file = File::create(&path).unwrap();
        let mut writer =
            IoBuf::writer(Box::new(GzipDescriptor::writer(file, 6)), CompressionMethod::Zlib)
                .unwrap();
        writer.write(b"compressed twice").unwrap();
        writer.close().unwrap();

        let mut head = [0u8; 2];
        File::open(&path).unwrap().read_exact(&mut head).unwrap();
        assert!(GzipDescriptor::is_gzip_magic(&head));

        let file = File::open(&path).unwrap();
        let mut reader =
            IoBuf::reader(Box::new(GzipDescriptor::reader(file)), CompressionMethod::Zlib)
                .unwrap();
        let mut out = [0u8; 64];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(&out[..n], b"compressed twice");
    }
}
