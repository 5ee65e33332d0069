//! Reading side of the IO buffer

use super::{
    descriptor_error, ensure_len, read_full, BlockMode, IoBuf, IoBufError, BLOCK_HEADER_SIZE,
};
use crate::config::MAX_BLOCK_SIZE;
use std::io::SeekFrom;

impl IoBuf {
    /// Read up to `buf.len()` bytes. Returns 0 once the stream is exhausted.
    ///
    /// A failure after some bytes were delivered returns the partial count;
    /// the error is reported by the next call.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, IoBufError> {
        let count = buf.len();
        self.transfer(Some(buf), count, None)
    }

    /// Read up to `buf.len()` bytes, stopping after the first `stop` byte.
    ///
    /// The stop byte is copied into `buf` and counted.
    pub fn read_to_char(&mut self, buf: &mut [u8], stop: u8) -> Result<usize, IoBufError> {
        let count = buf.len();
        self.transfer(Some(buf), count, Some(stop))
    }

    /// Discard up to `count` bytes.
    ///
    /// Whole blocks are passed over by seeking when the descriptor allows it,
    /// without being decompressed.
    pub fn skip(&mut self, count: u64) -> Result<u64, IoBufError> {
        let count = match usize::try_from(count) {
            Ok(n) if n <= isize::MAX as usize => n,
            _ => return self.fail(IoBufError::TooBig),
        };
        self.transfer(None, count, None).map(|n| n as u64)
    }

    /// Push `data` back so the next read returns it first.
    ///
    /// Only bytes already consumed from the current block can be replaced;
    /// if fewer than `data.len()` positions are available, nothing is pushed
    /// and the available count is returned. `adjust_total` is added to the
    /// byte total when the push succeeds.
    pub fn unget(&mut self, data: &[u8], adjust_total: i64) -> Result<usize, IoBufError> {
        self.check_ready()?;
        if self.mode.is_writer() {
            return self.fail(IoBufError::NoRead);
        }
        if data.is_empty() {
            self.adjust_total(adjust_total);
            return Ok(0);
        }
        if self.pos < data.len() {
            return Ok(self.pos);
        }
        if let Err(e) = ensure_len(&mut self.ubuf, self.pos) {
            return self.fail(e);
        }
        self.pos -= data.len();
        self.ubuf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.adjust_total(adjust_total);
        Ok(data.len())
    }

    fn adjust_total(&mut self, delta: i64) {
        self.total = self.total.saturating_add_signed(delta);
    }

    fn transfer(
        &mut self,
        mut out: Option<&mut [u8]>,
        count: usize,
        stop: Option<u8>,
    ) -> Result<usize, IoBufError> {
        self.check_ready()?;
        if self.mode.is_writer() {
            return self.fail(IoBufError::NoRead);
        }

        let mode = if out.is_none() && stop.is_none() {
            BlockMode::Skip
        } else {
            BlockMode::Normal
        };

        let mut total = 0;
        let mut remaining = count;
        while remaining > 0 {
            if self.pos >= self.block_len {
                if self.at_eof {
                    break;
                }
                match self.uncompress_block(mode) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => return self.partial(total, e),
                }
                self.used = true;
            } else if !self.is_uncompr && mode == BlockMode::Normal {
                // a skip left this block compressed
                match self.uncompress_block(BlockMode::Reread) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => return self.partial(total, e),
                }
            }

            let left = self.block_len.saturating_sub(self.pos);
            if left == 0 {
                continue;
            }
            let mut num = remaining.min(left);
            let mut found = false;
            if let Some(c) = stop {
                if let Some(i) = self.ubuf[self.pos..self.pos + num]
                    .iter()
                    .position(|&b| b == c)
                {
                    num = i + 1;
                    found = true;
                }
            }
            if let Some(dst) = out.as_deref_mut() {
                dst[total..total + num].copy_from_slice(&self.ubuf[self.pos..self.pos + num]);
            }
            self.pos += num;
            total += num;
            remaining -= num;
            if found {
                break;
            }
        }
        Ok(total)
    }

    fn partial(&mut self, done: usize, err: IoBufError) -> Result<usize, IoBufError> {
        self.error = Some(err.clone());
        if done > 0 {
            Ok(done)
        } else {
            Err(err)
        }
    }

    /// Load the next block (or decompress the current one for `Reread`).
    ///
    /// Returns the uncompressed length of the block, or 0 at end of stream.
    fn uncompress_block(&mut self, mode: BlockMode) -> Result<usize, IoBufError> {
        let mut mode = mode;
        let has_header = self.codec.has_block_header();
        if mode != BlockMode::Reread {
            self.in_core = false;
            self.is_uncompr = false;
        }
        let desc = self
            .desc
            .as_deref_mut()
            .ok_or(IoBufError::NoDescriptor)?;

        let mut comp_len;
        let uncomp_len;
        let mut new_len;
        let padded;
        if mode == BlockMode::Reread {
            comp_len = self.disk_block_size;
            uncomp_len = self.block_len;
            new_len = uncomp_len;
            padded = uncomp_len;
        } else if !has_header {
            comp_len = self.capacity;
            uncomp_len = self.capacity;
            new_len = self.capacity;
            padded = self.capacity;
        } else {
            let mut word = [0u8; BLOCK_HEADER_SIZE / 2];
            let got = read_full(&mut *desc, &mut word).map_err(|e| descriptor_error(&*desc, &e))?;
            if got == 0 {
                self.at_eof = true;
                return Ok(0);
            }
            self.total += got as u64;
            if got < word.len() {
                return Err(IoBufError::ShortRead);
            }
            comp_len = u32::from_be_bytes(word) as usize;
            if comp_len == 0 {
                // end-of-stream marker inside an enclosing stream
                self.at_eof = true;
                return Ok(0);
            }

            let got = read_full(&mut *desc, &mut word).map_err(|e| descriptor_error(&*desc, &e))?;
            self.total += got as u64;
            if got < word.len() {
                self.at_eof = true;
                return Err(IoBufError::ShortRead);
            }
            uncomp_len = u32::from_be_bytes(word) as usize;
            new_len = uncomp_len;
            padded = uncomp_len + 3;
        }

        if comp_len > MAX_BLOCK_SIZE || padded > MAX_BLOCK_SIZE {
            return Err(IoBufError::BlockSize);
        }
        self.disk_block_size = comp_len;

        if has_header {
            ensure_len(&mut self.cbuf, comp_len)?;
        }
        ensure_len(&mut self.ubuf, padded.max(self.capacity))?;

        if mode == BlockMode::Skip && !self.no_seek {
            match desc.seek(SeekFrom::Current(0)) {
                Err(_) => self.no_seek = true,
                Ok(here) => {
                    self.block_pos = here;
                    let end = desc
                        .seek(SeekFrom::End(0))
                        .map_err(|e| descriptor_error(&*desc, &e))?;
                    let next = desc
                        .seek(SeekFrom::Start(here + comp_len as u64))
                        .map_err(|e| descriptor_error(&*desc, &e))?;
                    if end < next {
                        // block runs past the end of the data; read it normally
                        mode = BlockMode::Reread;
                        self.pos = 0;
                    }
                }
            }
        }

        if mode == BlockMode::Reread && !self.in_core {
            desc.seek(SeekFrom::Start(self.block_pos))
                .map_err(|e| descriptor_error(&*desc, &e))?;
        }

        let must_read = match mode {
            BlockMode::Normal => true,
            BlockMode::Reread => !self.in_core,
            BlockMode::Skip => self.no_seek,
        };
        if must_read {
            let target = if has_header {
                &mut self.cbuf[..comp_len]
            } else {
                &mut self.ubuf[..comp_len]
            };
            let got = read_full(&mut *desc, target).map_err(|e| descriptor_error(&*desc, &e))?;
            self.in_core = true;
            self.total += got as u64;
            if got < comp_len {
                if has_header {
                    return Err(IoBufError::ShortRead);
                }
                self.at_eof = true;
                new_len = got;
                comp_len = got;
            }
        }

        if mode != BlockMode::Skip {
            if has_header {
                let codec = self.codec;
                codec.decompress(&self.cbuf[..comp_len], uncomp_len, &mut self.ubuf)?;
                let floor = self.capacity.max(uncomp_len);
                ensure_len(&mut self.ubuf, floor)?;
            }
            self.is_uncompr = true;
        }

        self.block_len = new_len;
        if mode != BlockMode::Reread {
            self.pos = 0;
        }
        Ok(new_len)
    }
}

#[cfg(test)]
mod tests {
    use crate::compression::CompressionMethod;
    use crate::iobuf::{
        IoBuf, IoBufConfig, IoBufError, IoMode, MemoryDescriptor, ReadOnly, BLOCK_HEADER_SIZE,
    };

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write_blocks(
        method: CompressionMethod,
        block_size: usize,
        record_size: usize,
        data: &[u8],
    ) -> Vec<u8> {
        let mem = MemoryDescriptor::new();
        let cfg = IoBufConfig {
            block_size,
            record_size,
            ..Default::default()
        };
        let mut buf = IoBuf::with_config(IoMode::Write, cfg).unwrap();
        buf.bind(Box::new(mem.clone()), method).unwrap();
        assert_eq!(buf.write(data).unwrap(), data.len());
        buf.close().unwrap();
        mem.contents()
    }

    fn reader_over(bytes: Vec<u8>, method: CompressionMethod) -> IoBuf {
        IoBuf::reader(Box::new(MemoryDescriptor::from_bytes(bytes)), method).unwrap()
    }

    #[test]
    fn test_two_zlib_blocks_then_eof() {
        let data = pattern(2048);
        let bytes = write_blocks(CompressionMethod::Zlib, 1024, 16, &data);

        let first = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let first_uncomp = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(first_uncomp, 1024);
        let second = &bytes[BLOCK_HEADER_SIZE + first..];
        assert_eq!(u32::from_be_bytes(second[4..8].try_into().unwrap()), 1024);
        let second_comp = u32::from_be_bytes(second[0..4].try_into().unwrap()) as usize;
        assert_eq!(bytes.len(), 2 * BLOCK_HEADER_SIZE + first + second_comp);

        let mut reader = reader_over(bytes, CompressionMethod::Zlib);
        let mut out = vec![0u8; 4096];
        let n = reader.read(&mut out).unwrap();
        assert_eq!(n, 2048);
        assert_eq!(&out[..n], &data[..]);
        assert_eq!(reader.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_zero_length_marker_ends_embedded_stream() {
        let data = pattern(300);
        let mut bytes = write_blocks(CompressionMethod::Snappy, 128, 1, &data);
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(b"trailing bytes");

        let mut reader = reader_over(bytes, CompressionMethod::Snappy);
        let mut out = vec![0u8; 1024];
        assert_eq!(reader.read(&mut out).unwrap(), 300);
        assert_eq!(&out[..300], &data[..]);
        assert_eq!(reader.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_unget_then_read() {
        let bytes = write_blocks(CompressionMethod::Zlib, 64, 1, b"hello, world");
        let mut reader = reader_over(bytes, CompressionMethod::Zlib);

        let mut out = [0u8; 5];
        assert_eq!(reader.read(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        let total = reader.total();

        assert_eq!(reader.unget(b"HELLO", 0).unwrap(), 5);
        assert_eq!(reader.total(), total);
        let mut all = [0u8; 32];
        let n = reader.read(&mut all).unwrap();
        assert_eq!(&all[..n], b"HELLO, world");
    }

    #[test]
    fn test_unget_beyond_consumed_bytes() {
        let bytes = write_blocks(CompressionMethod::None, 64, 1, b"abcdef");
        let mut reader = reader_over(bytes, CompressionMethod::None);
        let mut out = [0u8; 2];
        reader.read(&mut out).unwrap();
        assert_eq!(reader.unget(b"xyz", 0).unwrap(), 2);
        let mut rest = [0u8; 8];
        let n = reader.read(&mut rest).unwrap();
        assert_eq!(&rest[..n], b"cdef");
    }

    #[test]
    fn test_skip_with_seek_and_reread() {
        let data = pattern(1000);
        let bytes = write_blocks(CompressionMethod::Zlib, 100, 1, &data);
        let mut reader = reader_over(bytes, CompressionMethod::Zlib);

        assert_eq!(reader.skip(250).unwrap(), 250);
        let mut out = [0u8; 100];
        assert_eq!(reader.read(&mut out).unwrap(), 100);
        assert_eq!(&out[..], &data[250..350]);

        assert_eq!(reader.skip(10_000).unwrap(), 650);
        assert_eq!(reader.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_skip_on_pipe() {
        let data = pattern(500);
        let bytes = write_blocks(CompressionMethod::Snappy, 64, 1, &data);
        let mut reader =
            IoBuf::reader(Box::new(ReadOnly(std::io::Cursor::new(bytes))), CompressionMethod::Snappy)
                .unwrap();
        assert_eq!(reader.skip(130).unwrap(), 130);
        let mut out = [0u8; 10];
        assert_eq!(reader.read(&mut out).unwrap(), 10);
        assert_eq!(&out[..], &data[130..140]);
    }

    #[test]
    fn test_read_to_char() {
        let bytes = write_blocks(CompressionMethod::Zlib, 8, 1, b"one\ntwo\nthree");
        let mut reader = reader_over(bytes, CompressionMethod::Zlib);
        let mut line = [0u8; 32];
        let n = reader.read_to_char(&mut line, b'\n').unwrap();
        assert_eq!(&line[..n], b"one\n");
        let n = reader.read_to_char(&mut line, b'\n').unwrap();
        assert_eq!(&line[..n], b"two\n");
        let n = reader.read_to_char(&mut line, b'\n').unwrap();
        assert_eq!(&line[..n], b"three");
    }

    #[test]
    fn test_truncated_block_is_short_read() {
        let data = pattern(512);
        let mut bytes = write_blocks(CompressionMethod::Zlib, 512, 1, &data);
        bytes.truncate(bytes.len() - 3);
        let mut reader = reader_over(bytes, CompressionMethod::Zlib);
        let mut out = vec![0u8; 512];
        assert_eq!(reader.read(&mut out), Err(IoBufError::ShortRead));
        // the error is sticky until described
        assert_eq!(reader.read(&mut out), Err(IoBufError::ShortRead));
        assert_eq!(reader.strerror(), "Could not read complete compressed block");
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(2u32 * 1024 * 1024).to_be_bytes());
        bytes.extend_from_slice(&16u32.to_be_bytes());
        let mut reader = reader_over(bytes, CompressionMethod::Zlib);
        let mut out = [0u8; 16];
        assert_eq!(reader.read(&mut out), Err(IoBufError::BlockSize));
    }

    #[test]
    fn test_reader_refuses_write() {
        let mut reader = reader_over(Vec::new(), CompressionMethod::None);
        assert_eq!(reader.write(b"x"), Err(IoBufError::NoWrite));
    }
}
