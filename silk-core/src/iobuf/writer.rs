//! Writing side of the IO buffer

use super::{descriptor_error, ensure_len, write_full, IoBuf, IoBufError, BLOCK_HEADER_SIZE};

impl IoBuf {
    /// Append `data`, compressing and writing each block as it fills.
    ///
    /// A failure after some bytes were accepted returns the partial count;
    /// the error is reported by the next call.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, IoBufError> {
        self.check_ready()?;
        if !self.mode.is_writer() {
            return self.fail(IoBufError::NoWrite);
        }
        if let Err(e) = ensure_len(&mut self.ubuf, self.capacity) {
            return self.fail(e);
        }

        let mut done = 0;
        while done < data.len() {
            let left = self.capacity - self.pos;
            if left == 0 {
                if let Err(e) = self.compress_block() {
                    self.error = Some(e.clone());
                    return if done > 0 { Ok(done) } else { Err(e) };
                }
                continue;
            }
            let num = left.min(data.len() - done);
            self.ubuf[self.pos..self.pos + num].copy_from_slice(&data[done..done + num]);
            self.pos += num;
            done += num;
            self.used = true;
        }
        Ok(done)
    }

    /// Write any pending partial block and flush the descriptor.
    ///
    /// Returns the number of bytes written to the descriptor so far.
    pub fn flush(&mut self) -> Result<u64, IoBufError> {
        self.check_ready()?;
        if !self.mode.is_writer() {
            return self.fail(IoBufError::NoWrite);
        }
        if self.pos > 0 {
            if let Err(e) = self.compress_block() {
                return self.fail(e);
            }
        }
        if let Some(desc) = self.desc.as_deref_mut() {
            if let Err(e) = desc.flush() {
                let err = descriptor_error(desc, &e);
                return self.fail(err);
            }
        }
        Ok(self.total)
    }

    /// Pad the pending bytes to a whole record, compress, and write them
    fn compress_block(&mut self) -> Result<(), IoBufError> {
        let partial = self.pos % self.record_size;
        if partial != 0 {
            let pad = self.record_size - partial;
            ensure_len(&mut self.ubuf, self.pos + pad)?;
            self.ubuf[self.pos..self.pos + pad].fill(0);
            self.pos += pad;
        }

        let codec = self.codec;
        let desc = self
            .desc
            .as_deref_mut()
            .ok_or(IoBufError::NoDescriptor)?;

        let block: &[u8] = if codec.has_block_header() {
            self.cbuf.clear();
            self.cbuf.extend_from_slice(&[0u8; BLOCK_HEADER_SIZE]);
            codec.compress(&self.ubuf[..self.pos], &mut self.cbuf)?;
            let comp_len = (self.cbuf.len() - BLOCK_HEADER_SIZE) as u32;
            self.cbuf[0..4].copy_from_slice(&comp_len.to_be_bytes());
            self.cbuf[4..8].copy_from_slice(&(self.pos as u32).to_be_bytes());
            &self.cbuf
        } else {
            &self.ubuf[..self.pos]
        };

        let written = write_full(&mut *desc, block).map_err(|e| descriptor_error(&*desc, &e))?;
        self.total += written as u64;
        if written < block.len() {
            return Err(IoBufError::ShortWrite);
        }
        self.pos = 0;
        Ok(())
    }
}
