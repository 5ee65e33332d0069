//! Stream façade over files, pipes and standard IO
//!
//! A [`Stream`] binds a path to a descriptor, reads or writes the SiLK
//! header, and moves bytes, records or text lines through an [`IoBuf`].
//!
//! Lifecycle: `create` → `bind` → `open` (or `fdopen`) → IO → `close`.
//! For SiLK content the descriptor is used directly until the header has
//! been processed; everything after the header goes through the IO buffer
//! with the compression method the header names.

mod records;
mod text;

use crate::compression::{CompMethodStatus, CompressionMethod, DEFAULT_ZLIB_LEVEL};
use crate::config::{runtime, DEFAULT_BLOCK_SIZE, DEFAULT_FLOW_FORMAT};
use crate::format::FileFormat;
use crate::header::{Header, HeaderLock, PackedFile, PACKEDFILE_ID};
use crate::iobuf::{
    Descriptor, GzipDescriptor, IoBuf, IoBufConfig, IoMode, RawIo, ReadOnly, WriteOnly,
};
use crate::record::codec::RecordCodec;
use crate::record::Ipv6Policy;
use crate::{Result, SilkError};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentType {
    /// Lines of text
    Text,
    /// Any SiLK file: header followed by data
    SilkBinary,
    /// SiLK file of flow records
    SilkFlow,
    /// Binary data without a SiLK header
    OtherBinary,
}

impl ContentType {
    pub fn is_silk(self) -> bool {
        matches!(self, ContentType::SilkBinary | ContentType::SilkFlow)
    }

    pub fn is_binary(self) -> bool {
        self != ContentType::Text
    }
}

/// Stream tuning
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Uncompressed block size of the IO buffer
    pub block_size: usize,
    /// zlib level for zlib-compressed blocks and `.gz` output
    pub zlib_level: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            zlib_level: DEFAULT_ZLIB_LEVEL,
        }
    }
}

/// Standard descriptor a special path name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdIo {
    Stdin,
    Stdout,
    Stderr,
}

/// Whether `path` names a whole-file gzip stream for `mode`.
///
/// Readers also accept names with a temporary suffix after `.gz.`.
pub fn pathname_is_compressed(path: &Path, mode: IoMode) -> bool {
    let name = path.to_string_lossy();
    let Some(pos) = name.find(".gz") else {
        return false;
    };
    let rest = &name[pos + 3..];
    rest.is_empty() || (mode != IoMode::Write && rest.starts_with('.'))
}

#[cfg(unix)]
fn is_fifo_or_device(file_type: &std::fs::FileType) -> (bool, bool) {
    use std::os::unix::fs::FileTypeExt;
    (file_type.is_fifo(), file_type.is_char_device())
}

#[cfg(not(unix))]
fn is_fifo_or_device(_file_type: &std::fs::FileType) -> (bool, bool) {
    (false, false)
}

/// A file, pipe or standard descriptor carrying SiLK data or text
pub struct Stream {
    mode: IoMode,
    content: ContentType,
    config: StreamConfig,
    path: Option<PathBuf>,
    stdio: Option<StdIo>,
    /// Descriptor before the IO buffer takes it over
    raw: Option<Box<dyn Descriptor>>,
    iobuf: Option<IoBuf>,
    header: Header,
    is_open: bool,
    is_closed: bool,
    is_seekable: bool,
    is_gzip: bool,
    /// Header has been read or written
    have_header: bool,
    is_eof: bool,
    /// Bytes of header that precede the IO buffer's data
    pre_iobuf_bytes: u64,
    codec: Option<&'static RecordCodec>,
    record_length: usize,
    record_count: u64,
    ipv6_policy: Ipv6Policy,
    copy_input: Option<Box<Stream>>,
    comment_start: Option<String>,
    line_count: u64,
    hdr_start_time: i64,
    hdr_sensor: u32,
    hdr_flowtype: u32,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("mode", &self.mode)
            .field("content", &self.content)
            .field("path", &self.path)
            .field("is_open", &self.is_open)
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl Stream {
    /// Create an unbound stream
    pub fn create(mode: IoMode, content: ContentType) -> Self {
        Self::with_config(mode, content, StreamConfig::default())
    }

    pub fn with_config(mode: IoMode, content: ContentType, config: StreamConfig) -> Self {
        Self {
            mode,
            content,
            config,
            path: None,
            stdio: None,
            raw: None,
            iobuf: None,
            header: Header::new(),
            is_open: false,
            is_closed: false,
            is_seekable: false,
            is_gzip: false,
            have_header: false,
            is_eof: false,
            pre_iobuf_bytes: 0,
            codec: None,
            record_length: 1,
            record_count: 0,
            ipv6_policy: Ipv6Policy::Mix,
            copy_input: None,
            comment_start: None,
            line_count: 0,
            hdr_start_time: 0,
            hdr_sensor: crate::header::INVALID_SENSOR,
            hdr_flowtype: crate::header::INVALID_FLOWTYPE,
        }
    }

    /// Attach a path name.
    ///
    /// `-`, `stdin`, `stdout` and `stderr` refer to the standard
    /// descriptors; names ending in `.gz` are gzip files.
    pub fn bind(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SilkError::InvalidInput("empty path name".into()));
        }
        if self.path.is_some() {
            return Err(SilkError::PrevBound);
        }

        let stdio = match path.to_str() {
            Some("stdin") => Some(StdIo::Stdin),
            Some("stdout") => Some(StdIo::Stdout),
            Some("stderr") => Some(StdIo::Stderr),
            Some("-") => Some(match self.mode {
                IoMode::Read => StdIo::Stdin,
                _ => StdIo::Stdout,
            }),
            _ => None,
        };
        let binary = self.content.is_binary();
        match (stdio, self.mode) {
            (Some(StdIo::Stdin), IoMode::Read) => {
                if binary && io::stdin().is_terminal() {
                    return Err(SilkError::IsTerminal);
                }
            }
            (Some(StdIo::Stdin), _) => {
                return Err(SilkError::UnsupportedIoMode("cannot write to stdin".into()))
            }
            (Some(s), IoMode::Write) => {
                let tty = match s {
                    StdIo::Stdout => io::stdout().is_terminal(),
                    _ => io::stderr().is_terminal(),
                };
                if binary && tty {
                    return Err(SilkError::IsTerminal);
                }
            }
            (Some(_), _) => {
                return Err(SilkError::UnsupportedIoMode(format!(
                    "cannot read from or append to {}",
                    path.display()
                )))
            }
            (None, _) => {}
        }

        if self.mode == IoMode::Append {
            if pathname_is_compressed(path, self.mode) {
                return Err(SilkError::UnsupportedIoMode(
                    "cannot append to a gzip file".into(),
                ));
            }
            if let Ok(meta) = std::fs::metadata(path) {
                if is_fifo_or_device(&meta.file_type()).0 {
                    return Err(SilkError::UnsupportedIoMode(
                        "cannot append to a FIFO".into(),
                    ));
                }
            }
        }

        self.stdio = stdio;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Open the bound path
    pub fn open(&mut self) -> Result<()> {
        self.check_unopened()?;
        let path = self.path.clone().ok_or(SilkError::NotBound)?;
        if self.mode == IoMode::Append && !self.content.is_silk() {
            return Err(SilkError::UnsupportedIoMode(
                "only SiLK files can be appended to".into(),
            ));
        }

        let desc: Box<dyn Descriptor> = match self.stdio {
            Some(StdIo::Stdin) => Box::new(ReadOnly(io::stdin())),
            Some(StdIo::Stdout) => Box::new(WriteOnly(io::stdout())),
            Some(StdIo::Stderr) => Box::new(WriteOnly(io::stderr())),
            None => self.open_file(&path)?,
        };
        self.attach(desc)?;
        debug!(
            "Opened {} for {:?} ({:?}, seekable={}, gzip={})",
            path.display(),
            self.mode,
            self.content,
            self.is_seekable,
            self.is_gzip
        );
        Ok(())
    }

    fn open_file(&mut self, path: &Path) -> Result<Box<dyn Descriptor>> {
        let gz_name = pathname_is_compressed(path, self.mode);
        match self.mode {
            IoMode::Read => {
                let mut file = File::open(path)?;
                self.is_seekable = file_is_regular(&file);
                let mut gzip = gz_name;
                if gz_name && self.is_seekable {
                    gzip = file_has_gzip_magic(&mut file)?;
                }
                if gzip {
                    self.is_gzip = true;
                    self.is_seekable = false;
                    Ok(Box::new(GzipDescriptor::reader(file)))
                } else {
                    Ok(Box::new(file))
                }
            }
            IoMode::Write => {
                let file = create_for_write(path)?;
                self.is_seekable = file_is_regular(&file);
                if gz_name {
                    self.is_gzip = true;
                    self.is_seekable = false;
                    Ok(Box::new(GzipDescriptor::writer(file, self.config.zlib_level)))
                } else {
                    Ok(Box::new(file))
                }
            }
            IoMode::Append => {
                let mut file = OpenOptions::new().read(true).write(true).open(path)?;
                io::Seek::seek(&mut file, SeekFrom::Start(0))?;
                self.is_seekable = true;
                Ok(Box::new(file))
            }
        }
    }

    /// Open over an already-open descriptor.
    ///
    /// The stream need not be bound; an unbound stream reports the path
    /// name `<descriptor>`.
    pub fn fdopen(&mut self, mut desc: Box<dyn Descriptor>) -> Result<()> {
        self.check_unopened()?;
        if self.path.is_none() {
            self.path = Some(PathBuf::from("<descriptor>"));
        }
        self.is_seekable = desc.seek(SeekFrom::Current(0)).is_ok();
        self.attach(desc)
    }

    fn check_unopened(&self) -> Result<()> {
        if self.is_closed {
            return Err(SilkError::Closed);
        }
        if self.is_open {
            return Err(SilkError::PrevOpen);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed {
            return Err(SilkError::Closed);
        }
        if !self.is_open {
            return Err(SilkError::NotOpen);
        }
        Ok(())
    }

    /// Take ownership of the descriptor; non-SiLK content gets its IO
    /// buffer immediately
    fn attach(&mut self, desc: Box<dyn Descriptor>) -> Result<()> {
        self.raw = Some(desc);
        self.is_open = true;
        if !self.content.is_silk() {
            self.create_iobuf(CompressionMethod::None, 1)?;
        }
        Ok(())
    }

    fn create_iobuf(&mut self, method: CompressionMethod, record_size: usize) -> Result<()> {
        let desc = self.raw.take().ok_or(SilkError::NotOpen)?;
        let config = IoBufConfig {
            block_size: self.config.block_size,
            record_size: record_size.max(1),
            zlib_level: self.config.zlib_level,
        };
        let mut iobuf = IoBuf::with_config(self.mode, config)?;
        iobuf.bind(desc, method)?;
        self.iobuf = Some(iobuf);
        Ok(())
    }

    fn iobuf_mut(&mut self) -> Result<&mut IoBuf> {
        self.iobuf.as_mut().ok_or(SilkError::NotOpen)
    }

    // Header handling

    /// Read the header if it has not been read yet
    pub fn read_silk_header(&mut self) -> Result<&Header> {
        self.check_open()?;
        if !self.content.is_silk() {
            return Err(SilkError::UnsupportedContent);
        }
        if self.mode == IoMode::Write {
            return Err(SilkError::UnsupportedIoMode(
                "cannot read the header of an output stream".into(),
            ));
        }
        if self.have_header {
            return Ok(&self.header);
        }

        let mut header = Header::new();
        let desc = self.raw.as_deref_mut().ok_or(SilkError::NotOpen)?;
        header.read(&mut RawIo(desc))?;
        header.set_lock(HeaderLock::Fixed);
        self.have_header = true;
        self.pre_iobuf_bytes = header.header_length() as u64;
        self.header = header;

        if self.header.format().is_flow() {
            self.content = ContentType::SilkFlow;
        } else if self.content == ContentType::SilkFlow {
            return Err(SilkError::RequireSilkFlow);
        }
        self.check_compression()?;
        self.prepare_records()?;
        self.cache_packedfile();

        let method = self
            .header
            .compression_method()
            .ok_or(SilkError::CompressionInvalid(self.header.compression()))?;
        if self.mode == IoMode::Append {
            if let Some(desc) = self.raw.as_deref_mut() {
                desc.seek(SeekFrom::End(0))?;
            }
        }
        let record_size = self.record_length;
        self.create_iobuf(method, record_size)?;
        debug!(
            "Read header of {}: {} v{} records of {} bytes",
            self.pathname(),
            self.header.format(),
            self.header.record_version(),
            self.record_length
        );
        Ok(&self.header)
    }

    /// Verify the header names `format` with a record version in
    /// `min_version..=max_version` and an available compression method
    pub fn check_silk_header(
        &mut self,
        format: FileFormat,
        min_version: u16,
        max_version: u16,
    ) -> Result<()> {
        let header = self.read_silk_header()?;
        if header.format() != format {
            return Err(SilkError::UnsupportedFormat(header.format().id()));
        }
        let version = header.record_version();
        if version < min_version || version > max_version {
            return Err(SilkError::UnsupportedVersion {
                format: format.id(),
                version,
            });
        }
        self.check_compression()
    }

    /// Whether the header's compression method can be used here
    pub fn check_compression(&self) -> Result<()> {
        let id = self.header.compression();
        match CompressionMethod::check(id) {
            CompMethodStatus::Available => Ok(()),
            CompMethodStatus::Valid => Err(SilkError::CompressionUnavailable(id)),
            CompMethodStatus::Known if self.mode == IoMode::Write => Ok(()),
            _ => Err(SilkError::CompressionInvalid(id)),
        }
    }

    /// Header to fill in before writing; read-only once processed
    pub fn silk_header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn silk_header(&self) -> &Header {
        &self.header
    }

    /// Write the header of an output stream
    pub fn write_silk_header(&mut self) -> Result<()> {
        self.check_open()?;
        if self.have_header {
            return Err(SilkError::PrevData);
        }
        if self.mode != IoMode::Write {
            return Err(SilkError::UnsupportedIoMode(
                "only output streams write a header".into(),
            ));
        }
        if !self.content.is_silk() {
            return Err(SilkError::UnsupportedContent);
        }

        if self.header.format() == FileFormat::UNSET {
            self.header.set_format(DEFAULT_FLOW_FORMAT)?;
        }
        let requested = CompressionMethod::try_from(self.header.compression())
            .map_err(|_| SilkError::CompressionInvalid(self.header.compression()))?;
        let method = requested.resolve(self.is_seekable);
        if method != requested {
            self.header.set_compression(method.id())?;
        }

        if self.header.format().is_flow() {
            self.content = ContentType::SilkFlow;
        } else if self.content == ContentType::SilkFlow {
            return Err(SilkError::RequireSilkFlow);
        }
        self.prepare_records()?;
        self.cache_packedfile();

        self.header.set_lock(HeaderLock::Fixed);
        let desc = self.raw.as_deref_mut().ok_or(SilkError::NotOpen)?;
        let written = self.header.write(&mut RawIo(desc))?;
        self.have_header = true;
        self.pre_iobuf_bytes = written as u64;

        let record_size = self.record_length;
        self.create_iobuf(method, record_size)?;
        debug!(
            "Wrote header of {}: {} compression={} ({} bytes)",
            self.pathname(),
            self.header.format(),
            method,
            written
        );
        Ok(())
    }

    fn cache_packedfile(&mut self) {
        if let Some(pf) = self
            .header
            .first_match(PACKEDFILE_ID)
            .and_then(|e| e.downcast_ref::<PackedFile>())
        {
            self.hdr_start_time = pf.start_time();
            self.hdr_sensor = pf.sensor();
            self.hdr_flowtype = pf.flowtype();
        }
    }

    /// Start hour from the packedfile entry, epoch milliseconds
    pub fn header_start_time(&self) -> i64 {
        self.hdr_start_time
    }

    pub fn header_sensor(&self) -> u32 {
        self.hdr_sensor
    }

    pub fn header_flowtype(&self) -> u32 {
        self.hdr_flowtype
    }

    // Raw bytes

    fn ensure_data_ready(&mut self) -> Result<()> {
        self.check_open()?;
        if self.iobuf.is_some() {
            return Ok(());
        }
        if self.content.is_silk() {
            if self.mode == IoMode::Write {
                self.write_silk_header()
            } else {
                self.read_silk_header().map(|_| ())
            }
        } else {
            Err(SilkError::NotOpen)
        }
    }

    /// Read up to `buf.len()` bytes of data; 0 at end of file
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.mode != IoMode::Read {
            return Err(SilkError::UnsupportedIoMode("stream is not readable".into()));
        }
        self.ensure_data_ready()?;
        let n = self.iobuf_mut()?.read(buf)?;
        Ok(n)
    }

    /// Everything left in the stream
    pub fn read_to_end_of_file(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        self.is_eof = true;
        Ok(out)
    }

    /// Write all of `data`; SiLK output gets its header first
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.mode.is_writer() {
            return Err(SilkError::UnsupportedIoMode("stream is not writable".into()));
        }
        self.ensure_data_ready()?;
        let n = self.iobuf_mut()?.write(data)?;
        if n < data.len() {
            return Err(SilkError::ShortWrite);
        }
        Ok(n)
    }

    /// Push buffered output to the descriptor
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if self.mode == IoMode::Read {
            return Ok(());
        }
        if let Some(iobuf) = self.iobuf.as_mut() {
            iobuf.flush()?;
        } else if let Some(desc) = self.raw.as_deref_mut() {
            desc.flush()?;
        }
        Ok(())
    }

    /// Flush output and release the descriptor
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.is_open = false;
        self.is_closed = true;
        let mut result = Ok(());
        if let Some(iobuf) = self.iobuf.take() {
            if let Err(e) = iobuf.close() {
                result = Err(e.into());
            }
        }
        if let Some(mut desc) = self.raw.take() {
            if let Err(e) = desc.close() {
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }
        debug!("Closed {} after {} records", self.pathname(), self.record_count);
        result
    }

    // Settings and accessors

    pub fn mode(&self) -> IoMode {
        self.mode
    }

    pub fn content_type(&self) -> ContentType {
        self.content
    }

    /// Bound path, or an empty string
    pub fn pathname(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Records read or written so far
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Fixed record length in bytes; 1 for unstructured data
    pub fn record_length(&self) -> usize {
        self.record_length
    }

    pub fn set_ipv6_policy(&mut self, policy: Ipv6Policy) -> Result<()> {
        if !self.content.is_silk() {
            return Err(SilkError::UnsupportedContent);
        }
        self.ipv6_policy = policy;
        Ok(())
    }

    pub fn ipv6_policy(&self) -> Ipv6Policy {
        self.ipv6_policy
    }

    /// Format of an output stream supports IPv6 records
    pub fn supports_ipv6(&self) -> bool {
        self.header.format().supports_ipv6()
    }

    /// Send every record read from this stream to `sink` as well
    pub fn set_copy_input(&mut self, sink: Stream) -> Result<()> {
        if self.copy_input.is_some() {
            return Err(SilkError::InvalidInput("copy-input stream already set".into()));
        }
        if self.record_count > 0 {
            return Err(SilkError::PrevData);
        }
        if !sink.mode.is_writer() {
            return Err(SilkError::UnsupportedIoMode(
                "copy-input stream must be writable".into(),
            ));
        }
        self.copy_input = Some(Box::new(sink));
        Ok(())
    }

    /// Detach the copy-input stream so the caller can close it
    pub fn take_copy_input(&mut self) -> Option<Stream> {
        self.copy_input.take().map(|s| *s)
    }

    /// Bytes through the descriptor, header included
    pub fn total(&self) -> u64 {
        self.pre_iobuf_bytes + self.iobuf.as_ref().map(|b| b.total()).unwrap_or(0)
    }

    /// Conservative size of the output once flushed
    pub fn total_upper_bound(&mut self) -> Result<u64> {
        if !self.mode.is_writer() {
            return Err(SilkError::UnsupportedIoMode("stream is not writable".into()));
        }
        let pre = self.pre_iobuf_bytes;
        match self.iobuf.as_mut() {
            Some(iobuf) => Ok(pre + iobuf.upper_bound_of_total()?),
            None => Ok(pre),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.is_open {
            if let Err(e) = self.close() {
                tracing::warn!("Closing {} on drop failed: {}", self.pathname(), e);
            }
        }
    }
}

fn file_is_regular(file: &File) -> bool {
    file.metadata().map(|m| m.is_file()).unwrap_or(false)
}

fn file_has_gzip_magic(file: &mut File) -> Result<bool> {
    let mut magic = [0u8; 2];
    let n = crate::header::read_fully(file, &mut magic)?;
    std::io::Seek::seek(file, SeekFrom::Start(0))?;
    Ok(n == 2 && GzipDescriptor::is_gzip_magic(&magic))
}

/// Create `path`, refusing to replace a regular file unless clobbering is on
fn create_for_write(path: &Path) -> Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let meta = std::fs::metadata(path)?;
            let (fifo, device) = is_fifo_or_device(&meta.file_type());
            if fifo || device {
                Ok(OpenOptions::new().write(true).open(path)?)
            } else if runtime().clobber {
                Ok(OpenOptions::new().write(true).truncate(true).open(path)?)
            } else {
                Err(SilkError::FileExists(path.to_path_buf()))
            }
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iobuf::MemoryDescriptor;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_compressed_pathnames() {
        assert!(pathname_is_compressed(Path::new("a.rw.gz"), IoMode::Write));
        assert!(!pathname_is_compressed(Path::new("a.gz.XXXX"), IoMode::Write));
        assert!(pathname_is_compressed(Path::new("a.gz.XXXX"), IoMode::Read));
        assert!(!pathname_is_compressed(Path::new("a.rw"), IoMode::Read));
    }

    #[test]
    fn test_special_names_validate_mode() {
        let mut s = Stream::create(IoMode::Write, ContentType::Text);
        assert!(matches!(s.bind("stdin"), Err(SilkError::UnsupportedIoMode(_))));

        let mut s = Stream::create(IoMode::Read, ContentType::Text);
        assert!(matches!(s.bind("stdout"), Err(SilkError::UnsupportedIoMode(_))));

        let mut s = Stream::create(IoMode::Append, ContentType::SilkFlow);
        assert!(s.bind("out.rw.gz").is_err());

        let mut s = Stream::create(IoMode::Read, ContentType::Text);
        s.bind("a").unwrap();
        assert!(matches!(s.bind("b"), Err(SilkError::PrevBound)));
    }

    #[test]
    fn test_existing_file_not_clobbered() {
        let existing = NamedTempFile::new().unwrap();
        let mut s = Stream::create(IoMode::Write, ContentType::OtherBinary);
        s.bind(existing.path()).unwrap();
        assert!(matches!(s.open(), Err(SilkError::FileExists(_))));
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut s = Stream::create(IoMode::Read, ContentType::SilkBinary);
        assert!(matches!(s.open(), Err(SilkError::NotBound)));
        assert!(matches!(s.read_silk_header(), Err(SilkError::NotOpen)));

        s.fdopen(Box::new(MemoryDescriptor::new())).unwrap();
        assert!(matches!(
            s.fdopen(Box::new(MemoryDescriptor::new())),
            Err(SilkError::PrevOpen)
        ));
        s.close().unwrap();
        assert!(matches!(s.close(), Err(SilkError::Closed)));
    }

    #[test]
    fn test_binary_header_roundtrip_in_memory() {
        let mem = MemoryDescriptor::new();
        let mut out = Stream::create(IoMode::Write, ContentType::SilkBinary);
        out.fdopen(Box::new(mem.clone())).unwrap();
        {
            let hdr = out.silk_header_mut();
            hdr.set_format(FileFormat::RWBAG).unwrap();
            hdr.set_record_length(12).unwrap();
            hdr.set_compression(CompressionMethod::Zlib.id()).unwrap();
            hdr.add_annotation("bag of bytes").unwrap();
        }
        out.write(&[0xAB; 24]).unwrap();
        out.close().unwrap();

        mem.rewind();
        let mut input = Stream::create(IoMode::Read, ContentType::SilkBinary);
        input.fdopen(Box::new(mem)).unwrap();
        input.check_silk_header(FileFormat::RWBAG, 0, 0xFF).unwrap();
        assert_eq!(input.silk_header().compression(), 1);
        assert_eq!(input.read_to_end_of_file().unwrap(), vec![0xAB; 24]);
    }

    #[test]
    fn test_flow_content_requires_flow_format() {
        let mem = MemoryDescriptor::new();
        let mut out = Stream::create(IoMode::Write, ContentType::SilkFlow);
        out.fdopen(Box::new(mem)).unwrap();
        out.silk_header_mut().set_format(FileFormat::RWBAG).unwrap();
        assert!(matches!(out.write_silk_header(), Err(SilkError::RequireSilkFlow)));
    }

    #[test]
    fn test_gzip_file_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin.gz");

        let mut out = Stream::create(IoMode::Write, ContentType::OtherBinary);
        out.bind(&path).unwrap();
        out.open().unwrap();
        assert!(!out.is_seekable());
        out.write(b"compressed whole file").unwrap();
        out.close().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(GzipDescriptor::is_gzip_magic(&raw));

        let mut input = Stream::create(IoMode::Read, ContentType::OtherBinary);
        input.bind(&path).unwrap();
        input.open().unwrap();
        assert_eq!(input.read_to_end_of_file().unwrap(), b"compressed whole file");
    }

    #[test]
    fn test_gz_name_without_magic_reads_plain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.gz");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"not actually gzip")
            .unwrap();

        let mut input = Stream::create(IoMode::Read, ContentType::Text);
        input.bind(&path).unwrap();
        input.open().unwrap();
        assert_eq!(input.read_to_end_of_file().unwrap(), b"not actually gzip");
    }

    #[test]
    fn test_default_compression_on_pipe_is_none() {
        let mut out = Stream::create(IoMode::Write, ContentType::SilkBinary);
        out.fdopen(Box::new(WriteOnly(Vec::new()))).unwrap();
        out.silk_header_mut().set_format(FileFormat::RWBAG).unwrap();
        out.silk_header_mut()
            .set_compression(CompressionMethod::Best.id())
            .unwrap();
        out.write_silk_header().unwrap();
        assert_eq!(out.silk_header().compression(), 0);
        assert!(matches!(out.write_silk_header(), Err(SilkError::PrevData)));
    }
}
