//! Line-oriented text streams

use super::{ContentType, Stream};
use crate::iobuf::IoMode;
use crate::{Result, SilkError};
use std::fmt;

impl Stream {
    /// Ignore everything from `marker` to the end of each line read.
    ///
    /// `None` turns comment handling off.
    pub fn set_comment_start(&mut self, marker: Option<&str>) -> Result<()> {
        if self.content != ContentType::Text {
            return Err(SilkError::UnsupportedContent);
        }
        if self.mode != IoMode::Read {
            return Err(SilkError::UnsupportedIoMode(
                "comments apply to input streams".into(),
            ));
        }
        self.comment_start = marker.filter(|m| !m.is_empty()).map(str::to_owned);
        Ok(())
    }

    /// Number of lines consumed so far, blank and comment lines included
    pub fn line_number(&self) -> u64 {
        self.line_count
    }

    /// Next line with content, without its newline or comment.
    ///
    /// Lines of `max_len` bytes or more fail with [`SilkError::LongLine`];
    /// the rest of that line is discarded so reading can continue.
    pub fn get_line(&mut self, max_len: usize) -> Result<Option<String>> {
        if self.content != ContentType::Text {
            return Err(SilkError::UnsupportedContent);
        }
        if self.mode != IoMode::Read {
            return Err(SilkError::UnsupportedIoMode("stream is not readable".into()));
        }
        self.check_open()?;
        if max_len == 0 {
            return Err(SilkError::InvalidInput("line buffer is empty".into()));
        }

        let mut buf = vec![0u8; max_len];
        loop {
            let iobuf = self.iobuf_mut()?;
            let n = iobuf.read_to_char(&mut buf, b'\n')?;
            if n == 0 {
                self.is_eof = true;
                return Ok(None);
            }

            let mut len = n;
            if buf[n - 1] == b'\n' {
                len -= 1;
            } else if n == max_len {
                loop {
                    let m = iobuf.read_to_char(&mut buf, b'\n')?;
                    if m == 0 || buf[m - 1] == b'\n' {
                        break;
                    }
                }
                self.line_count += 1;
                return Err(SilkError::LongLine);
            }
            self.line_count += 1;

            let mut line = String::from_utf8_lossy(&buf[..len]).into_owned();
            if let Some(marker) = self.comment_start.as_deref() {
                if let Some(pos) = line.find(marker) {
                    line.truncate(pos);
                }
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Write formatted text
    pub fn print(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        let text = args.to_string();
        self.write(text.as_bytes()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn text_stream(contents: &str) -> (NamedTempFile, Stream) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        let mut s = Stream::create(IoMode::Read, ContentType::Text);
        s.bind(file.path()).unwrap();
        s.open().unwrap();
        (file, s)
    }

    #[test]
    fn test_lines_skip_comments_and_blanks() {
        let (_f, mut s) = text_stream("alpha\n# whole comment\n\n  \nbeta # trailing\ngamma");
        s.set_comment_start(Some("#")).unwrap();
        assert_eq!(s.get_line(64).unwrap().as_deref(), Some("alpha"));
        assert_eq!(s.get_line(64).unwrap().as_deref(), Some("beta "));
        assert_eq!(s.line_number(), 5);
        assert_eq!(s.get_line(64).unwrap().as_deref(), Some("gamma"));
        assert_eq!(s.get_line(64).unwrap(), None);
    }

    #[test]
    fn test_long_line_is_counted_and_skipped() {
        let long = "x".repeat(100);
        let (_f, mut s) = text_stream(&format!("{}\nshort\n", long));
        assert!(matches!(s.get_line(16), Err(SilkError::LongLine)));
        assert_eq!(s.line_number(), 1);
        assert_eq!(s.get_line(16).unwrap().as_deref(), Some("short"));
        assert_eq!(s.line_number(), 2);
    }

    #[test]
    fn test_comment_start_only_for_text_input() {
        let mut s = Stream::create(IoMode::Write, ContentType::Text);
        assert!(s.set_comment_start(Some("#")).is_err());
        let mut s = Stream::create(IoMode::Read, ContentType::SilkFlow);
        assert!(matches!(
            s.set_comment_start(Some("#")),
            Err(SilkError::UnsupportedContent)
        ));
    }

    #[test]
    fn test_print_to_text_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let mut s = Stream::create(IoMode::Write, ContentType::Text);
        s.bind(&path).unwrap();
        s.open().unwrap();
        s.print(format_args!("{} records\n", 42)).unwrap();
        s.close().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "42 records\n");
    }
}
