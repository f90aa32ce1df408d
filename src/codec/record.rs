//! Message record framing.
//!
//! ```text
//! ┌──────┬────────────────────┬────┬──────────────┬────┐
//! │ hhhh │ JSON RecordHeader  │ \n │ body (Len B) │ \n │
//! └──────┴────────────────────┴────┴──────────────┴────┘
//!   4 hex digits = header length
//! ```
//!
//! The CRC32C checksum covers everything except the final newline.

use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::model::header::RecordHeader;

/// Width of the hex header-length prefix.
pub const HEADER_LEN_DIGITS: usize = 4;

/// Largest header that fits the prefix.
pub const MAX_HEADER_LEN: usize = 0xffff;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Size and checksum of a written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStats {
    /// Bytes written, framing included.
    pub size: u64,
    /// CRC32C over prefix, header, newline and body.
    pub checksum: u32,
}

/// Writer adapter that tracks a running CRC32C and byte count.
struct ChecksumWriter<'a, W: Write + ?Sized> {
    inner: &'a mut W,
    crc: u32,
    written: u64,
}

impl<'a, W: Write + ?Sized> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            crc: 0,
            written: 0,
        }
    }
}

impl<W: Write + ?Sized> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc = crc32c::crc32c_append(self.crc, &buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write one record to `out` (a file at `out_path`), streaming `header.len`
/// body bytes from `body`.
///
/// Failure to read the body yields [`StoreError::Stream`] or
/// [`StoreError::ShortBody`]; failure to write is an I/O error on `out_path`.
pub fn write_record<W: Write + ?Sized>(
    out: &mut W,
    out_path: &Path,
    header: &RecordHeader,
    body: &mut dyn Read,
) -> Result<RecordStats> {
    let head = serde_json::to_vec(header)?;
    if head.len() > MAX_HEADER_LEN {
        return Err(StoreError::HeaderTooLong(head.len()));
    }
    let mut cw = ChecksumWriter::new(out);
    let wr = |e: io::Error| StoreError::io(out_path, e);

    write!(cw, "{:04x}", head.len()).map_err(wr)?;
    cw.write_all(&head).map_err(wr)?;
    cw.write_all(b"\n").map_err(wr)?;

    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut remaining = header.len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match body.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(StoreError::ShortBody {
                    expected: header.len,
                    got: header.len - remaining,
                })
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Stream(e)),
        };
        cw.write_all(&buf[..n]).map_err(wr)?;
        remaining -= n as u64;
    }

    let checksum = cw.crc;
    let size = cw.written + 1;
    out.write_all(b"\n").map_err(wr)?;
    Ok(RecordStats { size, checksum })
}

/// Read the header of the record starting at the reader's position, leaving
/// the reader at the first body byte.
pub fn read_record_header<R: Read + ?Sized>(r: &mut R, path: &Path) -> Result<RecordHeader> {
    let mut prefix = [0u8; HEADER_LEN_DIGITS];
    r.read_exact(&mut prefix).map_err(|e| eof_as_corrupt(path, e))?;
    let len = std::str::from_utf8(&prefix)
        .ok()
        .and_then(|s| usize::from_str_radix(s, 16).ok())
        .ok_or_else(|| StoreError::corrupt(path, "bad record header length"))?;

    let mut head = vec![0u8; len + 1];
    r.read_exact(&mut head).map_err(|e| eof_as_corrupt(path, e))?;
    if head[len] != b'\n' {
        return Err(StoreError::corrupt(path, "record header not newline terminated"));
    }
    serde_json::from_slice(&head[..len])
        .map_err(|e| StoreError::corrupt(path, format!("record header: {e}")))
}

/// Copy exactly `len` bytes of a stored file to `out`.
///
/// A failing `out` is reported as [`StoreError::Stream`], since it is
/// usually a client connection; a failing or short source is an error on
/// `path`.
pub fn copy_stored<R: Read + ?Sized, W: Write + ?Sized>(
    src: &mut R,
    path: &Path,
    out: &mut W,
    len: u64,
) -> Result<()> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match src.read(&mut buf[..want]) {
            Ok(0) => return Err(StoreError::corrupt(path, "record extends past end of file")),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::io(path, e)),
        };
        out.write_all(&buf[..n]).map_err(StoreError::Stream)?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Consume and drop `len` bytes of an incoming stream.
pub fn discard(body: &mut dyn Read, len: u64) -> Result<()> {
    let copied = io::copy(&mut body.take(len), &mut io::sink()).map_err(StoreError::Stream)?;
    if copied < len {
        return Err(StoreError::ShortBody {
            expected: len,
            got: copied,
        });
    }
    Ok(())
}

fn eof_as_corrupt(path: &Path, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::corrupt(path, "truncated record header")
    } else {
        StoreError::io(path, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(body: &[u8]) -> RecordHeader {
        RecordHeader {
            id: "M1".into(),
            from: "U1".into(),
            posted: "2024-01-01T00:00:00Z".into(),
            len: body.len() as u64,
            ..Default::default()
        }
    }

    #[test]
    fn test_record_layout_and_checksum() {
        let body = b"hello there";
        let mut out = Vec::new();
        let stats = write_record(&mut out, Path::new("mem"), &header(body), &mut &body[..]).unwrap();

        assert_eq!(stats.size, out.len() as u64);
        assert_eq!(*out.last().unwrap(), b'\n');
        assert_eq!(stats.checksum, crc32c::crc32c(&out[..out.len() - 1]));

        let head_len = usize::from_str_radix(std::str::from_utf8(&out[..4]).unwrap(), 16).unwrap();
        assert_eq!(out[4 + head_len], b'\n');
        assert_eq!(&out[5 + head_len..out.len() - 1], body);
    }

    #[test]
    fn test_read_header_positions_at_body() {
        let body = b"payload";
        let mut out = Vec::new();
        write_record(&mut out, Path::new("mem"), &header(body), &mut &body[..]).unwrap();

        let mut cur = Cursor::new(out);
        let head = read_record_header(&mut cur, Path::new("mem")).unwrap();
        assert_eq!(head, header(body));
        let mut rest = vec![0u8; body.len()];
        cur.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, body);
    }

    #[test]
    fn test_short_body_reported() {
        let mut head = header(b"12345");
        head.len = 10;
        let err = write_record(&mut Vec::<u8>::new(), Path::new("mem"), &head, &mut &b"12345"[..]).unwrap_err();
        assert!(matches!(err, StoreError::ShortBody { expected: 10, got: 5 }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let mut cur = Cursor::new(b"00ff{\"Id\"".to_vec());
        let err = read_record_header(&mut cur, Path::new("t")).unwrap_err();
        assert!(matches!(err, StoreError::CorruptThread { .. }));
    }

    #[test]
    fn test_discard_consumes_exactly() {
        let mut src: &[u8] = b"abcdef";
        discard(&mut src, 4).unwrap();
        assert_eq!(src, b"ef");
        assert!(discard(&mut src, 4).is_err());
    }
}
