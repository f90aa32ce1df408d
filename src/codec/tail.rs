//! Index and CC blocks at the end of a thread file.
//!
//! ```text
//! ┌──────────────┬────────────┬─────────┬──────────────────┬───────────────┐
//! │ records ...  │ Index JSON │ CC JSON │ IndexLen (8 hex) │ CcLen (8 hex) │
//! └──────────────┴────────────┴─────────┴──────────────────┴───────────────┘
//!                ^ pos: where the next record (or patch) starts
//! ```

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::model::cc::CcEntry;
use crate::model::entry::{IndexEntry, Location};

/// Length of the fixed trailer.
pub const TRAILER_LEN: u64 = 16;

/// Decoded tail of a thread file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadTail {
    /// Offset of the index block, which equals the end of the record section.
    pub pos: u64,
    pub index: Vec<IndexEntry>,
    pub cc: Vec<CcEntry>,
}

impl ThreadTail {
    /// Entry with the given id.
    pub fn find(&self, id: &str) -> Option<&IndexEntry> {
        self.index.iter().find(|e| e.id == id)
    }

    /// Check that inline entries are contiguous, ascending by id, and end at `pos`.
    pub fn check_layout(&self) -> std::result::Result<(), String> {
        let mut expect = 0;
        let mut last: Option<&str> = None;
        for e in &self.index {
            let Location::Inline { offset, size } = e.location else {
                continue;
            };
            if offset != expect {
                return Err(format!("entry {} at {offset}, expected {expect}", e.id));
            }
            if last.is_some_and(|prev| prev >= e.id.as_str()) {
                return Err(format!("entry {} out of order", e.id));
            }
            last = Some(e.id.as_str());
            expect = offset + size;
        }
        if expect != self.pos {
            return Err(format!("records end at {expect}, index at {}", self.pos));
        }
        Ok(())
    }
}

/// Read the `(index_len, cc_len)` trailer.
pub fn read_trailer<F: Read + Seek + ?Sized>(f: &mut F, path: &Path) -> Result<(u64, u64)> {
    let file_len = f.seek(SeekFrom::End(0)).map_err(|e| StoreError::io(path, e))?;
    if file_len < TRAILER_LEN {
        return Err(StoreError::corrupt(path, "file shorter than trailer"));
    }
    f.seek(SeekFrom::Start(file_len - TRAILER_LEN))
        .map_err(|e| StoreError::io(path, e))?;
    let mut buf = [0u8; TRAILER_LEN as usize];
    f.read_exact(&mut buf).map_err(|e| StoreError::io(path, e))?;

    let parse = |digits: &[u8]| {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or_else(|| StoreError::corrupt(path, "bad trailer digits"))
    };
    let index_len = parse(&buf[..8])?;
    let cc_len = parse(&buf[8..])?;
    if index_len + cc_len > file_len - TRAILER_LEN {
        return Err(StoreError::corrupt(path, "trailer lengths exceed file size"));
    }
    Ok((index_len, cc_len))
}

/// Offset of the index block.
pub fn index_position<F: Read + Seek + ?Sized>(f: &mut F, path: &Path) -> Result<u64> {
    let (index_len, cc_len) = read_trailer(f, path)?;
    let end = f.seek(SeekFrom::End(0)).map_err(|e| StoreError::io(path, e))?;
    Ok(end - TRAILER_LEN - index_len - cc_len)
}

/// Decode index and CC blocks. Leaves the file positioned at `pos`.
pub fn read_tail<F: Read + Seek + ?Sized>(f: &mut F, path: &Path) -> Result<ThreadTail> {
    let (index_len, cc_len) = read_trailer(f, path)?;
    let end = f.seek(SeekFrom::End(0)).map_err(|e| StoreError::io(path, e))?;
    let pos = end - TRAILER_LEN - index_len - cc_len;

    f.seek(SeekFrom::Start(pos)).map_err(|e| StoreError::io(path, e))?;
    let mut buf = vec![0u8; (index_len + cc_len) as usize];
    f.read_exact(&mut buf).map_err(|e| StoreError::io(path, e))?;
    let (index_bytes, cc_bytes) = buf.split_at(index_len as usize);

    let index = serde_json::from_slice(index_bytes)
        .map_err(|e| StoreError::corrupt(path, format!("index block: {e}")))?;
    let cc = serde_json::from_slice(cc_bytes)
        .map_err(|e| StoreError::corrupt(path, format!("cc block: {e}")))?;

    f.seek(SeekFrom::Start(pos)).map_err(|e| StoreError::io(path, e))?;
    Ok(ThreadTail { pos, index, cc })
}

/// Decode only the CC block.
pub fn read_cc<F: Read + Seek + ?Sized>(f: &mut F, path: &Path) -> Result<Vec<CcEntry>> {
    let (_, cc_len) = read_trailer(f, path)?;
    f.seek(SeekFrom::End(-((TRAILER_LEN + cc_len) as i64)))
        .map_err(|e| StoreError::io(path, e))?;
    let mut buf = vec![0u8; cc_len as usize];
    f.read_exact(&mut buf).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&buf).map_err(|e| StoreError::corrupt(path, format!("cc block: {e}")))
}

/// Write index block, CC block and trailer. Returns the bytes written.
pub fn write_tail<W: Write + ?Sized>(
    out: &mut W,
    path: &Path,
    index: &[IndexEntry],
    cc: &[CcEntry],
) -> Result<u64> {
    let index_json = serde_json::to_vec(index)?;
    let cc_json = serde_json::to_vec(cc)?;
    let trailer = format!("{:08x}{:08x}", index_json.len(), cc_json.len());

    let wr = |e: std::io::Error| StoreError::io(path, e);
    out.write_all(&index_json).map_err(wr)?;
    out.write_all(&cc_json).map_err(wr)?;
    out.write_all(trailer.as_bytes()).map_err(wr)?;
    Ok((index_json.len() + cc_json.len() + trailer.len()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::SeenState;
    use std::io::Cursor;

    fn inline(id: &str, offset: u64, size: u64) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            location: Location::Inline { offset, size },
            from: "U1".into(),
            alias: String::new(),
            date: "2024-01-01T00:00:00Z".into(),
            subject: "s".into(),
            checksum: 7,
            seen: SeenState::Unset,
        }
    }

    #[test]
    fn test_tail_after_records() {
        let mut file = b"RECORDBYTES".to_vec();
        let index = vec![inline("A", 0, 11)];
        let cc = vec![CcEntry {
            who: "ann".into(),
            who_uid: "U-ann".into(),
            ..Default::default()
        }];
        write_tail(&mut file, Path::new("mem"), &index, &cc).unwrap();

        let mut cur = Cursor::new(file);
        let tail = read_tail(&mut cur, Path::new("mem")).unwrap();
        assert_eq!(tail.pos, 11);
        assert_eq!(tail.index, index);
        assert_eq!(tail.cc, cc);
        assert_eq!(cur.position(), 11);
        tail.check_layout().unwrap();

        assert_eq!(read_cc(&mut cur, Path::new("mem")).unwrap(), cc);
        assert_eq!(index_position(&mut cur, Path::new("mem")).unwrap(), 11);
    }

    #[test]
    fn test_empty_tail_is_valid() {
        let mut file = Vec::new();
        let n = write_tail(&mut file, Path::new("mem"), &[], &[]).unwrap();
        assert_eq!(n, file.len() as u64);
        assert_eq!(&file[..4], b"[][]");
        let tail = read_tail(&mut Cursor::new(file), Path::new("mem")).unwrap();
        assert_eq!(tail.pos, 0);
        assert!(tail.index.is_empty());
    }

    #[test]
    fn test_short_file_is_corrupt() {
        let err = read_tail(&mut Cursor::new(b"0000".to_vec()), Path::new("t")).unwrap_err();
        assert!(matches!(err, StoreError::CorruptThread { .. }));
    }

    #[test]
    fn test_oversized_lengths_are_corrupt() {
        let err = read_tail(&mut Cursor::new(b"0000ffff00000002".to_vec()), Path::new("t")).unwrap_err();
        assert!(matches!(err, StoreError::CorruptThread { .. }));
    }

    #[test]
    fn test_check_layout_detects_gap() {
        let tail = ThreadTail {
            pos: 30,
            index: vec![inline("A", 0, 10), inline("B", 12, 18)],
            cc: vec![],
        };
        assert!(tail.check_layout().is_err());
    }
}
