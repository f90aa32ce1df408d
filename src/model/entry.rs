//! Index entries: one per stored message or draft in progress.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::header::RecordHeader;

/// Where a message's record bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Inside the thread file at `[offset, offset + size)`.
    Inline { offset: u64, size: u64 },
    /// In a per-draft file named after the entry id, `[0, size)`.
    Detached { size: u64 },
}

impl Location {
    /// Byte length of the record (including framing).
    pub fn size(&self) -> u64 {
        match *self {
            Self::Inline { size, .. } | Self::Detached { size } => size,
        }
    }

    /// Offset within the thread file, for inline records.
    pub fn offset(&self) -> Option<u64> {
        match *self {
            Self::Inline { offset, .. } => Some(offset),
            Self::Detached { .. } => None,
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline { .. })
    }
}

/// Read state of a message.
///
/// On disk: `""` unset, `"!"` cleared, `"."` seen locally (sent or drafted
/// here), otherwise the RFC 3339 time it was first seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenState {
    Unset,
    Cleared,
    Local,
    At(DateTime<Utc>),
}

impl SeenState {
    /// Whether the message has been seen in any way.
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// Seen right now.
    pub fn now() -> Self {
        // Whole seconds so the value round-trips through the index exactly.
        Self::At(Utc::now().trunc_subsecs(0))
    }

    fn as_disk(&self) -> String {
        match self {
            Self::Unset => String::new(),
            Self::Cleared => "!".to_string(),
            Self::Local => ".".to_string(),
            Self::At(t) => t.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    fn from_disk(s: &str) -> Result<Self, chrono::ParseError> {
        Ok(match s {
            "" => Self::Unset,
            "!" => Self::Cleared,
            "." => Self::Local,
            _ => Self::At(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)),
        })
    }
}

impl Serialize for SeenState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_disk())
    }
}

impl<'de> Deserialize<'de> for SeenState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_disk(&s).map_err(serde::de::Error::custom)
    }
}

/// One message (or draft) in a thread's index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DiskEntry", into = "DiskEntry")]
pub struct IndexEntry {
    pub id: String,
    pub location: Location,
    pub from: String,
    pub alias: String,
    pub date: String,
    pub subject: String,
    /// CRC32C of the record bytes, excluding the trailing newline.
    pub checksum: u32,
    pub seen: SeenState,
}

impl IndexEntry {
    /// Entry describing a freshly written record.
    pub fn for_record(header: &RecordHeader, location: Location, checksum: u32, seen: SeenState) -> Self {
        Self {
            id: header.id.clone(),
            location,
            from: header.from.clone(),
            alias: header.sub_head.alias.clone(),
            date: header.posted.clone(),
            subject: header.sub_head.subject.clone(),
            checksum,
            seen,
        }
    }

    /// Path of the per-draft file holding a detached record.
    pub fn detached_path(&self, thread_dir: &Path) -> Option<PathBuf> {
        match self.location {
            Location::Detached { .. } => Some(thread_dir.join(&self.id)),
            Location::Inline { .. } => None,
        }
    }
}

/// On-disk shape of [`IndexEntry`]: a negative `Offset` marks a detached record.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskEntry {
    id: String,
    offset: i64,
    size: i64,
    #[serde(default)]
    from: String,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    checksum: u32,
    #[serde(default = "unset")]
    seen: SeenState,
}

fn unset() -> SeenState {
    SeenState::Unset
}

impl TryFrom<DiskEntry> for IndexEntry {
    type Error = String;

    fn try_from(d: DiskEntry) -> Result<Self, Self::Error> {
        let size = u64::try_from(d.size).map_err(|_| format!("negative size for {}", d.id))?;
        let location = match u64::try_from(d.offset) {
            Ok(offset) => Location::Inline { offset, size },
            Err(_) => Location::Detached { size },
        };
        Ok(Self {
            id: d.id,
            location,
            from: d.from,
            alias: d.alias,
            date: d.date,
            subject: d.subject,
            checksum: d.checksum,
            seen: d.seen,
        })
    }
}

impl From<IndexEntry> for DiskEntry {
    fn from(e: IndexEntry) -> Self {
        let (offset, size) = match e.location {
            Location::Inline { offset, size } => (offset as i64, size as i64),
            Location::Detached { size } => (-1, size as i64),
        };
        Self {
            id: e.id,
            offset,
            size,
            from: e.from,
            alias: e.alias,
            date: e.date,
            subject: e.subject,
            checksum: e.checksum,
            seen: e.seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(location: Location, seen: SeenState) -> IndexEntry {
        IndexEntry {
            id: "M1".into(),
            location,
            from: "uid1".into(),
            alias: "ann".into(),
            date: "2024-01-01T00:00:00Z".into(),
            subject: "hi".into(),
            checksum: 42,
            seen,
        }
    }

    #[test]
    fn test_detached_uses_negative_offset() {
        let e = entry(Location::Detached { size: 90 }, SeenState::Local);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["Offset"], -1);
        assert_eq!(json["Size"], 90);
        assert_eq!(json["Seen"], ".");
        let back: IndexEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_seen_timestamp_survives_disk() {
        let e = entry(Location::Inline { offset: 0, size: 10 }, SeenState::now());
        let text = serde_json::to_string(&e).unwrap();
        let back: IndexEntry = serde_json::from_str(&text).unwrap();
        assert_eq!(back.seen, e.seen);
        assert!(back.seen.is_set());
    }

    #[test]
    fn test_seen_markers() {
        for (disk, state) in [("", SeenState::Unset), ("!", SeenState::Cleared), (".", SeenState::Local)] {
            let parsed: SeenState = serde_json::from_value(serde_json::json!(disk)).unwrap();
            assert_eq!(parsed, state);
        }
        assert!(serde_json::from_value::<SeenState>(serde_json::json!("yesterday")).is_err());
    }

    #[test]
    fn test_negative_size_rejected() {
        let json = serde_json::json!({"Id": "M1", "Offset": 0, "Size": -5});
        assert!(serde_json::from_value::<IndexEntry>(json).is_err());
    }

    #[test]
    fn test_detached_path() {
        let e = entry(Location::Detached { size: 1 }, SeenState::Local);
        assert_eq!(
            e.detached_path(Path::new("/svc/thread")),
            Some(PathBuf::from("/svc/thread/M1"))
        );
    }
}
