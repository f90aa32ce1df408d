//! Thread, message and local ids.
//!
//! Ids travel through pending-transaction filenames, where `_` separates
//! fields, so every id is checked against a restricted charset before it
//! touches the disk.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{Result, StoreError};

/// Maximum length of a thread or message id.
pub const MAX_ID_LEN: usize = 128;

/// Maximum length of the millisecond part of a local id.
pub const MAX_LOCAL_MS_LEN: usize = 20;

/// Prefix marking a thread that exists only locally (an unsent draft thread).
pub const LOCAL_THREAD_PREFIX: char = '_';

/// Whether `c` may appear in a thread or message id.
fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '%' | '+' | '=' | '~' | '@')
}

/// Whether `id` is a usable server-assigned thread or message id.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(is_id_char)
        && id != "."
        && id != ".."
}

/// Like [`is_valid_id`] but returns a typed error.
pub fn validate_id(id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_owned()))
    }
}

/// Whether `thread_id` names a local draft thread (`_<millis>`).
pub fn is_local_thread(thread_id: &str) -> bool {
    thread_id.starts_with(LOCAL_THREAD_PREFIX)
}

fn is_valid_local_ms(ms: &str) -> bool {
    !ms.is_empty() && ms.len() <= MAX_LOCAL_MS_LEN && ms.bytes().all(|b| b.is_ascii_digit())
}

/// A client-minted id, `<thread>_<millis>`, used before the server assigns one.
///
/// An empty thread part means the draft starts a new thread; its id then
/// reads `_<millis>` and doubles as the local thread id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalId {
    thread_id: String,
    millis: String,
}

impl LocalId {
    /// Build a local id from parts, validating both.
    pub fn new(thread_id: &str, millis: &str) -> Result<Self> {
        if !thread_id.is_empty() {
            validate_id(thread_id)?;
        }
        if !is_valid_local_ms(millis) {
            return Err(StoreError::InvalidId(format!("{thread_id}_{millis}")));
        }
        Ok(Self {
            thread_id: thread_id.to_owned(),
            millis: millis.to_owned(),
        })
    }

    /// Parse `<thread>_<millis>` or `_<millis>`.
    pub fn parse(s: &str) -> Result<Self> {
        let (thread_id, millis) = s
            .split_once('_')
            .ok_or_else(|| StoreError::InvalidId(s.to_owned()))?;
        Self::new(thread_id, millis)
    }

    /// The owning thread id, empty for a draft that starts a new thread.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// The millisecond timestamp part.
    pub fn millis(&self) -> &str {
        &self.millis
    }

    /// Whether this draft starts a new thread.
    pub fn is_new_thread(&self) -> bool {
        self.thread_id.is_empty()
    }

    /// Key of the thread door guarding this draft: the owning thread, or the
    /// local thread id `_<millis>` for a new thread.
    pub fn door_key(&self) -> String {
        if self.is_new_thread() {
            self.to_string()
        } else {
            self.thread_id.clone()
        }
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.thread_id, self.millis)
    }
}

/// Mints local ids from the wall clock, strictly increasing per store.
#[derive(Debug, Default)]
pub struct LocalIdMinter {
    last: AtomicI64,
}

impl LocalIdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh local id for `thread_id` (empty for a new thread).
    pub fn mint(&self, thread_id: &str) -> Result<LocalId> {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        let millis = now.max(prev + 1);
        LocalId::new(thread_id, &millis.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("LG3KCJGZPVVNDPV6%JRK4H6FC6LS8P37"));
        assert!(is_valid_id("msg-001.a"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a_b"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id(".."));
        assert!(!is_valid_id(&"x".repeat(MAX_ID_LEN + 1)));
    }

    #[test]
    fn test_local_id_roundtrip() {
        let id = LocalId::parse("T1_1700000000123").unwrap();
        assert_eq!(id.thread_id(), "T1");
        assert_eq!(id.millis(), "1700000000123");
        assert!(!id.is_new_thread());
        assert_eq!(id.door_key(), "T1");
        assert_eq!(id.to_string(), "T1_1700000000123");
    }

    #[test]
    fn test_local_id_new_thread() {
        let id = LocalId::parse("_1700000000123").unwrap();
        assert!(id.is_new_thread());
        assert_eq!(id.door_key(), "_1700000000123");
        assert!(is_local_thread(&id.door_key()));
    }

    #[test]
    fn test_local_id_rejects_garbage() {
        assert!(LocalId::parse("T1").is_err());
        assert!(LocalId::parse("T1_").is_err());
        assert!(LocalId::parse("T1_12a").is_err());
        assert!(LocalId::parse("T/1_12").is_err());
    }

    #[test]
    fn test_minter_is_strictly_increasing() {
        let minter = LocalIdMinter::new();
        let mut prev: i64 = 0;
        for _ in 0..100 {
            let id = minter.mint("T1").unwrap();
            let ms: i64 = id.millis().parse().unwrap();
            assert!(ms > prev);
            prev = ms;
        }
    }
}
