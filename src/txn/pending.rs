//! Names of pending transaction files.
//!
//! ```text
//! <ThreadId>_<MsgId>_<op>_<millis>_<offset>        staged
//! <ThreadId>_<MsgId>_<op>_<millis>_.tmp            building
//! ```
//!
//! Every field except the offset may be empty. Thread and message ids cannot
//! contain `_`, and the millis field is digits only, so the name splits
//! unambiguously into five fields. A staged name carries everything recovery
//! needs to finish applying it.

use std::fmt;
use std::str::FromStr;

use crate::durable::TMP_SUFFIX;
use crate::model::ids::{is_valid_id, MAX_LOCAL_MS_LEN};

/// Transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Store a received message.
    StoreReceived,
    /// Mark a received message seen.
    SeenReceived,
    /// Store a sent message, promoting its draft.
    StoreSent,
    /// Write a draft.
    WriteDraft,
    /// Delete a draft.
    DeleteDraft,
}

impl Op {
    pub fn code(self) -> &'static str {
        match self {
            Self::StoreReceived => "sr",
            Self::SeenReceived => "nr",
            Self::StoreSent => "ss",
            Self::WriteDraft => "ws",
            Self::DeleteDraft => "ds",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "sr" => Self::StoreReceived,
            "nr" => Self::SeenReceived,
            "ss" => Self::StoreSent,
            "ws" => Self::WriteDraft,
            "ds" => Self::DeleteDraft,
            _ => return None,
        })
    }

    /// Whether the transaction replaces a draft file.
    pub fn is_draft(self) -> bool {
        matches!(self, Self::WriteDraft | Self::DeleteDraft)
    }
}

/// Why a file name is not a pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadPendingName(pub String);

impl fmt::Display for BadPendingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a pending transaction name: {}", self.0)
    }
}

impl std::error::Error for BadPendingName {}

/// Parameters of one transaction, as encoded in its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingName {
    pub thread_id: String,
    pub msg_id: String,
    pub op: Op,
    /// Millis part of the draft's local id, empty when there is no draft.
    pub local_ms: String,
    /// Offset in the thread file where the staged bytes land.
    pub offset: u64,
}

impl PendingName {
    pub fn new(thread_id: &str, msg_id: &str, op: Op, local_ms: &str) -> Self {
        Self {
            thread_id: thread_id.to_owned(),
            msg_id: msg_id.to_owned(),
            op,
            local_ms: local_ms.to_owned(),
            offset: 0,
        }
    }

    /// Name of the file while it is being built.
    pub fn building_file_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{TMP_SUFFIX}",
            self.thread_id,
            self.msg_id,
            self.op.code(),
            self.local_ms
        )
    }

    /// Whether applying this transaction creates the thread file.
    ///
    /// Only the first record of a thread does; its message id is the thread
    /// id. Marking that record seen later reuses the same pair of ids but
    /// patches an existing file.
    pub fn creates_thread(&self) -> bool {
        matches!(self.op, Op::StoreReceived | Op::StoreSent)
            && !self.thread_id.is_empty()
            && self.thread_id == self.msg_id
    }

    /// File name of the draft this transaction replaces or retires.
    pub fn draft_file_name(&self) -> String {
        if self.creates_thread() || self.thread_id.is_empty() {
            format!("_{}", self.local_ms)
        } else {
            format!("{}_{}", self.thread_id, self.local_ms)
        }
    }
}

impl fmt::Display for PendingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.thread_id,
            self.msg_id,
            self.op.code(),
            self.local_ms,
            self.offset
        )
    }
}

impl FromStr for PendingName {
    type Err = BadPendingName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || BadPendingName(s.to_owned());
        let fields: Vec<&str> = s.splitn(5, '_').collect();
        let [thread_id, msg_id, op, local_ms, offset] = fields[..] else {
            return Err(bad());
        };
        let id_ok = |id: &str| id.is_empty() || is_valid_id(id);
        if !id_ok(thread_id) || !id_ok(msg_id) {
            return Err(bad());
        }
        let op = Op::from_code(op).ok_or_else(bad)?;
        if local_ms.len() > MAX_LOCAL_MS_LEN || !local_ms.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        if offset.is_empty() || !offset.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let offset = offset.parse().map_err(|_| bad())?;
        Ok(Self {
            thread_id: thread_id.to_owned(),
            msg_id: msg_id.to_owned(),
            op,
            local_ms: local_ms.to_owned(),
            offset,
        })
    }
}
