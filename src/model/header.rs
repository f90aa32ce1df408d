//! Message headers: what arrives from the network and what is stored per record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attachment::{self, AttachmentMeta};
use super::cc::CcEntry;
use super::ids::LocalId;
use crate::error::Result;

/// Thread-level sub-header carried by every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubHeader {
    /// Thread the message belongs to; empty for the first message of a thread.
    pub thread_id: String,
    pub subject: String,
    /// Sender's display alias.
    pub alias: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attach: Vec<AttachmentMeta>,
    /// Recipients, sent with the first message of a thread (and kept on
    /// new-thread drafts until they are sent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<CcEntry>>,
}

/// Header of a message delivered by the network layer.
///
/// `data_len` counts the body plus all attachments that follow it on the
/// stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MessageHeader {
    pub id: String,
    pub from: String,
    pub posted: String,
    pub data_len: u64,
    pub sub_head: SubHeader,
}

impl MessageHeader {
    /// Body length once attachments are subtracted.
    pub fn body_len(&self) -> Result<u64> {
        let declared = attachment::checked_total(&self.sub_head.attach, self.data_len)?;
        Ok(self.data_len - declared)
    }

    /// Thread this message files into: its sub-header thread, or itself.
    pub fn thread_id(&self) -> &str {
        if self.sub_head.thread_id.is_empty() {
            &self.id
        } else {
            &self.sub_head.thread_id
        }
    }
}

/// JSON header at the front of every stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RecordHeader {
    pub id: String,
    pub from: String,
    pub posted: String,
    /// Body length in bytes.
    pub len: u64,
    pub sub_head: SubHeader,
}

/// `From` of a draft record.
pub const DRAFT_FROM: &str = "self";

/// `Posted` of a draft record.
pub const DRAFT_POSTED: &str = "draft";

/// A draft save request from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftUpdate {
    pub id: LocalId,
    pub subject: String,
    pub data: String,
    /// Recipients; only used when the draft starts a new thread.
    pub cc: Vec<CcEntry>,
    pub attach: Vec<AttachmentMeta>,
    /// Form-fill values keyed by form attachment.
    pub form_fill: BTreeMap<String, String>,
}

impl DraftUpdate {
    pub fn new(id: LocalId, subject: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id,
            subject: subject.into(),
            data: data.into(),
            cc: Vec::new(),
            attach: Vec::new(),
            form_fill: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_body_len_subtracts_attachments() {
        let mut head = MessageHeader {
            id: "M1".into(),
            data_len: 100,
            ..Default::default()
        };
        head.sub_head.attach.push(AttachmentMeta {
            name: "a".into(),
            size: 40,
            ff_key: None,
        });
        assert_eq!(head.body_len().unwrap(), 60);
        head.sub_head.attach[0].size = 101;
        assert!(matches!(
            head.body_len(),
            Err(StoreError::AttachmentOverflow {
                declared: 101,
                total: 100
            })
        ));
    }

    #[test]
    fn test_body_len_rejects_wrapping_sizes() {
        let mut head = MessageHeader {
            id: "M1".into(),
            data_len: 10,
            ..Default::default()
        };
        for name in ["a", "b"] {
            head.sub_head.attach.push(AttachmentMeta {
                name: name.into(),
                size: u64::MAX / 2 + 1,
                ff_key: None,
            });
        }
        assert!(matches!(
            head.body_len(),
            Err(StoreError::AttachmentOverflow { total: 10, .. })
        ));
    }

    #[test]
    fn test_thread_id_defaults_to_message_id() {
        let mut head = MessageHeader {
            id: "M1".into(),
            ..Default::default()
        };
        assert_eq!(head.thread_id(), "M1");
        head.sub_head.thread_id = "T9".into();
        assert_eq!(head.thread_id(), "T9");
    }

    #[test]
    fn test_header_json_shape() {
        let json = r#"{"Id":"M2","From":"U1","Posted":"2024-01-02T00:00:00Z","DataLen":5,
                       "SubHead":{"ThreadId":"M1","Subject":"re: hi"}}"#;
        let head: MessageHeader = serde_json::from_str(json).unwrap();
        assert_eq!(head.sub_head.thread_id, "M1");
        assert_eq!(head.data_len, 5);
        assert!(head.sub_head.cc.is_none());
    }
}
