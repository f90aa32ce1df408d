//! Attachment metadata carried in a message sub-header.
//!
//! Only names and sizes are stored with the record. The bytes themselves are
//! staged and promoted by the attachment collaborator.

use crate::error::{Result, StoreError};

/// Metadata about one attachment of a message or draft.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttachmentMeta {
    /// Attachment name as chosen by the sender.
    pub name: String,

    /// Declared size in bytes. Counts toward the message `DataLen`.
    pub size: u64,

    /// Form-fill key, when the attachment is a filled-in form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ff_key: Option<String>,
}

/// Sum of the declared sizes, `None` if it does not fit in a `u64`.
pub fn total_size(attach: &[AttachmentMeta]) -> Option<u64> {
    attach.iter().try_fold(0u64, |acc, a| acc.checked_add(a.size))
}

/// Sum of the declared sizes, which must not exceed `limit`.
pub fn checked_total(attach: &[AttachmentMeta], limit: u64) -> Result<u64> {
    match total_size(attach) {
        Some(total) if total <= limit => Ok(total),
        _ => Err(StoreError::AttachmentOverflow {
            declared: attach.iter().fold(0u64, |acc, a| acc.saturating_add(a.size)),
            total: limit,
        }),
    }
}
