//! Seam to the subsystems the thread store drives but does not own:
//! address book, attachment storage and the send queue.
//!
//! Calls made while applying a transaction (`resolve_*`, `store_*`,
//! `update_draft_attachments`) run again if recovery re-applies it, so
//! implementations must tolerate repeats.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::codec::record::discard;
use crate::error::Result;
use crate::model::attachment::checked_total;
use crate::model::cc::CcEntry;
use crate::model::header::{MessageHeader, SubHeader};
use crate::model::ids::LocalId;
use crate::txn::pending::PendingName;

/// Collaborators invoked by thread operations. Every method has a default
/// that keeps the store self-contained.
pub trait Collaborators: Send + Sync {
    /// Record the CC list of a thread this account started.
    fn resolve_sent_address_book(&self, _posted: &str, _cc: &[CcEntry], _thread_id: &str) -> Result<()> {
        Ok(())
    }

    /// Record the CC list of a thread that arrived or was sent.
    fn resolve_received_address_book(
        &self,
        _posted: &str,
        _cc: &[CcEntry],
        _thread_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Take the attachment bytes following a received body off the stream.
    ///
    /// Must consume exactly the declared attachment sizes.
    fn stage_received_attachments(&self, header: &MessageHeader, body: &mut dyn Read) -> Result<()> {
        discard(body, header.data_len - header.body_len()?)
    }

    /// Promote staged attachments of a received message.
    fn store_received_attachments(&self, _sub_head: &SubHeader, _txn: &PendingName) -> Result<()> {
        Ok(())
    }

    /// Stage the attachments of a draft being sent. `draft` is positioned
    /// after the draft body.
    fn stage_sent_attachments(&self, _sub_head: &SubHeader, _draft: &mut dyn Read) -> Result<()> {
        Ok(())
    }

    /// Promote staged attachments of a sent message.
    fn store_sent_attachments(&self, _sub_head: &SubHeader, _txn: &PendingName) -> Result<()> {
        Ok(())
    }

    /// Settle attachment sizes of a draft about to be sent, revising
    /// `sub_head.attach`. Returns the attachment byte total.
    fn size_draft_attachments(&self, sub_head: &mut SubHeader, _draft: &LocalId) -> Result<u64> {
        checked_total(&sub_head.attach, u64::MAX)
    }

    /// Append form-fill attachment data after a draft record. Returns the
    /// bytes written.
    fn write_form_fill_attachments(
        &self,
        _out: &mut dyn Write,
        _sub_head: &SubHeader,
        _form_fill: &BTreeMap<String, String>,
    ) -> Result<u64> {
        Ok(0)
    }

    /// Reconcile attachment files after a draft was rewritten or deleted.
    fn update_draft_attachments(
        &self,
        _old: Option<&SubHeader>,
        _new: Option<&SubHeader>,
        _txn: &PendingName,
    ) -> Result<()> {
        Ok(())
    }

    /// Check a draft's attachments before it is sent. `draft` is positioned
    /// after the draft body.
    fn validate_draft_attachments(
        &self,
        _sub_head: &SubHeader,
        _draft: &LocalId,
        _rest: &mut dyn Read,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether a draft is waiting in the send queue.
    fn is_draft_queued(&self, _draft_id: &str) -> bool {
        false
    }

    /// Whether a forward batch is waiting in the send queue.
    fn is_forward_queued(&self, _batch_id: &str) -> bool {
        false
    }
}

/// Collaborators with every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollaborators;

impl Collaborators for NoopCollaborators {}
