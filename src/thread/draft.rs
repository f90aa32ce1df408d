//! Save, delete and validate drafts.
//!
//! A draft's record lives in its own file next to the thread file, and the
//! thread index carries a detached entry for it. A draft that starts a new
//! thread has no thread file yet: its draft file holds the record followed
//! by a one-entry index and the CC list the thread will start with.

use std::io::{Seek, SeekFrom};

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};

use super::{open_existing, open_read, ThreadStore};
use crate::codec::record::{read_record_header, write_record};
use crate::codec::tail::{read_tail, write_tail};
use crate::error::{Result, StoreError};
use crate::model::cc::{update_cc, CcEntry};
use crate::model::entry::{IndexEntry, Location, SeenState};
use crate::model::header::{DraftUpdate, RecordHeader, SubHeader, DRAFT_FROM, DRAFT_POSTED};
use crate::model::ids::LocalId;
use crate::txn::{apply, Building, Op, PendingName};

impl ThreadStore {
    /// Create or replace the draft `update.id`.
    pub fn store_draft(&self, update: DraftUpdate) -> Result<()> {
        let id = &update.id;
        let door = self.door(&id.door_key());
        let state = door.write();
        if state.renamed {
            return Err(StoreError::ThreadRenamed(id.door_key()));
        }

        let (pos, mut index, cc) = if id.is_new_thread() {
            (0, Vec::new(), update_cc(update.cc.clone(), &self.identity, false))
        } else {
            let thread_path = self.layout.thread_path(id.thread_id());
            let Some(mut thread) = open_existing(&thread_path)? else {
                warn!(draft = %id, "Thread not found for draft");
                return Ok(());
            };
            let tail = read_tail(&mut thread, &thread_path)?;
            (tail.pos, tail.index, tail.cc)
        };

        let record = RecordHeader {
            id: id.to_string(),
            from: DRAFT_FROM.to_string(),
            posted: DRAFT_POSTED.to_string(),
            len: update.data.len() as u64,
            sub_head: SubHeader {
                thread_id: id.thread_id().to_owned(),
                subject: update.subject.clone(),
                alias: self.identity.alias.clone(),
                attach: update.attach.clone(),
                cc: id.is_new_thread().then(|| cc.clone()),
            },
        };

        let name = PendingName::new(id.thread_id(), "", Op::WriteDraft, id.millis());
        let mut txn = Building::create(&self.layout, name)?;
        let path = txn.path().to_owned();
        let written = write_record(txn.file(), &path, &record, &mut update.data.as_bytes())
            .and_then(|stats| {
                let form_fill = self.hooks().write_form_fill_attachments(
                    txn.file(),
                    &record.sub_head,
                    &update.form_fill,
                )?;
                Ok((stats, form_fill))
            });
        let (stats, form_fill) = match written {
            Ok(written) => written,
            Err(e) => {
                txn.discard()?;
                return Err(e);
            }
        };

        let entry = IndexEntry {
            id: record.id.clone(),
            location: Location::Detached {
                size: stats.size + form_fill,
            },
            from: String::new(),
            alias: String::new(),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            subject: update.subject,
            checksum: stats.checksum,
            seen: SeenState::Local,
        };
        match index.iter_mut().find(|e| e.id == entry.id) {
            Some(slot) => *slot = entry,
            None => index.push(entry),
        }
        write_tail(txn.file(), &path, &index, &cc)?;

        let staged = txn.stage(pos)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(draft = %id, "Stored draft");
        Ok(())
    }

    /// Remove the draft `id`. Deleting the draft of a new thread removes
    /// everything stored for it.
    pub fn delete_draft(&self, id: &LocalId) -> Result<()> {
        let door = self.door(&id.door_key());
        let state = door.write();
        if state.renamed {
            warn!(draft = %id, "Draft already sent");
            return Ok(());
        }

        if id.is_new_thread() {
            return self.drop_draft_entry(id, 0, &[], &[]);
        }
        let thread_path = self.layout.thread_path(id.thread_id());
        let Some(mut thread) = open_existing(&thread_path)? else {
            warn!(draft = %id, "Thread not found for draft");
            return Ok(());
        };
        let mut tail = read_tail(&mut thread, &thread_path)?;
        let key = id.to_string();
        let before = tail.index.len();
        tail.index.retain(|e| e.id != key);
        if tail.index.len() == before {
            warn!(draft = %id, "Draft not found");
            return Ok(());
        }
        drop(thread);
        self.drop_draft_entry(id, tail.pos, &tail.index, &tail.cc)
    }

    /// Remove the draft file of `id` and write the thread tail `index` and
    /// `cc` at `pos`. The caller holds the draft's door.
    pub(super) fn drop_draft_entry(
        &self,
        id: &LocalId,
        pos: u64,
        index: &[IndexEntry],
        cc: &[CcEntry],
    ) -> Result<()> {
        let name = PendingName::new(id.thread_id(), "", Op::DeleteDraft, id.millis());
        let mut txn = Building::create(&self.layout, name)?;
        let path = txn.path().to_owned();
        write_tail(txn.file(), &path, index, cc)?;
        let staged = txn.stage(pos)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(draft = %id, "Deleted draft");
        Ok(())
    }

    /// Check that draft `id` can be sent.
    pub fn validate_draft(&self, id: &LocalId) -> Result<()> {
        let door = self.door(&id.door_key());
        let _guard = door.read();

        let path = self.layout.draft_path(id);
        let Some(mut draft) = open_read(&path)? else {
            warn!(draft = %id, "Draft not found to validate");
            return Ok(());
        };
        let head = read_record_header(&mut draft, &path)?;
        if id.is_new_thread() && head.sub_head.subject.is_empty() {
            return Err(StoreError::SubjectMissing);
        }
        draft
            .seek(SeekFrom::Current(head.len as i64 + 1))
            .map_err(|e| StoreError::io(&path, e))?;
        self.hooks()
            .validate_draft_attachments(&head.sub_head, id, &mut draft)
    }
}
