//! Store a sent message, retiring its draft.

use std::fs::File;
use std::io::Read;

use tracing::{debug, warn};

use super::{copy_displaced, insert_entry, open_existing, open_read, plan_splice, Splice, ThreadStore};
use crate::codec::record::{read_record_header, write_record, RecordStats};
use crate::codec::tail::{read_tail, write_tail};
use crate::error::{Result, StoreError};
use crate::model::cc::seal_cc;
use crate::model::entry::{IndexEntry, Location, SeenState};
use crate::model::header::RecordHeader;
use crate::model::ids::{validate_id, LocalId};
use crate::txn::{apply, Building, Op, PendingName};

impl ThreadStore {
    /// Record that the draft `draft_id` went out as `msg_id` at `posted`.
    ///
    /// A draft that starts a new thread becomes the thread file
    /// `thread/<msg_id>`, and its local thread id reports renamed from then
    /// on. A reply is spliced into its thread in place of the draft entry.
    pub fn store_sent(&self, draft_id: &LocalId, msg_id: &str, posted: &str) -> Result<()> {
        validate_id(msg_id)?;

        let door = self.door(&draft_id.door_key());
        let mut state = door.write();
        if state.renamed {
            warn!(draft = %draft_id, "Draft thread already sent");
            return Ok(());
        }

        let draft_path = self.layout.draft_path(draft_id);
        let Some(mut draft) = open_read(&draft_path)? else {
            warn!(draft = %draft_id, "Draft file was cleared");
            return Ok(());
        };
        let draft_head = read_record_header(&mut draft, &draft_path)?;

        if draft_id.is_new_thread() {
            // Readers of the new id wait until the thread file is in place.
            let thread_door = self.door(msg_id);
            let _thread_guard = thread_door.write();
            if self.layout.thread_path(msg_id).exists() {
                warn!(draft = %draft_id, msg = %msg_id, "Thread already stored");
                return Ok(());
            }
            self.send_first(draft_id, msg_id, posted, draft_head, &mut draft, || {
                state.renamed = true;
            })
        } else {
            self.send_reply(draft_id, msg_id, posted, draft_head, &mut draft)
        }
    }

    fn send_first(
        &self,
        draft_id: &LocalId,
        msg_id: &str,
        posted: &str,
        draft_head: RecordHeader,
        draft: &mut File,
        retire_draft_id: impl FnOnce(),
    ) -> Result<()> {
        let mut cc = draft_head.sub_head.cc.clone().unwrap_or_default();
        let record = self.sent_record(draft_id, msg_id, posted, draft_head, "")?;

        let name = PendingName::new(msg_id, msg_id, Op::StoreSent, draft_id.millis());
        let mut txn = Building::create(&self.layout, name)?;
        let path = txn.path().to_owned();
        let stats = match self.write_sent(&mut txn, &record, draft) {
            Ok(stats) => stats,
            Err(e) => {
                txn.discard()?;
                return Err(e);
            }
        };

        seal_cc(&mut cc, posted, self.note_max_len)?;
        let entry = IndexEntry::for_record(
            &record,
            Location::Inline {
                offset: 0,
                size: stats.size,
            },
            stats.checksum,
            SeenState::Local,
        );
        write_tail(txn.file(), &path, &[entry], &cc)?;

        let staged = txn.stage(0)?;
        retire_draft_id();
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(draft = %draft_id, thread = %msg_id, "Promoted draft to new thread");
        Ok(())
    }

    fn send_reply(
        &self,
        draft_id: &LocalId,
        msg_id: &str,
        posted: &str,
        draft_head: RecordHeader,
        draft: &mut File,
    ) -> Result<()> {
        let thread_id = draft_id.thread_id();
        let thread_path = self.layout.thread_path(thread_id);
        let Some(mut thread) = open_existing(&thread_path)? else {
            warn!(draft = %draft_id, "Thread of sent draft not found");
            return Ok(());
        };
        let mut tail = read_tail(&mut thread, &thread_path)?;
        let draft_key = draft_id.to_string();
        tail.index.retain(|e| e.id != draft_key);
        let Some(splice) = plan_splice(&tail, msg_id) else {
            warn!(thread = %thread_id, msg = %msg_id, "Sent message already stored, dropping draft");
            drop(thread);
            return self.drop_draft_entry(draft_id, tail.pos, &tail.index, &tail.cc);
        };

        let record = self.sent_record(draft_id, msg_id, posted, draft_head, thread_id)?;

        let name = PendingName::new(thread_id, msg_id, Op::StoreSent, draft_id.millis());
        let mut txn = Building::create(&self.layout, name)?;
        let path = txn.path().to_owned();
        let stats = match self.write_sent(&mut txn, &record, draft) {
            Ok(stats) => stats,
            Err(e) => {
                txn.discard()?;
                return Err(e);
            }
        };
        copy_displaced(&mut thread, &thread_path, splice, txn.file(), &path)?;

        let entry = IndexEntry::for_record(
            &record,
            Location::Inline {
                offset: splice.offset,
                size: stats.size,
            },
            stats.checksum,
            SeenState::Local,
        );
        let index = insert_entry(tail.index, entry, splice);
        write_tail(txn.file(), &path, &index, &tail.cc)?;
        drop(thread);

        let Splice { offset, .. } = splice;
        let staged = txn.stage(offset)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(draft = %draft_id, thread = %thread_id, msg = %msg_id, offset, "Stored sent message");
        Ok(())
    }

    /// Record header of the message made from a draft.
    fn sent_record(
        &self,
        draft_id: &LocalId,
        msg_id: &str,
        posted: &str,
        draft_head: RecordHeader,
        thread_id: &str,
    ) -> Result<RecordHeader> {
        let mut sub_head = draft_head.sub_head;
        sub_head.thread_id = thread_id.to_owned();
        sub_head.cc = None;
        self.hooks().size_draft_attachments(&mut sub_head, draft_id)?;
        Ok(RecordHeader {
            id: msg_id.to_owned(),
            from: self.identity.uid.clone(),
            posted: posted.to_owned(),
            len: draft_head.len,
            sub_head,
        })
    }

    /// Copy the draft body into the transaction and stage its attachments.
    fn write_sent(
        &self,
        txn: &mut Building,
        record: &RecordHeader,
        draft: &mut File,
    ) -> Result<RecordStats> {
        let path = txn.path().to_owned();
        let stats = write_record(txn.file(), &path, record, draft).map_err(|e| match e {
            StoreError::Stream(source) => StoreError::io(&path, source),
            StoreError::ShortBody { .. } => StoreError::corrupt(&path, "draft body truncated"),
            other => other,
        })?;
        let mut newline = [0u8; 1];
        draft
            .read_exact(&mut newline)
            .map_err(|e| StoreError::io(&path, e))?;
        self.hooks().stage_sent_attachments(&record.sub_head, draft)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Collaborators;
    use crate::model::cc::{CcEntry, Identity};
    use crate::model::header::{DraftUpdate, MessageHeader, SubHeader};
    use crate::thread::StoreOptions;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Attachment collaborator that rejects the first sizing or staging call.
    #[derive(Default)]
    struct FailOnce {
        sizing: AtomicBool,
        staging: AtomicBool,
    }

    impl Collaborators for FailOnce {
        fn size_draft_attachments(&self, _sub_head: &mut SubHeader, _draft: &LocalId) -> Result<u64> {
            if self.sizing.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Attachment("upload pending".into()));
            }
            Ok(0)
        }

        fn stage_sent_attachments(&self, _sub_head: &SubHeader, _draft: &mut dyn Read) -> Result<()> {
            if self.staging.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Attachment("staging failed".into()));
            }
            Ok(())
        }
    }

    fn store_with(hooks: Arc<FailOnce>) -> (tempfile::TempDir, ThreadStore) {
        let dir = tempfile::tempdir().unwrap();
        let me = Identity {
            uid: "U-me".into(),
            alias: "me".into(),
        };
        let opts = StoreOptions::new(dir.path(), me).with_collaborators(hooks);
        let store = ThreadStore::open(opts).unwrap();
        (dir, store)
    }

    fn seed(store: &ThreadStore, id: &str, thread: &str) {
        let head = MessageHeader {
            id: id.into(),
            from: "U-ann".into(),
            posted: "2024-05-01T12:00:00Z".into(),
            data_len: 2,
            sub_head: SubHeader {
                thread_id: thread.into(),
                ..Default::default()
            },
        };
        store.store_received(&head, &mut "hi".as_bytes()).unwrap();
    }

    fn temp_names(store: &ThreadStore) -> Vec<String> {
        crate::durable::read_dir_names(store.layout().temp_dir()).unwrap()
    }

    fn store() -> (tempfile::TempDir, ThreadStore) {
        let dir = tempfile::tempdir().unwrap();
        let me = Identity {
            uid: "U-me".into(),
            alias: "me".into(),
        };
        let store = ThreadStore::open(StoreOptions::new(dir.path(), me)).unwrap();
        (dir, store)
    }

    #[test]
    fn test_send_new_thread_promotes_draft() {
        let (_dir, store) = store();
        let id = store.mint_local_id("").unwrap();
        let mut update = DraftUpdate::new(id.clone(), "plans", "see you at noon");
        update.cc.push(CcEntry {
            who: "ann".into(),
            who_uid: "U-ann".into(),
            ..Default::default()
        });
        store.store_draft(update).unwrap();
        assert!(store.layout().draft_path(&id).exists());

        store.store_sent(&id, "M100", "2024-06-01T09:00:00Z").unwrap();

        assert!(!store.layout().draft_path(&id).exists());
        assert!(store.is_renamed(&id.door_key()));
        let path = store.layout().thread_path("M100");
        let tail = read_tail(&mut File::open(&path).unwrap(), &path).unwrap();
        assert_eq!(tail.index.len(), 1);
        assert_eq!(tail.index[0].id, "M100");
        assert_eq!(tail.index[0].seen, SeenState::Local);
        assert_eq!(tail.index[0].from, "U-me");
        assert_eq!(tail.cc.len(), 2);
        assert!(tail.cc.iter().all(|c| c.date == "2024-06-01T09:00:00Z"));
        tail.check_layout().unwrap();

        let mut f = File::open(&path).unwrap();
        let head = read_record_header(&mut f, &path).unwrap();
        assert_eq!(head.sub_head.thread_id, "");
        assert!(head.sub_head.cc.is_none());
        let mut body = vec![0u8; head.len as usize];
        f.read_exact(&mut body).unwrap();
        assert_eq!(body, b"see you at noon");
    }

    #[test]
    fn test_rejected_attachments_leave_send_retryable() {
        let hooks = Arc::new(FailOnce::default());
        hooks.sizing.store(true, Ordering::SeqCst);
        let (_dir, store) = store_with(hooks);
        let id = store.mint_local_id("").unwrap();
        store.store_draft(DraftUpdate::new(id.clone(), "plans", "noon")).unwrap();

        let err = store.store_sent(&id, "M1", "2024-06-01T09:00:00Z").unwrap_err();
        assert!(matches!(err, StoreError::Attachment(_)));
        assert!(!err.is_fatal());
        assert!(temp_names(&store).is_empty());
        assert!(store.layout().draft_path(&id).exists());
        assert!(!store.is_renamed(&id.door_key()));

        store.store_sent(&id, "M1", "2024-06-01T09:00:00Z").unwrap();
        assert!(store.layout().thread_path("M1").exists());
        assert!(temp_names(&store).is_empty());
    }

    #[test]
    fn test_failed_reply_staging_is_discarded() {
        let hooks = Arc::new(FailOnce::default());
        hooks.staging.store(true, Ordering::SeqCst);
        let (_dir, store) = store_with(hooks);
        seed(&store, "A", "");
        let id = store.mint_local_id("A").unwrap();
        store.store_draft(DraftUpdate::new(id.clone(), "", "reply")).unwrap();

        let err = store.store_sent(&id, "B", "2024-06-01T09:00:00Z").unwrap_err();
        assert!(!err.is_fatal());
        assert!(temp_names(&store).is_empty());

        store.store_sent(&id, "B", "2024-06-01T09:00:00Z").unwrap();
        let path = store.layout().thread_path("A");
        let tail = read_tail(&mut File::open(&path).unwrap(), &path).unwrap();
        let ids: Vec<_> = tail.index.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
    }

    #[test]
    fn test_resend_of_stored_message_drops_draft() {
        let (_dir, store) = store();
        seed(&store, "A", "");
        let id = store.mint_local_id("A").unwrap();
        store.store_draft(DraftUpdate::new(id.clone(), "", "reply")).unwrap();
        seed(&store, "B", "A");

        store.store_sent(&id, "B", "2024-06-01T09:00:00Z").unwrap();
        assert!(!store.layout().draft_path(&id).exists());
        let path = store.layout().thread_path("A");
        let tail = read_tail(&mut File::open(&path).unwrap(), &path).unwrap();
        let ids: Vec<_> = tail.index.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["A", "B"]);
        tail.check_layout().unwrap();
        assert!(temp_names(&store).is_empty());
    }

    #[test]
    fn test_send_cleared_draft_is_noop() {
        let (_dir, store) = store();
        let id = LocalId::parse("_1700000000000").unwrap();
        store.store_sent(&id, "M1", "2024-06-01T09:00:00Z").unwrap();
        assert!(!store.layout().thread_path("M1").exists());
        assert!(fs::read_dir(store.layout().temp_dir()).unwrap().next().is_none());
    }

    #[test]
    fn test_invalid_message_id_rejected() {
        let (_dir, store) = store();
        let id = LocalId::parse("_1700000000000").unwrap();
        assert!(matches!(
            store.store_sent(&id, "bad_id", "2024-06-01T09:00:00Z"),
            Err(StoreError::InvalidId(_))
        ));
    }
}
