//! Store a message delivered by the network layer.

use std::fs;
use std::io::Read;

use tracing::{debug, warn};

use super::{copy_displaced, insert_entry, open_existing, plan_splice, ThreadStore};
use crate::codec::record::{discard, write_record, RecordStats};
use crate::codec::tail::{read_tail, write_tail};
use crate::error::Result;
use crate::model::cc::{seal_cc, CcEntry};
use crate::model::entry::{IndexEntry, Location, SeenState};
use crate::model::header::{MessageHeader, RecordHeader};
use crate::model::ids::{is_local_thread, is_valid_id};
use crate::txn::{apply, Building, Op, PendingName};

impl ThreadStore {
    /// Store a received message, reading `header.data_len` bytes of body
    /// and attachments from `body`.
    ///
    /// The thread id comes from the sub-header, or is the message id for the
    /// first message of a thread. Duplicates, unknown threads and malformed
    /// ids are logged and the body is consumed.
    pub fn store_received(&self, header: &MessageHeader, body: &mut dyn Read) -> Result<()> {
        let body_len = header.body_len()?;
        let thread_id = header.thread_id().to_owned();

        if !is_valid_id(&header.id) || !is_valid_id(&thread_id) || is_local_thread(&thread_id) {
            warn!(msg = %header.id, thread = %thread_id, "Invalid id in received message");
            return discard(body, header.data_len);
        }

        let mut record = RecordHeader {
            id: header.id.clone(),
            from: header.from.clone(),
            posted: header.posted.clone(),
            len: body_len,
            sub_head: header.sub_head.clone(),
        };
        let head_cc = record.sub_head.cc.take();

        if thread_id == header.id {
            self.receive_first(header, record, head_cc.unwrap_or_default(), body)
        } else {
            self.receive_reply(header, &thread_id, record, body)
        }
    }

    /// First message of a thread: the transaction becomes the thread file.
    fn receive_first(
        &self,
        header: &MessageHeader,
        record: RecordHeader,
        mut cc: Vec<CcEntry>,
        body: &mut dyn Read,
    ) -> Result<()> {
        let thread_id = header.id.as_str();
        let door = self.door(thread_id);
        let _guard = door.write();

        let thread_path = self.layout.thread_path(thread_id);
        if fs::symlink_metadata(&thread_path).is_ok() {
            warn!(thread = %thread_id, "Thread already stored");
            return discard(body, header.data_len);
        }

        let name = PendingName::new(thread_id, thread_id, Op::StoreReceived, "");
        let Some(mut txn) = Building::try_create(&self.layout, name)? else {
            warn!(thread = %thread_id, "Thread already being stored");
            return discard(body, header.data_len);
        };

        let path = txn.path().to_owned();
        let stats = match self.write_received(&mut txn, header, &record, body) {
            Ok(stats) => stats,
            Err(e) => {
                txn.discard()?;
                return Err(e);
            }
        };

        seal_cc(&mut cc, &record.posted, self.note_max_len)?;
        let entry = IndexEntry::for_record(
            &record,
            Location::Inline {
                offset: 0,
                size: stats.size,
            },
            stats.checksum,
            SeenState::Unset,
        );
        write_tail(txn.file(), &path, &[entry], &cc)?;

        let staged = txn.stage(0)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(thread = %thread_id, size = stats.size, "Stored new thread");
        Ok(())
    }

    /// Later message: spliced into the thread in id order.
    fn receive_reply(
        &self,
        header: &MessageHeader,
        thread_id: &str,
        record: RecordHeader,
        body: &mut dyn Read,
    ) -> Result<()> {
        let name = PendingName::new(thread_id, &header.id, Op::StoreReceived, "");
        let Some(mut txn) = Building::try_create(&self.layout, name)? else {
            warn!(thread = %thread_id, msg = %header.id, "Message already being stored");
            return discard(body, header.data_len);
        };
        let path = txn.path().to_owned();

        // Drain the stream before taking the door.
        let stats = match self.write_received(&mut txn, header, &record, body) {
            Ok(stats) => stats,
            Err(e) => {
                txn.discard()?;
                return Err(e);
            }
        };

        let door = self.door(thread_id);
        let _guard = door.write();

        let thread_path = self.layout.thread_path(thread_id);
        let Some(mut thread) = open_existing(&thread_path)? else {
            warn!(thread = %thread_id, msg = %header.id, "Thread not found for received message");
            return txn.discard();
        };
        let tail = read_tail(&mut thread, &thread_path)?;
        let Some(splice) = plan_splice(&tail, &header.id) else {
            warn!(thread = %thread_id, msg = %header.id, "Message already stored");
            return txn.discard();
        };

        copy_displaced(&mut thread, &thread_path, splice, txn.file(), &path)?;
        let entry = IndexEntry::for_record(
            &record,
            Location::Inline {
                offset: splice.offset,
                size: stats.size,
            },
            stats.checksum,
            SeenState::Unset,
        );
        let index = insert_entry(tail.index, entry, splice);
        write_tail(txn.file(), &path, &index, &tail.cc)?;
        drop(thread);

        let staged = txn.stage(splice.offset)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(
            thread = %thread_id,
            msg = %header.id,
            offset = splice.offset,
            moved = splice.copy_len,
            "Stored received message"
        );
        Ok(())
    }

    fn write_received(
        &self,
        txn: &mut Building,
        header: &MessageHeader,
        record: &RecordHeader,
        body: &mut dyn Read,
    ) -> Result<RecordStats> {
        let path = txn.path().to_owned();
        let stats = write_record(txn.file(), &path, record, body)?;
        self.hooks().stage_received_attachments(header, body)?;
        Ok(stats)
    }
}
