//! Mark a received message seen.

use tracing::{debug, warn};

use super::{open_existing, ThreadStore};
use crate::codec::tail::{read_tail, write_tail};
use crate::error::Result;
use crate::model::entry::SeenState;
use crate::txn::{apply, Building, Op, PendingName};

impl ThreadStore {
    /// Set the seen time of `msg_id` in `thread_id`, if not yet set.
    ///
    /// Only the index and CC blocks are rewritten. A seen time is never
    /// cleared again.
    pub fn mark_seen(&self, thread_id: &str, msg_id: &str) -> Result<()> {
        let door = self.door(thread_id);
        let state = door.write();
        if state.renamed {
            return Ok(());
        }

        let thread_path = self.layout.thread_path(thread_id);
        let Some(mut thread) = open_existing(&thread_path)? else {
            warn!(thread = %thread_id, "Thread not found to mark seen");
            return Ok(());
        };
        let mut tail = read_tail(&mut thread, &thread_path)?;
        let Some(entry) = tail.index.iter_mut().find(|e| e.id == msg_id) else {
            warn!(thread = %thread_id, msg = %msg_id, "Message not found to mark seen");
            return Ok(());
        };
        if entry.seen.is_set() {
            return Ok(());
        }
        entry.seen = SeenState::now();
        drop(thread);

        let name = PendingName::new(thread_id, msg_id, Op::SeenReceived, "");
        let mut txn = Building::create(&self.layout, name)?;
        let path = txn.path().to_owned();
        write_tail(txn.file(), &path, &tail.index, &tail.cc)?;
        let staged = txn.stage(tail.pos)?;
        apply(&self.layout, self.hooks(), &staged)?;
        debug!(thread = %thread_id, msg = %msg_id, "Marked seen");
        Ok(())
    }
}
