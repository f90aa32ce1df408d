//! Forward batches: CC additions to an existing thread, queued for send.
//!
//! Stored as a JSON array of [`ForwardBatch`] at `thread/forward_<tid>`,
//! replaced with [`atomic_write`] under the thread's forward door.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use super::{open_read, ThreadStore};
use crate::codec::tail::read_cc;
use crate::durable::{atomic_write, remove_if_exists, sync_dir};
use crate::error::{Result, StoreError};
use crate::model::cc::{drop_present, update_cc, CcEntry, ForwardBatch};
use crate::model::ids::{is_local_thread, validate_id};

/// Target of the symlink marking a forward list that exists but is empty.
const PLACEHOLDER: &str = "placeholder";

impl ThreadStore {
    /// Set the CC list of the pending forward batch of `thread_id`.
    ///
    /// Entries already in the thread or in an earlier batch are dropped. A
    /// new batch starts when there is none or the newest is already queued.
    pub fn store_forward(&self, thread_id: &str, cc: Vec<CcEntry>) -> Result<()> {
        if is_local_thread(thread_id) {
            return Err(StoreError::ForwardDraftThread(thread_id.to_owned()));
        }
        validate_id(thread_id)?;

        let mut cc = cc;
        let thread_cc = {
            let door = self.door(thread_id);
            let _guard = door.read();
            let path = self.layout.thread_path(thread_id);
            let Some(mut thread) = open_read(&path)? else {
                warn!(thread = %thread_id, "Thread not found to forward");
                return Ok(());
            };
            read_cc(&mut thread, &path)?
        };
        drop_present(&mut cc, &thread_cc);

        let door = self.forward_door(thread_id);
        let _guard = door.write();
        let path = self.layout.forward_path(thread_id);
        let mut batches = self.read_forward(&path, true)?;

        let start_new = batches
            .last()
            .is_none_or(|last| self.hooks().is_forward_queued(&last.id));
        if start_new {
            batches.push(ForwardBatch {
                id: self.mint_local_id(thread_id)?.to_string(),
                cc: Vec::new(),
            });
        }
        let (last, earlier) = match batches.split_last_mut() {
            Some(split) => split,
            None => return Ok(()),
        };
        for batch in earlier.iter() {
            drop_present(&mut cc, &batch.cc);
        }

        if earlier.is_empty() && cc.is_empty() {
            if remove_if_exists(&path)? {
                sync_dir(self.layout.thread_dir())?;
            }
            debug!(thread = %thread_id, "Cleared forward list");
            return Ok(());
        }
        last.cc = update_cc(cc, &self.identity, true);
        let batch_id = last.id.clone();

        atomic_write(&path, &serde_json::to_vec(&batches)?)?;
        debug!(thread = %thread_id, batch = %batch_id, batches = batches.len(), "Stored forward batch");
        Ok(())
    }

    /// Forward batches of `thread_id`, oldest first.
    pub fn load_forward(&self, thread_id: &str) -> Result<Vec<ForwardBatch>> {
        let door = self.forward_door(thread_id);
        let _guard = door.read();
        self.read_forward(&self.layout.forward_path(thread_id), false)
    }

    /// Read a forward list. With `make`, a missing list is marked with a
    /// placeholder so it exists from now on.
    fn read_forward(&self, path: &Path, make: bool) -> Result<Vec<ForwardBatch>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::corrupt(path, format!("forward list: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if make {
                    make_placeholder(path, self.layout.thread_dir())?;
                }
                Ok(Vec::new())
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[cfg(unix)]
fn make_placeholder(path: &Path, dir: &Path) -> Result<()> {
    match std::os::unix::fs::symlink(PLACEHOLDER, path) {
        Ok(()) => sync_dir(dir),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(not(unix))]
fn make_placeholder(_path: &Path, _dir: &Path) -> Result<()> {
    Ok(())
}
