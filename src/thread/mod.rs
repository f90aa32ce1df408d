//! Thread operations over the transaction pipeline.
//!
//! [`ThreadStore`] owns the door registry and local id minter for one
//! service directory. It is `Send + Sync`; share it behind an `Arc`.
//!
//! Every mutation takes the write side of the thread's door for the whole
//! build-and-apply span. Readers take the read side.

mod draft;
mod forward;
mod read;
mod receive;
mod seen;
mod send;

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::codec::record::copy_stored;
use crate::codec::tail::ThreadTail;
use crate::door::{Collection, Door, DoorRegistry};
use crate::durable::resolve_tmp_dir;
use crate::error::{Result, StoreError};
use crate::hooks::{Collaborators, NoopCollaborators};
use crate::layout::{Layout, FORWARD_PREFIX};
use crate::model::cc::{Identity, DEFAULT_NOTE_MAX_LEN};
use crate::model::entry::{IndexEntry, Location};
use crate::model::ids::{LocalId, LocalIdMinter};
use crate::txn::{recover, RecoveryReport};

pub use read::{CcListing, CcView, IndexSummary, MessageSelection};

/// Settings for [`ThreadStore::open`].
#[derive(Clone)]
pub struct StoreOptions {
    /// Service directory holding `thread/` and `temp/`.
    pub root: PathBuf,
    /// The local account.
    pub identity: Identity,
    /// CC notes longer than this are truncated when a thread is posted.
    pub cc_note_max_len: usize,
    pub collaborators: Arc<dyn Collaborators>,
}

impl StoreOptions {
    pub fn new(root: impl Into<PathBuf>, identity: Identity) -> Self {
        Self {
            root: root.into(),
            identity,
            cc_note_max_len: DEFAULT_NOTE_MAX_LEN,
            collaborators: Arc::new(NoopCollaborators),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Arc<dyn Collaborators>) -> Self {
        self.collaborators = collaborators;
        self
    }
}

impl std::fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreOptions")
            .field("root", &self.root)
            .field("identity", &self.identity)
            .field("cc_note_max_len", &self.cc_note_max_len)
            .finish_non_exhaustive()
    }
}

/// Thread storage for one service.
pub struct ThreadStore {
    layout: Layout,
    identity: Identity,
    note_max_len: usize,
    hooks: Arc<dyn Collaborators>,
    doors: DoorRegistry,
    minter: LocalIdMinter,
    recovery: RecoveryReport,
}

impl ThreadStore {
    /// Open the store, creating its directories and finishing whatever a
    /// previous process left behind.
    pub fn open(opts: StoreOptions) -> Result<Self> {
        let layout = Layout::new(opts.root);
        layout.create_dirs()?;

        let forwards = resolve_tmp_dir(layout.thread_dir(), FORWARD_PREFIX)?;
        let recovery = recover(&layout, opts.collaborators.as_ref())?;
        if forwards > 0 || !recovery.is_clean() {
            info!(
                root = %layout.root().display(),
                forwards,
                discarded = recovery.discarded,
                applied = recovery.applied,
                skipped = recovery.skipped,
                "Recovered thread store"
            );
        }

        Ok(Self {
            layout,
            identity: opts.identity,
            note_max_len: opts.cc_note_max_len,
            hooks: opts.collaborators,
            doors: DoorRegistry::new(),
            minter: LocalIdMinter::new(),
            recovery,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Result of the recovery pass run by [`ThreadStore::open`].
    pub fn last_recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// A fresh local id for a draft in `thread_id`, or for a new thread
    /// when `thread_id` is empty.
    pub fn mint_local_id(&self, thread_id: &str) -> Result<LocalId> {
        self.minter.mint(thread_id)
    }

    /// Whether `thread_id` was retired by promoting its draft thread.
    pub fn is_renamed(&self, thread_id: &str) -> bool {
        self.door(thread_id).read().renamed
    }

    fn door(&self, thread_id: &str) -> Arc<Door> {
        self.doors.acquire(Collection::Thread, thread_id)
    }

    fn forward_door(&self, thread_id: &str) -> Arc<Door> {
        self.doors.acquire(Collection::Forward, thread_id)
    }

    fn hooks(&self) -> &dyn Collaborators {
        self.hooks.as_ref()
    }
}

/// Open an existing file for reading and writing, `None` if it is missing.
fn open_existing(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Open an existing file read-only, `None` if it is missing.
fn open_read(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Placement of a new inline record in an existing thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Splice {
    /// Thread offset of the new record.
    offset: u64,
    /// Bytes of later records that move up behind it.
    copy_len: u64,
}

/// Where a record with `id` goes, or `None` if `id` is already indexed.
fn plan_splice(tail: &ThreadTail, id: &str) -> Option<Splice> {
    if tail.find(id).is_some() {
        return None;
    }
    let offset = tail
        .index
        .iter()
        .filter(|e| e.id.as_str() > id)
        .find_map(|e| e.location.offset())
        .unwrap_or(tail.pos);
    Some(Splice {
        offset,
        copy_len: tail.pos - offset,
    })
}

/// Copy the records displaced by `splice` from the thread file into the
/// transaction, right after the new record.
fn copy_displaced(
    thread: &mut File,
    thread_path: &Path,
    splice: Splice,
    out: &mut File,
    out_path: &Path,
) -> Result<()> {
    if splice.copy_len == 0 {
        return Ok(());
    }
    thread
        .seek(SeekFrom::Start(splice.offset))
        .map_err(|e| StoreError::io(thread_path, e))?;
    copy_stored(thread, thread_path, out, splice.copy_len).map_err(|e| match e {
        StoreError::Stream(source) => StoreError::io(out_path, source),
        other => other,
    })
}

/// `index` with `entry` inserted in id order, shifting the inline records
/// at or after `splice.offset` by `size`.
fn insert_entry(index: Vec<IndexEntry>, entry: IndexEntry, splice: Splice) -> Vec<IndexEntry> {
    let size = entry.location.size();
    let mut out = Vec::with_capacity(index.len() + 1);
    let mut pending = Some(entry);
    for mut e in index {
        if let Location::Inline { offset, .. } = &mut e.location {
            if pending.as_ref().is_some_and(|p| e.id > p.id) {
                out.extend(pending.take());
            }
            if *offset >= splice.offset {
                *offset += size;
            }
        }
        out.push(e);
    }
    out.extend(pending);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entry::SeenState;

    fn inline(id: &str, offset: u64, size: u64) -> IndexEntry {
        IndexEntry {
            id: id.into(),
            location: Location::Inline { offset, size },
            from: "U1".into(),
            alias: String::new(),
            date: String::new(),
            subject: String::new(),
            checksum: 0,
            seen: SeenState::Unset,
        }
    }

    fn detached(id: &str) -> IndexEntry {
        IndexEntry {
            location: Location::Detached { size: 5 },
            ..inline(id, 0, 0)
        }
    }

    #[test]
    fn test_splice_appends_in_order() {
        let tail = ThreadTail {
            pos: 30,
            index: vec![inline("A", 0, 10), inline("C", 10, 20)],
            cc: vec![],
        };
        assert_eq!(
            plan_splice(&tail, "D"),
            Some(Splice {
                offset: 30,
                copy_len: 0
            })
        );
        assert_eq!(plan_splice(&tail, "C"), None);
    }

    #[test]
    fn test_splice_before_later_record() {
        let tail = ThreadTail {
            pos: 30,
            index: vec![inline("A", 0, 10), detached("A_17"), inline("C", 10, 20)],
            cc: vec![],
        };
        let splice = plan_splice(&tail, "B").unwrap();
        assert_eq!(
            splice,
            Splice {
                offset: 10,
                copy_len: 20
            }
        );

        let index = insert_entry(tail.index, inline("B", 10, 7), splice);
        let ids: Vec<_> = index.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["A", "A_17", "B", "C"]);
        assert_eq!(index[3].location, Location::Inline { offset: 17, size: 20 });

        let shifted = ThreadTail {
            pos: 37,
            index,
            cc: vec![],
        };
        shifted.check_layout().unwrap();
    }
}
