//! Build, stage and apply a thread transaction.
//!
//! ```text
//!  Building ──stage()──▶ Staged ──apply()──▶ (removed)
//!  name_.tmp             name_<offset>
//!  create_new            renamed, temp dir synced
//! ```
//!
//! A crash while building leaves a `.tmp` that recovery deletes. A crash
//! after staging leaves a self-describing file that recovery applies again,
//! so every step of [`apply`] is safe to repeat.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::pending::{Op, PendingName};
use crate::codec::record::read_record_header;
use crate::codec::tail::{index_position, read_cc};
use crate::durable::{create_new_options, remove_if_exists, sync_dir};
use crate::error::{Result, StoreError};
use crate::hooks::Collaborators;
use crate::layout::Layout;
use crate::model::header::SubHeader;

/// A transaction file being written.
#[derive(Debug)]
pub struct Building {
    name: PendingName,
    path: PathBuf,
    file: File,
}

impl Building {
    /// Create the building file. An existing one is an I/O error.
    pub fn create(layout: &Layout, name: PendingName) -> Result<Self> {
        let path = layout.temp_path(&name.building_file_name());
        let file = create_new_options()
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(Self { name, path, file })
    }

    /// Like [`Building::create`], but `None` if another transaction with the
    /// same name is already being built.
    pub fn try_create(layout: &Layout, name: PendingName) -> Result<Option<Self>> {
        match Self::create(layout, name) {
            Ok(b) => Ok(Some(b)),
            Err(StoreError::Io { source, .. }) if source.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn name(&self) -> &PendingName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Abandon the transaction.
    pub fn discard(self) -> Result<()> {
        drop(self.file);
        remove_if_exists(&self.path)?;
        Ok(())
    }

    /// Make the transaction durable under its final name, recording the
    /// thread offset its bytes will be written at.
    pub fn stage(self, offset: u64) -> Result<Staged> {
        let Self {
            mut name,
            path,
            file,
        } = self;
        file.sync_all().map_err(|e| StoreError::io(&path, e))?;
        drop(file);

        name.offset = offset;
        let staged = path.with_file_name(name.to_string());
        fs::rename(&path, &staged).map_err(|e| StoreError::io(&staged, e))?;
        sync_dir(staged.parent().unwrap_or(Path::new(".")))?;
        debug!(txn = %name, "Staged transaction");
        Ok(Staged { name, path: staged })
    }
}

/// A durable transaction awaiting [`apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    name: PendingName,
    path: PathBuf,
}

impl Staged {
    /// A staged file found in the temp directory.
    pub fn existing(layout: &Layout, name: PendingName) -> Self {
        let path = layout.temp_path(&name.to_string());
        Self { name, path }
    }

    pub fn name(&self) -> &PendingName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Merge a staged transaction into the thread directory, run its side
/// effects, and remove it.
///
/// A collaborator error after the thread directory changed is returned as
/// [`StoreError::ApplyFailed`], which is fatal: the staged file stays for
/// recovery and no later transaction may touch the thread before it runs.
pub fn apply(layout: &Layout, hooks: &dyn Collaborators, staged: &Staged) -> Result<()> {
    let name = &staged.name;
    let path = staged.path.as_path();
    let mut src = File::open(path).map_err(|e| StoreError::io(path, e))?;

    match name.op {
        Op::StoreReceived | Op::StoreSent => {
            if name.creates_thread() {
                link_thread(layout, path, &name.thread_id)?;
            } else {
                patch(&layout.thread_path(&name.thread_id), name.offset, &mut src, path, 0)?;
            }
            if name.op == Op::StoreSent {
                let draft = layout.thread_dir().join(name.draft_file_name());
                if remove_if_exists(&draft)? {
                    sync_dir(layout.thread_dir())?;
                }
            }
            record_effects(hooks, name, &mut src, path)
                .map_err(|e| StoreError::apply_failed(name, e))?;
        }
        Op::SeenReceived => {
            patch(&layout.thread_path(&name.thread_id), name.offset, &mut src, path, 0)?;
        }
        Op::WriteDraft | Op::DeleteDraft => {
            let draft = layout.thread_dir().join(name.draft_file_name());
            let old = read_sub_head(&draft)?;
            remove_if_exists(&draft)?;
            if name.op == Op::WriteDraft {
                fs::hard_link(path, &draft).map_err(|e| StoreError::io(&draft, e))?;
            }
            sync_dir(layout.thread_dir())?;

            if !name.thread_id.is_empty() {
                let start = index_position(&mut src, path)?;
                patch(&layout.thread_path(&name.thread_id), name.offset, &mut src, path, start)?;
            }
            let new = match name.op {
                Op::WriteDraft => Some(sub_head_at_start(&mut src, path)?),
                _ => None,
            };
            hooks
                .update_draft_attachments(old.as_ref(), new.as_ref(), name)
                .map_err(|e| StoreError::apply_failed(name, e))?;
        }
    }

    drop(src);
    fs::remove_file(path).map_err(|e| StoreError::io(path, e))?;
    debug!(txn = %name, "Applied transaction");
    Ok(())
}

/// Hard-link a staged first record into place as the thread file.
fn link_thread(layout: &Layout, staged: &Path, thread_id: &str) -> Result<()> {
    let target = layout.thread_path(thread_id);
    match fs::hard_link(staged, &target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => return Err(StoreError::io(&target, e)),
    }
    sync_dir(layout.thread_dir())
}

/// Overwrite `target` from `offset` with the bytes of `src` from
/// `src_start`, cutting the file to end where they end.
fn patch(target: &Path, offset: u64, src: &mut File, src_path: &Path, src_start: u64) -> Result<()> {
    let mut out = OpenOptions::new()
        .write(true)
        .open(target)
        .map_err(|e| StoreError::io(target, e))?;
    src.seek(SeekFrom::Start(src_start))
        .map_err(|e| StoreError::io(src_path, e))?;
    out.seek(SeekFrom::Start(offset))
        .map_err(|e| StoreError::io(target, e))?;
    let copied = io::copy(src, &mut out).map_err(|e| StoreError::io(target, e))?;
    out.set_len(offset + copied)
        .map_err(|e| StoreError::io(target, e))?;
    out.sync_all().map_err(|e| StoreError::io(target, e))
}

/// Address book and attachment updates for a stored message. The new record
/// is always first in its staged file.
fn record_effects(
    hooks: &dyn Collaborators,
    name: &PendingName,
    src: &mut File,
    path: &Path,
) -> Result<()> {
    src.seek(SeekFrom::Start(0))
        .map_err(|e| StoreError::io(path, e))?;
    let head = read_record_header(src, path)?;
    let cc = if name.creates_thread() {
        read_cc(src, path)?
    } else {
        Vec::new()
    };

    match name.op {
        Op::StoreReceived => {
            hooks.resolve_sent_address_book(&head.posted, &cc, &name.thread_id)?;
            hooks.resolve_received_address_book(&head.posted, &cc, &name.thread_id)?;
            hooks.store_received_attachments(&head.sub_head, name)
        }
        _ => {
            hooks.resolve_received_address_book(&head.posted, &cc, &name.thread_id)?;
            hooks.store_sent_attachments(&head.sub_head, name)
        }
    }
}

fn sub_head_at_start(src: &mut File, path: &Path) -> Result<SubHeader> {
    src.seek(SeekFrom::Start(0))
        .map_err(|e| StoreError::io(path, e))?;
    Ok(read_record_header(src, path)?.sub_head)
}

/// Sub-header of the draft record in `path`, if the draft exists.
fn read_sub_head(path: &Path) -> Result<Option<SubHeader>> {
    match File::open(path) {
        Ok(mut f) => Ok(Some(read_record_header(&mut f, path)?.sub_head)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
