//! CC lists: thread participants and pending forward batches.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Marker appended to a CC note that was cut to the maximum length.
pub const NOTE_TRUNC_MARKER: &str = "[trunc]";

/// Default maximum CC note length in bytes.
pub const DEFAULT_NOTE_MAX_LEN: usize = 1024;

/// `Date` of a CC entry that has not been transmitted yet.
pub const DATE_UNSENT: &str = ".";

/// The local account, as it appears in CC entries it creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id assigned by the service.
    pub uid: String,
    /// Display alias.
    pub alias: String,
}

/// One recipient or subscriber of a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CcEntry {
    pub who: String,
    pub by: String,
    pub who_uid: String,
    pub by_uid: String,
    /// Join time; [`DATE_UNSENT`] before transmission, empty when just added.
    pub date: String,
    pub note: String,
    pub subscribe: bool,
    /// CRC32C of the entry, fixed once the thread is posted.
    #[serde(skip_serializing_if = "is_zero")]
    pub checksum: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl CcEntry {
    /// Whether the entry was added by the user and has not been processed yet.
    pub fn is_new(&self) -> bool {
        self.date.is_empty()
    }

    /// Checksum over the entry with its own checksum field cleared.
    pub fn compute_checksum(&self) -> Result<u32> {
        let mut unsummed = self.clone();
        unsummed.checksum = 0;
        let bytes = serde_json::to_vec(&unsummed)?;
        Ok(crc32c::crc32c(&bytes))
    }

    /// Whether the stored checksum still matches the entry.
    pub fn verify(&self) -> Result<bool> {
        Ok(self.checksum != 0 && self.compute_checksum()? == self.checksum)
    }
}

/// One batch of CC additions waiting to be sent for an existing thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForwardBatch {
    /// Local id of the batch.
    pub id: String,
    #[serde(default)]
    pub cc: Vec<CcEntry>,
}

/// Fill in newly added entries as coming from `me`, and append `me` as the
/// thread author unless `omit_self` or `me` is already listed.
pub fn update_cc(mut cc: Vec<CcEntry>, me: &Identity, omit_self: bool) -> Vec<CcEntry> {
    let mut omit_self = omit_self;
    for entry in cc.iter_mut() {
        omit_self = omit_self || entry.who_uid == me.uid;
        if !entry.is_new() {
            continue;
        }
        entry.date = DATE_UNSENT.to_string();
        entry.by_uid = me.uid.clone();
        entry.by = me.alias.clone();
        entry.subscribe = true;
    }
    if !omit_self {
        cc.push(CcEntry {
            who: me.alias.clone(),
            who_uid: me.uid.clone(),
            by: me.alias.clone(),
            by_uid: me.uid.clone(),
            date: DATE_UNSENT.to_string(),
            note: "author".to_string(),
            subscribe: true,
            checksum: 0,
        });
    }
    cc
}

/// Stamp every entry with the posted date and seal it with a checksum.
///
/// Notes longer than `note_max_len` are cut and marked with
/// [`NOTE_TRUNC_MARKER`].
pub fn seal_cc(cc: &mut [CcEntry], posted: &str, note_max_len: usize) -> Result<()> {
    for entry in cc.iter_mut() {
        truncate_note(&mut entry.note, note_max_len);
        entry.date = posted.to_string();
        entry.checksum = entry.compute_checksum()?;
    }
    Ok(())
}

/// Drop new entries whose `who_uid` already appears in `present`.
pub fn drop_present(cc: &mut Vec<CcEntry>, present: &[CcEntry]) {
    cc.retain(|entry| {
        !entry.is_new() || !present.iter().any(|p| p.who_uid == entry.who_uid)
    });
}

fn truncate_note(note: &mut String, max_len: usize) {
    if note.len() <= max_len {
        return;
    }
    let mut cut = max_len.saturating_sub(NOTE_TRUNC_MARKER.len());
    while !note.is_char_boundary(cut) {
        cut -= 1;
    }
    note.truncate(cut);
    note.push_str(NOTE_TRUNC_MARKER);
}
