//! Read accessors for the UI and network layers.

use std::collections::HashSet;
use std::io::{Seek, SeekFrom, Write};

use serde::Serialize;
use tracing::warn;

use super::{open_read, ThreadStore};
use crate::codec::record::copy_stored;
use crate::codec::tail::{read_cc, read_tail};
use crate::error::{Result, StoreError};
use crate::model::cc::CcEntry;
use crate::model::entry::{Location, SeenState};

/// One row of a thread listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IndexSummary {
    pub id: String,
    pub from: String,
    pub alias: String,
    pub date: String,
    pub subject: String,
    pub seen: SeenState,
    /// Record size in bytes.
    pub size: u64,
    /// Unsent draft.
    pub draft: bool,
    /// Draft waiting in the send queue.
    pub queued: bool,
}

/// A CC entry as displayed, with its forward state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CcView {
    #[serde(flatten)]
    pub entry: CcEntry,
    pub queued: bool,
    /// Forward batch the entry belongs to, while that batch is editable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// CC entries of a thread, split by whether they are settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CcListing {
    /// Entries of forward batches still being edited.
    pub draft: Vec<CcView>,
    /// Thread CC plus queued forward batches, sorted by `who`.
    pub set: Vec<CcView>,
}

/// Which messages [`ThreadStore::write_messages`] emits.
#[derive(Debug, Clone, Copy)]
pub enum MessageSelection<'a> {
    One(&'a str),
    Open(&'a HashSet<String>),
}

impl MessageSelection<'_> {
    fn matches(&self, id: &str) -> bool {
        match self {
            Self::One(want) => *want == id,
            Self::Open(set) => set.contains(id),
        }
    }
}

impl ThreadStore {
    /// Index of `thread_id`: records in ascending id order, with drafts
    /// among them. Empty if the thread is missing or was renamed.
    pub fn thread_index(&self, thread_id: &str) -> Result<Vec<IndexSummary>> {
        let tail = {
            let door = self.door(thread_id);
            let state = door.read();
            if state.renamed {
                return Ok(Vec::new());
            }
            let path = self.layout.thread_path(thread_id);
            let Some(mut thread) = open_read(&path)? else {
                return Ok(Vec::new());
            };
            read_tail(&mut thread, &path)?
        };

        Ok(tail
            .index
            .into_iter()
            .map(|e| {
                let draft = !e.location.is_inline();
                IndexSummary {
                    queued: draft && self.hooks().is_draft_queued(&e.id),
                    size: e.location.size(),
                    draft,
                    id: e.id,
                    from: e.from,
                    alias: e.alias,
                    date: e.date,
                    subject: e.subject,
                    seen: e.seen,
                }
            })
            .collect())
    }

    /// Thread CC together with pending forward batches.
    pub fn thread_cc(&self, thread_id: &str) -> Result<CcListing> {
        let mut listing = CcListing::default();
        {
            let door = self.door(thread_id);
            let state = door.read();
            if state.renamed {
                return Ok(listing);
            }
            let path = self.layout.thread_path(thread_id);
            let Some(mut thread) = open_read(&path)? else {
                return Ok(listing);
            };
            listing.set = read_cc(&mut thread, &path)?
                .into_iter()
                .map(|entry| CcView {
                    entry,
                    queued: false,
                    batch_id: None,
                })
                .collect();
        }

        for batch in self.load_forward(thread_id)? {
            let queued = self.hooks().is_forward_queued(&batch.id);
            let batch_id = (!queued).then_some(batch.id);
            let views = batch.cc.into_iter().map(|entry| CcView {
                entry,
                queued,
                batch_id: batch_id.clone(),
            });
            if queued {
                listing.set.extend(views);
            } else {
                listing.draft.extend(views);
            }
        }
        listing.set.sort_by(|a, b| a.entry.who.cmp(&b.entry.who));
        Ok(listing)
    }

    /// Copy the stored records selected from `thread_id` to `out`.
    pub fn write_messages(
        &self,
        thread_id: &str,
        selection: MessageSelection<'_>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let door = self.door(thread_id);
        let state = door.read();
        if state.renamed {
            return Err(StoreError::ThreadRenamed(thread_id.to_owned()));
        }
        let path = self.layout.thread_path(thread_id);
        let Some(mut thread) = open_read(&path)? else {
            warn!(thread = %thread_id, "Thread not found to read");
            return Ok(());
        };
        let tail = read_tail(&mut thread, &path)?;

        for entry in tail.index.iter().filter(|e| selection.matches(&e.id)) {
            match entry.location {
                Location::Inline { offset, size } => {
                    thread
                        .seek(SeekFrom::Start(offset))
                        .map_err(|e| StoreError::io(&path, e))?;
                    copy_stored(&mut thread, &path, out, size)?;
                }
                Location::Detached { size } => {
                    let draft_path = self.layout.thread_dir().join(&entry.id);
                    let Some(mut draft) = open_read(&draft_path)? else {
                        warn!(thread = %thread_id, draft = %entry.id, "Draft file missing");
                        continue;
                    };
                    copy_stored(&mut draft, &draft_path, out, size)?;
                }
            }
            if matches!(selection, MessageSelection::One(_)) {
                break;
            }
        }
        Ok(())
    }

    /// Message to show when `thread_id` is opened: the last one seen, or
    /// the first. `None` if the thread is empty, missing or renamed.
    pub fn load_thread(&self, thread_id: &str) -> Result<Option<String>> {
        let door = self.door(thread_id);
        let state = door.read();
        if state.renamed {
            return Ok(None);
        }
        let path = self.layout.thread_path(thread_id);
        let Some(mut thread) = open_read(&path)? else {
            return Ok(None);
        };
        let tail = read_tail(&mut thread, &path)?;
        Ok(tail
            .index
            .iter()
            .rev()
            .find(|e| e.seen.is_set())
            .or_else(|| tail.index.first())
            .map(|e| e.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cc::Identity;
    use crate::model::header::{DraftUpdate, MessageHeader, SubHeader};
    use crate::thread::StoreOptions;

    fn store() -> (tempfile::TempDir, ThreadStore) {
        let dir = tempfile::tempdir().unwrap();
        let me = Identity {
            uid: "U-me".into(),
            alias: "me".into(),
        };
        let store = ThreadStore::open(StoreOptions::new(dir.path(), me)).unwrap();
        (dir, store)
    }

    fn received(store: &ThreadStore, id: &str, thread: &str, body: &str) {
        let head = MessageHeader {
            id: id.into(),
            from: "U-ann".into(),
            posted: "2024-05-01T12:00:00Z".into(),
            data_len: body.len() as u64,
            sub_head: SubHeader {
                thread_id: thread.into(),
                subject: "s".into(),
                cc: Some(vec![CcEntry {
                    who: "zed".into(),
                    who_uid: "U-zed".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
        };
        store.store_received(&head, &mut body.as_bytes()).unwrap();
    }

    #[test]
    fn test_index_and_messages() {
        let (_dir, store) = store();
        received(&store, "T1", "", "one");
        received(&store, "T3", "T1", "three");
        let draft = store.mint_local_id("T1").unwrap();
        store.store_draft(DraftUpdate::new(draft.clone(), "", "draft body")).unwrap();

        let index = store.thread_index("T1").unwrap();
        let ids: Vec<_> = index.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, ["T1".to_string(), "T3".to_string(), draft.to_string()]);
        assert!(index[2].draft);
        assert!(!index[2].queued);

        let mut out = Vec::<u8>::new();
        store.write_messages("T1", MessageSelection::One("T3"), &mut out).unwrap();
        assert!(out.ends_with(b"three\n"));
        assert_eq!(out.len() as u64, index[1].size);

        let open: HashSet<String> = ["T1".to_string(), draft.to_string()].into();
        let mut out = Vec::<u8>::new();
        store.write_messages("T1", MessageSelection::Open(&open), &mut out).unwrap();
        assert_eq!(out.len() as u64, index[0].size + index[2].size);
    }

    #[test]
    fn test_load_thread_prefers_last_seen() {
        let (_dir, store) = store();
        received(&store, "T1", "", "one");
        received(&store, "T2", "T1", "two");
        received(&store, "T3", "T1", "three");
        assert_eq!(store.load_thread("T1").unwrap().as_deref(), Some("T1"));
        store.mark_seen("T1", "T2").unwrap();
        assert_eq!(store.load_thread("T1").unwrap().as_deref(), Some("T2"));
        assert_eq!(store.load_thread("nope").unwrap(), None);
    }

    #[test]
    fn test_cc_listing_splits_forward_batches() {
        let (_dir, store) = store();
        received(&store, "T1", "", "one");
        store
            .store_forward(
                "T1",
                vec![CcEntry {
                    who: "amy".into(),
                    who_uid: "U-amy".into(),
                    ..Default::default()
                }],
            )
            .unwrap();

        let listing = store.thread_cc("T1").unwrap();
        assert_eq!(listing.set.len(), 1);
        assert_eq!(listing.set[0].entry.who, "zed");
        assert_eq!(listing.draft.len(), 1);
        assert_eq!(listing.draft[0].entry.who, "amy");
        assert!(listing.draft[0].batch_id.is_some());
    }

    #[test]
    fn test_renamed_thread_reads() {
        let (_dir, store) = store();
        let id = store.mint_local_id("").unwrap();
        store.store_draft(DraftUpdate::new(id.clone(), "subject", "text")).unwrap();
        store.store_sent(&id, "M1", "2024-06-01T00:00:00Z").unwrap();

        let old = id.door_key();
        assert!(store.thread_index(&old).unwrap().is_empty());
        assert_eq!(store.load_thread(&old).unwrap(), None);
        assert!(matches!(
            store.write_messages(&old, MessageSelection::One("x"), &mut Vec::<u8>::new()),
            Err(StoreError::ThreadRenamed(_))
        ));
        assert_eq!(store.thread_index("M1").unwrap().len(), 1);
    }
}
