//! Directory layout of one service's store.
//!
//! ```text
//! <root>/
//! ├── thread/
//! │   ├── <ThreadId>              thread file
//! │   ├── <ThreadId>_<millis>     draft in an existing thread
//! │   ├── _<millis>               draft starting a new thread
//! │   └── forward_<ThreadId>      pending forward batches
//! └── temp/
//!     └── <tid>_<mid>_<op>_<millis>_<offset>[.tmp]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::model::ids::LocalId;

/// Subdirectory holding thread, draft and forward files.
pub const THREAD_DIR: &str = "thread";

/// Subdirectory holding pending transactions.
pub const TEMP_DIR: &str = "temp";

/// File name prefix of forward-batch lists.
pub const FORWARD_PREFIX: &str = "forward_";

/// Resolved paths of a store rooted at one service directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    thread_dir: PathBuf,
    temp_dir: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            thread_dir: root.join(THREAD_DIR),
            temp_dir: root.join(TEMP_DIR),
            root,
        }
    }

    /// Create the thread and temp directories if missing.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.thread_dir, &self.temp_dir] {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn thread_dir(&self) -> &Path {
        &self.thread_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.thread_dir.join(thread_id)
    }

    /// Draft file of a local id: `<tid>_<millis>` or `_<millis>`.
    pub fn draft_path(&self, id: &LocalId) -> PathBuf {
        self.thread_dir.join(id.to_string())
    }

    pub fn forward_path(&self, thread_id: &str) -> PathBuf {
        self.thread_dir.join(format!("{FORWARD_PREFIX}{thread_id}"))
    }

    pub fn temp_path(&self, file_name: &str) -> PathBuf {
        self.temp_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let layout = Layout::new("/svc");
        let draft = LocalId::parse("T1_1700").unwrap();
        assert_eq!(layout.thread_path("T1"), PathBuf::from("/svc/thread/T1"));
        assert_eq!(layout.draft_path(&draft), PathBuf::from("/svc/thread/T1_1700"));
        assert_eq!(
            layout.draft_path(&LocalId::parse("_1700").unwrap()),
            PathBuf::from("/svc/thread/_1700")
        );
        assert_eq!(
            layout.forward_path("T1"),
            PathBuf::from("/svc/thread/forward_T1")
        );
        assert_eq!(layout.temp_path("x"), PathBuf::from("/svc/temp/x"));
    }

    #[test]
    fn test_create_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().join("svc"));
        layout.create_dirs().unwrap();
        layout.create_dirs().unwrap();
        assert!(layout.thread_dir().is_dir());
        assert!(layout.temp_dir().is_dir());
    }
}
