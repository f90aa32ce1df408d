//! Startup pass over the temp directory.

use tracing::{info, warn};

use super::pending::PendingName;
use super::pipeline::{apply, Staged};
use crate::durable::{read_dir_names, remove_if_exists, sync_dir, TMP_SUFFIX};
use crate::error::Result;
use crate::hooks::Collaborators;
use crate::layout::Layout;

/// What a recovery pass found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Transactions that never reached staging and were deleted.
    pub discarded: usize,
    /// Staged transactions applied again.
    pub applied: usize,
    /// Files whose names are not transactions, left in place.
    pub skipped: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.discarded == 0 && self.applied == 0 && self.skipped == 0
    }
}

/// Finish or discard every transaction left in the temp directory.
///
/// Must run before any thread file is opened.
pub fn recover(layout: &Layout, hooks: &dyn Collaborators) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    for file_name in read_dir_names(layout.temp_dir())? {
        if file_name.ends_with(TMP_SUFFIX) {
            info!(file = %file_name, "Discarding unstaged transaction");
            remove_if_exists(&layout.temp_path(&file_name))?;
            report.discarded += 1;
            continue;
        }
        match file_name.parse::<PendingName>() {
            Ok(name) => {
                info!(txn = %name, "Completing staged transaction");
                apply(layout, hooks, &Staged::existing(layout, name))?;
                report.applied += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping unexpected file in temp directory");
                report.skipped += 1;
            }
        }
    }
    if report.discarded + report.applied > 0 {
        sync_dir(layout.temp_dir())?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopCollaborators;
    use crate::txn::pending::Op;
    use crate::txn::pipeline::Building;
    use std::fs;
    use std::io::Write;

    #[test]
    fn test_recover_sorts_out_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.create_dirs().unwrap();
        fs::write(layout.thread_path("T1"), b"RECORDSoldtail").unwrap();

        let mut b = Building::create(&layout, PendingName::new("T1", "M1", Op::SeenReceived, "")).unwrap();
        b.file().write_all(b"newtail").unwrap();
        b.stage(7).unwrap();

        let mut b = Building::create(&layout, PendingName::new("T1", "M2", Op::StoreReceived, "")).unwrap();
        b.file().write_all(b"half").unwrap();
        drop(b);

        fs::write(layout.temp_path("notes.txt"), b"?").unwrap();

        let report = recover(&layout, &NoopCollaborators).unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                discarded: 1,
                applied: 1,
                skipped: 1
            }
        );
        assert_eq!(fs::read(layout.thread_path("T1")).unwrap(), b"RECORDSnewtail");
        assert_eq!(read_dir_names(layout.temp_dir()).unwrap(), vec!["notes.txt"]);
    }
}
