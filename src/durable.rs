//! Durable file primitives: atomic replace, directory sync, `.tmp` resolution.
//!
//! Every rename or create that must survive a crash is followed by
//! [`sync_dir`] on the containing directory before any step that depends
//! on it.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Suffix of files that have not been made durable yet.
pub const TMP_SUFFIX: &str = ".tmp";

/// `path` with [`TMP_SUFFIX`] appended to its file name.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

/// Open options for a file that must not already exist.
pub fn create_new_options() -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts
}

/// Replace `path` with `data` so that a crash leaves either the old or the
/// new contents.
///
/// The data goes to `path.tmp` (exclusive create) and is synced along with
/// the directory before the old file is removed and the rename lands. A
/// stale `path.tmp` from a crash is resolved by [`resolve_tmp`] at startup.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    let tmp = tmp_path_for(path);

    let mut file = create_new_options()
        .open(&tmp)
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(data).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);
    sync_dir(dir)?;

    remove_if_exists(path)?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    sync_dir(dir)?;
    debug!(path = %path.display(), bytes = data.len(), "Atomic write complete");
    Ok(())
}

/// Settle a `path.tmp` left by an interrupted [`atomic_write`].
///
/// If `path` is missing, the old file had been removed and the rename never
/// landed, so the fully synced `.tmp` is promoted. Otherwise the `.tmp` was
/// never committed and is discarded.
pub fn resolve_tmp(tmp: &Path) -> Result<()> {
    let Some(target) = strip_tmp_suffix(tmp) else {
        return Ok(());
    };
    if !tmp.exists() {
        return Ok(());
    }
    match fs::symlink_metadata(&target) {
        Ok(_) => {
            info!(path = %tmp.display(), "Discarding uncommitted temp file");
            remove_if_exists(tmp)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %target.display(), "Promoting completed temp file");
            fs::rename(tmp, &target).map_err(|e| StoreError::io(&target, e))?;
        }
        Err(e) => return Err(StoreError::io(&target, e)),
    }
    sync_dir(parent_dir(tmp))
}

/// Apply [`resolve_tmp`] to every `.tmp` entry of `dir` whose name starts
/// with `prefix`.
pub fn resolve_tmp_dir(dir: &Path, prefix: &str) -> Result<usize> {
    let mut count = 0;
    for name in read_dir_names(dir)? {
        if name.starts_with(prefix) && name.ends_with(TMP_SUFFIX) {
            resolve_tmp(&dir.join(&name))?;
            count += 1;
        }
    }
    Ok(count)
}

/// Fsync a directory so renames and creates inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let fd = File::open(dir).map_err(|e| StoreError::io(dir, e))?;
        fd.sync_all().map_err(|e| StoreError::io(dir, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

/// Remove a file, treating "not found" as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// File names in `dir`, sorted. Non-UTF-8 names are skipped.
pub fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map_err(|e| StoreError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_owned))
        .collect();
    names.sort();
    Ok(names)
}

fn strip_tmp_suffix(path: &Path) -> Option<PathBuf> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    let base = name.strip_suffix(TMP_SUFFIX)?;
    Some(path.with_file_name(base))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_resolve_tmp_promotes_when_target_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forward_T1");
        fs::write(tmp_path_for(&path), b"[]").unwrap();
        resolve_tmp(&tmp_path_for(&path)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[]");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_resolve_tmp_discards_when_target_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forward_T1");
        fs::write(&path, b"old").unwrap();
        fs::write(tmp_path_for(&path), b"new").unwrap();
        fs::write(dir.path().join("T1_5.tmp"), b"draft").unwrap();
        assert_eq!(resolve_tmp_dir(dir.path(), "forward_").unwrap(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"old");
        assert!(!tmp_path_for(&path).exists());
        assert!(dir.path().join("T1_5.tmp").exists());
    }

    #[test]
    fn test_atomic_write_rejects_stale_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        fs::write(tmp_path_for(&path), b"stale").unwrap();
        assert!(atomic_write(&path, b"data").is_err());
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
    }
}
