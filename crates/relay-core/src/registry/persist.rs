//! Write-to-temp-then-rename. Readers of the target path observe either the old or the
//! new content, never a torn write.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sibling temp path: `users.json` → `users.json.tmp`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write and fsync the temp file. The target is untouched.
pub fn write_temp(target: &Path, bytes: &[u8]) -> std::io::Result<PathBuf> {
    let tmp = temp_path(target);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

/// Rename the temp file over the target.
pub fn commit(tmp: &Path, target: &Path) -> std::io::Result<()> {
    if let Err(e) = fs::rename(tmp, target) {
        let _ = fs::remove_file(tmp);
        return Err(e);
    }
    Ok(())
}

pub fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = write_temp(target, bytes)?;
    commit(&tmp, target)
}

/// Remove a temp file left behind by an interrupted write. Returns true if one existed.
pub fn discard_stale_temp(target: &Path) -> bool {
    let tmp = temp_path(target);
    if tmp.exists() {
        match fs::remove_file(&tmp) {
            Ok(()) => {
                tracing::warn!(target: "relay::registry", path = %tmp.display(), "discarded interrupted write");
                return true;
            }
            Err(e) => {
                tracing::warn!(target: "relay::registry", path = %tmp.display(), error = %e, "could not remove stale temp file");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("users.json");
        write_atomic(&target, b"one").unwrap();
        write_atomic(&target, b"two").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"two");
        assert!(!temp_path(&target).exists());
    }

    #[test]
    fn uncommitted_temp_leaves_target_alone() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("users.json");
        write_atomic(&target, b"before").unwrap();
        let tmp = write_temp(&target, b"after").unwrap();
        assert!(tmp.exists());
        assert_eq!(fs::read(&target).unwrap(), b"before");
        assert!(discard_stale_temp(&target));
        assert!(!tmp.exists());
    }

    #[test]
    fn failed_rename_removes_temp_and_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the target cannot be replaced by a rename.
        let target = dir.path().join("users.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        assert!(write_atomic(&target, b"new").is_err());
        assert!(!temp_path(&target).exists());
        assert_eq!(fs::read(target.join("keep")).unwrap(), b"x");
    }
}
