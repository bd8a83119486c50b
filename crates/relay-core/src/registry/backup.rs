//! Timestamped registry backups with retention.
//!
//! Backups are named `users_backup_YYYYmmdd_HHMMSS.mmm.json` (UTC). Older names without the
//! millisecond part still parse. Ordering uses the parsed time, with the file name breaking ties.

use super::document::RegistryDocument;
use super::persist;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::fs;
use std::path::{Path, PathBuf};

pub const BACKUP_PREFIX: &str = "users_backup_";
const BACKUP_EXT: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S%.3f";
const LEGACY_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_INTERVAL_HOURS: u64 = 100 * 365 * 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BackupRotation {
    dir: PathBuf,
    interval: Duration,
    retention: usize,
}

impl BackupRotation {
    pub fn new(dir: impl Into<PathBuf>, interval_hours: u64, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            interval: Duration::hours(interval_hours.min(MAX_INTERVAL_HOURS) as i64),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All backups, oldest first.
    pub fn list(&self) -> std::io::Result<Vec<BackupEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stamp) = name
                .strip_prefix(BACKUP_PREFIX)
                .and_then(|rest| rest.strip_suffix(BACKUP_EXT))
            else {
                continue;
            };
            let taken_at = parse_stamp(stamp)
                .or_else(|| modified_at(&entry.path()))
                .unwrap_or_else(Utc::now);
            entries.push(BackupEntry {
                path: entry.path(),
                taken_at,
            });
        }
        entries.sort_by(|a, b| {
            a.taken_at
                .cmp(&b.taken_at)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        });
        Ok(entries)
    }

    pub fn latest(&self) -> std::io::Result<Option<BackupEntry>> {
        Ok(self.list()?.pop())
    }

    /// True when no backup exists or the newest is at least one interval old.
    pub fn due(&self, now: DateTime<Utc>) -> std::io::Result<bool> {
        Ok(match self.latest()? {
            None => true,
            Some(latest) => now - latest.taken_at >= self.interval,
        })
    }

    /// Write a new backup atomically, then prune beyond retention.
    pub fn create(&self, bytes: &[u8], now: DateTime<Utc>) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let mut stamp_time = now;
        let mut path = self.path_for(stamp_time);
        while path.exists() {
            stamp_time += Duration::milliseconds(1);
            path = self.path_for(stamp_time);
        }
        persist::write_atomic(&path, bytes)?;
        tracing::info!(target: "relay::registry", path = %path.display(), "backup created");
        self.prune()?;
        Ok(path)
    }

    /// Delete the oldest backups beyond the retention count.
    pub fn prune(&self) -> std::io::Result<Vec<PathBuf>> {
        let entries = self.list()?;
        let excess = entries.len().saturating_sub(self.retention);
        let mut removed = Vec::with_capacity(excess);
        for entry in entries.into_iter().take(excess) {
            fs::remove_file(&entry.path)?;
            tracing::debug!(target: "relay::registry", path = %entry.path.display(), "old backup removed");
            removed.push(entry.path);
        }
        Ok(removed)
    }

    /// Newest backup that parses and verifies. Walks backups newest-first exactly once.
    pub fn newest_valid(&self) -> std::io::Result<Option<(PathBuf, RegistryDocument)>> {
        for entry in self.list()?.into_iter().rev() {
            let bytes = match fs::read(&entry.path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(target: "relay::registry", path = %entry.path.display(), error = %e, "backup unreadable");
                    continue;
                }
            };
            match RegistryDocument::from_slice(&bytes) {
                Ok(doc) => return Ok(Some((entry.path, doc))),
                Err(e) => {
                    tracing::warn!(target: "relay::registry", path = %entry.path.display(), error = %e, "backup failed verification");
                }
            }
        }
        Ok(None)
    }

    fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{BACKUP_PREFIX}{}{BACKUP_EXT}",
            at.format(STAMP_FORMAT)
        ))
    }
}

fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, LEGACY_STAMP_FORMAT))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_sort_chronologically_and_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = BackupRotation::new(dir.path(), 24, 10);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        rotation.create(b"{}", t0).unwrap();
        rotation.create(b"{}", t0 + Duration::hours(1)).unwrap();
        let list = rotation.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].taken_at, t0);
        assert_eq!(list[1].taken_at, t0 + Duration::hours(1));
    }

    #[test]
    fn second_precision_names_order_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = BackupRotation::new(dir.path(), 24, 10);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 12, 0, 0).unwrap();
        let legacy = dir.path().join("users_backup_20260102_120000.json");
        fs::write(&legacy, b"{}").unwrap();
        let newer = rotation
            .create(b"{}", t0 + Duration::milliseconds(123))
            .unwrap();

        let list = rotation.list().unwrap();
        assert_eq!(list[0].path, legacy);
        assert_eq!(list[0].taken_at, t0);
        assert_eq!(rotation.latest().unwrap().unwrap().path, newer);
    }

    #[test]
    fn same_instant_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = BackupRotation::new(dir.path(), 24, 10);
        let t0 = Utc::now();
        let a = rotation.create(b"{}", t0).unwrap();
        let b = rotation.create(b"{}", t0).unwrap();
        assert_ne!(a, b);
        assert_eq!(rotation.list().unwrap().len(), 2);
    }

    #[test]
    fn retention_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = BackupRotation::new(dir.path(), 24, 3);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            rotation.create(b"{}", t0 + Duration::minutes(i)).unwrap();
        }
        let list = rotation.list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].taken_at, t0 + Duration::minutes(2));
    }

    #[test]
    fn due_respects_interval() {
        let dir = tempfile::tempdir().unwrap();
        let rotation = BackupRotation::new(dir.path(), 24, 3);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(rotation.due(t0).unwrap());
        rotation.create(b"{}", t0).unwrap();
        assert!(!rotation.due(t0 + Duration::hours(23)).unwrap());
        assert!(rotation.due(t0 + Duration::hours(24)).unwrap());
    }

    #[test]
    fn legacy_names_parse() {
        let t = parse_stamp("20250101_120000").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
    }
}
