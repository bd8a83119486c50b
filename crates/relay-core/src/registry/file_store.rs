//! File-backed [`UserRegistry`].
//!
//! Layout under `data_dir`:
//!
//! ```text
//! users/users.json                       canonical document
//! users/users.json.tmp                   in-flight write (discarded on open)
//! backups/users_backup_<stamp>.json      rotated backups
//! ```
//!
//! Mutations clone the in-memory document, apply the change, persist the clone atomically,
//! and only then swap it in. A failed write leaves both memory and disk at the old state.

use super::backup::BackupRotation;
use super::document::RegistryDocument;
use super::persist;
use super::{
    HealthStatus, NewUser, RegistryStatistics, UserRecord, UserRegistry, UserUpdate,
};
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const DOCUMENT_FILE: &str = "users.json";

/// How the document came to be in memory at open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Canonical document parsed and verified.
    Loaded,
    /// No canonical document existed; an empty one was created.
    Fresh,
    /// Canonical document failed verification; restored from this backup.
    Restored(PathBuf),
    /// Canonical document failed verification and no valid backup existed.
    Reinitialized,
}

pub struct FileUserRegistry {
    data_dir: PathBuf,
    document_path: PathBuf,
    backups: BackupRotation,
    doc: RwLock<RegistryDocument>,
    origin: LoadOrigin,
}

impl std::fmt::Debug for FileUserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileUserRegistry")
            .field("document_path", &self.document_path)
            .field("origin", &self.origin)
            .finish()
    }
}

impl FileUserRegistry {
    /// Open (or create) the registry under `config.data_dir`, recovering from backups
    /// when the canonical document fails verification.
    pub fn open(config: &RegistryConfig) -> RegistryResult<Self> {
        let data_dir = config.data_dir.clone();
        let users_dir = data_dir.join("users");
        fs::create_dir_all(&users_dir)?;
        fs::create_dir_all(data_dir.join("backups"))?;

        let document_path = users_dir.join(DOCUMENT_FILE);
        persist::discard_stale_temp(&document_path);

        let backups = BackupRotation::new(
            data_dir.join("backups"),
            config.backup_interval_hours,
            config.backup_retention,
        );
        let (doc, origin) = load_or_recover(&document_path, &backups)?;
        tracing::info!(
            target: "relay::registry",
            path = %document_path.display(),
            users = doc.users.len(),
            origin = ?origin,
            "registry opened"
        );

        let registry = Self {
            data_dir,
            document_path,
            backups,
            doc: RwLock::new(doc),
            origin,
        };
        let now = Utc::now();
        let bytes = registry.read()?.to_bytes()?;
        registry.backup_if_due(&bytes, now);
        Ok(registry)
    }

    pub fn load_origin(&self) -> &LoadOrigin {
        &self.origin
    }

    pub fn document_path(&self) -> &Path {
        &self.document_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Take a backup now, regardless of the interval.
    pub fn force_backup(&self) -> RegistryResult<PathBuf> {
        let guard = self.read()?;
        let bytes = guard.to_bytes()?;
        Ok(self.backups.create(&bytes, Utc::now())?)
    }

    /// Write every record to `path` as a JSON array. Returns the number exported.
    pub fn export_json(&self, path: &Path) -> RegistryResult<usize> {
        let records = self.export_all()?;
        let bytes = serde_json::to_vec_pretty(&records)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        persist::write_atomic(path, &bytes)?;
        tracing::info!(target: "relay::registry", path = %path.display(), count = records.len(), "users exported");
        Ok(records.len())
    }

    /// Name for greetings; falls back to the id. Does not count as an interaction.
    pub fn display_name(&self, user_id: &str) -> String {
        self.read()
            .ok()
            .and_then(|doc| doc.users.get(user_id).map(|r| r.name.clone()))
            .unwrap_or_else(|| user_id.to_string())
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, RegistryDocument>> {
        self.doc.read().map_err(|_| RegistryError::Lock)
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, RegistryDocument>> {
        self.doc.write().map_err(|_| RegistryError::Lock)
    }

    fn mutate<T, F>(&self, op: F) -> RegistryResult<T>
    where
        F: FnOnce(&mut RegistryDocument, DateTime<Utc>) -> RegistryResult<T>,
    {
        let mut guard = self.write()?;
        let now = Utc::now();
        let mut next = guard.clone();
        let out = op(&mut next, now)?;
        self.commit(&mut guard, next, now)?;
        Ok(out)
    }

    /// Resolve an identity under the write lock and bump its counters.
    fn lookup<F>(&self, resolve: F) -> RegistryResult<Option<UserRecord>>
    where
        F: FnOnce(&RegistryDocument) -> Option<String>,
    {
        let mut guard = self.write()?;
        let Some(user_id) = resolve(&guard) else {
            return Ok(None);
        };
        let now = Utc::now();
        let mut next = guard.clone();
        let Some(record) = next.touch(&user_id, now) else {
            return Ok(None);
        };
        self.commit(&mut guard, next, now)?;
        Ok(Some(record))
    }

    fn commit(
        &self,
        current: &mut RegistryDocument,
        mut next: RegistryDocument,
        now: DateTime<Utc>,
    ) -> RegistryResult<()> {
        next.stamp(now);
        let bytes = next.to_bytes()?;
        if let Err(e) = persist::write_atomic(&self.document_path, &bytes) {
            tracing::error!(target: "relay::registry", error = %e, "registry write failed");
            return Err(e.into());
        }
        *current = next;
        self.backup_if_due(&bytes, now);
        Ok(())
    }

    fn backup_if_due(&self, bytes: &[u8], now: DateTime<Utc>) {
        match self.backups.due(now) {
            Ok(true) => {
                if let Err(e) = self.backups.create(bytes, now) {
                    tracing::warn!(target: "relay::registry", error = %e, "scheduled backup failed");
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(target: "relay::registry", error = %e, "could not inspect backups");
            }
        }
    }

    fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.backups.latest().ok().flatten().map(|b| b.taken_at)
    }
}

fn load_or_recover(
    path: &Path,
    backups: &BackupRotation,
) -> RegistryResult<(RegistryDocument, LoadOrigin)> {
    if !path.exists() {
        let doc = RegistryDocument::empty(Utc::now());
        persist::write_atomic(path, &doc.to_bytes()?)?;
        return Ok((doc, LoadOrigin::Fresh));
    }

    let bytes = fs::read(path)?;
    let problem = match RegistryDocument::from_slice(&bytes) {
        Ok(doc) => return Ok((doc, LoadOrigin::Loaded)),
        Err(problem) => problem,
    };
    tracing::warn!(target: "relay::registry", path = %path.display(), error = %problem, "registry document failed verification");

    let corrupt_copy = path.with_extension("json.corrupt");
    if let Err(e) = fs::write(&corrupt_copy, &bytes) {
        tracing::warn!(target: "relay::registry", error = %e, "could not preserve corrupted document");
    }

    match backups.newest_valid()? {
        Some((backup_path, doc)) => {
            persist::write_atomic(path, &doc.to_bytes()?)?;
            tracing::warn!(target: "relay::registry", backup = %backup_path.display(), users = doc.users.len(), "registry restored from backup");
            Ok((doc, LoadOrigin::Restored(backup_path)))
        }
        None => {
            let doc = RegistryDocument::empty(Utc::now());
            persist::write_atomic(path, &doc.to_bytes()?)?;
            tracing::error!(
                target: "relay::registry",
                path = %path.display(),
                preserved = %corrupt_copy.display(),
                "no valid backup; registry reinitialized empty, previous users lost"
            );
            Ok((doc, LoadOrigin::Reinitialized))
        }
    }
}

impl UserRegistry for FileUserRegistry {
    fn add(&self, user: NewUser) -> RegistryResult<UserRecord> {
        let user_id = user.user_id.trim().to_string();
        let record = self.mutate(|doc, now| {
            if doc.users.contains_key(&user_id) {
                tracing::info!(target: "relay::registry", user_id = %user_id, "user exists, updating");
                doc.apply_update(&user_id, user.as_update(), now)
            } else {
                doc.insert_new(user, now)
            }
        })?;
        tracing::info!(target: "relay::registry", user_id = %record.user_id, name = %record.name, "user saved");
        Ok(record)
    }

    fn get_by_id(&self, user_id: &str) -> RegistryResult<Option<UserRecord>> {
        self.lookup(|doc| doc.users.contains_key(user_id).then(|| user_id.to_string()))
    }

    fn get_by_email(&self, email: &str) -> RegistryResult<Option<UserRecord>> {
        self.lookup(|doc| doc.owner_of_email(email).map(str::to_string))
    }

    fn get_by_name(&self, name: &str) -> RegistryResult<Option<UserRecord>> {
        self.lookup(|doc| doc.owner_of_name(name).map(str::to_string))
    }

    fn update(&self, user_id: &str, update: UserUpdate) -> RegistryResult<UserRecord> {
        let record = self.mutate(|doc, now| doc.apply_update(user_id, update, now))?;
        tracing::info!(target: "relay::registry", user_id, "user updated");
        Ok(record)
    }

    fn delete(&self, user_id: &str) -> RegistryResult<UserRecord> {
        let record = self.mutate(|doc, _| doc.remove(user_id))?;
        tracing::info!(target: "relay::registry", user_id, "user deleted");
        Ok(record)
    }

    fn search(&self, query: &str) -> RegistryResult<Vec<UserRecord>> {
        let needle = query.to_lowercase();
        let doc = self.read()?;
        Ok(doc
            .users
            .values()
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || r
                        .email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn is_registered(&self, user_id: &str) -> RegistryResult<bool> {
        Ok(self.read()?.users.contains_key(user_id))
    }

    fn statistics(&self) -> RegistryResult<RegistryStatistics> {
        let mut stats = {
            let doc = self.read()?;
            RegistryStatistics::from_records(doc.users.values())
        };
        stats.data_dir = Some(self.data_dir.clone());
        stats.last_backup = self.last_backup();
        Ok(stats)
    }

    fn health_status(&self) -> RegistryResult<HealthStatus> {
        let (total_users, integrity_error) = {
            let doc = self.read()?;
            (doc.users.len(), doc.verify().err().map(|e| e.to_string()))
        };
        let meta = fs::metadata(&self.document_path).ok();
        let backups = self.backups.list().unwrap_or_default();
        let document_exists = meta.is_some();
        Ok(HealthStatus {
            healthy: document_exists && integrity_error.is_none(),
            document_exists,
            document_bytes: meta.map(|m| m.len()).unwrap_or(0),
            total_users,
            backup_count: backups.len(),
            last_backup: backups.last().map(|b| b.taken_at),
            integrity_error,
        })
    }

    fn export_all(&self) -> RegistryResult<Vec<UserRecord>> {
        Ok(self.read()?.users.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_in(dir: &Path) -> FileUserRegistry {
        FileUserRegistry::open(&RegistryConfig::in_dir(dir)).unwrap()
    }

    #[test]
    fn fresh_open_creates_layout_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let reg = open_in(dir.path());
        assert_eq!(reg.load_origin(), &LoadOrigin::Fresh);
        assert!(reg.document_path().exists());
        assert_eq!(reg.health_status().unwrap().backup_count, 1);
        assert!(reg.health_status().unwrap().healthy);
    }

    #[test]
    fn lookups_bump_counters_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let reg = open_in(dir.path());
        reg.add(NewUser::new("U1", "Alice").email("a@x.io")).unwrap();
        reg.get_by_id("U1").unwrap();
        let rec = reg.get_by_email("a@x.io").unwrap().unwrap();
        assert_eq!(rec.interaction_count, 2);
        assert!(reg.get_by_id("nobody").unwrap().is_none());
        assert!(!reg.is_registered("nobody").unwrap());

        drop(reg);
        let reopened = open_in(dir.path());
        assert_eq!(reopened.load_origin(), &LoadOrigin::Loaded);
        assert_eq!(reopened.export_all().unwrap()[0].interaction_count, 2);
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let dir = tempfile::tempdir().unwrap();
        let reg = open_in(dir.path());
        reg.add(NewUser::new("U1", "Alice")).unwrap();
        assert_eq!(reg.display_name("U1"), "Alice");
        assert_eq!(reg.display_name("U2"), "U2");
    }

    #[test]
    fn export_json_writes_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let reg = open_in(dir.path());
        reg.add(NewUser::new("U1", "Alice")).unwrap();
        reg.add(NewUser::new("U2", "Bob")).unwrap();
        let out = dir.path().join("exports").join("users.json");
        assert_eq!(reg.export_json(&out).unwrap(), 2);
        let parsed: Vec<UserRecord> =
            serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn failed_mutation_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let reg = open_in(dir.path());
        reg.add(NewUser::new("U1", "Alice").email("a@x.io")).unwrap();
        let before = fs::read(reg.document_path()).unwrap();
        assert!(reg.add(NewUser::new("U2", "Bob").email("a@x.io")).is_err());
        assert!(!reg.is_registered("U2").unwrap());
        assert_eq!(fs::read(reg.document_path()).unwrap(), before);
    }
}
