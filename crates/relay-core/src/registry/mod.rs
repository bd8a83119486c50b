//! User registry: the durable store of registered identities.
//!
//! ## Contract
//!
//! [`UserRegistry`] is the storage-agnostic contract consulted by the registration gate.
//! Lookups return `Ok(None)` on a miss and bump the interaction counter on a hit.
//! Mutations on a missing user fail with [`RegistryError::NotFound`].
//!
//! ## File-backed implementation
//!
//! [`FileUserRegistry`] owns a single JSON document (`users/users.json`) holding
//! `metadata`, `users`, `email_index` and `name_index`. Every mutation rewrites the whole
//! document to a temp file and renames it over the canonical path. Backups are
//! timestamp-named copies under `backups/`, newest-first sortable by name.
//!
//! [`RegistryError::NotFound`]: crate::error::RegistryError::NotFound

mod backup;
mod document;
mod file_store;
mod persist;

pub use backup::{BackupEntry, BackupRotation, BACKUP_PREFIX};
pub use document::{IntegrityError, RegistryDocument, RegistryMetadata};
pub use file_store::{FileUserRegistry, LoadOrigin};

use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
}

/// One registered identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// External identity key (the messaging platform's user id).
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub interaction_count: u64,
}

/// Input for [`UserRegistry::add`].
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub extension: Option<String>,
    pub metadata: Map<String, Value>,
}

impl NewUser {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Re-adding an existing identity is an update with the same fields.
    pub fn as_update(&self) -> UserUpdate {
        UserUpdate {
            name: Some(self.name.clone()),
            email: self.email.clone(),
            phone: self.phone.clone(),
            extension: self.extension.clone(),
            status: None,
            metadata: self.metadata.clone(),
        }
    }
}

/// Partial update; `None` fields are left unchanged, metadata keys are merged.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub extension: Option<String>,
    pub status: Option<UserStatus>,
    pub metadata: Map<String, Value>,
}

impl UserUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn status(mut self, status: UserStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatistics {
    pub total_users: usize,
    pub active_users: usize,
    pub inactive_users: usize,
    pub total_interactions: u64,
    pub avg_interactions: f64,
    pub data_dir: Option<PathBuf>,
    pub last_backup: Option<DateTime<Utc>>,
}

impl RegistryStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UserRecord>) -> Self {
        let mut total_users = 0usize;
        let mut active_users = 0usize;
        let mut total_interactions = 0u64;
        for record in records {
            total_users += 1;
            if record.status == UserStatus::Active {
                active_users += 1;
            }
            total_interactions += record.interaction_count;
        }
        let avg_interactions = if total_users == 0 {
            0.0
        } else {
            total_interactions as f64 / total_users as f64
        };
        Self {
            total_users,
            active_users,
            inactive_users: total_users - active_users,
            total_interactions,
            avg_interactions,
            data_dir: None,
            last_backup: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub document_exists: bool,
    pub document_bytes: u64,
    pub total_users: usize,
    pub backup_count: usize,
    pub last_backup: Option<DateTime<Utc>>,
    /// Integrity problem found in the in-memory document, if any.
    pub integrity_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Storage-agnostic registry contract. A relational backend would implement the same
/// trait with row-level transactions in place of the single-writer lock.
pub trait UserRegistry: Send + Sync {
    /// Create a user, or update it when the identity already exists.
    fn add(&self, user: NewUser) -> RegistryResult<UserRecord>;

    fn get_by_id(&self, user_id: &str) -> RegistryResult<Option<UserRecord>>;

    fn get_by_email(&self, email: &str) -> RegistryResult<Option<UserRecord>>;

    fn get_by_name(&self, name: &str) -> RegistryResult<Option<UserRecord>>;

    fn update(&self, user_id: &str, update: UserUpdate) -> RegistryResult<UserRecord>;

    fn delete(&self, user_id: &str) -> RegistryResult<UserRecord>;

    /// Case-insensitive substring match on name or email.
    fn search(&self, query: &str) -> RegistryResult<Vec<UserRecord>>;

    /// Membership check without touching interaction counters.
    fn is_registered(&self, user_id: &str) -> RegistryResult<bool>;

    fn statistics(&self) -> RegistryResult<RegistryStatistics>;

    fn health_status(&self) -> RegistryResult<HealthStatus>;

    fn export_all(&self) -> RegistryResult<Vec<UserRecord>>;
}

/// Run a registry call on the blocking pool; file I/O stays off the async workers.
pub async fn run_blocking<T, F>(registry: Arc<dyn UserRegistry>, op: F) -> RegistryResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn UserRegistry) -> RegistryResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(registry.as_ref()))
        .await
        .unwrap_or_else(|e| Err(RegistryError::Io(std::io::Error::other(e.to_string()))))
}
