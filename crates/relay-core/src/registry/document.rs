//! The canonical registry document and its integrity rules.

use super::{NewUser, UserRecord, UserStatus, UserUpdate};
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DOCUMENT_VERSION: &str = "1.0";

const REQUIRED_SECTIONS: [&str; 4] = ["metadata", "users", "email_index", "name_index"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("document is not valid JSON: {0}")]
    Unparseable(String),

    #[error("missing required section '{0}'")]
    MissingSection(&'static str),

    #[error("{index} entry '{key}' points to '{owner}' which does not hold that value")]
    DanglingIndex {
        index: &'static str,
        key: String,
        owner: String,
    },

    #[error("user '{user_id}' has {index} value '{key}' that is not indexed to it")]
    UnindexedValue {
        index: &'static str,
        key: String,
        user_id: String,
    },

    #[error("user stored under '{key}' carries user_id '{user_id}'")]
    KeyMismatch { key: String, user_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub total_users: usize,
}

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

/// The whole persisted state. `BTreeMap` keeps serialization byte-stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    pub metadata: RegistryMetadata,
    pub users: BTreeMap<String, UserRecord>,
    pub email_index: BTreeMap<String, String>,
    pub name_index: BTreeMap<String, String>,
}

impl RegistryDocument {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            metadata: RegistryMetadata {
                created_at: now,
                last_updated: now,
                version: default_version(),
                total_users: 0,
            },
            users: BTreeMap::new(),
            email_index: BTreeMap::new(),
            name_index: BTreeMap::new(),
        }
    }

    /// Parse and fully verify a persisted document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IntegrityError> {
        let raw: Value =
            serde_json::from_slice(bytes).map_err(|e| IntegrityError::Unparseable(e.to_string()))?;
        for section in REQUIRED_SECTIONS {
            if raw.get(section).is_none() {
                return Err(IntegrityError::MissingSection(section));
            }
        }
        let doc: RegistryDocument =
            serde_json::from_value(raw).map_err(|e| IntegrityError::Unparseable(e.to_string()))?;
        doc.verify()?;
        Ok(doc)
    }

    pub fn to_bytes(&self) -> RegistryResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Both directions: every indexed key resolves to a record holding it, and every
    /// record's indexed values are present in the index pointing back to it.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        for (key, record) in &self.users {
            if &record.user_id != key {
                return Err(IntegrityError::KeyMismatch {
                    key: key.clone(),
                    user_id: record.user_id.clone(),
                });
            }
            if let Some(email) = record.email.as_deref() {
                if self.email_index.get(email) != Some(key) {
                    return Err(IntegrityError::UnindexedValue {
                        index: "email_index",
                        key: email.to_string(),
                        user_id: key.clone(),
                    });
                }
            }
            if !record.name.is_empty() && self.name_index.get(&record.name) != Some(key) {
                return Err(IntegrityError::UnindexedValue {
                    index: "name_index",
                    key: record.name.clone(),
                    user_id: key.clone(),
                });
            }
        }
        for (email, owner) in &self.email_index {
            let holds = self
                .users
                .get(owner)
                .map(|r| r.email.as_deref() == Some(email.as_str()))
                .unwrap_or(false);
            if !holds {
                return Err(IntegrityError::DanglingIndex {
                    index: "email_index",
                    key: email.clone(),
                    owner: owner.clone(),
                });
            }
        }
        for (name, owner) in &self.name_index {
            let holds = self
                .users
                .get(owner)
                .map(|r| &r.name == name)
                .unwrap_or(false);
            if !holds {
                return Err(IntegrityError::DanglingIndex {
                    index: "name_index",
                    key: name.clone(),
                    owner: owner.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn stamp(&mut self, now: DateTime<Utc>) {
        self.metadata.last_updated = now;
        self.metadata.total_users = self.users.len();
    }

    pub fn owner_of_email(&self, email: &str) -> Option<&str> {
        self.email_index.get(email).map(String::as_str)
    }

    pub fn owner_of_name(&self, name: &str) -> Option<&str> {
        self.name_index.get(name).map(String::as_str)
    }

    fn check_free(
        index: &BTreeMap<String, String>,
        field: &'static str,
        value: &str,
        user_id: &str,
    ) -> RegistryResult<()> {
        match index.get(value) {
            Some(owner) if owner != user_id => Err(RegistryError::Conflict {
                field,
                value: value.to_string(),
                owner: owner.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Insert a brand-new record. The identity must not exist yet.
    pub fn insert_new(&mut self, user: NewUser, now: DateTime<Utc>) -> RegistryResult<UserRecord> {
        let user_id = non_empty(&user.user_id, "user_id")?;
        let name = non_empty(&user.name, "name")?;
        let email = normalize(user.email);
        Self::check_free(&self.name_index, "name", &name, &user_id)?;
        if let Some(email) = email.as_deref() {
            Self::check_free(&self.email_index, "email", email, &user_id)?;
        }

        let record = UserRecord {
            user_id: user_id.clone(),
            name: name.clone(),
            email: email.clone(),
            phone: normalize(user.phone),
            extension: normalize(user.extension),
            metadata: user.metadata,
            status: UserStatus::Active,
            created_at: now,
            updated_at: None,
            last_active: now,
            interaction_count: 0,
        };
        if let Some(email) = email {
            self.email_index.insert(email, user_id.clone());
        }
        self.name_index.insert(name, user_id.clone());
        self.users.insert(user_id, record.clone());
        Ok(record)
    }

    /// Apply a partial update, moving index entries when an indexed field changes.
    pub fn apply_update(
        &mut self,
        user_id: &str,
        update: UserUpdate,
        now: DateTime<Utc>,
    ) -> RegistryResult<UserRecord> {
        let current = self
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(user_id.to_string()))?;

        let new_name = match update.name {
            Some(name) => Some(non_empty(&name, "name")?),
            None => None,
        };
        let new_email = normalize(update.email);
        if let Some(name) = new_name.as_deref() {
            Self::check_free(&self.name_index, "name", name, user_id)?;
        }
        if let Some(email) = new_email.as_deref() {
            Self::check_free(&self.email_index, "email", email, user_id)?;
        }

        let mut record = current;
        if let Some(name) = new_name {
            if name != record.name {
                self.name_index.remove(&record.name);
                self.name_index.insert(name.clone(), user_id.to_string());
                record.name = name;
            }
        }
        if let Some(email) = new_email {
            if record.email.as_deref() != Some(email.as_str()) {
                if let Some(old) = record.email.take() {
                    self.email_index.remove(&old);
                }
                self.email_index.insert(email.clone(), user_id.to_string());
                record.email = Some(email);
            }
        }
        if let Some(phone) = normalize(update.phone) {
            record.phone = Some(phone);
        }
        if let Some(extension) = normalize(update.extension) {
            record.extension = Some(extension);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        record.metadata.extend(update.metadata);
        record.updated_at = Some(now);

        self.users.insert(user_id.to_string(), record.clone());
        Ok(record)
    }

    /// Remove a record together with both of its index entries.
    pub fn remove(&mut self, user_id: &str) -> RegistryResult<UserRecord> {
        let record = self
            .users
            .remove(user_id)
            .ok_or_else(|| RegistryError::NotFound(user_id.to_string()))?;
        if let Some(email) = record.email.as_deref() {
            if self.email_index.get(email).map(String::as_str) == Some(user_id) {
                self.email_index.remove(email);
            }
        }
        if self.name_index.get(&record.name).map(String::as_str) == Some(user_id) {
            self.name_index.remove(&record.name);
        }
        Ok(record)
    }

    /// Bump interaction counters on a lookup hit.
    pub fn touch(&mut self, user_id: &str, now: DateTime<Utc>) -> Option<UserRecord> {
        let record = self.users.get_mut(user_id)?;
        record.last_active = now;
        record.interaction_count += 1;
        Some(record.clone())
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn non_empty(value: &str, field: &str) -> RegistryResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}
