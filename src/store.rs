//! Encrypted-at-rest persistence for analysis artifacts.
//!
//! With a secret, artifacts are serialized to JSON, sealed with AES-256-GCM
//! under a PBKDF2-derived key and written to `<target>.enc`. Without one the
//! store deliberately writes plain JSON to `<target>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLog};
use crate::crypto::{secure_delete_file, CryptoError, EncryptedData, StoreKey};

const ENCRYPTED_SUFFIX: &str = ".enc";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Artifact target has no file name: {0}")]
    InvalidTarget(PathBuf),

    #[error("Neither {target} nor fallback {fallback} is writable: {source}")]
    Unwritable {
        target: PathBuf,
        fallback: PathBuf,
        source: std::io::Error,
    },
}

/// Where and how an artifact was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub encrypted: bool,
    /// True when the primary target was unwritable and the fallback was used.
    pub used_fallback: bool,
}

/// Which sibling artifacts a secure delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub plain_removed: bool,
    pub encrypted_removed: bool,
}

impl DeleteOutcome {
    pub fn removed_any(&self) -> bool {
        self.plain_removed || self.encrypted_removed
    }
}

/// Encrypted sibling path: `<target>.enc`.
pub fn encrypted_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(ENCRYPTED_SUFFIX);
    PathBuf::from(name)
}

/// Resource name safe for the audit trail (basename only).
fn audit_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "<unnamed>".to_string())
}

pub struct EncryptedStore {
    key: Option<StoreKey>,
    fallback_dir: PathBuf,
    audit: Arc<AuditLog>,
    user_id: String,
}

impl EncryptedStore {
    /// Build a store. `secret = None` selects plain mode.
    pub fn new(
        secret: Option<&str>,
        fallback_dir: PathBuf,
        audit: Arc<AuditLog>,
        user_id: &str,
    ) -> Self {
        let key = secret.filter(|s| !s.is_empty()).map(StoreKey::derive);
        Self {
            key,
            fallback_dir,
            audit,
            user_id: user_id.to_string(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    /// Serialize, optionally encrypt, and write `data` for `target`.
    pub fn save<T: Serialize>(&self, data: &T, target: &Path) -> Result<SavedArtifact, StoreError> {
        if target.file_name().is_none() {
            self.audit
                .record_access(&self.user_id, AuditAction::ReportSave, &audit_name(target), false);
            return Err(StoreError::InvalidTarget(target.to_path_buf()));
        }
        let (bytes, path) = match &self.key {
            Some(key) => {
                let json = serde_json::to_vec(data)?;
                (key.encrypt(&json)?.to_bytes(), encrypted_path(target))
            }
            None => (serde_json::to_vec_pretty(data)?, target.to_path_buf()),
        };
        let encrypted = self.key.is_some();

        match write_file(&path, &bytes) {
            Ok(()) => {
                self.audit
                    .record_access(&self.user_id, AuditAction::ReportSave, &audit_name(&path), true);
                tracing::info!(path = %path.display(), encrypted, "Artifact saved");
                Ok(SavedArtifact {
                    path,
                    encrypted,
                    used_fallback: false,
                })
            }
            Err(primary_err) => {
                let fallback = self.fallback_dir.join(fallback_name(&path));
                tracing::warn!(
                    target_path = %path.display(),
                    fallback = %fallback.display(),
                    "Primary target not writable: {primary_err}"
                );
                self.audit.record_access(
                    &self.user_id,
                    AuditAction::StorageFallback,
                    &audit_name(&path),
                    false,
                );

                match write_file(&fallback, &bytes) {
                    Ok(()) => {
                        self.audit.record_access(
                            &self.user_id,
                            AuditAction::ReportSave,
                            &audit_name(&fallback),
                            true,
                        );
                        Ok(SavedArtifact {
                            path: fallback,
                            encrypted,
                            used_fallback: true,
                        })
                    }
                    Err(source) => {
                        self.audit.record_access(
                            &self.user_id,
                            AuditAction::ReportSave,
                            &audit_name(&path),
                            false,
                        );
                        Err(StoreError::Unwritable {
                            target: path,
                            fallback,
                            source,
                        })
                    }
                }
            }
        }
    }

    /// Load an artifact, preferring the encrypted sibling when a key is set.
    /// Returns `Ok(None)` when nothing readable exists for `target`.
    pub fn load<T: DeserializeOwned>(&self, target: &Path) -> Result<Option<T>, StoreError> {
        let enc_path = encrypted_path(target);

        match &self.key {
            Some(key) if enc_path.exists() => {
                let loaded = fs::read(&enc_path)
                    .map_err(StoreError::from)
                    .and_then(|bytes| Ok(EncryptedData::from_bytes(&bytes)?))
                    .and_then(|sealed| Ok(key.decrypt(&sealed)?))
                    .and_then(|json| Ok(serde_json::from_slice(&json)?));
                self.audit.record_access(
                    &self.user_id,
                    AuditAction::ReportLoad,
                    &audit_name(&enc_path),
                    loaded.is_ok(),
                );
                loaded.map(Some)
            }
            _ if target.exists() => {
                let loaded = fs::read(target)
                    .map_err(StoreError::from)
                    .and_then(|bytes| Ok(serde_json::from_slice(&bytes)?));
                self.audit.record_access(
                    &self.user_id,
                    AuditAction::ReportLoad,
                    &audit_name(target),
                    loaded.is_ok(),
                );
                loaded.map(Some)
            }
            _ => {
                if self.key.is_none() && enc_path.exists() {
                    tracing::warn!(
                        path = %enc_path.display(),
                        "Encrypted artifact present but encryption is disabled for this store"
                    );
                }
                self.audit
                    .record_access(&self.user_id, AuditAction::ReportLoad, &audit_name(target), false);
                Ok(None)
            }
        }
    }

    /// Multi-pass overwrite and removal of both plain and encrypted siblings.
    pub fn secure_delete(&self, target: &Path) -> Result<DeleteOutcome, StoreError> {
        let enc_path = encrypted_path(target);
        let mut outcome = DeleteOutcome::default();

        for (path, slot) in [
            (target.to_path_buf(), &mut outcome.plain_removed),
            (enc_path, &mut outcome.encrypted_removed),
        ] {
            match secure_delete_file(&path) {
                Ok(removed) => {
                    *slot = removed;
                    if removed {
                        self.audit.record_access(
                            &self.user_id,
                            AuditAction::ReportDelete,
                            &audit_name(&path),
                            true,
                        );
                    }
                }
                Err(e) => {
                    self.audit.record_access(
                        &self.user_id,
                        AuditAction::ReportDelete,
                        &audit_name(&path),
                        false,
                    );
                    return Err(e.into());
                }
            }
        }

        if !outcome.removed_any() {
            self.audit
                .record_access(&self.user_id, AuditAction::ReportDelete, &audit_name(target), false);
        }
        Ok(outcome)
    }
}

/// Unique name in the shared fallback directory, original basename kept as suffix.
fn fallback_name(path: &Path) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("{}-{}", &short[..8], audit_name(path))
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes)
}
