//! Per-request session: user identity, idle-timeout clock, lazily built
//! encrypted store and the in-memory working set of the current run.
//!
//! Policy: idle timeout only. A session is still active when the idle gap
//! equals the timeout exactly and expires once the gap exceeds it.
//!
//! ```text
//! Active --(idle gap > timeout)--> Expired
//! Active --(cleanup)-------------> Closed
//! ```
//!
//! Expired and Closed are terminal. Cleanup of an expired session purges and
//! records the end but leaves the state at Expired.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::audit::{AuditAction, AuditLog};
use crate::config::AppConfig;
use crate::identity::Fingerprint;
use crate::pipeline::ExtractedContent;
use crate::store::EncryptedStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session expired after {idle_secs}s of inactivity")]
    Expired { idle_secs: u64 },

    #[error("Session is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Closed,
}

/// Idle-expiry rule shared by every check.
pub fn is_idle_expired(idle: Duration, timeout: Duration) -> bool {
    idle > timeout
}

/// Sensitive intermediates held for the duration of one run.
#[derive(Default)]
struct WorkingSet {
    documents: Vec<Fingerprint>,
    content: Option<ExtractedContent>,
}

impl WorkingSet {
    fn purge(&mut self) {
        if let Some(content) = self.content.as_mut() {
            content.zeroize();
        }
        self.content = None;
        self.documents.clear();
    }
}

pub struct Session {
    id: Uuid,
    user_id: String,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    idle_timeout: Duration,
    secret: Option<Zeroizing<String>>,
    fallback_dir: PathBuf,
    audit: Arc<AuditLog>,
    store: OnceLock<EncryptedStore>,
    state: SessionState,
    ended: bool,
    working: WorkingSet,
}

impl Session {
    /// Open a session and record its start.
    pub fn open(
        user_id: &str,
        secret: Option<String>,
        config: &AppConfig,
        audit: Arc<AuditLog>,
    ) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            last_activity: Instant::now(),
            idle_timeout: config.session_timeout,
            secret: secret.filter(|s| !s.is_empty()).map(Zeroizing::new),
            fallback_dir: config.fallback_dir.clone(),
            audit,
            store: OnceLock::new(),
            state: SessionState::Active,
            ended: false,
            working: WorkingSet::default(),
        };
        session
            .audit
            .record_access(&session.user_id, AuditAction::SessionStart, &session.id.to_string(), true);
        let encrypted = session.is_encrypted();
        tracing::info!(session_id = %session.id, encrypted, "Session opened");
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_encrypted(&self) -> bool {
        self.secret.is_some()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Gate for every content-touching operation: fails if expired or closed,
    /// otherwise refreshes the activity clock.
    pub fn ensure_active(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Expired => {
                return Err(SessionError::Expired {
                    idle_secs: self.last_activity.elapsed().as_secs(),
                })
            }
            SessionState::Active => {}
        }

        let idle = self.last_activity.elapsed();
        if is_idle_expired(idle, self.idle_timeout) {
            self.state = SessionState::Expired;
            self.working.purge();
            self.audit.record_access(
                &self.user_id,
                AuditAction::SessionTimeout,
                &self.id.to_string(),
                false,
            );
            tracing::warn!(session_id = %self.id, idle_secs = idle.as_secs(), "Session expired");
            return Err(SessionError::Expired {
                idle_secs: idle.as_secs(),
            });
        }

        self.last_activity = Instant::now();
        Ok(())
    }

    /// Encrypted store for this session, built on first use.
    pub fn store(&self) -> &EncryptedStore {
        self.store.get_or_init(|| {
            EncryptedStore::new(
                self.secret.as_ref().map(|s| s.as_str()),
                self.fallback_dir.clone(),
                Arc::clone(&self.audit),
                &self.user_id,
            )
        })
    }

    /// Track a document loaded in this session.
    pub fn register_document(&mut self, fingerprint: Fingerprint) {
        self.working.documents.push(fingerprint);
    }

    pub fn documents(&self) -> &[Fingerprint] {
        &self.working.documents
    }

    /// Park the current run's extracted content so cleanup can purge it.
    pub fn hold_content(&mut self, content: ExtractedContent) {
        if let Some(previous) = self.working.content.as_mut() {
            previous.zeroize();
        }
        self.working.content = Some(content);
    }

    pub fn content(&self) -> Option<&ExtractedContent> {
        self.working.content.as_ref()
    }

    pub fn content_mut(&mut self) -> Option<&mut ExtractedContent> {
        self.working.content.as_mut()
    }

    /// Zeroize and drop the held content, keeping the session open.
    pub fn release_content(&mut self) {
        if let Some(content) = self.working.content.as_mut() {
            content.zeroize();
        }
        self.working.content = None;
    }

    /// End the session: purge working state and record the end. Idempotent.
    pub fn cleanup(&mut self) {
        if self.ended {
            return;
        }
        self.working.purge();
        self.ended = true;
        if self.state == SessionState::Active {
            self.state = SessionState::Closed;
        }
        self.audit
            .record_access(&self.user_id, AuditAction::SessionEnd, &self.id.to_string(), true);
        tracing::info!(session_id = %self.id, "Session closed");
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&mut self, by: Duration) {
        if let Some(earlier) = self.last_activity.checked_sub(by) {
            self.last_activity = earlier;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state)
            .field("encrypted", &self.secret.is_some())
            .finish()
    }
}
