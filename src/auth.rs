//! Persisted session: bearer token plus user identity.
//!
//! ARCHITECTURE
//! ============
//! The store is a small JSON file. Every HTTP call reads the bearer token
//! from it; with no token and guest mode on, the guest sentinel is sent
//! instead. A `401` from the backend clears both token and identity, which
//! also moves the duplex correlation id back to the guest marker.

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Token sent when guest mode is active and no user token is stored.
pub const GUEST_TOKEN: &str = "guest-access-token";
/// Duplex correlation id used when no user is signed in.
pub const GUEST_CORRELATION_ID: &str = "guest_user";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<UserIdentity>,
}

pub struct SessionStore {
    path: Option<PathBuf>,
    guest_mode: bool,
    session: Mutex<StoredSession>,
}

impl SessionStore {
    /// Load the session file at `path`. A missing file is an empty session;
    /// an unreadable one is logged and treated as empty.
    #[must_use]
    pub fn open(path: &Path, guest_mode: bool) -> Self {
        let session = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed session file");
                StoredSession::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredSession::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "session file unreadable");
                StoredSession::default()
            }
        };
        Self { path: Some(path.to_owned()), guest_mode, session: Mutex::new(session) }
    }

    /// Store that never touches disk.
    #[must_use]
    pub fn in_memory(guest_mode: bool) -> Self {
        Self { path: None, guest_mode, session: Mutex::new(StoredSession::default()) }
    }

    /// Token for the `Authorization` header, or `None` when anonymous.
    #[must_use]
    pub fn bearer_token(&self) -> Option<String> {
        let session = self.lock();
        match &session.token {
            Some(token) => Some(token.clone()),
            None if self.guest_mode => Some(GUEST_TOKEN.to_owned()),
            None => None,
        }
    }

    /// Signed-in user id, or the guest marker.
    #[must_use]
    pub fn correlation_id(&self) -> String {
        self.lock().user.as_ref().map_or_else(|| GUEST_CORRELATION_ID.to_owned(), |u| u.id.clone())
    }

    #[must_use]
    pub fn user(&self) -> Option<UserIdentity> {
        self.lock().user.clone()
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.lock().token.is_none()
    }

    /// Persist a signed-in session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] when the file cannot be written.
    pub fn sign_in(&self, token: String, user: UserIdentity) -> Result<(), ClientError> {
        let mut session = self.lock();
        tracing::info!(user_id = %user.id, "session stored");
        *session = StoredSession { token: Some(token), user: Some(user) };
        self.persist(&session)
    }

    /// Drop token and identity (explicit logout, or a `401`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] when the file cannot be removed.
    pub fn clear(&self) -> Result<(), ClientError> {
        let mut session = self.lock();
        *session = StoredSession::default();
        tracing::info!("session cleared");
        let Some(path) = &self.path else {
            return Ok(());
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Storage(format!("remove {}: {e}", path.display()))),
        }
    }

    fn persist(&self, session: &StoredSession) -> Result<(), ClientError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let text = serde_json::to_string_pretty(session).map_err(|e| ClientError::Storage(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| ClientError::Storage(format!("write {}: {e}", path.display())))
    }

    fn lock(&self) -> MutexGuard<'_, StoredSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
