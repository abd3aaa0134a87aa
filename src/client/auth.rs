//! Authentication Collaborator
//!
//! The executor never manages credentials itself; it asks an
//! [`AuthProvider`] for a session and a bearer token on every attempt.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use crate::error::ApiError;

// == Auth Provider Trait ==
/// Source of session state and credentials.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Suspends until a session exists, or fails with [`ApiError::Auth`].
    async fn ensure_valid_session(&self) -> Result<(), ApiError>;

    /// Current bearer credential, `None` when there is no session.
    async fn token(&self) -> Option<String>;

    /// Device identifier sent alongside the credential, if any.
    async fn device_id(&self) -> Option<String>;

    /// Forgets the current session so the next call must re-authenticate.
    async fn invalidate_session(&self);
}

// == Static Token Auth ==
/// Provider backed by a token obtained elsewhere (environment, keychain, login flow).
///
/// Once invalidated it stays invalid until [`StaticTokenAuth::set_token`] is called.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    token: RwLock<Option<String>>,
    device_id: Option<String>,
}

impl StaticTokenAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            device_id: None,
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Installs a fresh token, e.g. after an interactive login.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn has_session(&self) -> bool {
        self.token.read().is_some()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn ensure_valid_session(&self) -> Result<(), ApiError> {
        if self.has_session() {
            Ok(())
        } else {
            Err(ApiError::Auth("no active session".to_string()))
        }
    }

    async fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn device_id(&self) -> Option<String> {
        self.device_id.clone()
    }

    async fn invalidate_session(&self) {
        if self.token.write().take().is_some() {
            info!("session invalidated");
        }
    }
}
