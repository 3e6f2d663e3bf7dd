//! Client-side session state
//!
//! [`SessionManager`] owns the single [`Session`] value and is the only
//! component that saves tokens to the durable [`TokenStore`]. Everything else observes the session
//! through a cloneable [`SessionHandle`], whose only write is reporting that
//! the collaborator rejected the token it handed out.
//!
//! Two checks are exposed and must not be conflated:
//!
//! - [`SessionManager::is_authenticated`] is a local presence check. A
//!   restored token passes it even if the server has long since expired it.
//! - [`SessionManager::current_user`] asks the auth service. Only a success
//!   here makes [`Session::user`] trustworthy.

pub mod client;
pub mod token_store;

use std::sync::{Arc, RwLock};

use anyhow::Context;

use crate::error::{LeafscanError, Result};

pub use client::{AuthClient, HttpAuthClient, TokenGrant, User};
pub use token_store::{StoredToken, TokenStore};

/// The credential and identity held for the current device/login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Bearer credential, if any
    pub token: Option<String>,
    /// Identity confirmed by the most recent successful validation
    pub user: Option<User>,
}

/// Shared view of the live session.
///
/// Clones observe the same session. Each read sees the latest value written
/// by the owning [`SessionManager`], so two consecutive reads may differ.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<RwLock<Session>>,
    store: Arc<dyn TokenStore>,
}

impl SessionHandle {
    fn new(store: Arc<dyn TokenStore>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Session::default())),
            store,
        }
    }

    /// Current bearer token, if one is held.
    pub fn bearer_token(&self) -> Option<String> {
        self.inner
            .read()
            .map(|session| session.token.clone())
            .unwrap_or_default()
    }

    /// Copy of the whole session.
    pub fn snapshot(&self) -> Session {
        self.inner
            .read()
            .map(|session| session.clone())
            .unwrap_or_default()
    }

    fn replace(&self, session: Session) {
        match self.inner.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    /// Ends the session because a collaborator rejected `token`.
    ///
    /// Has no effect if the session has moved on to another token since
    /// `token` was read. Returns whether the session was cleared.
    pub fn invalidate(&self, token: &str) -> bool {
        let cleared = match self.inner.write() {
            Ok(mut guard) if guard.token.as_deref() == Some(token) => {
                *guard = Session::default();
                true
            }
            _ => false,
        };
        if cleared {
            tracing::info!("Session token was rejected; logging out");
            self.forget_persisted();
        }
        cleared
    }

    fn clear(&self) {
        self.replace(Session::default());
        self.forget_persisted();
    }

    fn forget_persisted(&self) {
        if let Err(e) = self.store.delete() {
            tracing::warn!("Failed to remove persisted session token: {:#}", e);
        }
    }

    fn set_user(&self, token: &str, user: User) {
        if let Ok(mut guard) = self.inner.write() {
            // A concurrent logout or re-login wins over a late validation.
            if guard.token.as_deref() == Some(token) {
                guard.user = Some(user);
            }
        }
    }
}

/// Owner of the session lifecycle: login, signup, validation, logout.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use leafscan::config::AuthConfig;
/// use leafscan::session::{HttpAuthClient, SessionManager};
/// use leafscan::session::token_store::MemoryTokenStore;
///
/// # async fn example() -> leafscan::error::Result<()> {
/// let sessions = SessionManager::new(
///     Arc::new(HttpAuthClient::new(&AuthConfig::default())?),
///     Arc::new(MemoryTokenStore::default()),
/// )?;
/// sessions.login("a@b.com", "pw").await?;
/// let user = sessions.current_user().await?;
/// println!("logged in as {}", user.email);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionManager {
    client: Arc<dyn AuthClient>,
    store: Arc<dyn TokenStore>,
    session: SessionHandle,
}

impl SessionManager {
    /// Creates a manager, restoring any token persisted by an earlier run.
    ///
    /// The restored token is present but unvalidated; no network call is made.
    ///
    /// # Errors
    ///
    /// Returns an error if the token store cannot be read.
    pub fn new(client: Arc<dyn AuthClient>, store: Arc<dyn TokenStore>) -> Result<Self> {
        let restored = store
            .load()
            .context("Failed to read persisted session token")?;

        let session = SessionHandle::new(Arc::clone(&store));
        if let Some(token) = restored {
            tracing::debug!(saved_at = %token.saved_at, "Restored persisted session token");
            session.replace(Session {
                token: Some(token.access_token),
                user: None,
            });
        }

        Ok(Self {
            client,
            store,
            session,
        })
    }

    /// Logs in with an existing account.
    ///
    /// # Errors
    ///
    /// - [`LeafscanError::InvalidCredentials`] when the service rejects the pair
    /// - [`LeafscanError::Network`] on transport failure
    /// - a storage error when the token cannot be persisted; the session is
    ///   left unset in that case
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Session> {
        tracing::info!("Logging in as {}", identifier);
        let grant = self.client.login(identifier, secret).await?;
        self.establish(grant)
    }

    /// Creates an account and logs into it.
    ///
    /// Mismatched or empty secrets fail with [`LeafscanError::Validation`]
    /// before any request is made.
    pub async fn signup(
        &self,
        identifier: &str,
        secret: &str,
        confirm_secret: &str,
    ) -> Result<Session> {
        if identifier.trim().is_empty() {
            return Err(LeafscanError::Validation("email is required".to_string()).into());
        }
        if secret.is_empty() {
            return Err(LeafscanError::Validation("password is required".to_string()).into());
        }
        if secret != confirm_secret {
            return Err(LeafscanError::Validation("passwords do not match".to_string()).into());
        }

        tracing::info!("Creating account for {}", identifier);
        let grant = self.client.signup(identifier, secret).await?;
        self.establish(grant)
    }

    fn establish(&self, grant: TokenGrant) -> Result<Session> {
        let stored = StoredToken {
            access_token: grant.access_token.clone(),
            token_type: grant.token_type,
            saved_at: chrono::Utc::now(),
        };
        self.store
            .save(&stored)
            .map_err(|e| LeafscanError::Storage(format!("Failed to persist session: {:#}", e)))?;

        let session = Session {
            token: Some(grant.access_token),
            user: None,
        };
        self.session.replace(session.clone());
        Ok(session)
    }

    /// Validates the held token against the auth service.
    ///
    /// # Errors
    ///
    /// - [`LeafscanError::Unauthenticated`] when no token is held
    /// - [`LeafscanError::SessionExpired`] when the service rejects the token;
    ///   the session is cleared first
    /// - [`LeafscanError::Network`] / [`LeafscanError::Remote`] otherwise,
    ///   leaving the session as it was
    pub async fn current_user(&self) -> Result<User> {
        let token = self
            .session
            .bearer_token()
            .ok_or(LeafscanError::Unauthenticated)?;

        match self.client.fetch_identity(&token).await {
            Ok(user) => {
                self.session.set_user(&token, user.clone());
                Ok(user)
            }
            Err(e) => {
                let rejected = e
                    .downcast_ref::<LeafscanError>()
                    .map(LeafscanError::is_auth_rejection)
                    .unwrap_or(false);
                if rejected {
                    tracing::info!("Stored session was rejected; logging out");
                    self.logout();
                }
                Err(e)
            }
        }
    }

    /// Clears the session and forgets the persisted token. Never fails.
    pub fn logout(&self) {
        self.session.clear();
    }

    /// Whether a token is held. Says nothing about server-side validity.
    pub fn is_authenticated(&self) -> bool {
        self.session.bearer_token().is_some()
    }

    /// Read-only view for credential consumers.
    pub fn handle(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Copy of the current session.
    pub fn session(&self) -> Session {
        self.session.snapshot()
    }
}
