//! Durable session token persistence
//!
//! The session token must outlive a single process run, so it is kept in a
//! [`TokenStore`]. Three backends are provided:
//!
//! - [`KeyringTokenStore`] -- the operating system's native credential store
//!   (Keychain on macOS, Secret Service on Linux, Windows Credential Manager).
//! - [`FileTokenStore`] -- a JSON file in the user's config directory, for
//!   headless machines without a keyring daemon.
//! - [`MemoryTokenStore`] -- process memory only.
//!
//! No expiry is tracked here. A stale token is only discovered when the auth
//! service rejects it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::{SessionConfig, TokenBackend};
use crate::error::{LeafscanError, Result};

// ---------------------------------------------------------------------------
// StoredToken
// ---------------------------------------------------------------------------

/// A bearer token as issued by the auth service, plus when it was saved.
///
/// # Examples
///
/// ```
/// use leafscan::session::token_store::StoredToken;
///
/// let token = StoredToken::bearer("abc123");
/// assert_eq!(token.token_type, "bearer");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Opaque access token string.
    pub access_token: String,

    /// Token type reported by the auth service, normally `"bearer"`.
    pub token_type: String,

    /// When this token was written to the store.
    pub saved_at: DateTime<Utc>,
}

impl StoredToken {
    /// Builds a bearer token stamped with the current time.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "bearer".to_string(),
            saved_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenStore
// ---------------------------------------------------------------------------

/// Process-wide key/value slot holding at most one session token.
///
/// Only the session manager writes through this trait. Implementations must
/// treat deleting an absent token as success.
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Returns the stored token, or `Ok(None)` when nothing is saved.
    fn load(&self) -> Result<Option<StoredToken>>;

    /// Replaces any stored token with `token`.
    fn save(&self, token: &StoredToken) -> Result<()>;

    /// Removes the stored token.
    fn delete(&self) -> Result<()>;
}

/// Builds the token store selected by configuration.
///
/// `account` keys the keyring entry, so keyring logins against different
/// auth services do not overwrite each other. The `file` backend keeps a
/// single token at its configured path and the `memory` backend is private
/// to the process; both ignore `account`.
///
/// # Errors
///
/// Returns [`LeafscanError::Storage`] if the `file` backend has no explicit
/// path and the user's config directory cannot be determined.
pub fn from_config(config: &SessionConfig, account: &str) -> Result<Arc<dyn TokenStore>> {
    let store: Arc<dyn TokenStore> = match config.token_backend {
        TokenBackend::Keyring => Arc::new(KeyringTokenStore::new(account)),
        TokenBackend::File => {
            let path = match &config.token_file {
                Some(path) => path.clone(),
                None => FileTokenStore::default_path()?,
            };
            Arc::new(FileTokenStore::new(path))
        }
        TokenBackend::Memory => Arc::new(MemoryTokenStore::default()),
    };
    tracing::debug!(backend = ?config.token_backend, "Initialized token store");
    Ok(store)
}

// ---------------------------------------------------------------------------
// KeyringTokenStore
// ---------------------------------------------------------------------------

/// Token store backed by the OS native keyring.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    account: String,
}

impl KeyringTokenStore {
    /// Creates a store whose entry is keyed by `account`.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    /// Builds the keyring service name.
    ///
    /// The name is fixed so that every account for this application is
    /// grouped together in the credential manager UI.
    fn service_name() -> &'static str {
        "leafscan-session"
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(Self::service_name(), &self.account)
            .map_err(|e| LeafscanError::Keyring(e).into())
    }
}

impl TokenStore for KeyringTokenStore {
    fn load(&self) -> Result<Option<StoredToken>> {
        match self.entry()?.get_password() {
            Ok(json_str) => {
                let token: StoredToken = serde_json::from_str(&json_str)?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(LeafscanError::Keyring(e).into()),
        }
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        let json_str = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&json_str)
            .map_err(LeafscanError::Keyring)?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(LeafscanError::Keyring(e).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// FileTokenStore
// ---------------------------------------------------------------------------

/// Token store backed by a JSON file.
///
/// On Unix the file is created with mode `0600`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store that reads and writes `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/leafscan/session.json`
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "leafscan", "leafscan").ok_or_else(|| {
            LeafscanError::Storage("Could not determine config directory".to_string())
        })?;
        Ok(proj_dirs.config_dir().join("session.json"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredToken>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LeafscanError::Io(e).into()),
        }
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json_str = serde_json::to_string_pretty(token)?;
        std::fs::write(&self.path, json_str)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LeafscanError::Io(e).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryTokenStore
// ---------------------------------------------------------------------------

/// In-process token store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    /// Creates a store pre-populated with `token`, as if saved by an earlier run.
    pub fn with_token(token: StoredToken) -> Self {
        Self {
            slot: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<StoredToken>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| LeafscanError::Storage("token slot poisoned".to_string()))?;
        Ok(slot.clone())
    }

    fn save(&self, token: &StoredToken) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| LeafscanError::Storage("token slot poisoned".to_string()))?;
        *slot = Some(token.clone());
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| LeafscanError::Storage("token slot poisoned".to_string()))?;
        *slot = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
