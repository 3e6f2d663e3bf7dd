//! Command handlers for the CLI
//!
//! - `auth`     -- login, signup, logout and whoami
//! - `classify` -- gated upload-and-classify of one or more files
//! - `history`  -- browse and prune stored scans
//!
//! Handlers build their collaborators from [`Config`] and talk to the
//! library components; all terminal output lives here.

use std::sync::Arc;

use colored::Colorize;

use crate::config::Config;
use crate::error::{LeafscanError, Result};
use crate::gate::{AccessGate, DenialReason, GateState};
use crate::session::{token_store, HttpAuthClient, SessionManager, User};

pub mod auth;
pub mod classify;
pub mod history;

/// Builds a session manager wired to the configured auth service and token store.
///
/// The keyring backend stores one token per auth base URL. The `file`
/// backend keeps a single token whichever server issued it.
pub fn session_manager(config: &Config) -> Result<SessionManager> {
    let client = HttpAuthClient::new(&config.auth)?;
    let store = token_store::from_config(&config.session, &config.auth.base_url)?;
    SessionManager::new(Arc::new(client), store)
}

/// Runs the access gate and returns the validated user.
///
/// Prints a hint to log in and fails with [`LeafscanError::Unauthenticated`]
/// (or [`LeafscanError::SessionExpired`]) when access is denied.
pub async fn require_user(sessions: &SessionManager) -> Result<User> {
    let mut gate = AccessGate::new();
    match gate.enter(sessions).await {
        GateState::Granted(user) => Ok(user.clone()),
        GateState::Denied(reason) => {
            eprintln!(
                "{} ({}). Run {} first.",
                "Access denied".red(),
                reason,
                "leafscan login --email <EMAIL>".cyan()
            );
            Err(match reason {
                DenialReason::SessionExpired => {
                    LeafscanError::SessionExpired(reason.to_string())
                }
                _ => LeafscanError::Unauthenticated,
            }
            .into())
        }
        GateState::CheckingSession => Err(LeafscanError::Unauthenticated.into()),
    }
}
