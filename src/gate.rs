//! Access gate for protected work
//!
//! [`AccessGate`] decides whether protected content may run. Every entry
//! restarts at [`GateState::CheckingSession`]. A missing token is denied
//! without a network round-trip. A present token must survive
//! [`SessionManager::current_user`] before access is granted.
//!
//! Each transition is broadcast to subscribers.

use tokio::sync::broadcast;

use crate::error::LeafscanError;
use crate::session::{SessionManager, User};

/// Why the gate refused entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// No token was held
    NoSession,
    /// The auth service rejected the held token
    SessionExpired,
    /// Validation could not complete (transport or service error)
    ValidationFailed(String),
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::NoSession => write!(f, "not logged in"),
            DenialReason::SessionExpired => write!(f, "session expired"),
            DenialReason::ValidationFailed(detail) => {
                write!(f, "could not validate session: {}", detail)
            }
        }
    }
}

/// Gate states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Validation in progress; protected content must not run
    CheckingSession,
    /// Session validated for this user
    Granted(User),
    /// Show the login/signup flow instead
    Denied(DenialReason),
}

impl GateState {
    /// Whether this is `Granted` or `Denied`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GateState::CheckingSession)
    }
}

/// Access gate state machine
#[derive(Debug)]
pub struct AccessGate {
    state: GateState,
    events: broadcast::Sender<GateState>,
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate {
    /// Creates a gate in `CheckingSession`.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: GateState::CheckingSession,
            events,
        }
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<GateState> {
        self.events.subscribe()
    }

    /// Current state
    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// The validated user, only while `Granted`.
    pub fn granted_user(&self) -> Option<&User> {
        match &self.state {
            GateState::Granted(user) => Some(user),
            _ => None,
        }
    }

    /// Enters the gated area, validating the session from scratch.
    ///
    /// Any validation failure clears the session before the gate settles in
    /// `Denied`.
    pub async fn enter(&mut self, sessions: &SessionManager) -> &GateState {
        self.transition(GateState::CheckingSession);

        if !sessions.is_authenticated() {
            self.transition(GateState::Denied(DenialReason::NoSession));
            return &self.state;
        }

        let next = match sessions.current_user().await {
            Ok(user) => GateState::Granted(user),
            Err(e) => {
                // current_user already logged out on a rejection; other
                // failures still must not leave a half-trusted session behind.
                sessions.logout();
                let reason = match e.downcast_ref::<LeafscanError>() {
                    Some(err) if err.is_auth_rejection() => DenialReason::SessionExpired,
                    _ => DenialReason::ValidationFailed(format!("{:#}", e)),
                };
                tracing::warn!("Access denied: {}", reason);
                GateState::Denied(reason)
            }
        };
        self.transition(next);
        &self.state
    }

    fn transition(&mut self, next: GateState) {
        tracing::debug!(from = ?self.state, to = ?next, "Gate transition");
        self.state = next;
        // No subscribers is fine.
        let _ = self.events.send(self.state.clone());
    }
}
