//! Leafscan - potato leaf disease classification client library
//!
//! This library provides the client side of a remote leaf classifier:
//! an authenticated session with a durable token, an access gate for
//! protected work, and a single-in-flight upload pipeline with a rolling
//! history of recent results.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: Session state, auth collaborator client, and token persistence
//! - `gate`: Access gate that validates a session before protected work
//! - `pipeline`: Upload pipeline state machine, previews, results, and history
//! - `inference`: Classification collaborator client
//! - `storage`: Local SQLite record of past scans
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface and handlers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use leafscan::{AccessGate, Config, GateState, SessionManager};
//! use leafscan::session::{token_store, HttpAuthClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let client = HttpAuthClient::new(&config.auth)?;
//!     let store = token_store::from_config(&config.session, &config.auth.base_url)?;
//!     let sessions = SessionManager::new(Arc::new(client), store)?;
//!
//!     let mut gate = AccessGate::new();
//!     if let GateState::Granted(user) = gate.enter(&sessions).await {
//!         println!("welcome back, {}", user.email);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gate;
pub mod inference;
pub mod pipeline;
pub mod session;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{LeafscanError, Result};
pub use gate::{AccessGate, DenialReason, GateState};
pub use inference::{HttpInferenceClient, InferenceClient};
pub use pipeline::{Completion, PipelineState, PredictionResult, UploadPipeline};
pub use session::{SessionHandle, SessionManager, User};
pub use storage::{ScanRecord, ScanStore};
