//! Command-line interface definition for Leafscan
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for session management, classification, and
//! browsing stored scans.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Leafscan - classify potato leaf photos against a remote model
///
/// Log in once, then submit photos for classification. Recent results
/// are kept locally per account.
#[derive(Parser, Debug, Clone)]
#[command(name = "leafscan")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the auth service base URL
    #[arg(long)]
    pub auth_url: Option<String>,

    /// Override the prediction endpoint URL
    #[arg(long)]
    pub predict_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Leafscan
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Log in with an existing account
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password (prompted on stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create a new account
    Signup {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password (prompted on stdin when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Password confirmation (prompted on stdin when omitted)
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the account behind the stored session
    Whoami,

    /// Classify one or more leaf photos
    Classify {
        /// Image files to submit, processed in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Do not record results in the local scan history
        #[arg(long)]
        no_save: bool,
    },

    /// Browse stored scan results
    History {
        /// History subcommand
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

/// Stored scan subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// List recent scans for the logged-in account
    List {
        /// Maximum number of scans to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete a stored scan
    Delete {
        /// Scan ID
        id: String,
    },

    /// Delete all stored scans for the logged-in account
    Clear,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
