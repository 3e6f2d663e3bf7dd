//! Session commands: login, signup, logout, whoami

use std::io::{BufRead, Write};

use colored::Colorize;

use crate::config::Config;
use crate::error::{LeafscanError, Result};
use crate::session::SessionManager;

use super::{require_user, session_manager};

/// Logs in and persists the session token.
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `email` - Account email
/// * `password` - Password; read from stdin when `None`
pub async fn login(config: &Config, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_secret("Password: ")?,
    };
    let sessions = session_manager(config)?;
    login_with(&sessions, email, &password).await
}

/// Login flow against an already built [`SessionManager`].
pub async fn login_with(sessions: &SessionManager, email: &str, password: &str) -> Result<()> {
    if let Err(e) = sessions.login(email, password).await {
        report_auth_failure("Login failed", &e);
        return Err(e);
    }
    let user = sessions.current_user().await?;
    println!("{} {}", "Logged in as".green(), user.email.bold());
    Ok(())
}

/// Creates an account, then logs into it.
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `email` - Account email
/// * `password` - Password; read from stdin when `None`
/// * `confirm` - Confirmation; read from stdin when `None`
pub async fn signup(
    config: &Config,
    email: &str,
    password: Option<String>,
    confirm: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => prompt_secret("Password: ")?,
    };
    let confirm = match confirm {
        Some(c) => c,
        None => prompt_secret("Confirm password: ")?,
    };
    let sessions = session_manager(config)?;

    if let Err(e) = sessions.signup(email, &password, &confirm).await {
        report_auth_failure("Signup failed", &e);
        return Err(e);
    }
    let user = sessions.current_user().await?;
    println!("{} {}", "Account created for".green(), user.email.bold());
    Ok(())
}

/// Forgets the stored session.
pub fn logout(config: &Config) -> Result<()> {
    let sessions = session_manager(config)?;
    let was_authenticated = sessions.is_authenticated();
    sessions.logout();
    if was_authenticated {
        println!("{}", "Logged out.".green());
    } else {
        println!("{}", "No stored session.".yellow());
    }
    Ok(())
}

/// Validates the stored session and prints the account behind it.
pub async fn whoami(config: &Config) -> Result<()> {
    let sessions = session_manager(config)?;
    let user = require_user(&sessions).await?;

    println!("{:<10} {}", "Email:".bold(), user.email);
    println!("{:<10} {}", "User ID:".bold(), user.id);
    if !user.created_at.is_empty() {
        println!("{:<10} {}", "Joined:".bold(), user.created_at);
    }
    Ok(())
}

fn report_auth_failure(action: &str, error: &anyhow::Error) {
    let message = match error.downcast_ref::<LeafscanError>() {
        Some(LeafscanError::InvalidCredentials(detail)) => detail.clone(),
        Some(LeafscanError::Validation(detail)) => detail.clone(),
        Some(LeafscanError::Network(_)) => "could not reach the auth service".to_string(),
        _ => format!("{:#}", error),
    };
    eprintln!("{}: {}", action.red(), message);
}

fn prompt_secret(prompt: &str) -> Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(LeafscanError::Validation("password is required".to_string()).into());
    }
    Ok(secret)
}
