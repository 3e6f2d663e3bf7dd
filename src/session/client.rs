//! Auth/identity collaborator
//!
//! [`AuthClient`] is the seam between the session manager and the remote
//! identity service. [`HttpAuthClient`] talks to the service over HTTP:
//!
//! - `POST {base}/auth/login` with form fields `username` and `password`
//! - `POST {base}/auth/signup` with JSON `{email, password}`
//! - `GET {base}/auth/me` with `Authorization: Bearer <token>`
//!
//! Login and signup answer `{access_token, token_type}`; `/auth/me` answers
//! `{id, email, created_at}`. Failures carry a `{detail}` payload.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::AuthConfig;
use crate::error::{LeafscanError, Result};

/// Token issued by the auth service on login or signup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Opaque bearer credential
    pub access_token: String,
    /// Usually `"bearer"`
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Identity returned by the auth service for a valid token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account identifier; numeric ids are normalized to strings
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Account email
    pub email: String,
    /// Creation timestamp exactly as reported by the service
    #[serde(default)]
    pub created_at: String,
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Remote identity operations used by [`crate::session::SessionManager`].
///
/// Implementations map collaborator responses onto the error taxonomy:
/// a rejected credential pair is [`LeafscanError::InvalidCredentials`], a
/// rejected bearer token is [`LeafscanError::SessionExpired`], and a
/// transport failure is [`LeafscanError::Network`].
#[async_trait::async_trait]
pub trait AuthClient: Send + Sync + std::fmt::Debug {
    /// Issues a session for an existing account.
    async fn login(&self, identifier: &str, secret: &str) -> Result<TokenGrant>;

    /// Creates an account and issues a session for it.
    ///
    /// Duplicate identifiers are rejected as invalid credentials.
    async fn signup(&self, identifier: &str, secret: &str) -> Result<TokenGrant>;

    /// Resolves the identity behind `token`.
    async fn fetch_identity(&self, token: &str) -> Result<User>;
}

/// Extracts the `detail` field from an error body, falling back to the raw text.
///
/// FastAPI-style validation errors put a list under `detail`; those are
/// rendered as compact JSON.
pub(crate) fn error_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ if body.trim().is_empty() => "no detail provided".to_string(),
        _ => body.trim().to_string(),
    }
}

/// HTTP implementation of [`AuthClient`].
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthClient {
    /// Creates a client for the auth service described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LeafscanError::Config`] if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use leafscan::config::AuthConfig;
    /// use leafscan::session::client::HttpAuthClient;
    ///
    /// let client = HttpAuthClient::new(&AuthConfig::default()).unwrap();
    /// assert_eq!(client.base_url(), "http://localhost:8000");
    /// ```
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LeafscanError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/{}", self.base_url, path)
    }

    async fn read_grant(response: reqwest::Response) -> Result<TokenGrant> {
        let status = response.status();
        if status.is_success() {
            return response.json::<TokenGrant>().await.map_err(|e| {
                LeafscanError::Remote {
                    status: status.as_u16(),
                    detail: format!("malformed token response: {}", e),
                }
                .into()
            });
        }

        let detail = error_detail(&response.text().await.unwrap_or_default());
        tracing::debug!("Auth service returned {}: {}", status, detail);
        match status.as_u16() {
            400 | 401 | 403 | 409 | 422 => Err(LeafscanError::InvalidCredentials(detail).into()),
            code => Err(LeafscanError::Remote {
                status: code,
                detail,
            }
            .into()),
        }
    }
}

#[async_trait::async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, identifier: &str, secret: &str) -> Result<TokenGrant> {
        let url = self.endpoint("login");
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .form(&[("username", identifier), ("password", secret)])
            .send()
            .await
            .map_err(|e| LeafscanError::Network(format!("login request failed: {}", e)))?;

        Self::read_grant(response).await
    }

    async fn signup(&self, identifier: &str, secret: &str) -> Result<TokenGrant> {
        let url = self.endpoint("signup");
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "email": identifier, "password": secret }))
            .send()
            .await
            .map_err(|e| LeafscanError::Network(format!("signup request failed: {}", e)))?;

        Self::read_grant(response).await
    }

    async fn fetch_identity(&self, token: &str) -> Result<User> {
        let url = self.endpoint("me");
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| LeafscanError::Network(format!("identity request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<User>().await.map_err(|e| {
                LeafscanError::Remote {
                    status: status.as_u16(),
                    detail: format!("malformed identity response: {}", e),
                }
                .into()
            });
        }

        let detail = error_detail(&response.text().await.unwrap_or_default());
        match status.as_u16() {
            401 | 403 => Err(LeafscanError::SessionExpired(detail).into()),
            code => Err(LeafscanError::Remote {
                status: code,
                detail,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_accepts_numeric_id() {
        let json = r#"{"id": 42, "email": "a@b.com", "created_at": "2024-05-01T10:00:00"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.email, "a@b.com");
    }

    #[test]
    fn test_user_accepts_string_id_and_missing_created_at() {
        let user: User =
            serde_json::from_str(r#"{"id": "9f1c", "email": "a@b.com"}"#).unwrap();
        assert_eq!(user.id, "9f1c");
        assert!(user.created_at.is_empty());
    }

    #[test]
    fn test_token_grant_defaults_token_type() {
        let grant: TokenGrant = serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        assert_eq!(grant.token_type, "bearer");
    }

    #[test]
    fn test_error_detail_variants() {
        assert_eq!(error_detail(r#"{"detail": "Invalid credentials"}"#), "Invalid credentials");
        assert_eq!(
            error_detail(r#"{"detail": [{"msg": "field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_detail(""), "no detail provided");
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = AuthConfig {
            base_url: "http://auth.local/".to_string(),
            timeout_seconds: 5,
        };
        let client = HttpAuthClient::new(&config).unwrap();
        assert_eq!(client.endpoint("me"), "http://auth.local/auth/me");
    }
}
