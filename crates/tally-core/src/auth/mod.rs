//! Auth client and session types.
//!
//! The identity is the authenticated principal or its absence; its
//! transition from absent to present is what triggers the migration flow,
//! and present to absent is a sign-out that never deletes remote data.

use std::fmt;
use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// The authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

/// A signed-in session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry as Unix seconds
    pub expires_at: i64,
    pub identity: Identity,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= chrono::Utc::now().timestamp() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Outcome of a sign-up attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(AuthSession),
    ConfirmationRequired,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Auth is not configured for this build.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Session storage error: {0}")]
    Storage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Durable storage for the current session
pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load(&self) -> AuthResult<Option<AuthSession>>;
    fn save(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear(&self) -> AuthResult<()>;
}

/// Session store backed by a JSON file under the config directory
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `<config dir>/tally/session.json`
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally")
            .join("session.json")
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionPersistence for FileSessionStore {
    fn load(&self) -> AuthResult<Option<AuthSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|error| AuthError::Storage(error.to_string()))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, session: &AuthSession) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| AuthError::Storage(error.to_string()))?;
        }
        let serialized = serde_json::to_string(session)?;
        std::fs::write(&self.path, serialized)
            .map_err(|error| AuthError::Storage(error.to_string()))
    }

    fn clear(&self) -> AuthResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(AuthError::Storage(error.to_string())),
        }
    }
}

/// Auth API client with pluggable session persistence
#[derive(Clone)]
pub struct AuthClient<S: SessionPersistence> {
    auth_url: String,
    anon_key: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> AuthClient<S> {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>, store: S) -> AuthResult<Self> {
        let auth_url = normalize_auth_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "anon key must not be empty",
            ));
        }
        Ok(Self {
            auth_url,
            anon_key,
            client: Client::builder().build()?,
            store,
        })
    }

    /// Load the persisted session, refreshing it when expired. A session
    /// that can no longer be refreshed is cleared and reported as absent.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored) = self.store.load()? else {
            return Ok(None);
        };

        if !stored.is_expired() {
            return Ok(Some(stored));
        }

        match self.refresh_session(&stored.refresh_token).await {
            Ok(refreshed) => {
                self.store.save(&refreshed)?;
                Ok(Some(refreshed))
            }
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {error}");
                self.store.clear()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<SignUpOutcome> {
        validate_credentials(email, password)?;
        let payload = serde_json::json!({ "email": email, "password": password });
        let response = self
            .client
            .post(format!("{}/signup", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&payload)
            .send()
            .await?;
        let payload = Self::read_payload(response).await?;
        match payload.into_session()? {
            Some(session) => {
                self.store.save(&session)?;
                Ok(SignUpOutcome::SignedIn(session))
            }
            None => Ok(SignUpOutcome::ConfirmationRequired),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(email, password)?;
        let payload = serde_json::json!({ "email": email, "password": password });
        let response = self
            .client
            .post(format!("{}/token?grant_type=password", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&payload)
            .send()
            .await?;
        let payload = Self::read_payload(response).await?;
        let session = payload
            .into_session()?
            .ok_or_else(|| AuthError::Api("response did not include a session".to_string()))?;
        self.store.save(&session)?;
        Ok(session)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> AuthResult<AuthSession> {
        let payload = serde_json::json!({ "refresh_token": refresh_token });
        let response = self
            .client
            .post(format!("{}/token?grant_type=refresh_token", self.auth_url))
            .header("apikey", &self.anon_key)
            .json(&payload)
            .send()
            .await?;
        let payload = Self::read_payload(response).await?;
        payload
            .into_session()?
            .ok_or_else(|| AuthError::Api("response did not include a session".to_string()))
    }

    /// Clear the persisted session. Server-side revocation is best-effort.
    pub async fn sign_out(&self, session: &AuthSession) -> AuthResult<()> {
        let result = self
            .client
            .post(format!("{}/logout", self.auth_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await;
        if let Err(error) = result {
            tracing::warn!("Sign-out request failed: {error}");
        }
        self.store.clear()
    }

    async fn read_payload(response: reqwest::Response) -> AuthResult<SessionResponse> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_auth_error(status, &body)));
        }
        Ok(response.json::<SessionResponse>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<SessionUser>,
}

#[derive(Debug, Deserialize)]
struct SessionUser {
    id: String,
    email: Option<String>,
}

impl SessionResponse {
    /// `Ok(None)` when the response carries no session (e.g. email
    /// confirmation pending), `Err` when it carries a malformed one.
    fn into_session(self) -> AuthResult<Option<AuthSession>> {
        let (Some(access_token), Some(user)) = (self.access_token, self.user) else {
            return Ok(None);
        };
        let refresh_token = self.refresh_token.unwrap_or_default();
        let expires_at = self
            .expires_at
            .or_else(|| {
                self.expires_in
                    .map(|expires_in| chrono::Utc::now().timestamp().saturating_add(expires_in))
            })
            .ok_or_else(|| {
                AuthError::Api("response did not include expires_at/expires_in".to_string())
            })?;

        Ok(Some(AuthSession {
            access_token,
            refresh_token,
            expires_at,
            identity: Identity {
                user_id: user.id,
                email: user.email,
            },
        }))
    }
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

fn parse_auth_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<AuthErrorBody>(body) {
        if let Some(message) = payload.error_description.or(payload.msg).or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }
    format!("HTTP {}", status.as_u16())
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if !email.contains('@') {
        return Err(AuthError::InvalidCredentials("email address is invalid"));
    }
    if password.len() < 8 {
        return Err(AuthError::InvalidCredentials(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

fn normalize_auth_url(raw: &str) -> AuthResult<String> {
    let url = normalize_text_option(Some(raw.to_string()))
        .ok_or(AuthError::InvalidConfiguration("auth URL must not be empty"))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(AuthError::InvalidConfiguration(
            "auth URL must include http:// or https://",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn session(expires_at: i64) -> AuthSession {
        AuthSession {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            identity: Identity {
                user_id: "u1".to_string(),
                email: Some("user@example.com".to_string()),
            },
        }
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let debug = format!("{:?}", session(123));
        assert!(!debug.contains("access"));
        assert!(!debug.contains("refresh"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_expired_session_detection() {
        assert!(session(0).is_expired());
        assert!(!session(chrono::Utc::now().timestamp() + 3600).is_expired());
    }

    #[test]
    fn test_file_session_store_round_trip() {
        let tmp = tempdir().unwrap();
        let store = FileSessionStore::new(tmp.path().join("session.json"));

        assert!(store.load().unwrap().is_none());

        let session = session(9999);
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_validate_credentials() {
        assert!(validate_credentials("not-an-email", "longenough").is_err());
        assert!(validate_credentials("a@b.co", "short").is_err());
        assert!(validate_credentials("a@b.co", "longenough").is_ok());
    }

    #[test]
    fn test_normalize_auth_url_rejects_invalid() {
        assert!(normalize_auth_url("").is_err());
        assert!(normalize_auth_url("auth.example.com").is_err());
        assert_eq!(
            normalize_auth_url("https://auth.example.com/").unwrap(),
            "https://auth.example.com"
        );
    }

    #[test]
    fn test_session_response_without_session() {
        let response: SessionResponse = serde_json::from_str("{}").unwrap();
        assert!(response.into_session().unwrap().is_none());
    }

    #[test]
    fn test_session_response_derives_expiry_from_expires_in() {
        let response: SessionResponse = serde_json::from_str(
            r#"{
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600,
                "user": {"id": "u1", "email": null}
            }"#,
        )
        .unwrap();
        let session = response.into_session().unwrap().unwrap();
        assert!(session.expires_at > chrono::Utc::now().timestamp());
        assert_eq!(session.identity.user_id, "u1");
    }
}
