//! HTTP remote store client.
//!
//! Talks to the hosted document backend: per-identity collections at
//! `/v1/users/{uid}/collections/{name}` and settings documents at
//! `/v1/users/{uid}/settings/{name}`. Realtime feeds are poll-driven; a
//! feed that hits an error reports it and stops — reconnecting is the
//! caller's decision, this client never retries on its own.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{DocumentEvent, DocumentFeed, FeedEvent, FeedGuard, RemoteFeed, RemoteStore};
use crate::auth::Identity;
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url};

const FEED_CAPACITY: usize = 16;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// reqwest-backed [`RemoteStore`]
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: String,
    client: reqwest::Client,
    poll_interval: Duration,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field("auth_token", &"[REDACTED]")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl HttpRemoteStore {
    /// Create a client for the given backend, authenticated with the
    /// signed-in session's access token.
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let auth_token = auth_token.into().trim().to_string();
        if auth_token.is_empty() {
            return Err(Error::InvalidInput(
                "auth token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            auth_token,
            client: reqwest::Client::builder().build()?,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Set the feed polling interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn collection_url(&self, identity: &Identity, collection: &str) -> String {
        format!(
            "{}/v1/users/{}/collections/{collection}",
            self.base_url, identity.user_id
        )
    }

    fn document_url(&self, identity: &Identity, doc: &str) -> String {
        format!(
            "{}/v1/users/{}/settings/{doc}",
            self.base_url, identity.user_id
        )
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(parse_api_error(status, &body)))
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    records: Vec<Value>,
}

impl RemoteStore for HttpRemoteStore {
    async fn snapshot(&self, identity: &Identity, collection: &str) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(self.collection_url(identity, collection))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let payload = response.json::<SnapshotResponse>().await?;
        Ok(payload.records)
    }

    fn subscribe(&self, identity: &Identity, collection: &str) -> RemoteFeed {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let store = self.clone();
        let identity = identity.clone();
        let collection = collection.to_string();

        let handle = tokio::spawn(async move {
            let mut last: Option<Vec<Value>> = None;
            loop {
                match store.snapshot(&identity, &collection).await {
                    Ok(records) => {
                        if last.as_ref() != Some(&records) {
                            last = Some(records.clone());
                            if tx.send(FeedEvent::Snapshot(records)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(FeedEvent::Error(error.to_string())).await;
                        break;
                    }
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        });

        RemoteFeed::new(rx, FeedGuard::for_task(handle))
    }

    async fn upsert(
        &self,
        identity: &Identity,
        collection: &str,
        id: &str,
        record: Value,
    ) -> Result<()> {
        let url = format!("{}/{id}", self.collection_url(identity, collection));
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.auth_token)
            .json(&record)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn remove(&self, identity: &Identity, collection: &str, id: &str) -> Result<()> {
        let url = format!("{}/{id}", self.collection_url(identity, collection));
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        // Deleting an already-absent record is not an error
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn get_document(&self, identity: &Identity, doc: &str) -> Result<Option<Value>> {
        let response = self
            .client
            .get(self.document_url(identity, doc))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success(response).await?;
        Ok(Some(response.json::<Value>().await?))
    }

    async fn set_document(&self, identity: &Identity, doc: &str, value: Value) -> Result<()> {
        let response = self
            .client
            .put(self.document_url(identity, doc))
            .bearer_auth(&self.auth_token)
            .json(&value)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    async fn merge_document(&self, identity: &Identity, doc: &str, fields: Value) -> Result<()> {
        let response = self
            .client
            .patch(self.document_url(identity, doc))
            .bearer_auth(&self.auth_token)
            .json(&fields)
            .send()
            .await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    fn subscribe_document(&self, identity: &Identity, doc: &str) -> DocumentFeed {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let store = self.clone();
        let identity = identity.clone();
        let doc = doc.to_string();

        let handle = tokio::spawn(async move {
            let mut last: Option<Option<Value>> = None;
            loop {
                match store.get_document(&identity, &doc).await {
                    Ok(document) => {
                        if last.as_ref() != Some(&document) {
                            last = Some(document.clone());
                            if tx.send(DocumentEvent::Document(document)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(DocumentEvent::Error(error.to_string())).await;
                        break;
                    }
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        });

        DocumentFeed::new(rx, FeedGuard::for_task(handle))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("base URL must not be empty".to_string()));
    }
    if is_http_url(trimmed) {
        Ok(trimmed.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_rejects_invalid_values() {
        assert!(normalize_base_url(String::new()).is_err());
        assert!(normalize_base_url("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_base_url("https://api.example.com/".to_string()).unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn test_new_rejects_empty_token() {
        assert!(HttpRemoteStore::new("https://api.example.com", "  ").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let store = HttpRemoteStore::new("https://api.example.com", "secret-token").unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_api_error_prefers_json_message() {
        let message = parse_api_error(
            StatusCode::FORBIDDEN,
            r#"{"message": "permission denied"}"#,
        );
        assert_eq!(message, "permission denied (403)");
    }

    #[test]
    fn test_parse_api_error_falls_back_to_body() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502".to_string()
        );
    }
}
