//! Client configuration.
//!
//! Public endpoints and keys needed to reach the sync backend, auth, and
//! the e-invoice API. Values come from an optional JSON config file with
//! environment-variable overrides; secret user credentials never live here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const CONFIG_FILE_NAME: &str = "config.json";

/// Endpoint configuration for all remote collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Document backend base URL (receipts, settings, achievements)
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Auth service base URL
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Public anon key for the auth service
    #[serde(default)]
    pub anon_key: Option<String>,
    /// E-invoice API application id
    #[serde(default)]
    pub einvoice_app_id: Option<String>,
    /// E-invoice API key
    #[serde(default)]
    pub einvoice_api_key: Option<String>,
}

impl ClientConfig {
    /// Default location: `<config dir>/tally/config.json`
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tally")
            .join(CONFIG_FILE_NAME)
    }

    /// Load from a config file; a missing file yields the default config
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.normalize();
        Ok(config)
    }

    /// Persist to a config file, creating parent directories as needed
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Overlay environment variables (`TALLY_API_BASE_URL`,
    /// `TALLY_AUTH_URL`, `TALLY_ANON_KEY`, `INVOICE_API_APP_ID`,
    /// `INVOICE_API_KEY`) over the file-based values.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        for (variable, slot) in [
            ("TALLY_API_BASE_URL", &mut self.api_base_url),
            ("TALLY_AUTH_URL", &mut self.auth_url),
            ("TALLY_ANON_KEY", &mut self.anon_key),
            ("INVOICE_API_APP_ID", &mut self.einvoice_app_id),
            ("INVOICE_API_KEY", &mut self.einvoice_api_key),
        ] {
            if let Some(value) = normalize_text_option(std::env::var(variable).ok()) {
                *slot = Some(value);
            }
        }
        self
    }

    /// Whether the remote document backend is reachable in principle
    #[must_use]
    pub fn sync_configured(&self) -> bool {
        self.api_base_url.is_some()
    }

    /// Whether sign-in is possible
    #[must_use]
    pub fn auth_configured(&self) -> bool {
        self.auth_url.is_some() && self.anon_key.is_some()
    }

    /// Whether the e-invoice API can be queried live
    #[must_use]
    pub fn einvoice_configured(&self) -> bool {
        self.einvoice_app_id.is_some() && self.einvoice_api_key.is_some()
    }

    /// Reject URLs without an http(s) scheme
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("api_base_url", &self.api_base_url),
            ("auth_url", &self.auth_url),
        ] {
            if let Some(url) = value {
                if !is_http_url(url) {
                    return Err(Error::InvalidInput(format!(
                        "{name} must include http:// or https://"
                    )));
                }
            }
        }
        Ok(())
    }

    fn normalize(&mut self) {
        for slot in [
            &mut self.api_base_url,
            &mut self.auth_url,
            &mut self.anon_key,
            &mut self.einvoice_app_id,
            &mut self.einvoice_api_key,
        ] {
            *slot = normalize_text_option(slot.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_default() {
        let tmp = tempdir().unwrap();
        let config = ClientConfig::load_from_path(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(!config.sync_configured());
    }

    #[test]
    fn test_round_trip_normalizes_blank_values() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let config = ClientConfig {
            api_base_url: Some("  https://api.example.com  ".to_string()),
            anon_key: Some("   ".to_string()),
            ..ClientConfig::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = ClientConfig::load_from_path(&path).unwrap();
        assert_eq!(
            loaded.api_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(loaded.anon_key, None);
    }

    #[test]
    fn test_validate_rejects_non_http_urls() {
        let config = ClientConfig {
            api_base_url: Some("api.example.com".to_string()),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_env_overrides_file_values() {
        std::env::set_var("TALLY_API_BASE_URL", "https://env.example.com");
        let config = ClientConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..ClientConfig::default()
        }
        .apply_env();
        std::env::remove_var("TALLY_API_BASE_URL");

        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://env.example.com")
        );
    }
}
