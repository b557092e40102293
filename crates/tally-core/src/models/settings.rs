//! AI scan settings and store-name history models

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::store::SettingsDocument;

/// Supported AI vision providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    OpenAi,
    Anthropic,
    Google,
}

impl AiProvider {
    pub const ALL: [Self; 3] = [Self::OpenAi, Self::Anthropic, Self::Google];

    /// Models offered for this provider, default first
    #[must_use]
    pub const fn models(self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &["gpt-4o", "gpt-4o-mini"],
            Self::Anthropic => &["claude-3-5-sonnet-latest", "claude-3-5-haiku-latest"],
            Self::Google => &["gemini-1.5-flash", "gemini-1.5-pro"],
        }
    }

    /// Default model for this provider
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        self.models()[0]
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for AiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AI scan configuration (per-identity settings document)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiSettings {
    pub provider: AiProvider,
    pub model: String,
    pub api_key: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        let provider = AiProvider::default();
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: String::new(),
        }
    }
}

impl AiSettings {
    /// Whether an API key has been configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Whether provider and model form a known combination
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.provider.models().contains(&self.model.as_str())
    }

    /// Switch provider, resetting the model to that provider's default
    pub fn set_provider(&mut self, provider: AiProvider) {
        self.provider = provider;
        self.model = provider.default_model().to_string();
    }
}

impl fmt::Debug for AiSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AiSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl SettingsDocument for AiSettings {
    const DOC: &'static str = "ai-settings";
}

/// Most stores remembered for autocomplete
const MAX_STORES: usize = 20;
/// Suggestions returned per search
const MAX_SUGGESTIONS: usize = 5;

/// Recently used store names, newest first (per-identity settings document)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNameHistory {
    pub names: Vec<String>,
}

impl StoreNameHistory {
    /// Remember a store name, deduplicating case-insensitively and keeping
    /// at most [`MAX_STORES`] entries, newest first.
    pub fn remember(&mut self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.names
            .retain(|existing| !existing.eq_ignore_ascii_case(name));
        self.names.insert(0, name.to_string());
        self.names.truncate(MAX_STORES);
    }

    /// Forget a store name (exact match)
    pub fn remove(&mut self, name: &str) {
        self.names.retain(|existing| existing != name);
    }

    /// Case-insensitive substring search; an empty query returns the most
    /// recent entries. At most [`MAX_SUGGESTIONS`] results.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<String> {
        let query = query.trim().to_lowercase();
        self.names
            .iter()
            .filter(|name| query.is_empty() || name.to_lowercase().contains(&query))
            .take(MAX_SUGGESTIONS)
            .cloned()
            .collect()
    }
}

impl SettingsDocument for StoreNameHistory {
    const DOC: &'static str = "store-names";
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_settings_use_provider_default_model() {
        let settings = AiSettings::default();
        assert_eq!(settings.provider, AiProvider::OpenAi);
        assert_eq!(settings.model, "gpt-4o");
        assert!(!settings.is_configured());
        assert!(settings.is_valid());
    }

    #[test]
    fn test_set_provider_resets_model() {
        let mut settings = AiSettings {
            model: "gpt-4o-mini".to_string(),
            ..AiSettings::default()
        };
        settings.set_provider(AiProvider::Google);
        assert_eq!(settings.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let settings = AiSettings {
            api_key: "sk-secret".to_string(),
            ..AiSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_provider_serde_names() {
        assert_eq!(
            serde_json::to_string(&AiProvider::OpenAi).unwrap(),
            "\"openai\""
        );
        assert_eq!(
            serde_json::to_string(&AiProvider::Anthropic).unwrap(),
            "\"anthropic\""
        );
    }

    #[test]
    fn test_remember_dedupes_case_insensitively() {
        let mut history = StoreNameHistory::default();
        history.remember("7-ELEVEN");
        history.remember("FamilyMart");
        history.remember("7-eleven");
        assert_eq!(history.names, vec!["7-eleven", "FamilyMart"]);
    }

    #[test]
    fn test_remember_caps_at_twenty() {
        let mut history = StoreNameHistory::default();
        for i in 0..25 {
            history.remember(&format!("Store {i}"));
        }
        assert_eq!(history.names.len(), MAX_STORES);
        assert_eq!(history.names[0], "Store 24");
    }

    #[test]
    fn test_search_limits_results() {
        let mut history = StoreNameHistory::default();
        for i in 0..10 {
            history.remember(&format!("Market {i}"));
        }
        assert_eq!(history.search("").len(), 5);
        assert_eq!(history.search("market 3"), vec!["Market 3"]);
        assert!(history.search("nope").is_empty());
    }
}
