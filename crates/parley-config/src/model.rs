use std::path::PathBuf;
use std::time::Duration;

use parley_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Provider used when none is named explicitly. Defaults to the first one.
    #[serde(default)]
    pub default_provider: Option<String>,
    /// SQLite file for persisted history.
    #[serde(default)]
    pub history_db: Option<PathBuf>,
}

/// Configuration of one OpenAI-compatible provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    /// API keys; the first one is active at startup.
    #[serde(default)]
    pub key: Vec<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Presence selects the Azure OpenAI dialect.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    pub model_config: ModelConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    /// Generation parameters passed through verbatim (temperature, max_tokens, ...).
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl AppConfig {
    pub fn provider(&self, id: Option<&str>) -> Option<&ProviderConfig> {
        match id.or(self.default_provider.as_deref()) {
            Some(id) => self.providers.iter().find(|p| p.id == id),
            None => self.providers.first(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for provider in &self.providers {
            provider.validate()?;
        }
        match &self.default_provider {
            Some(default) if !self.providers.iter().any(|p| &p.id == default) => Err(
                Error::Config(format!("default provider '{default}' is not configured")),
            ),
            _ => Ok(()),
        }
    }
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: Vec::new(),
            api_base: None,
            api_version: None,
            timeout: None,
            model_config: ModelConfig {
                model: model.into(),
                params: serde_json::Map::new(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Config("provider id must not be empty".into()));
        }
        if self.model_config.model.trim().is_empty() {
            return Err(Error::Config(format!(
                "provider '{}' has no model_config.model",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Generation parameters as they are merged into a request payload,
    /// including `model`.
    pub fn payload_params(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut params = self.model_config.params.clone();
        params.insert(
            "model".to_string(),
            serde_json::Value::String(self.model_config.model.clone()),
        );
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_config_keeps_passthrough_params() {
        let config: ProviderConfig = serde_json::from_value(json!({
            "id": "openai",
            "key": ["sk-a", "sk-b"],
            "model_config": {"model": "gpt-4o-mini", "temperature": 0.3, "max_tokens": 512}
        }))
        .unwrap();

        assert_eq!(config.model_config.model, "gpt-4o-mini");
        assert_eq!(config.model_config.params["temperature"], json!(0.3));

        let params = config.payload_params();
        assert_eq!(params["model"], json!("gpt-4o-mini"));
        assert_eq!(params["max_tokens"], json!(512));
        assert!(!config.is_azure());
    }

    #[test]
    fn api_version_selects_azure() {
        let mut config = ProviderConfig::new("azure", "gpt-4o");
        config.api_version = Some("2024-02-01".into());
        config.timeout = Some(30);
        assert!(config.is_azure());
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn validate_rejects_missing_model() {
        let config = ProviderConfig::new("openai", " ");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn provider_lookup_falls_back_to_first() {
        let app = AppConfig {
            providers: vec![
                ProviderConfig::new("a", "m1"),
                ProviderConfig::new("b", "m2"),
            ],
            ..AppConfig::default()
        };
        assert_eq!(app.provider(None).map(|p| p.id.as_str()), Some("a"));
        assert_eq!(app.provider(Some("b")).map(|p| p.id.as_str()), Some("b"));
        assert!(app.provider(Some("c")).is_none());
    }

    #[test]
    fn validate_rejects_unknown_default() {
        let app = AppConfig {
            providers: vec![ProviderConfig::new("a", "m1")],
            default_provider: Some("z".into()),
            ..AppConfig::default()
        };
        assert!(app.validate().is_err());
    }
}
