use std::sync::RwLock;

use async_trait::async_trait;
use parley_common::{Error, Result};
use parley_config::ProviderConfig;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use crate::invoker::ChatPayload;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Narrow interface to an OpenAI-compatible chat-completion API.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issue one non-streaming chat completion and return the raw response body.
    async fn create_chat_completion(&self, payload: &ChatPayload) -> Result<serde_json::Value>;

    async fn list_models(&self) -> Result<Vec<String>>;

    fn api_key(&self) -> String;

    fn set_api_key(&self, key: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Dialect {
    OpenAi,
    /// Azure OpenAI: `api-key` header, `api-version` query and deployment paths.
    Azure { api_version: String },
}

/// reqwest-based client for OpenAI and Azure OpenAI style endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: RwLock<String>,
    base_url: String,
    dialect: Dialect,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: RwLock::new(api_key),
            base_url: normalize_base(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            dialect: Dialect::OpenAi,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let dialect = match &config.api_version {
            Some(api_version) => {
                if config.api_base.is_none() {
                    return Err(Error::Config(format!(
                        "provider '{}' sets api_version but no api_base",
                        config.id
                    )));
                }
                Dialect::Azure {
                    api_version: api_version.clone(),
                }
            }
            None => Dialect::OpenAi,
        };

        Ok(Self {
            client,
            api_key: RwLock::new(config.key.first().cloned().unwrap_or_default()),
            base_url: normalize_base(config.api_base.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            dialect,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_azure(&self) -> bool {
        matches!(self.dialect, Dialect::Azure { .. })
    }

    fn chat_url(&self, model: Option<&str>) -> String {
        match (&self.dialect, model) {
            (Dialect::Azure { .. }, Some(model)) if !self.base_url.contains("/deployments") => {
                format!("{}/deployments/{model}/chat/completions", self.base_url)
            }
            _ => format!("{}/chat/completions", self.base_url),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let key = self.api_key();
        match &self.dialect {
            Dialect::OpenAi => builder.header("Authorization", format!("Bearer {key}")),
            Dialect::Azure { api_version } => builder
                .header("api-key", key)
                .query(&[("api-version", api_version.as_str())]),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn create_chat_completion(&self, payload: &ChatPayload) -> Result<serde_json::Value> {
        let url = self.chat_url(payload.model());
        let mut body = serde_json::to_value(payload)?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), serde_json::Value::Bool(false));
        }

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::upstream(Some(status.as_u16()), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| Error::UnparsableCompletion(format!("invalid JSON body: {e}")))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| {
                Error::upstream(None, format!("failed to list models: {}", transport_message(&e)))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::upstream(
                Some(status.as_u16()),
                format!("failed to list models: {error_text}"),
            ));
        }

        let models: ModelList = response.json().await.map_err(|e| {
            Error::upstream(None, format!("failed to list models: invalid body: {e}"))
        })?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    fn api_key(&self) -> String {
        self.api_key
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_api_key(&self, key: &str) {
        *self
            .api_key
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = key.to_string();
    }
}

fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

fn transport_error(e: reqwest::Error) -> Error {
    Error::upstream(None, transport_message(&e))
}

fn transport_message(e: &reqwest::Error) -> String {
    if e.is_connect() {
        format!("Connection error. {e}")
    } else if e.is_timeout() {
        format!("Request timed out. {e}")
    } else {
        format!("request failed: {e}")
    }
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn azure_config(base: &str) -> ProviderConfig {
        let mut config = ProviderConfig::new("azure", "gpt-4o");
        config.key = vec!["k1".into(), "k2".into()];
        config.api_base = Some(base.into());
        config.api_version = Some("2024-02-01".into());
        config
    }

    #[test]
    fn default_base_is_openai() {
        let client = OpenAiClient::new("sk".into(), None);
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(
            client.chat_url(Some("gpt-4o")),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = OpenAiClient::new("sk".into(), Some("http://localhost:11434/v1/".into()));
        assert_eq!(client.chat_url(None), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn azure_inserts_deployment_path() {
        let client =
            OpenAiClient::from_config(&azure_config("https://res.openai.azure.com/openai")).unwrap();
        assert!(client.is_azure());
        assert_eq!(
            client.chat_url(Some("gpt-4o")),
            "https://res.openai.azure.com/openai/deployments/gpt-4o/chat/completions"
        );
    }

    #[test]
    fn azure_keeps_explicit_deployment() {
        let client = OpenAiClient::from_config(&azure_config(
            "https://res.openai.azure.com/openai/deployments/prod",
        ))
        .unwrap();
        assert_eq!(
            client.chat_url(Some("gpt-4o")),
            "https://res.openai.azure.com/openai/deployments/prod/chat/completions"
        );
    }

    #[test]
    fn azure_requires_api_base() {
        let mut config = ProviderConfig::new("azure", "gpt-4o");
        config.api_version = Some("2024-02-01".into());
        assert!(matches!(
            OpenAiClient::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn first_key_is_active_and_can_be_replaced() {
        let client =
            OpenAiClient::from_config(&azure_config("https://res.openai.azure.com/openai")).unwrap();
        assert_eq!(client.api_key(), "k1");
        client.set_api_key("k2");
        assert_eq!(client.api_key(), "k2");
    }

    #[test]
    fn missing_key_is_empty() {
        let client = OpenAiClient::from_config(&ProviderConfig::new("local", "llama3")).unwrap();
        assert_eq!(client.api_key(), "");
    }
}
