use std::sync::Arc;

use async_trait::async_trait;
use parley_common::{Result, Turn};
use serde::{Deserialize, Serialize};

use crate::tools::ToolRegistry;

/// Trait for chat provider adapters plugged into the bot framework.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier, also the key under which history is persisted.
    fn provider_id(&self) -> &str;

    /// Model name requests are sent with.
    fn model(&self) -> &str;

    /// Run one chat turn, recovering from known upstream rejections.
    async fn text_chat(&self, request: ChatRequest) -> Result<LlmResponse>;

    /// Clear a session's history, locally and in the history store.
    async fn forget(&self, session_id: &str) -> Result<()>;

    /// A page of the session's history as `User:`/`Assistant:` lines, newest pairs first.
    async fn human_readable_context(
        &self,
        session_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ContextPage>;

    /// Model ids offered by the upstream catalog endpoint.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Check if the provider is reachable with the active key.
    async fn health_check(&self) -> Result<bool>;

    fn current_key(&self) -> String;

    fn all_keys(&self) -> Vec<String>;

    fn set_key(&self, key: &str);
}

/// Arguments of one chat turn.
#[derive(Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub session_id: String,
    /// Local paths, `file://` paths, `base64://` payloads or http(s) URLs.
    pub image_refs: Vec<String>,
    pub tools: Option<Arc<ToolRegistry>>,
    /// Replaces the stored session history as context for this turn.
    pub history_override: Option<Vec<Turn>>,
    pub system_prompt: Option<String>,
    pub persist: bool,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id: session_id.into(),
            image_refs: Vec::new(),
            tools: None,
            history_override: None,
            system_prompt: None,
            persist: true,
        }
    }

    pub fn with_images<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_history(mut self, turns: Vec<Turn>) -> Self {
        self.history_override = Some(turns);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }
}

/// Normalized result of one chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub reply: LlmReply,
    /// Upstream payload, kept for logging and debugging only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_completion: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmReply {
    Text { text: String },
    ToolCalls { calls: Vec<ToolInvocation> },
    /// In-band failure returned through the success path.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>, raw: serde_json::Value) -> Self {
        Self {
            reply: LlmReply::Text { text: text.into() },
            raw_completion: Some(raw),
        }
    }

    pub fn tool_calls(calls: Vec<ToolInvocation>, raw: serde_json::Value) -> Self {
        Self {
            reply: LlmReply::ToolCalls { calls },
            raw_completion: Some(raw),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            reply: LlmReply::Error {
                message: message.into(),
            },
            raw_completion: None,
        }
    }

    pub fn completion_text(&self) -> Option<&str> {
        match &self.reply {
            LlmReply::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.reply, LlmReply::Error { .. })
    }
}

/// One page of human-readable history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPage {
    pub items: Vec<String>,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults_to_persisting() {
        let request = ChatRequest::new("s1", "hello");
        assert!(request.persist);
        assert!(request.image_refs.is_empty());
        assert!(request.history_override.is_none());

        let request = request
            .with_images(["a.jpg", "base64://AAAA"])
            .with_system_prompt("be brief")
            .without_persistence();
        assert_eq!(request.image_refs, vec!["a.jpg", "base64://AAAA"]);
        assert_eq!(request.system_prompt.as_deref(), Some("be brief"));
        assert!(!request.persist);
    }

    #[test]
    fn response_accessors() {
        let text = LlmResponse::text("hi", serde_json::json!({}));
        assert_eq!(text.completion_text(), Some("hi"));
        assert!(!text.is_error());

        let err = LlmResponse::error("boom");
        assert!(err.is_error());
        assert!(err.completion_text().is_none());
        assert!(err.raw_completion.is_none());
    }
}
