use std::sync::Arc;

use parley_common::{Error, Result, Turn};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::client::CompletionBackend;
use crate::providers::{LlmResponse, ToolInvocation};
use crate::tools::ToolRegistry;

/// Request body of one chat-completion call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub messages: Vec<Turn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    /// `model` plus passthrough generation parameters.
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ChatPayload {
    pub fn new(messages: Vec<Turn>, params: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            messages,
            tools: None,
            params,
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.params.get("model").and_then(|m| m.as_str())
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().map(|t| t.content.image_count()).sum()
    }
}

/// Sends a single non-streaming completion request and normalizes the reply.
#[derive(Clone)]
pub struct ChatInvoker {
    backend: Arc<dyn CompletionBackend>,
}

impl ChatInvoker {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn CompletionBackend> {
        &self.backend
    }

    pub async fn invoke(
        &self,
        payload: &mut ChatPayload,
        tools: Option<&ToolRegistry>,
    ) -> Result<LlmResponse> {
        if let Some(registry) = tools {
            let descriptors = registry.openai_descriptors();
            if !descriptors.is_empty() {
                payload.tools = Some(descriptors);
            }
        }

        let raw = self.backend.create_chat_completion(payload).await?;
        debug!("completion: {raw}");
        parse_completion(raw, tools)
    }
}

/// Interpret a raw chat-completion body.
///
/// Text wins over tool calls. Tool calls whose name is not in `tools` are dropped.
pub fn parse_completion(
    raw: serde_json::Value,
    tools: Option<&ToolRegistry>,
) -> Result<LlmResponse> {
    let completion: ChatCompletion = serde_json::from_value(raw.clone())
        .map_err(|e| Error::UnparsableCompletion(format!("unexpected completion shape: {e}")))?;

    let Some(choice) = completion.choices.into_iter().next() else {
        return Err(Error::EmptyCompletion);
    };
    let message = choice.message;

    if let Some(text) = message.content.filter(|c| !c.is_empty()) {
        return Ok(LlmResponse::text(text.trim(), raw));
    }

    if let Some(tool_calls) = message.tool_calls.filter(|c| !c.is_empty()) {
        let mut calls = Vec::new();
        for call in tool_calls {
            let known = tools.is_some_and(|registry| registry.contains(&call.function.name));
            if !known {
                debug!(tool = %call.function.name, "dropping call to unregistered tool");
                continue;
            }
            calls.push(ToolInvocation {
                arguments: parse_arguments(&call.function.name, &call.function.arguments)?,
                id: call.id,
                name: call.function.name,
            });
        }
        return Ok(LlmResponse::tool_calls(calls, raw));
    }

    error!("completion could not be parsed: {raw}");
    Err(Error::UnparsableCompletion(
        "completion has neither text nor tool calls".into(),
    ))
}

fn parse_arguments(name: &str, arguments: &str) -> Result<serde_json::Value> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments).map_err(|e| {
        Error::UnparsableCompletion(format!("invalid arguments for tool '{name}': {e}"))
    })
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Deserialize)]
struct CompletionToolCall {
    #[serde(default)]
    id: String,
    function: CompletionFunctionCall,
}

#[derive(Deserialize)]
struct CompletionFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}
