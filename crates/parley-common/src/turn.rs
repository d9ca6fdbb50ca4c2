use serde::{Deserialize, Serialize};

use crate::Result;

/// Text shown in place of an image when image content cannot be sent or displayed.
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// One message in a conversation, in the shape the chat-completion API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: TurnContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Included in the outbound request but dropped when history is persisted.
    #[serde(rename = "_no_save", default, skip_serializing)]
    pub no_save: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    Image { image_url: ImageUrl },
}

/// A fully-qualified `data:` or `http(s)` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl Turn {
    pub fn new(role: TurnRole, content: TurnContent) -> Self {
        Self {
            role,
            content,
            tool_call_id: None,
            no_save: false,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, TurnContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, TurnContent::Text(text.into()))
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, TurnContent::Text(text.into()))
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(TurnRole::Tool, TurnContent::Text(content.into()))
        }
    }

    /// Mark the turn as request-only so it never reaches persisted history.
    pub fn ephemeral(mut self) -> Self {
        self.no_save = true;
        self
    }
}

impl TurnContent {
    pub fn image_count(&self) -> usize {
        match self {
            Self::Text(_) => 0,
            Self::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::Image { .. }))
                .count(),
        }
    }

    /// Flatten to display text, with a placeholder for each image.
    pub fn display_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.as_str(),
                    ContentPart::Image { .. } => IMAGE_PLACEHOLDER,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::Image {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// Serialize a session's turns into the persisted form: an ordered JSON list of
/// `{role, content}` records.
pub fn encode_history(turns: &[Turn]) -> Result<String> {
    Ok(serde_json::to_string(turns)?)
}

pub fn decode_history(raw: &str) -> Result<Vec<Turn>> {
    Ok(serde_json::from_str(raw)?)
}
