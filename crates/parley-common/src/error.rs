use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("upstream returned a completion with no choices")]
    EmptyCompletion,

    #[error("upstream completion could not be parsed: {0}")]
    UnparsableCompletion(String),

    /// Any failure reported by the LLM API or the transport in front of it.
    #[error("{}", format_upstream(.status, .message))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("agent error: {0}")]
    Agent(String),
}

impl Error {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of an upstream failure, if the API answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => *status,
            _ => None,
        }
    }
}

fn format_upstream(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(status) => format!("upstream API error: status={status}, body={message}"),
        None => format!("upstream API error: {message}"),
    }
}
