pub mod classify;
pub mod client;
pub mod context;
pub mod degrade;
pub mod history;
pub mod image;
pub mod invoker;
pub mod openai;
pub mod providers;
pub mod tools;

pub use classify::{FailureClassifier, FailureKind, SubstringClassifier};
pub use client::{CompletionBackend, OpenAiClient};
pub use context::{ContextAssembler, paginate};
pub use degrade::{DEFAULT_MAX_CONTEXT_RETRIES, DegradationEngine, RESET_SESSION_REPLY, TurnContext};
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use image::{HttpImageFetcher, ImageFetcher};
pub use invoker::{ChatInvoker, ChatPayload};
pub use openai::OpenAiProvider;
pub use providers::{ChatRequest, ContextPage, LlmProvider, LlmReply, LlmResponse, ToolInvocation};
pub use tools::{ToolDefinition, ToolRegistry};
