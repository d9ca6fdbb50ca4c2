use std::sync::Arc;

use parley_common::{ContentPart, IMAGE_PLACEHOLDER, Result, Turn, TurnContent, TurnRole};
use tracing::{info, warn};

use crate::classify::{FailureClassifier, FailureKind};
use crate::history::HistoryStore;
use crate::invoker::{ChatInvoker, ChatPayload};
use crate::providers::LlmResponse;
use crate::tools::ToolRegistry;

/// Pop-and-retry cycles attempted when the context window is exceeded.
pub const DEFAULT_MAX_CONTEXT_RETRIES: usize = 10;

/// Returned in-band when the context cannot be shortened enough.
pub const RESET_SESSION_REPLY: &str = "err: please try /reset to clear the session history.";

/// Everything sent for one turn, mutated as the request is degraded.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub system: Option<Turn>,
    /// Prior turns: the stored session history, or the caller's override.
    pub history: Vec<Turn>,
    pub new_turn: Turn,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub tools: Option<Arc<ToolRegistry>>,
    /// Caller-supplied history as it will be saved. `history` is the outbound
    /// copy and may lose replies when images are stripped; this one does not.
    pub override_history: Option<Vec<Turn>>,
    /// Images were stripped to recover from a VLM rejection.
    pub images_stripped: bool,
}

impl TurnContext {
    pub fn messages(&self) -> Vec<Turn> {
        self.system
            .iter()
            .chain(self.history.iter())
            .chain(std::iter::once(&self.new_turn))
            .cloned()
            .collect()
    }

    pub fn payload(&self) -> ChatPayload {
        ChatPayload::new(self.messages(), self.params.clone())
    }

    /// Drop the oldest user/assistant pair from the session store and rebuild
    /// the outbound history.
    async fn shorten(&mut self, store: &dyn HistoryStore) -> Result<()> {
        store.pop_oldest_pair(&self.session_id).await?;
        if let Some(saved) = self.override_history.as_mut() {
            if self.history.len() >= 2 {
                self.history.drain(..2);
            }
            if saved.len() >= 2 {
                saved.drain(..2);
            }
        } else {
            self.history = store.get(&self.session_id).await?;
        }
        Ok(())
    }

    fn strip_images(&mut self) -> usize {
        let (history, dropped) = strip_images(std::mem::take(&mut self.history));
        self.history = history;
        if let Some(saved) = self.override_history.take() {
            self.override_history = Some(saved.into_iter().map(without_images).collect());
        }
        self.new_turn = without_images(self.new_turn.clone());
        self.images_stripped = true;
        dropped
    }
}

/// Remove image parts from every turn. A turn that only held images keeps a
/// placeholder text part, and the assistant reply that directly follows a turn
/// that lost images is dropped. Returns the cleaned turns and how many replies
/// were dropped.
pub fn strip_images(turns: Vec<Turn>) -> (Vec<Turn>, usize) {
    let mut cleaned = Vec::with_capacity(turns.len());
    let mut dropped = 0;
    let mut skip_reply = false;

    for turn in turns {
        if std::mem::take(&mut skip_reply) && turn.role == TurnRole::Assistant {
            dropped += 1;
            continue;
        }
        skip_reply = turn.content.image_count() > 0;
        cleaned.push(without_images(turn));
    }
    (cleaned, dropped)
}

/// The turn with its image parts removed.
pub fn without_images(mut turn: Turn) -> Turn {
    if let TurnContent::Parts(parts) = turn.content {
        let mut kept: Vec<ContentPart> = parts
            .into_iter()
            .filter(|p| !matches!(p, ContentPart::Image { .. }))
            .collect();
        if kept.is_empty() {
            kept.push(ContentPart::text(IMAGE_PLACEHOLDER));
        }
        turn.content = TurnContent::Parts(kept);
    }
    turn
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Initial,
    ShortenContext { attempt: usize },
    WithoutImages,
    WithoutTools,
}

/// Runs one turn and recovers from classified upstream rejections by mutating
/// the request and retrying.
///
/// - context too long: drop the oldest pair and retry, up to the cap, then
///   answer with [`RESET_SESSION_REPLY`]
/// - images rejected: strip them and retry once
/// - tools rejected: retry once without tool definitions
///
/// Every other failure, and any failure after a single-shot retry, is returned.
pub struct DegradationEngine {
    classifier: Arc<dyn FailureClassifier>,
    max_context_retries: usize,
}

impl DegradationEngine {
    pub fn new(classifier: Arc<dyn FailureClassifier>) -> Self {
        Self {
            classifier,
            max_context_retries: DEFAULT_MAX_CONTEXT_RETRIES,
        }
    }

    pub fn with_max_context_retries(mut self, max: usize) -> Self {
        self.max_context_retries = max;
        self
    }

    pub fn classifier(&self) -> &Arc<dyn FailureClassifier> {
        &self.classifier
    }

    pub fn max_context_retries(&self) -> usize {
        self.max_context_retries
    }

    pub async fn run(
        &self,
        ctx: &mut TurnContext,
        invoker: &ChatInvoker,
        store: &dyn HistoryStore,
    ) -> Result<LlmResponse> {
        let mut step = Step::Initial;
        loop {
            let tools = match step {
                Step::WithoutTools => None,
                _ => ctx.tools.clone(),
            };
            let mut payload = ctx.payload();
            let err = match invoker.invoke(&mut payload, tools.as_deref()).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            let kind = self.classifier.classify(&err);
            step = match (step, kind) {
                (Step::Initial | Step::ShortenContext { .. }, FailureKind::ContextTooLong) => {
                    let done = match step {
                        Step::ShortenContext { attempt } => attempt,
                        _ => 0,
                    };
                    if done >= self.max_context_retries {
                        warn!(
                            session_id = %ctx.session_id,
                            "context still too long after {done} retries; asking for a reset"
                        );
                        return Ok(LlmResponse::error(RESET_SESSION_REPLY));
                    }
                    Step::ShortenContext { attempt: done + 1 }
                }
                (Step::Initial, FailureKind::UnsupportedVlm) => Step::WithoutImages,
                (Step::Initial, FailureKind::UnsupportedTools) => Step::WithoutTools,
                _ => return Err(err),
            };

            match step {
                Step::ShortenContext { attempt } => {
                    warn!(
                        session_id = %ctx.session_id,
                        attempt,
                        "context length exceeded; dropping the oldest record and retrying"
                    );
                    ctx.shorten(store).await?;
                }
                Step::WithoutImages => {
                    let dropped = ctx.strip_images();
                    warn!(
                        session_id = %ctx.session_id,
                        dropped_replies = dropped,
                        "model rejected image input; retrying without images"
                    );
                }
                Step::WithoutTools => {
                    let model = ctx.params.get("model").and_then(|m| m.as_str()).unwrap_or("");
                    info!("{model} does not support tool calling; retrying without tools");
                }
                Step::Initial => {}
            }
        }
    }
}
