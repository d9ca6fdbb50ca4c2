use std::sync::Arc;

use async_trait::async_trait;
use parley_common::{Error, Result, Turn, decode_history, encode_history};
use parley_config::ProviderConfig;
use parley_db::HistoryPersistence;
use parley_security::redact_secrets;
use tracing::{error, info, instrument, warn};

use crate::classify::{FailureClassifier, FailureKind, SubstringClassifier};
use crate::client::{CompletionBackend, OpenAiClient};
use crate::context::{ContextAssembler, paginate};
use crate::degrade::{DegradationEngine, TurnContext, without_images};
use crate::history::{HistoryStore, InMemoryHistoryStore};
use crate::image::{HttpImageFetcher, ImageFetcher};
use crate::invoker::ChatInvoker;
use crate::providers::{ChatRequest, ContextPage, LlmProvider, LlmReply, LlmResponse};

const PROXY_VARS: [&str; 4] = ["http_proxy", "HTTP_PROXY", "https_proxy", "HTTPS_PROXY"];

/// Chat provider for OpenAI-compatible APIs (OpenAI, Azure OpenAI, and the
/// many self-hosted servers that speak the same protocol).
pub struct OpenAiProvider {
    config: ProviderConfig,
    invoker: ChatInvoker,
    assembler: ContextAssembler,
    history: Arc<dyn HistoryStore>,
    persistence: Arc<dyn HistoryPersistence>,
    engine: DegradationEngine,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig, persistence: Arc<dyn HistoryPersistence>) -> Result<Self> {
        let backend = Arc::new(OpenAiClient::from_config(&config)?);
        Ok(Self::with_backend(config, backend, persistence))
    }

    pub fn with_backend(
        config: ProviderConfig,
        backend: Arc<dyn CompletionBackend>,
        persistence: Arc<dyn HistoryPersistence>,
    ) -> Self {
        Self {
            config,
            invoker: ChatInvoker::new(backend),
            assembler: ContextAssembler::new(Arc::new(HttpImageFetcher::new())),
            history: Arc::new(InMemoryHistoryStore::new()),
            persistence,
            engine: DegradationEngine::new(Arc::new(SubstringClassifier::default())),
        }
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history = store;
        self
    }

    pub fn with_image_fetcher(mut self, fetcher: Arc<dyn ImageFetcher>) -> Self {
        self.assembler = ContextAssembler::new(fetcher);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        let max = self.engine.max_context_retries();
        self.engine = DegradationEngine::new(classifier).with_max_context_retries(max);
        self
    }

    pub fn with_max_context_retries(mut self, max: usize) -> Self {
        self.engine = self.engine.with_max_context_retries(max);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn history_store(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Load every persisted session of this provider into the local history.
    /// Returns the number of sessions restored.
    pub async fn restore_sessions(&self) -> Result<usize> {
        let stored = self.persistence.load_histories(&self.config.id).await?;
        let mut restored = 0;
        for entry in stored {
            match decode_history(&entry.history) {
                Ok(turns) => {
                    self.history.replace(&entry.session_id, turns).await?;
                    restored += 1;
                }
                Err(e) => {
                    warn!(
                        session_id = %entry.session_id,
                        "skipping undecodable stored history: {e}"
                    );
                }
            }
        }
        info!(provider = %self.config.id, "restored {restored} session(s)");
        Ok(restored)
    }

    /// Record a finished turn in the local history, then push the session to
    /// the persistence store.
    async fn save_turn(&self, ctx: &TurnContext, reply: &str) -> Result<()> {
        let user = ctx.new_turn.clone();
        let assistant = Turn::assistant(reply);

        if let Some(saved) = &ctx.override_history {
            let mut turns: Vec<Turn> = saved.iter().filter(|t| !t.no_save).cloned().collect();
            turns.push(user);
            turns.push(assistant);
            self.history.replace(&ctx.session_id, turns).await?;
        } else if ctx.images_stripped {
            let mut turns: Vec<Turn> = self
                .history
                .get(&ctx.session_id)
                .await?
                .into_iter()
                .map(without_images)
                .collect();
            turns.push(user);
            turns.push(assistant);
            self.history.replace(&ctx.session_id, turns).await?;
        } else {
            self.history
                .append_pair(&ctx.session_id, user, assistant)
                .await?;
        }

        self.sync_history(&ctx.session_id).await
    }

    async fn sync_history(&self, session_id: &str) -> Result<()> {
        let turns = self.history.get(session_id).await?;
        let serialized = encode_history(&turns)?;
        self.persistence
            .update_history(session_id, &serialized, &self.config.id)
            .await
    }

    fn log_failure_diagnostics(&self, err: &Error) {
        let dump = serde_json::to_string_pretty(&self.config)
            .unwrap_or_else(|e| format!("<unserializable config: {e}>"));
        error!(provider = %self.config.id, "chat request failed: {err}");
        error!("provider config: {}", redact_secrets(&dump));

        let message = err.to_string().to_lowercase();
        if mentions_tool_support(&message) {
            error!(
                "model '{}' probably does not support function calling; \
                 try disabling tools for this provider",
                self.config.model_config.model
            );
        }
        if message.contains("connection error") {
            for var in PROXY_VARS {
                if let Ok(proxy) = std::env::var(var) {
                    if !proxy.is_empty() {
                        error!("requests go through proxy {var}={}", redact_secrets(&proxy));
                    }
                }
            }
        }
    }
}

/// Expects a lowercased message.
fn mentions_tool_support(message: &str) -> bool {
    message.contains("tool") && message.contains("support")
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.config.id
    }

    fn model(&self) -> &str {
        &self.config.model_config.model
    }

    #[instrument(
        skip(self, request),
        fields(provider = %self.config.id, session_id = %request.session_id)
    )]
    async fn text_chat(&self, request: ChatRequest) -> Result<LlmResponse> {
        let new_turn = self
            .assembler
            .assemble(&request.prompt, &request.image_refs)
            .await?;

        let history = match &request.history_override {
            Some(turns) => turns.clone(),
            None => self.history.get(&request.session_id).await?,
        };

        let mut ctx = TurnContext {
            session_id: request.session_id,
            system: request.system_prompt.map(Turn::system),
            history,
            new_turn,
            params: self.config.payload_params(),
            tools: request.tools,
            override_history: request.history_override,
            images_stripped: false,
        };

        let response = match self
            .engine
            .run(&mut ctx, &self.invoker, self.history.as_ref())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if self.engine.classifier().classify(&err) == FailureKind::Fatal {
                    self.log_failure_diagnostics(&err);
                }
                return Err(err);
            }
        };

        if let LlmReply::Text { text } = &response.reply {
            if request.persist && !ctx.session_id.is_empty() {
                self.save_turn(&ctx, text).await?;
            }
        }
        Ok(response)
    }

    async fn forget(&self, session_id: &str) -> Result<()> {
        self.history.clear(session_id).await?;
        self.sync_history(session_id).await
    }

    async fn human_readable_context(
        &self,
        session_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<ContextPage> {
        if !self.history.contains(session_id).await? {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        let turns = self.history.get(session_id).await?;
        paginate(&turns, page, page_size)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.invoker.backend().list_models().await
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(provider = %self.config.id, "health check failed: {e}");
                Ok(false)
            }
        }
    }

    fn current_key(&self) -> String {
        self.invoker.backend().api_key()
    }

    fn all_keys(&self) -> Vec<String> {
        self.config.key.clone()
    }

    fn set_key(&self, key: &str) {
        self.invoker.backend().set_api_key(key);
    }
}
