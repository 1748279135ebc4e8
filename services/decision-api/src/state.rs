use std::sync::Arc;

use shared::config::Settings;
use shared::generation::StructuredGenerator;
use shared::openai_client::{GenerationBackend, OpenAiBackend};
use shared::scoring::ScoringPolicy;

use crate::inflight::InflightRegistry;
use crate::middleware::{ip_rate_limiter, IpRateLimiter};
use crate::session::{ContextStore, InMemoryContextStore};

#[derive(Clone)]
pub struct AppState {
    pub generator: StructuredGenerator,
    pub contexts: Arc<dyn ContextStore>,
    pub inflight: InflightRegistry,
    pub policy: ScoringPolicy,
    pub framing_cta: String,
    pub limiter: Option<Arc<IpRateLimiter>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        contexts: Arc<dyn ContextStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            generator: StructuredGenerator::new(backend, settings.generation_defaults()),
            contexts,
            inflight: InflightRegistry::new(),
            policy: settings.scoring_policy(),
            framing_cta: settings.framing_cta.clone(),
            limiter: ip_rate_limiter(settings.rate_limit_per_minute),
        }
    }

    /// Wires the OpenAI-compatible backend and an in-memory context store.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<(Self, InMemoryContextStore)> {
        let client = reqwest::Client::builder().build()?;
        let backend = OpenAiBackend::new(
            client,
            settings.openai_api_key.clone(),
            settings.openai_base_url.clone(),
        );
        let contexts = InMemoryContextStore::new(settings.context_ttl());
        let state = Self::new(Arc::new(backend), Arc::new(contexts.clone()), settings);
        Ok((state, contexts))
    }
}
