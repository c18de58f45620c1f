//! Response resolver: turns an utterance into a reply, always.
//!
//! Stages are tried strictly in order and the first success wins:
//! 1. knowledge table (synchronous, no I/O)
//! 2. response cache (synchronous)
//! 3. generation backend, bounded by `generation.timeout_ms`
//! 4. canned fallback text
//!
//! `resolve` never returns an error and never yields empty text. Generation
//! failures are logged and mapped to the matching fallback message. The
//! generation task is aborted on timeout and also when the caller drops the
//! `resolve` future, which drops its HTTP request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tokio_util::task::AbortOnDropHandle;

use crate::cache::{cache_key, CacheStats, InMemoryCache, ResponseCache};
use crate::clock::{Clock, SystemClock};
use crate::config::ReplyflowConfig;
use crate::error::ReplyflowError;
use crate::fallback::{FallbackMessages, FallbackReason};
use crate::generation::{ChatCompletionClient, GenerationRequest, Generator, ReplyFormatter};
use crate::knowledge::KnowledgeBase;
use crate::prompt::PromptBuilder;
use crate::utterance::Utterance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Knowledge,
    Cache,
    Generated,
    Fallback,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Knowledge => "knowledge",
            ResolutionSource::Cache => "cache",
            ResolutionSource::Generated => "generated",
            ResolutionSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub text: String,
    pub source: ResolutionSource,
    #[serde(rename = "latency_ms", serialize_with = "serialize_millis")]
    pub latency: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[derive(Debug, Clone)]
struct ResolverSettings {
    max_utterance_chars: usize,
    max_parameter_chars: usize,
    generation_timeout: Duration,
}

pub struct ResponseResolver {
    knowledge: KnowledgeBase,
    cache: Arc<dyn ResponseCache>,
    generator: Option<Arc<dyn Generator>>,
    prompt: PromptBuilder,
    formatter: ReplyFormatter,
    fallbacks: FallbackMessages,
    settings: ResolverSettings,
}

/// Wires a resolver from config, with optional injected collaborators.
pub struct ResolverBuilder {
    config: ReplyflowConfig,
    cache: Option<Arc<dyn ResponseCache>>,
    generator: Option<Arc<dyn Generator>>,
    clock: Arc<dyn Clock>,
}

impl ResolverBuilder {
    pub fn new(config: ReplyflowConfig) -> Self {
        Self {
            config,
            cache: None,
            generator: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Clock for the default in-memory cache. Ignored when a cache is injected.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<ResponseResolver, ReplyflowError> {
        let knowledge = KnowledgeBase::from_config(&self.config.knowledge.0)?;
        let cache = match self.cache {
            Some(c) => c,
            None => Arc::new(InMemoryCache::new(&self.config.cache, self.clock)),
        };

        let settings = ResolverSettings {
            max_utterance_chars: self.config.resolver.max_utterance_chars.max(1),
            max_parameter_chars: self.config.resolver.max_parameter_chars,
            generation_timeout: self.config.generation.timeout(),
        };

        tracing::info!(
            knowledge_entries = knowledge.len(),
            generator = self.generator.as_ref().map(|g| g.name()).unwrap_or("none"),
            timeout_ms = settings.generation_timeout.as_millis() as u64,
            "Response resolver ready"
        );

        Ok(ResponseResolver {
            knowledge,
            cache,
            generator: self.generator,
            formatter: ReplyFormatter::new(
                self.config.generation.max_reply_chars,
                &self.config.store.name,
                self.config.generation.topic_emoji,
            ),
            prompt: PromptBuilder::new(self.config.store.clone()),
            fallbacks: FallbackMessages::from_config(&self.config.fallback),
            settings,
        })
    }
}

impl ResponseResolver {
    pub fn builder(config: ReplyflowConfig) -> ResolverBuilder {
        ResolverBuilder::new(config)
    }

    /// Production wiring: system clock, in-memory cache, and the
    /// chat-completion client when an API key is available. Without a key
    /// the resolver still answers from knowledge, cache and fallback.
    pub fn from_config(config: &ReplyflowConfig) -> Result<Self, ReplyflowError> {
        let mut builder = ResolverBuilder::new(config.clone());

        match ChatCompletionClient::new(config.generation.clone()) {
            Ok(client) => builder = builder.generator(Arc::new(client)),
            Err(e) => tracing::warn!(
                error = %e,
                "Generation disabled, replies limited to knowledge, cache and fallback"
            ),
        }

        builder.build()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn knowledge_entries(&self) -> usize {
        self.knowledge.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Resolve one conversational turn.
    pub async fn resolve(&self, utterance: &Utterance) -> ResolutionResult {
        let started = Instant::now();
        let (text, source) = self.resolve_stages(utterance).await;
        let result = ResolutionResult {
            text,
            source,
            latency: started.elapsed(),
        };

        tracing::info!(
            intent = utterance.intent.as_deref().unwrap_or("-"),
            source = result.source.as_str(),
            latency_ms = result.latency.as_millis() as u64,
            "Utterance resolved"
        );

        result
    }

    async fn resolve_stages(&self, utterance: &Utterance) -> (String, ResolutionSource) {
        if utterance.is_blank() {
            return self.fallback(FallbackReason::InvalidInput);
        }

        let normalized = utterance.normalized(self.settings.max_utterance_chars);
        let parameters = utterance.parameter_strings();

        if let Some(hit) = self
            .knowledge
            .lookup(&normalized, utterance.intent.as_deref(), &parameters)
        {
            tracing::debug!(entry = %hit.name, "Knowledge entry matched");
            return (hit.text, ResolutionSource::Knowledge);
        }

        let key = cache_key(
            &normalized,
            &utterance.parameters,
            utterance.context.as_deref(),
            self.settings.max_parameter_chars,
        );

        if let Some(text) = self.cache.get(&key) {
            tracing::debug!("Answer served from cache");
            return (text, ResolutionSource::Cache);
        }

        let Some(generator) = self.generator.clone() else {
            return self.fallback(FallbackReason::Unavailable);
        };

        let request = GenerationRequest {
            system: self
                .prompt
                .system_prompt(&parameters, utterance.context.as_deref()),
            user: utterance.prompt_text(self.settings.max_utterance_chars),
        };

        match self.generate_bounded(generator, request).await {
            Ok(raw) => {
                let text = self.formatter.format(&raw);
                if text.is_empty() {
                    tracing::warn!("Generated reply was empty after formatting");
                    return self.fallback(FallbackReason::Unavailable);
                }
                self.cache.set(&key, &text);
                (text, ResolutionSource::Generated)
            }
            Err(reason) => self.fallback(reason),
        }
    }

    /// Run the generator on its own task so a timeout can abort it and a
    /// panicking backend cannot take the caller down with it. The handle
    /// aborts the task when dropped, so an abandoned `resolve` leaves no
    /// request behind.
    async fn generate_bounded(
        &self,
        generator: Arc<dyn Generator>,
        request: GenerationRequest,
    ) -> Result<String, FallbackReason> {
        let backend = generator.name().to_string();
        let mut task = AbortOnDropHandle::new(tokio::spawn(async move { generator.generate(&request).await }));

        match tokio::time::timeout(self.settings.generation_timeout, &mut task).await {
            Ok(Ok(Ok(raw))) => Ok(raw),
            Ok(Ok(Err(e))) => {
                tracing::warn!(backend = %backend, error = %e, "Generation failed, falling back");
                Err(e.fallback_reason())
            }
            Ok(Err(join_error)) => {
                tracing::error!(backend = %backend, error = %join_error, "Generation task died, falling back");
                Err(FallbackReason::Unavailable)
            }
            Err(_) => {
                task.abort();
                tracing::warn!(
                    backend = %backend,
                    timeout_ms = self.settings.generation_timeout.as_millis() as u64,
                    "Generation timed out, request cancelled"
                );
                Err(FallbackReason::Timeout)
            }
        }
    }

    fn fallback(&self, reason: FallbackReason) -> (String, ResolutionSource) {
        tracing::debug!(reason = reason.as_str(), "Using fallback reply");
        (
            self.fallbacks.message(reason).to_string(),
            ResolutionSource::Fallback,
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
