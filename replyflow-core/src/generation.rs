//! Generation backend for Replyflow: chat-completion text generation
//!
//! Provides a `Generator` trait with one implementation:
//! - **ChatCompletionClient**: OpenAI-style `/chat/completions` endpoint
//!   (DeepSeek by default), bearer-token auth
//!
//! The client makes exactly one attempt per call. Deadline enforcement lives
//! in the resolver, which drops the in-flight future when its budget runs out.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::fallback::FallbackReason;
use crate::utterance::truncate_chars;

// ============================================================================
// Generator trait
// ============================================================================

/// What the resolver hands to a generator: one system and one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
}

/// Abstraction over text-generation providers.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a raw reply for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation request timed out")]
    Timeout,

    #[error("Connection to generation API failed: {0}")]
    Connection(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed response body: {0}")]
    MalformedResponse(String),

    #[error("Completion contained no text")]
    EmptyCompletion,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else if e.is_connect() {
            GenerationError::Connection(e.to_string())
        } else if e.is_decode() {
            GenerationError::MalformedResponse(e.to_string())
        } else {
            GenerationError::Http(e)
        }
    }
}

impl GenerationError {
    /// Which canned reply the caller should see for this failure.
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            GenerationError::Timeout => FallbackReason::Timeout,
            GenerationError::Connection(_) => FallbackReason::Connection,
            GenerationError::Api { code: 401 | 403, .. } => FallbackReason::Unauthorized,
            GenerationError::Api { code: 429, .. } => FallbackReason::RateLimited,
            GenerationError::Api { .. }
            | GenerationError::MalformedResponse(_)
            | GenerationError::EmptyCompletion
            | GenerationError::MissingApiKey
            | GenerationError::Http(_) => FallbackReason::Unavailable,
        }
    }
}

// ============================================================================
// Chat-completion API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
    /// Legacy completion shape.
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

// ============================================================================
// ChatCompletionClient
// ============================================================================

/// Chat-completion client. One POST per call, no retries.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: GenerationConfig,
    api_key: String,
    base_url: String,
}

impl ChatCompletionClient {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let base_url = config.base_url.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / self-hosted gateways)
    pub fn with_base_url(config: GenerationConfig, base_url: String) -> Result<Self, GenerationError> {
        let api_key = config
            .resolved_api_key()
            .ok_or(GenerationError::MissingApiKey)?;

        // The resolver enforces the real deadline; this only stops a leaked
        // request from hanging forever.
        let client = Client::builder()
            .timeout(config.timeout() + Duration::from_secs(1))
            .connect_timeout(config.timeout())
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            client,
            config,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            frequency_penalty: self.config.frequency_penalty,
            presence_penalty: self.config.presence_penalty,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(USER_AGENT, &self.config.user_agent)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .and_then(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Chat-completion API error");

            return Err(GenerationError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let raw = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.and_then(|m| m.content).or(c.text))
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationError::EmptyCompletion)
    }
}

#[async_trait]
impl Generator for ChatCompletionClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.complete(request).await
    }

    fn name(&self) -> &str {
        "chat-completion"
    }
}

// ============================================================================
// Reply formatting
// ============================================================================

fn blank_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("static newline regex"))
}

/// Tidy a generated reply for chat display: trim, squeeze runs of blank
/// lines down to one, cap at `max_chars` characters.
pub fn format_reply(raw: &str, max_chars: usize) -> String {
    let normalized = raw.replace("\r\n", "\n");
    let squeezed = blank_run_regex().replace_all(normalized.trim(), "\n\n");
    truncate_chars(&squeezed, max_chars).trim_end().to_string()
}

/// Emoji prepended to an undecorated reply, by first topic word found.
const TOPIC_EMOJI: [(&str, &str); 4] = [
    ("perfume", "✨"),
    ("ropa", "👕"),
    ("envío", "📦"),
    ("pago", "💳"),
];

fn has_emoji(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c as u32, 0x1F300..=0x1F9FF | 0x2600..=0x26FF | 0x2700..=0x27BF)
    })
}

/// Post-processing applied to every generated reply before it is cached.
///
/// Always: [`format_reply`] plus restoring the canonical spelling of the
/// store name ("AMERICAN store" becomes "American Store"). Optionally: a
/// topic emoji for replies that carry none.
#[derive(Debug, Clone)]
pub struct ReplyFormatter {
    max_chars: usize,
    brand: Option<(Regex, String)>,
    topic_emoji: bool,
}

impl ReplyFormatter {
    pub fn new(max_chars: usize, brand: &str, topic_emoji: bool) -> Self {
        let brand = brand.trim();
        let brand = if brand.is_empty() {
            None
        } else {
            Regex::new(&format!("(?i){}", regex::escape(brand)))
                .ok()
                .map(|re| (re, brand.to_string()))
        };

        Self {
            max_chars: max_chars.max(1),
            brand,
            topic_emoji,
        }
    }

    pub fn format(&self, raw: &str) -> String {
        let text = match &self.brand {
            Some((re, canonical)) => re.replace_all(raw, regex::NoExpand(canonical)).into_owned(),
            None => raw.to_string(),
        };
        let text = format_reply(&text, self.max_chars);

        if !self.topic_emoji || text.is_empty() || has_emoji(&text) {
            return text;
        }

        let lowered = text.to_lowercase();
        match TOPIC_EMOJI.iter().find(|(topic, _)| lowered.contains(topic)) {
            Some((_, emoji)) => format!("{} {}", emoji, text),
            None => text,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> GenerationConfig {
        GenerationConfig {
            api_key: Some(api_key.to_string()),
            timeout_ms: 2000,
            ..GenerationConfig::default()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "Eres un asistente de ventas.".to_string(),
            user: "cuánto cuesta el envío".to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    #[tokio::test]
    async fn test_generate_posts_chat_request_and_returns_content() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-chat",
                "messages": [
                    { "role": "system", "content": "Eres un asistente de ventas." },
                    { "role": "user", "content": "cuánto cuesta el envío" }
                ],
                "max_tokens": 400
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Envío $12.000, 1-3 días")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let reply = client.generate(&request()).await;
        assert_eq!(reply.unwrap(), "Envío $12.000, 1-3 días");
    }

    #[tokio::test]
    async fn test_generate_accepts_legacy_text_choice() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "text": "Respuesta en formato antiguo" }]
            })))
            .mount(&mock_server)
            .await;

        assert_eq!(client.generate(&request()).await.unwrap(), "Respuesta en formato antiguo");
    }

    #[tokio::test]
    async fn test_generate_returns_api_error_on_500() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal server error", "type": "server_error" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.generate(&request()).await {
            Err(GenerationError::Api { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "Internal server error");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generate_maps_auth_and_rate_limit_statuses() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-bad"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit reached" }
            })))
            .mount(&mock_server)
            .await;

        let first = client.generate(&request()).await.unwrap_err();
        assert_eq!(first.fallback_reason(), FallbackReason::Unauthorized);
        assert!(matches!(first, GenerationError::Api { code: 401, ref message } if message == "unauthorized"));

        let second = client.generate(&request()).await.unwrap_err();
        assert_eq!(second.fallback_reason(), FallbackReason::RateLimited);
    }

    #[tokio::test]
    async fn test_generate_rejects_unparseable_body() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&mock_server)
            .await;

        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)), "got {:?}", err);
        assert_eq!(err.fallback_reason(), FallbackReason::Unavailable);
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_completion() {
        let mock_server = MockServer::start().await;
        let client = ChatCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&mock_server)
            .await;

        assert!(matches!(client.generate(&request()).await, Err(GenerationError::EmptyCompletion)));
        assert!(matches!(client.generate(&request()).await, Err(GenerationError::EmptyCompletion)));
    }

    #[tokio::test]
    async fn test_connection_refused_maps_to_connection_error() {
        // Bind then drop a listener so the port is very likely closed.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client =
            ChatCompletionClient::with_base_url(test_config("sk-test"), format!("http://{}", addr)).unwrap();

        let err = client.generate(&request()).await.unwrap_err();
        assert_eq!(err.fallback_reason(), FallbackReason::Connection, "got {:?}", err);
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = GenerationConfig {
            api_key: Some(String::new()),
            ..GenerationConfig::default()
        };
        match ChatCompletionClient::new(config) {
            Err(GenerationError::MissingApiKey) => {}
            other => panic!("Expected MissingApiKey, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_format_reply_squeezes_blank_lines_and_truncates() {
        let raw = "  Hola!\n\n\n\nTenemos envío gratis.\r\n\r\n\r\nSaludos  ";
        assert_eq!(format_reply(raw, 800), "Hola!\n\nTenemos envío gratis.\n\nSaludos");
        assert_eq!(format_reply("abcdef", 3), "abc");
        assert_eq!(format_reply("una\n\ndos", 800), "una\n\ndos");
    }

    #[test]
    fn test_formatter_restores_store_name_casing() {
        let formatter = ReplyFormatter::new(800, "American Store", false);
        assert_eq!(
            formatter.format("Bienvenido a AMERICAN store, la mejor de american Store."),
            "Bienvenido a American Store, la mejor de American Store."
        );
    }

    #[test]
    fn test_formatter_adds_topic_emoji_when_enabled() {
        let formatter = ReplyFormatter::new(800, "American Store", true);
        assert_eq!(formatter.format("Tenemos perfumes y ropa"), "✨ Tenemos perfumes y ropa");
        assert_eq!(formatter.format("Ropa importada"), "👕 Ropa importada");
        assert_eq!(formatter.format("Envío $12.000, 1-3 días"), "📦 Envío $12.000, 1-3 días");
        assert_eq!(formatter.format("Aceptamos pagos por Nequi"), "💳 Aceptamos pagos por Nequi");
        assert_eq!(formatter.format("Hola, ¿en qué te ayudo?"), "Hola, ¿en qué te ayudo?");
    }

    #[test]
    fn test_formatter_keeps_existing_emoji_and_respects_toggle() {
        let decorated = ReplyFormatter::new(800, "American Store", true);
        assert_eq!(decorated.format("🔥 Perfumes en oferta"), "🔥 Perfumes en oferta");
        assert_eq!(decorated.format("Perfumes ☀ de verano"), "Perfumes ☀ de verano");

        let plain = ReplyFormatter::new(800, "American Store", false);
        assert_eq!(plain.format("Envío $12.000, 1-3 días"), "Envío $12.000, 1-3 días");
    }

    #[test]
    fn test_formatter_with_blank_brand_only_tidies() {
        let formatter = ReplyFormatter::new(5, "  ", false);
        assert_eq!(formatter.format("  abcdefgh "), "abcde");
    }
}
