use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assetforge_contracts::events::{EventPayload, EventSink};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use thiserror::Error;

use crate::response::{body_preview, describe_shape, GenerationResponse};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY_BASE_SECS: u64 = 2;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const API_KEY_HEADER: &str = "x-goog-api-key";
const STYLE_REFERENCE_INSTRUCTION: &str =
    "Use this image as a style reference. Generate a new image matching this art style:";
const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("invalid or unauthorized API key (HTTP {status}); check GEMINI_API_KEY in your .env file")]
    Auth { status: u16 },

    #[error("bad request: {payload}")]
    BadRequest { payload: Value },

    #[error("max retries exceeded: still rate limited after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    #[error("request timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("cannot reach the generation service ({0}); check your internet connection")]
    Connection(String),

    #[error("generation service returned HTTP {status}: {body}")]
    Service { status: u16, body: String },

    #[error("malformed service response: {0}")]
    Parse(String),

    #[error(
        "no image in service response (finish reason: {}); model text: {model_text}",
        finish_reason.as_deref().unwrap_or("unknown")
    )]
    NoImage {
        finish_reason: Option<String>,
        model_text: String,
    },

    #[error("failed reading reference image {}", path.display())]
    Reference {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub reference_image: Option<PathBuf>,
}

/// Anything that can turn a prompt into a service response.
pub trait ImageGenerator {
    fn model_id(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout(String),
    Connect(String),
    Other(String),
}

pub trait Transport {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpReply, TransportFailure>;
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, GenerateError> {
        let http = HttpClient::builder()
            .build()
            .map_err(|err| GenerateError::Transport(err.to_string()))?;
        Ok(Self { http, timeout })
    }
}

impl Transport for ReqwestTransport {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpReply, TransportFailure> {
        let response = self
            .http
            .post(endpoint)
            .header(API_KEY_HEADER, api_key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify_reqwest_error)?;
        Ok(HttpReply { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportFailure::Connect(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}

/// Exponential backoff: the wait after failed attempt `n` (0-based) is `base^(n+1)` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_secs: RETRY_DELAY_BASE_SECS,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_secs.saturating_pow(attempt.saturating_add(1)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl GeminiConfig {
    /// Defaults, with `GEMINI_API_BASE` honored when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
        {
            config.api_base = base;
        }
        config
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

pub struct GeminiClient<T = ReqwestTransport, S = ThreadSleeper> {
    config: GeminiConfig,
    api_key: String,
    transport: T,
    sleeper: S,
    events: Arc<dyn EventSink>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        config: GeminiConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, GenerateError> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Ok(Self::with_parts(
            api_key,
            config,
            transport,
            ThreadSleeper,
            events,
        ))
    }
}

impl<T: Transport, S: Sleeper> GeminiClient<T, S> {
    pub fn with_parts(
        api_key: String,
        config: GeminiConfig,
        transport: T,
        sleeper: S,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            api_key,
            transport,
            sleeper,
            events,
        }
    }

    fn build_parts(&self, request: &GenerationRequest) -> Result<Vec<Value>, GenerateError> {
        let mut parts = Vec::new();
        if let Some(reference) = request.reference_image.as_deref() {
            if reference.exists() {
                parts.push(image_part_from_path(reference)?);
                parts.push(json!({ "text": STYLE_REFERENCE_INSTRUCTION }));
            } else {
                tracing::warn!(
                    "reference image {} not found; generating without it",
                    reference.display()
                );
                let mut payload = EventPayload::new();
                payload.insert(
                    "path".to_string(),
                    Value::String(reference.to_string_lossy().to_string()),
                );
                self.events.emit("reference_missing", payload);
            }
        }
        parts.push(json!({ "text": request.prompt }));
        Ok(parts)
    }

    pub fn build_payload(&self, request: &GenerationRequest) -> Result<Value, GenerateError> {
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": self.build_parts(request)?,
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio,
                },
            },
        }))
    }

    fn parse_reply(&self, body: &str) -> Result<GenerationResponse, GenerateError> {
        let raw: Value = serde_json::from_str(body)
            .map_err(|err| GenerateError::Parse(format!("invalid JSON payload: {err}")))?;
        let shape = describe_shape(&raw);
        tracing::debug!(
            "response shape: {}",
            serde_json::to_string(&shape).unwrap_or_default()
        );
        self.events.emit("response_shape", shape);
        let preview = body_preview(&raw);
        let mut response: GenerationResponse =
            serde_json::from_value(raw).map_err(|err| GenerateError::Parse(err.to_string()))?;
        if response.candidates.is_empty() {
            response.body_preview = Some(preview);
        }
        Ok(response)
    }

    fn emit_retry(&self, reason: &str, attempt: u32, delay: Duration) {
        let mut payload = EventPayload::new();
        payload.insert("reason".to_string(), json!(reason));
        payload.insert("attempt".to_string(), json!(attempt + 1));
        payload.insert(
            "max_attempts".to_string(),
            json!(self.config.retry.max_attempts),
        );
        payload.insert("delay_s".to_string(), json!(delay.as_secs()));
        self.events.emit("generation_retry", payload);
    }
}

impl<T: Transport, S: Sleeper> ImageGenerator for GeminiClient<T, S> {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerateError> {
        let endpoint = self.config.endpoint();
        let payload = self.build_payload(request)?;
        let max_attempts = self.config.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let mut started = EventPayload::new();
            started.insert("attempt".to_string(), json!(attempt + 1));
            started.insert("model".to_string(), json!(self.config.model));
            self.events.emit("generation_request", started);

            match self.transport.post_json(&endpoint, &self.api_key, &payload) {
                Ok(reply) if reply.status == 429 => {
                    let delay = self.config.retry.delay(attempt);
                    tracing::warn!(
                        "rate limited; retrying in {}s (attempt {}/{max_attempts})",
                        delay.as_secs(),
                        attempt + 1
                    );
                    self.emit_retry("rate_limited", attempt, delay);
                    self.sleeper.sleep(delay);
                }
                Ok(reply) if matches!(reply.status, 401 | 403) => {
                    return Err(GenerateError::Auth {
                        status: reply.status,
                    });
                }
                Ok(reply) if reply.status == 400 => {
                    let payload = serde_json::from_str::<Value>(&reply.body).unwrap_or_else(|_| {
                        Value::String(truncate_text(&reply.body, ERROR_BODY_MAX_CHARS))
                    });
                    return Err(GenerateError::BadRequest { payload });
                }
                Ok(reply) if !(200..300).contains(&reply.status) => {
                    return Err(GenerateError::Service {
                        status: reply.status,
                        body: truncate_text(&reply.body, ERROR_BODY_MAX_CHARS),
                    });
                }
                Ok(reply) => return self.parse_reply(&reply.body),
                Err(TransportFailure::Timeout(detail)) => {
                    if attempt + 1 >= max_attempts {
                        return Err(GenerateError::Timeout {
                            attempts: max_attempts,
                        });
                    }
                    let delay = self.config.retry.delay(attempt);
                    tracing::warn!("request timed out ({detail}); retrying in {}s", delay.as_secs());
                    self.emit_retry("timeout", attempt, delay);
                    self.sleeper.sleep(delay);
                }
                Err(TransportFailure::Connect(detail)) => {
                    return Err(GenerateError::Connection(detail));
                }
                Err(TransportFailure::Other(detail)) => {
                    return Err(GenerateError::Transport(detail));
                }
            }
        }

        Err(GenerateError::RateLimitExceeded {
            attempts: max_attempts,
        })
    }
}

fn image_part_from_path(path: &Path) -> Result<Value, GenerateError> {
    let bytes = fs::read(path).map_err(|source| GenerateError::Reference {
        path: path.to_path_buf(),
        source,
    })?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok(json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    }))
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
