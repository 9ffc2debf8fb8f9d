//! Validated engine settings.
//!
//! Raw deserialization structs (with `Option` fields and loose numbers) stay
//! private here. `Settings` is resolved at the parse boundary via
//! `#[serde(try_from)]` -- existence of a value is the proof of its validity,
//! so no session can start from an out-of-range configuration.

use serde::Deserialize;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_CONTEXT_SIZE: u32 = 4000;
const DEFAULT_EDITOR_CONTEXT_RATIO: f32 = 0.3;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
const DEFAULT_TYPING_DELAY_MS: u64 = 5;

const MAX_CONTEXT_SIZE: u32 = 1_000_000;
const MAX_RETRIES_CEILING: u32 = 10;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("api_key must not be empty")]
    EmptyApiKey,
    #[error("model must not be empty")]
    EmptyModel,
    #[error("endpoint must be an http(s) URL, got {0:?}")]
    InvalidEndpoint(String),
    #[error("context_size must be between 1 and {MAX_CONTEXT_SIZE}, got {0}")]
    ContextSizeOutOfRange(u32),
    #[error("editor_context_ratio must be in (0, 1], got {0}")]
    EditorRatioOutOfRange(f32),
    #[error("max_retries must be at most {MAX_RETRIES_CEILING}, got {0}")]
    TooManyRetries(u32),
    #[error("request_timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("temperature must be in [0, 2], got {0}")]
    TemperatureOutOfRange(f32),
    #[error("max_output_tokens must be greater than zero")]
    ZeroOutputTokens,
    #[error("invalid settings: {0}")]
    Parse(String),
}

#[derive(Deserialize)]
struct RawSettings {
    api_key: String,
    model: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    context_size: Option<u32>,
    #[serde(default)]
    editor_context_ratio: Option<f32>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    typing_delay_ms: Option<u64>,
    #[serde(default)]
    stop: Vec<String>,
}

/// Validated engine configuration, consumed at session construction time.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSettings")]
pub struct Settings {
    api_key: String,
    model: String,
    endpoint: String,
    context_size: u32,
    editor_context_ratio: f32,
    max_retries: u32,
    request_timeout_secs: u64,
    stream: bool,
    temperature: f32,
    max_output_tokens: u32,
    typing_delay_ms: u64,
    stop: Vec<String>,
}

impl TryFrom<RawSettings> for Settings {
    type Error = SettingsError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        if raw.api_key.trim().is_empty() {
            return Err(SettingsError::EmptyApiKey);
        }
        if raw.model.trim().is_empty() {
            return Err(SettingsError::EmptyModel);
        }

        let endpoint = raw.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(SettingsError::InvalidEndpoint(endpoint));
        }

        let context_size = raw.context_size.unwrap_or(DEFAULT_CONTEXT_SIZE);
        if context_size == 0 || context_size > MAX_CONTEXT_SIZE {
            return Err(SettingsError::ContextSizeOutOfRange(context_size));
        }

        let editor_context_ratio = raw
            .editor_context_ratio
            .unwrap_or(DEFAULT_EDITOR_CONTEXT_RATIO);
        if !(editor_context_ratio > 0.0 && editor_context_ratio <= 1.0) {
            return Err(SettingsError::EditorRatioOutOfRange(editor_context_ratio));
        }

        let max_retries = raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES_CEILING {
            return Err(SettingsError::TooManyRetries(max_retries));
        }

        let request_timeout_secs = raw
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if request_timeout_secs == 0 {
            return Err(SettingsError::ZeroTimeout);
        }

        let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(SettingsError::TemperatureOutOfRange(temperature));
        }

        let max_output_tokens = raw.max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);
        if max_output_tokens == 0 {
            return Err(SettingsError::ZeroOutputTokens);
        }

        Ok(Self {
            api_key: raw.api_key,
            model: raw.model,
            endpoint,
            context_size,
            editor_context_ratio,
            max_retries,
            request_timeout_secs,
            stream: raw.stream.unwrap_or(true),
            temperature,
            max_output_tokens,
            typing_delay_ms: raw.typing_delay_ms.unwrap_or(DEFAULT_TYPING_DELAY_MS),
            stop: raw.stop,
        })
    }
}

impl Settings {
    /// Parse and validate settings from a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, SettingsError> {
        toml::from_str(input).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Minimal valid settings for the given credential and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, SettingsError> {
        RawSettings {
            api_key: api_key.into(),
            model: model.into(),
            endpoint: None,
            context_size: None,
            editor_context_ratio: None,
            max_retries: None,
            request_timeout_secs: None,
            stream: None,
            temperature: None,
            max_output_tokens: None,
            typing_delay_ms: None,
            stop: Vec::new(),
        }
        .try_into()
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub const fn context_size(&self) -> u32 {
        self.context_size
    }

    #[must_use]
    pub const fn editor_context_ratio(&self) -> f32 {
        self.editor_context_ratio
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub const fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
    }

    #[must_use]
    pub const fn stream(&self) -> bool {
        self.stream
    }

    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    #[must_use]
    pub const fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    #[must_use]
    pub const fn typing_delay_ms(&self) -> u64 {
        self.typing_delay_ms
    }

    #[must_use]
    pub fn stop(&self) -> &[String] {
        &self.stop
    }

    /// Override the endpoint. Used by tests pointing at a local mock server.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES_CEILING);
        self
    }

    #[must_use]
    pub fn with_typing_delay_ms(mut self, delay_ms: u64) -> Self {
        self.typing_delay_ms = delay_ms;
        self
    }

    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs.max(1);
        self
    }

    #[must_use]
    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = context_size.clamp(1, MAX_CONTEXT_SIZE);
        self
    }
}
