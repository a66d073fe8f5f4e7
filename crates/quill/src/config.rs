//! Runtime configuration sourced from the process environment.
//!
//! Every loader takes a lookup function so tests can supply variables
//! without touching the real environment.

use std::time::Duration;

pub const MAX_CONCURRENT_VAR: &str = "QUILL_MAX_CONCURRENT_GENERATIONS";
pub const MAX_QUEUED_VAR: &str = "QUILL_MAX_QUEUED_GENERATIONS";
pub const QUEUE_TIMEOUT_VAR: &str = "QUILL_QUEUE_TIMEOUT";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Admission pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Maximum simultaneous generation calls. Never below 1.
    pub max_concurrent: usize,
    /// Queue bound; `None` queues without limit.
    pub max_queued: Option<usize>,
    /// How long a request may wait for a slot; `None` waits indefinitely.
    pub queue_timeout: Option<Duration>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
            max_queued: None,
            queue_timeout: None,
        }
    }
}

impl GateConfig {
    pub const DEFAULT_MAX_CONCURRENT: usize = 2;

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a variable lookup. Out-of-range or malformed values fall
    /// back to the defaults with a warning rather than failing startup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_concurrent = match lookup(MAX_CONCURRENT_VAR) {
            None => Self::DEFAULT_MAX_CONCURRENT,
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(n) if n < 1 => {
                    tracing::warn!(value = n, "{MAX_CONCURRENT_VAR} below 1, clamping to 1");
                    1
                }
                Ok(n) => usize::try_from(n).unwrap_or(usize::MAX),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Ignoring malformed {MAX_CONCURRENT_VAR}");
                    Self::DEFAULT_MAX_CONCURRENT
                }
            },
        };

        let max_queued = lookup(MAX_QUEUED_VAR).and_then(|raw| match raw.trim().parse::<usize>() {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "Ignoring malformed {MAX_QUEUED_VAR}");
                None
            }
        });

        let queue_timeout = lookup(QUEUE_TIMEOUT_VAR).and_then(|raw| {
            match parse_queue_timeout(&raw) {
                Ok(timeout) => Some(timeout),
                Err(QueueTimeoutError::NotPositive(secs)) => {
                    tracing::warn!(value = secs, "Ignoring non-positive {QUEUE_TIMEOUT_VAR}");
                    None
                }
                Err(QueueTimeoutError::Malformed(e)) => {
                    tracing::warn!(value = %raw, error = %e, "Ignoring malformed {QUEUE_TIMEOUT_VAR}");
                    None
                }
            }
        });

        Self {
            max_concurrent,
            max_queued,
            queue_timeout,
        }
    }
}

#[derive(Debug, PartialEq)]
enum QueueTimeoutError {
    Malformed(std::num::ParseFloatError),
    NotPositive(f64),
}

fn parse_queue_timeout(raw: &str) -> Result<Duration, QueueTimeoutError> {
    let secs = raw
        .trim()
        .parse::<f64>()
        .map_err(QueueTimeoutError::Malformed)?;
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(QueueTimeoutError::NotPositive(secs))
    }
}

/// LLM provider settings (OpenAI-compatible chat completions API).
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(120),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

impl ProviderConfig {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("QUILL_PROVIDER_URL") {
            let parsed = reqwest::Url::parse(&url)
                .map_err(|e| ConfigError::invalid("QUILL_PROVIDER_URL", &url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::invalid(
                    "QUILL_PROVIDER_URL",
                    &url,
                    "scheme must be http or https",
                ));
            }
            config.base_url = url.trim_end_matches('/').to_string();
        }

        config.api_key = lookup("QUILL_PROVIDER_API_KEY").filter(|k| !k.is_empty());

        if let Some(model) = lookup("QUILL_MODEL").filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }

        if let Some(raw) = lookup("QUILL_PROVIDER_TIMEOUT") {
            config.timeout = match raw.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
                _ => {
                    return Err(ConfigError::invalid(
                        "QUILL_PROVIDER_TIMEOUT",
                        &raw,
                        "expected positive seconds",
                    ));
                }
            };
        }

        if let Some(raw) = lookup("QUILL_TEMPERATURE") {
            config.temperature = match raw.trim().parse::<f32>() {
                Ok(t) if (0.0..=2.0).contains(&t) => t,
                _ => {
                    return Err(ConfigError::invalid(
                        "QUILL_TEMPERATURE",
                        &raw,
                        "expected a number between 0 and 2",
                    ));
                }
            };
        }

        if let Some(raw) = lookup("QUILL_MAX_TOKENS") {
            config.max_tokens = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::invalid("QUILL_MAX_TOKENS", &raw, "expected a positive integer")
                })?;
        }

        Ok(config)
    }
}

/// Complete configuration for the server binary.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gate: GateConfig,
    pub provider: ProviderConfig,
    pub server: crate::transport::ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut server = crate::transport::ServerConfig::default();
        if let Some(host) = lookup("QUILL_HOST").filter(|h| !h.trim().is_empty()) {
            server.host = host.trim().to_string();
        }
        if let Some(raw) = lookup("QUILL_PORT") {
            server.port = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("QUILL_PORT", &raw, e))?;
        }

        Ok(Self {
            gate: GateConfig::from_lookup(&lookup),
            provider: ProviderConfig::from_lookup(&lookup)?,
            server,
        })
    }
}
