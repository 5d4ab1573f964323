//! Model interaction: send one conversion request and classify failures.
//!
//! Prompt text lives in [`crate::prompts`] and retry policy in
//! [`crate::batch`]. The client makes exactly one call per
//! [`AiClient::convert`] and reports failures in a form the orchestrator can
//! act on.
//!
//! ## Error classification
//!
//! [`classify_llm_error`] maps the provider's typed [`LlmError`] onto four
//! kinds. Variants that already say what went wrong (auth, rate limit,
//! timeout, network, invalid request, …) decide the kind directly. Only the
//! catch-all variants (`ApiError`, `ProviderError`, `Unknown`) carry a
//! free-form message, which [`classify_error`] reads for status codes and
//! well-known phrases:
//!
//! | Kind         | Signals                                                 | Retried |
//! |--------------|---------------------------------------------------------|---------|
//! | `Auth`       | 401, 403, "unauthorized", "invalid api key"             | no      |
//! | `RateLimited`| 429, "rate limit", "too many requests", "quota"         | yes     |
//! | `Transient`  | timeouts, 5xx, "overloaded", connection/network errors  | yes     |
//! | `Permanent`  | anything else                                           | no      |
//!
//! Unrecognised errors are permanent and never retried.

use crate::error::AiError;
use crate::pipeline::request::ConversionRequest;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LlmError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The external generation service, reduced to the one call the pipeline
/// needs. Implementations must not retry internally.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Send `request` and return the raw model text.
    async fn convert(&self, request: &ConversionRequest) -> Result<String, AiError>;
}

/// [`AiClient`] backed by an `edgequake_llm` provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    timeout: Duration,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, timeout: Duration) -> Self {
        Self {
            provider,
            temperature,
            timeout,
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("provider", &"<dyn LLMProvider>")
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl AiClient for ProviderClient {
    async fn convert(&self, request: &ConversionRequest) -> Result<String, AiError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user(&request.user_prompt),
        ];
        let options = build_options(self.temperature, request.max_output_tokens());

        let response =
            match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(classify_llm_error(&e)),
                Err(_) => {
                    return Err(AiError::Transient {
                        detail: format!("no response within {}s", self.timeout.as_secs()),
                    })
                }
            };

        debug!(
            "{}: {} input tokens, {} output tokens, {:?}",
            request.filename,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        if response.content.trim().is_empty() {
            return Err(AiError::Permanent {
                detail: "model returned an empty response".into(),
            });
        }
        Ok(response.content)
    }
}

/// Build `CompletionOptions` for one request.
fn build_options(temperature: f32, max_output_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_output_tokens),
        ..Default::default()
    }
}

static RE_STATUS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([45]\d\d)\b").unwrap());

static RE_RETRY_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)retry[- _]?after\W{0,3}(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|sec|seconds?)?")
        .unwrap()
});

/// Map a provider error onto an [`AiError`].
pub fn classify_llm_error(error: &LlmError) -> AiError {
    let detail = error.to_string();
    match error {
        LlmError::AuthError(_) => AiError::Auth { detail },
        LlmError::RateLimited(message) => AiError::RateLimited {
            retry_after: parse_retry_after(&message.to_lowercase()),
            detail,
        },
        LlmError::Timeout | LlmError::NetworkError(_) => AiError::Transient { detail },
        LlmError::InvalidRequest(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::ModelNotFound(_)
        | LlmError::ConfigError(_)
        | LlmError::NotSupported(_)
        | LlmError::SerializationError(_) => AiError::Permanent { detail },
        LlmError::ApiError(_) | LlmError::ProviderError(_) | LlmError::Unknown(_) => {
            classify_error(&detail)
        }
    }
}

/// Map a free-form provider error message onto an [`AiError`].
pub fn classify_error(message: &str) -> AiError {
    let lower = message.to_lowercase();
    let detail = message.to_string();
    let status = RE_STATUS
        .captures(&lower)
        .and_then(|c| c[1].parse::<u16>().ok());
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if matches!(status, Some(401 | 403))
        || has(&[
            "unauthorized",
            "unauthenticated",
            "invalid api key",
            "invalid_api_key",
            "incorrect api key",
            "authentication",
            "permission denied",
            "forbidden",
        ])
    {
        return AiError::Auth { detail };
    }
    if status == Some(429) || has(&["rate limit", "rate_limit", "too many requests", "quota"]) {
        return AiError::RateLimited {
            retry_after: parse_retry_after(&lower),
            detail,
        };
    }
    if matches!(status, Some(500..=599))
        || has(&[
            "timeout",
            "timed out",
            "overloaded",
            "connection",
            "temporarily unavailable",
            "service unavailable",
            "bad gateway",
            "network",
            "try again",
        ])
    {
        return AiError::Transient { detail };
    }
    AiError::Permanent { detail }
}

/// Extract a `retry after N[s|ms]` hint, defaulting to seconds.
fn parse_retry_after(lower: &str) -> Option<Duration> {
    let caps = RE_RETRY_AFTER.captures(lower)?;
    let value: f64 = caps[1].parse().ok()?;
    let millis = match caps.get(2).map(|m| m.as_str()) {
        Some(unit) if unit.starts_with("ms") || unit.starts_with("milli") => value,
        _ => value * 1000.0,
    };
    Some(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn build_options_carries_budget() {
        let opts = build_options(0.3, 8_000);
        assert_eq!(opts.temperature, Some(0.3));
        assert_eq!(opts.max_tokens, Some(8_000));
    }

    #[test]
    fn classifies_auth() {
        for msg in [
            "HTTP 401: Unauthorized",
            "Error code: 403 - forbidden",
            "Invalid API key provided",
            "Authentication failed for provider openai",
        ] {
            assert_eq!(classify_error(msg).kind(), ErrorKind::AuthError, "{msg}");
        }
    }

    #[test]
    fn classifies_rate_limit_with_retry_after() {
        let e = classify_error("429 Too Many Requests: retry after 7 seconds");
        assert_eq!(e.kind(), ErrorKind::RateLimitError);
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));

        let e = classify_error("Rate limit reached. Retry-After: 250ms");
        assert_eq!(e.retry_after(), Some(Duration::from_millis(250)));

        let e = classify_error("You exceeded your current quota");
        assert_eq!(e.kind(), ErrorKind::RateLimitError);
        assert_eq!(e.retry_after(), None);
    }

    #[test]
    fn classifies_transient() {
        for msg in [
            "request timed out",
            "HTTP 503 Service Unavailable",
            "502 Bad Gateway",
            "The server is overloaded",
            "connection reset by peer",
        ] {
            assert_eq!(classify_error(msg).kind(), ErrorKind::TransientError, "{msg}");
        }
    }

    #[test]
    fn unknown_errors_are_permanent() {
        for msg in [
            "400 Bad Request: maximum context length exceeded",
            "model not found",
            "",
        ] {
            let e = classify_error(msg);
            assert_eq!(e.kind(), ErrorKind::PermanentError, "{msg}");
            assert!(!e.is_retryable());
        }
    }

    #[test]
    fn typed_errors_decide_the_kind() {
        let cases = [
            (LlmError::AuthError("expired key".into()), ErrorKind::AuthError),
            (LlmError::RateLimited("slow down".into()), ErrorKind::RateLimitError),
            (LlmError::Timeout, ErrorKind::TransientError),
            (LlmError::NetworkError("dns".into()), ErrorKind::TransientError),
            (
                LlmError::InvalidRequest("unsupported value for 'timeout' parameter".into()),
                ErrorKind::PermanentError,
            ),
            (
                LlmError::ModelNotFound("connection-model-v9".into()),
                ErrorKind::PermanentError,
            ),
            (
                LlmError::ConfigError("network proxy misconfigured".into()),
                ErrorKind::PermanentError,
            ),
            (
                LlmError::TokenLimitExceeded { max: 128_000, got: 130_000 },
                ErrorKind::PermanentError,
            ),
            (LlmError::NotSupported("json mode".into()), ErrorKind::PermanentError),
        ];
        for (error, kind) in cases {
            assert_eq!(classify_llm_error(&error).kind(), kind, "{error}");
        }
    }

    #[test]
    fn typed_rate_limit_keeps_retry_hint() {
        let e = classify_llm_error(&LlmError::RateLimited("retry after 3 seconds".into()));
        assert_eq!(e.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn catch_all_variants_fall_back_to_the_message() {
        assert_eq!(
            classify_llm_error(&LlmError::ApiError("HTTP 503 Service Unavailable".into())).kind(),
            ErrorKind::TransientError
        );
        assert_eq!(
            classify_llm_error(&LlmError::ProviderError("429 Too Many Requests".into())).kind(),
            ErrorKind::RateLimitError
        );
        assert_eq!(
            classify_llm_error(&LlmError::Unknown("something odd".into())).kind(),
            ErrorKind::PermanentError
        );
    }

    #[test]
    fn status_code_inside_larger_number_is_ignored() {
        // "14290" must not be read as a 429.
        assert_eq!(
            classify_error("invalid request id 14290").kind(),
            ErrorKind::PermanentError
        );
    }
}
