//! Configuration types for document-to-JSON conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across batches, print them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! The knobs fall into four groups: the model call (provider, model,
//! temperature, timeout), the token budget (context window, output tiers),
//! batch limits (combined upload size, file count) and retry policy.

use crate::error::Doc2JsonError;
use crate::pipeline::llm::AiClient;
use crate::progress::ProgressCallback;
use crate::prompts;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Model used when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Configuration for a document-to-JSON conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_doc2json::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .model("gpt-4o-mini")
///     .max_files_per_batch(10)
///     .output_tokens_override(8000)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    // ── Model call ────────────────────────────────────────────────────────
    /// LLM model identifier, e.g. "gpt-4o-mini". If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed AI client. Takes precedence over every provider option.
    ///
    /// This is the seam tests and embedding applications use to substitute
    /// their own generation backend.
    pub ai_client: Option<Arc<dyn AiClient>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Per-call timeout in seconds. Default: 120.
    ///
    /// Structuring a long document can legitimately take a minute or more of
    /// generation; a call exceeding this is treated as a transient failure.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses [`prompts::SYSTEM_PROMPT`].
    pub system_prompt: Option<String>,

    // ── Token budget ──────────────────────────────────────────────────────
    /// Maximum combined input + output tokens per call. Default: 128 000.
    pub context_window_tokens: usize,

    /// Fraction of the window held back as a safety margin. Default: 0.05.
    ///
    /// The character-based estimate undercounts some scripts; 5 % absorbs that.
    pub safety_margin_ratio: f32,

    /// Characters per estimated token. Default: 4.
    pub chars_per_token: usize,

    /// Smallest output budget. Default: 4 000.
    pub output_tokens_floor: usize,

    /// Largest output budget. Default: 16 000.
    pub output_tokens_ceiling: usize,

    /// Fixed output budget; disables size-based scaling when set.
    pub output_tokens_override: Option<usize>,

    /// Documents longer than this (chars) get twice the floor. Default: 100 000.
    pub medium_document_chars: usize,

    /// Documents longer than this (chars) get the ceiling. Default: 300 000.
    pub large_document_chars: usize,

    /// Extracted text shorter than this (trimmed chars) is rejected. Default: 50.
    pub min_text_chars: usize,

    // ── Batch limits ──────────────────────────────────────────────────────
    /// Maximum combined size of all files in one batch. Default: 200 MiB.
    pub max_combined_upload_bytes: u64,

    /// Maximum files in one batch; 0 means unlimited. Default: 0.
    pub max_files_per_batch: usize,

    // ── Retry policy ──────────────────────────────────────────────────────
    /// Total model calls per file for rate-limit / transient failures. Default: 3.
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Longest single wait between attempts, including provider
    /// retry-after hints. Default: 60 000.
    pub max_retry_delay_ms: u64,

    /// Optional per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            ai_client: None,
            temperature: 0.3,
            api_timeout_secs: 120,
            system_prompt: None,
            context_window_tokens: 128_000,
            safety_margin_ratio: 0.05,
            chars_per_token: 4,
            output_tokens_floor: 4_000,
            output_tokens_ceiling: 16_000,
            output_tokens_override: None,
            medium_document_chars: 100_000,
            large_document_chars: 300_000,
            min_text_chars: 50,
            max_combined_upload_bytes: 200 * 1024 * 1024,
            max_files_per_batch: 0,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_retry_delay_ms: 60_000,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("ai_client", &self.ai_client.as_ref().map(|_| "<dyn AiClient>"))
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("context_window_tokens", &self.context_window_tokens)
            .field("output_tokens_floor", &self.output_tokens_floor)
            .field("output_tokens_ceiling", &self.output_tokens_ceiling)
            .field("output_tokens_override", &self.output_tokens_override)
            .field("max_combined_upload_bytes", &self.max_combined_upload_bytes)
            .field("max_files_per_batch", &self.max_files_per_batch)
            .field("max_attempts", &self.max_attempts)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The system prompt actually sent: the override or the built-in contract.
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(prompts::SYSTEM_PROMPT)
    }

    /// Model name actually requested.
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Tokens held back from the window, rounded down.
    pub fn safety_margin_tokens(&self) -> usize {
        (self.context_window_tokens as f64 * self.safety_margin_ratio as f64) as usize
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn ai_client(mut self, client: Arc<dyn AiClient>) -> Self {
        self.config.ai_client = Some(client);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn context_window_tokens(mut self, n: usize) -> Self {
        self.config.context_window_tokens = n;
        self
    }

    pub fn safety_margin_ratio(mut self, ratio: f32) -> Self {
        self.config.safety_margin_ratio = ratio;
        self
    }

    pub fn chars_per_token(mut self, n: usize) -> Self {
        self.config.chars_per_token = n;
        self
    }

    pub fn output_tokens_range(mut self, floor: usize, ceiling: usize) -> Self {
        self.config.output_tokens_floor = floor;
        self.config.output_tokens_ceiling = ceiling;
        self
    }

    pub fn output_tokens_override(mut self, n: usize) -> Self {
        self.config.output_tokens_override = Some(n);
        self
    }

    pub fn document_size_tiers(mut self, medium_chars: usize, large_chars: usize) -> Self {
        self.config.medium_document_chars = medium_chars;
        self.config.large_document_chars = large_chars;
        self
    }

    pub fn min_text_chars(mut self, n: usize) -> Self {
        self.config.min_text_chars = n;
        self
    }

    pub fn max_combined_upload_bytes(mut self, n: u64) -> Self {
        self.config.max_combined_upload_bytes = n;
        self
    }

    pub fn max_files_per_batch(mut self, n: usize) -> Self {
        self.config.max_files_per_batch = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.max_retry_delay_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Doc2JsonError> {
        let c = &self.config;
        if c.context_window_tokens == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "Context window must be ≥ 1 token".into(),
            ));
        }
        if c.chars_per_token == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "chars_per_token must be ≥ 1".into(),
            ));
        }
        if !(0.0..0.5).contains(&c.safety_margin_ratio) {
            return Err(Doc2JsonError::InvalidConfig(format!(
                "Safety margin must be in [0, 0.5), got {}",
                c.safety_margin_ratio
            )));
        }
        if c.output_tokens_floor == 0 || c.output_tokens_floor > c.output_tokens_ceiling {
            return Err(Doc2JsonError::InvalidConfig(format!(
                "Output token range must satisfy 1 ≤ floor ≤ ceiling, got {}–{}",
                c.output_tokens_floor, c.output_tokens_ceiling
            )));
        }
        if c.medium_document_chars > c.large_document_chars {
            return Err(Doc2JsonError::InvalidConfig(format!(
                "Medium document threshold ({}) exceeds large threshold ({})",
                c.medium_document_chars, c.large_document_chars
            )));
        }
        if c.max_attempts == 0 {
            return Err(Doc2JsonError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        crate::pipeline::budget::validate_tiers(c)?;
        Ok(self.config)
    }
}
