//! Token budgeting: fit extracted text into the model's context window.
//!
//! Pure resource accounting: this stage never looks at what the text says.
//! Given the text length and the configuration it decides:
//!
//! * how many output tokens to request (scaled by document size between the
//!   configured floor and ceiling, or a fixed override), and
//! * how much of the text fits in what is left of the window once the prompt
//!   overhead, the output budget and the safety margin are reserved.
//!
//! Tokens are estimated at `chars_per_token` characters each. The estimate is
//! cheap and monotonic, which is all the budget needs: the safety margin
//! absorbs the error.
//!
//! When the text does not fit, the largest prefix that does is kept, cut back
//! to the nearest paragraph, line or sentence boundary so the model never sees
//! half a sentence at the end.

use crate::config::ConversionConfig;
use crate::error::Doc2JsonError;
use crate::prompts;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Budget decision for one document. Derived deterministically from the text
/// length and configuration.
///
/// Invariant: `estimated_input_tokens + max_output_tokens <= context_window_tokens`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPlan {
    /// Prompt overhead plus the retained text, in estimated tokens.
    pub estimated_input_tokens: usize,
    pub max_output_tokens: usize,
    pub was_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_note: Option<String>,
    pub original_chars: usize,
    pub retained_chars: usize,
}

impl TokenPlan {
    /// The part of `text` this plan keeps. `text` must be the planned text.
    pub fn retained<'a>(&self, text: &'a str) -> &'a str {
        if !self.was_truncated {
            return text;
        }
        match text.char_indices().nth(self.retained_chars) {
            Some((end, _)) => &text[..end],
            None => text,
        }
    }
}

/// Estimated tokens for `chars` characters.
pub fn estimate_tokens(chars: usize, chars_per_token: usize) -> usize {
    chars.div_ceil(chars_per_token.max(1))
}

/// Plan `text` against `config`. Shorthand for [`TokenBudgeter::plan`].
pub fn plan(text: &str, config: &ConversionConfig) -> TokenPlan {
    TokenBudgeter::new(config).plan(text)
}

/// Budget calculator bound to one configuration.
#[derive(Debug, Clone, Copy)]
pub struct TokenBudgeter<'a> {
    config: &'a ConversionConfig,
    overhead_tokens: usize,
}

impl<'a> TokenBudgeter<'a> {
    pub fn new(config: &'a ConversionConfig) -> Self {
        let overhead_chars = prompts::fixed_overhead_chars(config.system_prompt());
        Self {
            config,
            overhead_tokens: estimate_tokens(overhead_chars, config.chars_per_token),
        }
    }

    /// Tokens every request spends on prompts before any document text.
    pub fn overhead_tokens(&self) -> usize {
        self.overhead_tokens
    }

    /// Output tokens to request for a document of `chars` characters.
    ///
    /// Non-decreasing in `chars`; never more than the window minus the
    /// margin and prompt overhead.
    pub fn output_budget(&self, chars: usize) -> usize {
        let c = self.config;
        let wanted = match c.output_tokens_override {
            Some(n) => n,
            None if chars > c.large_document_chars => c.output_tokens_ceiling,
            None if chars > c.medium_document_chars => {
                (c.output_tokens_floor * 2).min(c.output_tokens_ceiling)
            }
            None => c.output_tokens_floor,
        };
        wanted.min(self.usable_window())
    }

    /// Tokens left for document text once `output` tokens are reserved.
    pub fn text_budget(&self, output: usize) -> usize {
        self.usable_window().saturating_sub(output)
    }

    fn usable_window(&self) -> usize {
        self.config
            .context_window_tokens
            .saturating_sub(self.config.safety_margin_tokens() + self.overhead_tokens)
    }

    pub fn plan(&self, text: &str) -> TokenPlan {
        let cpt = self.config.chars_per_token.max(1);
        let original_chars = text.chars().count();
        let text_tokens = estimate_tokens(original_chars, cpt);
        let max_output_tokens = self.output_budget(original_chars);
        let budget = self.text_budget(max_output_tokens);

        if text_tokens <= budget {
            debug!(
                "Token plan: {} text tokens + {} overhead, {} output",
                text_tokens, self.overhead_tokens, max_output_tokens
            );
            return TokenPlan {
                estimated_input_tokens: self.overhead_tokens + text_tokens,
                max_output_tokens,
                was_truncated: false,
                truncation_note: None,
                original_chars,
                retained_chars: original_chars,
            };
        }

        let retained_chars = truncation_point(text, budget * cpt);
        let note = format!(
            "[Content truncated to fit the model context window: kept the first {} of {} characters \
             (about {} of {} estimated tokens). Later material was not analysed.]",
            retained_chars,
            original_chars,
            estimate_tokens(retained_chars, cpt),
            text_tokens
        );
        warn!(
            "Text too long ({} estimated tokens, limit {}). Truncating from {} to {} characters.",
            text_tokens, budget, original_chars, retained_chars
        );

        TokenPlan {
            estimated_input_tokens: self.overhead_tokens + budget,
            max_output_tokens,
            was_truncated: true,
            truncation_note: Some(note),
            original_chars,
            retained_chars,
        }
    }
}

/// Number of chars to keep so that at most `max_chars` survive, ending on a
/// paragraph, line, sentence or word boundary when one lies in the second
/// half of the allowed prefix.
fn truncation_point(text: &str, max_chars: usize) -> usize {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..end];
    let min_keep = end / 2;

    let boundary = [
        prefix.rfind("\n\n"),
        prefix.rfind('\n'),
        last_sentence_end(prefix),
        prefix.rfind(char::is_whitespace),
    ]
    .into_iter()
    .flatten()
    .find(|&p| p > 0 && p >= min_keep)
    .unwrap_or(end);

    prefix[..boundary].trim_end().chars().count()
}

/// Byte offset just past the last `.`, `!` or `?` that is followed by whitespace.
fn last_sentence_end(s: &str) -> Option<usize> {
    s.char_indices()
        .zip(s.chars().skip(1))
        .filter(|((_, c), next)| matches!(c, '.' | '!' | '?') && next.is_whitespace())
        .map(|((i, _), _)| i + 1)
        .last()
}

/// Reject configurations where a size tier would start out already
/// truncated. Such a jump would let a longer document report a smaller input
/// estimate than a shorter one.
pub(crate) fn validate_tiers(config: &ConversionConfig) -> Result<(), Doc2JsonError> {
    let b = TokenBudgeter::new(config);
    let floor_budget = b.text_budget(b.output_budget(0));
    if floor_budget == 0 {
        return Err(Doc2JsonError::InvalidConfig(format!(
            "Context window of {} tokens leaves no room for document text \
             (prompt overhead ≈ {} tokens, output ≥ {} tokens)",
            config.context_window_tokens,
            b.overhead_tokens(),
            b.output_budget(0)
        )));
    }
    if config.output_tokens_override.is_some() {
        return Ok(());
    }
    for threshold in [config.medium_document_chars, config.large_document_chars] {
        let first = threshold.saturating_add(1);
        let tokens = estimate_tokens(first, config.chars_per_token);
        let budget = b.text_budget(b.output_budget(first));
        if tokens > budget {
            return Err(Doc2JsonError::InvalidConfig(format!(
                "Documents just over {threshold} chars (~{tokens} tokens) would not fit the \
                 {budget}-token text budget of their output tier; raise the context window \
                 or lower the size thresholds"
            )));
        }
    }
    Ok(())
}
