//! Request assembly: combine the schema contract, the (possibly truncated)
//! text and the truncation instruction into one self-contained request.
//!
//! Nothing here touches the network or any shared state, so a request can be
//! built and inspected in tests exactly as it would be sent.

use crate::config::ConversionConfig;
use crate::document::ExtractedText;
use crate::pipeline::budget::TokenPlan;
use crate::prompts;

/// Everything the AI client needs for one model call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub filename: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub token_plan: TokenPlan,
}

impl ConversionRequest {
    pub fn max_output_tokens(&self) -> usize {
        self.token_plan.max_output_tokens
    }
}

/// Build the request for `extracted` under `plan`.
///
/// When the plan truncated the text, the note is appended after the retained
/// text and the system prompt instructs the model to copy it verbatim into
/// the subject's `truncation_note`.
pub fn build_request(
    extracted: &ExtractedText,
    plan: &TokenPlan,
    config: &ConversionConfig,
) -> ConversionRequest {
    let mut system_prompt = prompts::system_message(config.system_prompt());
    let retained = plan.retained(&extracted.text);

    let user_prompt = match plan.truncation_note.as_deref() {
        Some(note) if plan.was_truncated => {
            system_prompt.push_str(&prompts::truncation_instruction(note));
            prompts::user_message(&extracted.source.filename, &format!("{retained}\n\n{note}"))
        }
        _ => prompts::user_message(&extracted.source.filename, retained),
    };

    ConversionRequest {
        filename: extracted.source.filename.clone(),
        system_prompt,
        user_prompt,
        token_plan: plan.clone(),
    }
}
