//! # edgequake-doc2json
//!
//! Turn educational documents (lecture notes, handouts, slide decks) into
//! structured JSON: one subject, its chapters, and the topics inside each
//! chapter, with examples, real-world applications and keywords per topic.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / DOC / DOCX / PPT / PPTX
//!  │
//!  ├─ 1. Extract   format reader → plain text (spawn_blocking)
//!  ├─ 2. Clean     whitespace / control-char normalisation
//!  ├─ 3. Budget    estimate tokens, size the output, truncate if needed
//!  ├─ 4. Request   system + user prompt with the retained text
//!  ├─ 5. Model     one call per attempt, bounded retries with backoff
//!  └─ 6. Assemble  validate + normalise the model's JSON
//! ```
//!
//! Files in a batch are processed one after another; a failure in one file is
//! recorded in its result and never aborts the others.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2json::{convert_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ConversionConfig::default();
//!     let result = convert_file("biology_unit_3.pptx", &config).await?;
//!     match result.data() {
//!         Some(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
//!         None => eprintln!("failed: {:?}", result.error()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-doc2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::BatchOrchestrator;
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert_bytes, convert_documents, convert_file, convert_files, convert_sync, convert_to_file,
    resolve_client,
};
pub use document::{Document, DocumentKind, ExtractedText, SourceInfo};
pub use error::{
    AiError, AssembleError, BatchErrorKind, Doc2JsonError, ErrorKind, ExtractError, FileError,
};
pub use output::{
    BatchResult, BatchSummary, Chapter, ConversionResult, FileOutcome, Subject, SubjectDocument,
    Topic,
};
pub use pipeline::budget::{TokenBudgeter, TokenPlan};
pub use pipeline::extract::{FormatReader, OfficeReader};
pub use pipeline::llm::{AiClient, ProviderClient};
pub use pipeline::request::ConversionRequest;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, stream_documents, OutcomeStream};
