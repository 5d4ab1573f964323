//! Pipeline stages for document-to-JSON conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different generation backend) without
//! touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! extract ──▶ budget ──▶ request ──▶ llm ──▶ assemble
//! (bytes→text) (tokens)  (prompts)  (model) (validate JSON)
//! ```
//!
//! 1. [`extract`]  — sniff the container and pull plain text out of PDF,
//!    DOC, DOCX, PPT or PPTX bytes; runs in `spawn_blocking` because the
//!    parsers are CPU-bound
//! 2. [`budget`]   — estimate tokens, pick the output budget and truncate the
//!    text at a natural boundary when it does not fit
//! 3. [`request`]  — assemble the system and user messages
//! 4. [`llm`]      — call the model; the only stage with network I/O
//! 5. [`assemble`] — parse, validate and normalise the model's JSON
//!
//! [`postprocess`] holds the deterministic text-cleanup rules shared by
//! extraction (whitespace normalisation) and assembly (fence stripping).

pub mod assemble;
pub mod budget;
pub mod extract;
pub mod llm;
pub mod postprocess;
pub mod request;
