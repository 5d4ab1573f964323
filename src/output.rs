//! Output types: the structured subject document and per-file / batch results.
//!
//! The wire shape follows what the upload endpoint always returned:
//!
//! ```json
//! { "Physics": { "title": "…", "description": "…", "chapters": [
//!     { "title": "…", "topics": [
//!         { "topic_id": "topic_1", "title": "…", "content": "…",
//!           "examples": [], "real_world_applications": [], "keywords": [] } ] } ] } }
//! ```
//!
//! and, for batches, `{ "results": [...], "summary": { "total_files", "successful", "failed" } }`.

use crate::error::{ErrorKind, FileError};
use crate::pipeline::budget::TokenPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One subject keyed by its name. Serialises as a single-entry JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "BTreeMap<String, Subject>",
    try_from = "BTreeMap<String, Subject>"
)]
pub struct SubjectDocument {
    pub subject_name: String,
    pub subject: Subject,
}

impl SubjectDocument {
    /// Iterate `(chapter index, topic)` pairs in emission order.
    pub fn topics(&self) -> impl Iterator<Item = (usize, &Topic)> {
        self.subject
            .chapters
            .iter()
            .enumerate()
            .flat_map(|(i, ch)| ch.topics.iter().map(move |t| (i, t)))
    }

    pub fn topic_count(&self) -> usize {
        self.subject.chapters.iter().map(|c| c.topics.len()).sum()
    }
}

impl From<SubjectDocument> for BTreeMap<String, Subject> {
    fn from(doc: SubjectDocument) -> Self {
        BTreeMap::from([(doc.subject_name, doc.subject)])
    }
}

/// Rejected when the map does not hold exactly one subject.
#[derive(Debug)]
pub struct NotASingleSubject(usize);

impl fmt::Display for NotASingleSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected exactly one subject entry, found {}", self.0)
    }
}

impl TryFrom<BTreeMap<String, Subject>> for SubjectDocument {
    type Error = NotASingleSubject;

    fn try_from(map: BTreeMap<String, Subject>) -> Result<Self, Self::Error> {
        let n = map.len();
        let mut entries = map.into_iter();
        match (entries.next(), entries.next()) {
            (Some((subject_name, subject)), None) => Ok(SubjectDocument {
                subject_name,
                subject,
            }),
            _ => Err(NotASingleSubject(n)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub title: String,
    pub description: String,
    /// Copied verbatim from the token plan when the input was cut short.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_note: Option<String>,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// `topic_N`, sequential from 1 within the chapter.
    pub topic_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub real_world_applications: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Outcome of one file's trip through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionResult {
    Success {
        data: SubjectDocument,
        token_plan: TokenPlan,
        /// Number of model calls made, including retries.
        attempts: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    #[serde(rename = "error")]
    Failure { error: FileError },
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Success { .. })
    }

    pub fn data(&self) -> Option<&SubjectDocument> {
        match self {
            ConversionResult::Success { data, .. } => Some(data),
            ConversionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&FileError> {
        match self {
            ConversionResult::Success { .. } => None,
            ConversionResult::Failure { error } => Some(error),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|e| e.kind)
    }
}

impl From<FileError> for ConversionResult {
    fn from(error: FileError) -> Self {
        ConversionResult::Failure { error }
    }
}

/// A [`ConversionResult`] labelled with the file it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    #[serde(flatten)]
    pub result: ConversionResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    #[serde(rename = "successful")]
    pub succeeded: usize,
    pub failed: usize,
}

/// Results for a whole batch, in input order, one entry per file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<FileOutcome>,
    pub summary: BatchSummary,
    /// Set when the caller cancelled; unstarted files carry `cancelled` errors.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
}

impl BatchResult {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            results: Vec::with_capacity(n),
            ..Self::default()
        }
    }

    /// Append an outcome and update the counters.
    pub fn push(&mut self, outcome: FileOutcome) {
        self.summary.total_files += 1;
        if outcome.result.is_success() {
            self.summary.succeeded += 1;
        } else {
            self.summary.failed += 1;
        }
        self.results.push(outcome);
    }

    /// First outcome recorded for `filename`.
    pub fn get(&self, filename: &str) -> Option<&ConversionResult> {
        self.results
            .iter()
            .find(|o| o.filename == filename)
            .map(|o| &o.result)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
