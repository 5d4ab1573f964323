//! Input documents and the text extracted from them.
//!
//! A [`Document`] owns the uploaded bytes only until extraction: the format
//! readers take it by value, so the buffer is released as soon as the text
//! has been pulled out. What survives is a small [`SourceInfo`] plus the
//! immutable [`ExtractedText`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Declared format of an uploaded file, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Doc,
    Docx,
    Ppt,
    Pptx,
}

impl DocumentKind {
    /// Map an extension (with or without the leading dot, any case) to a kind.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "doc" => Some(DocumentKind::Doc),
            "docx" => Some(DocumentKind::Docx),
            "ppt" => Some(DocumentKind::Ppt),
            "pptx" => Some(DocumentKind::Pptx),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Doc => "doc",
            DocumentKind::Docx => "docx",
            DocumentKind::Ppt => "ppt",
            DocumentKind::Pptx => "pptx",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// An uploaded file: name, lower-cased extension and raw bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Document {
    pub filename: String,
    /// Lower-cased extension including the leading dot, or empty.
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let extension = Path::new(&filename)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        Self {
            filename,
            extension,
            bytes,
        }
    }

    /// `None` when the extension is outside the supported set.
    pub fn kind(&self) -> Option<DocumentKind> {
        DocumentKind::from_extension(&self.extension)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Metadata that outlives the byte buffer.
    pub fn info(&self) -> SourceInfo {
        SourceInfo {
            filename: self.filename.clone(),
            kind: self.kind(),
            size_bytes: self.size(),
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("extension", &self.extension)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// What is remembered about a document after its bytes are gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub filename: String,
    pub kind: Option<DocumentKind>,
    pub size_bytes: u64,
}

/// Plain text pulled out of a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub source: SourceInfo,
    pub text: String,
    /// Number of `char`s (not bytes) in `text`.
    pub char_count: usize,
}

impl ExtractedText {
    pub fn new(source: SourceInfo, text: String) -> Self {
        let char_count = text.chars().count();
        Self {
            source,
            text,
            char_count,
        }
    }
}
