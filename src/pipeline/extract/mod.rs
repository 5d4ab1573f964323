//! Text extraction: turn uploaded document bytes into plain text.
//!
//! ## Dispatch
//!
//! The extension decides the *family* (PDF, word-processing, presentation);
//! the leading bytes decide the *container*. A `.doc` that is really a ZIP
//! (a renamed `.docx`) is read as OOXML; a genuine Word 97 binary goes to the
//! legacy reader. Anything whose bytes match no container of its family is
//! `corrupt_file`, and any extension outside the supported set is
//! `unsupported_format` without touching the bytes.
//!
//! ```text
//! .pdf        ──▶ pdf     (lopdf page text streams)
//! .doc/.docx  ──▶ ZIP  ──▶ ooxml::docx   (w:p paragraphs, table rows)
//!             └─▶ OLE2 ──▶ legacy::doc   (Word piece table)
//! .ppt/.pptx  ──▶ ZIP  ──▶ ooxml::pptx   (slide text frames)
//!             └─▶ OLE2 ──▶ legacy::ppt   (text atoms)
//! ```
//!
//! ## Why spawn_blocking?
//!
//! The parsers are synchronous and CPU-bound; a 200-page PDF can keep a core
//! busy for a noticeable time. [`extract_blocking`] moves the work onto the
//! blocking pool so Tokio workers keep serving other tasks, and turns a
//! parser panic into a per-file `corrupt_file` instead of a crashed batch.

mod legacy;
mod ooxml;
mod pdf;

use crate::document::{Document, DocumentKind, ExtractedText};
use crate::error::ExtractError;
use crate::pipeline::postprocess::clean_extracted_text;
use std::sync::Arc;
use tracing::debug;

/// Per-format text extractor.
///
/// Takes the document by value: the raw bytes are dropped as soon as
/// extraction returns, on success and failure alike.
pub trait FormatReader: Send + Sync {
    fn extract(&self, document: Document) -> Result<ExtractedText, ExtractError>;
}

/// The built-in reader for PDF, DOC, DOCX, PPT and PPTX.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeReader;

impl FormatReader for OfficeReader {
    fn extract(&self, document: Document) -> Result<ExtractedText, ExtractError> {
        let source = document.info();
        let kind = source.kind.ok_or_else(|| ExtractError::UnsupportedFormat {
            extension: document.extension.clone(),
        })?;
        let bytes = document.bytes;

        let raw = match (kind, Container::sniff(&bytes)) {
            (DocumentKind::Pdf, _) => pdf::extract(&bytes)?,
            (DocumentKind::Doc | DocumentKind::Docx, Container::Zip) => ooxml::docx(&bytes)?,
            (DocumentKind::Doc | DocumentKind::Docx, Container::Ole2) => legacy::doc(&bytes)?,
            (DocumentKind::Ppt | DocumentKind::Pptx, Container::Zip) => ooxml::pptx(&bytes)?,
            (DocumentKind::Ppt | DocumentKind::Pptx, Container::Ole2) => legacy::ppt(&bytes)?,
            (kind, Container::Unknown) => {
                return Err(ExtractError::corrupt(
                    kind.label(),
                    "content is neither a ZIP nor an OLE2 compound file",
                ))
            }
        };

        let text = clean_extracted_text(&raw);
        debug!(
            "Extracted {} chars from '{}' ({})",
            text.chars().count(),
            source.filename,
            kind
        );
        Ok(ExtractedText::new(source, text))
    }
}

/// Run `reader` on the blocking pool.
pub async fn extract_blocking(
    reader: Arc<dyn FormatReader>,
    document: Document,
) -> Result<ExtractedText, ExtractError> {
    let label = document
        .kind()
        .map(DocumentKind::label)
        .unwrap_or("document");
    tokio::task::spawn_blocking(move || reader.extract(document))
        .await
        .unwrap_or_else(|e| Err(ExtractError::corrupt(label, format!("reader panicked: {e}"))))
}

impl DocumentKind {
    /// Upper-case format name used in error messages.
    pub(crate) fn label(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::Doc => "DOC",
            DocumentKind::Docx => "DOCX",
            DocumentKind::Ppt => "PPT",
            DocumentKind::Pptx => "PPTX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Zip,
    Ole2,
    Unknown,
}

impl Container {
    const ZIP_MAGIC: &'static [u8] = b"PK\x03\x04";
    const OLE2_MAGIC: &'static [u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

    fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(Self::ZIP_MAGIC) {
            Container::Zip
        } else if bytes.starts_with(Self::OLE2_MAGIC) {
            Container::Ole2
        } else {
            Container::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, FileError};

    #[test]
    fn sniff_containers() {
        assert_eq!(Container::sniff(b"PK\x03\x04rest"), Container::Zip);
        assert_eq!(
            Container::sniff(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0]),
            Container::Ole2
        );
        assert_eq!(Container::sniff(b"%PDF-1.4"), Container::Unknown);
        assert_eq!(Container::sniff(b""), Container::Unknown);
    }

    #[test]
    fn unsupported_extension_is_rejected_without_parsing() {
        for name in ["notes.txt", "sheet.xlsx", "README", "image.png"] {
            let err = OfficeReader
                .extract(Document::new(name, b"PK\x03\x04".to_vec()))
                .unwrap_err();
            assert!(
                matches!(err, ExtractError::UnsupportedFormat { .. }),
                "{name}: {err:?}"
            );
        }
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        for name in ["a.pdf", "a.doc", "a.docx", "a.ppt", "a.pptx"] {
            let err = OfficeReader
                .extract(Document::new(name, b"definitely not a document".to_vec()))
                .unwrap_err();
            assert_eq!(FileError::from(err).kind, ErrorKind::CorruptFile, "{name}");
        }
    }

    #[test]
    fn truncated_zip_is_corrupt() {
        let err = OfficeReader
            .extract(Document::new("a.docx", b"PK\x03\x04\x14\x00".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ExtractError::CorruptFile { format: "DOCX", .. }));
    }

    struct PanickingReader;

    impl FormatReader for PanickingReader {
        fn extract(&self, _document: Document) -> Result<ExtractedText, ExtractError> {
            panic!("parser bug");
        }
    }

    #[tokio::test]
    async fn panicking_reader_becomes_corrupt_file() {
        let err = extract_blocking(
            Arc::new(PanickingReader),
            Document::new("x.pptx", vec![1, 2, 3]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractError::CorruptFile { format: "PPTX", .. }));
        assert!(err.to_string().contains("panicked"));
    }
}
