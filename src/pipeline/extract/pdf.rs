//! PDF text via lopdf's content-stream text extraction.

use crate::error::ExtractError;
use tracing::{debug, warn};

/// Page texts in page order, separated by a blank line.
///
/// A page whose content stream cannot be decoded is skipped with a warning;
/// an unreadable document is `corrupt_file`.
pub(super) fn extract(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::corrupt("PDF", e))?;

    // BTreeMap keyed by page number, so already in page order.
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(ExtractError::corrupt("PDF", "document has no pages"));
    }

    let mut texts = Vec::with_capacity(pages.len());
    for &page_num in pages.keys() {
        match doc.extract_text(&[page_num]) {
            Ok(text) if !text.trim().is_empty() => texts.push(text.trim().to_string()),
            Ok(_) => debug!("PDF page {}: no text layer", page_num),
            Err(e) => warn!("PDF page {}: text extraction failed: {}", page_num, e),
        }
    }

    debug!("PDF: text on {} of {} pages", texts.len(), pages.len());
    Ok(texts.join("\n\n"))
}
