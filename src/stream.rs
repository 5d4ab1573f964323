//! Streaming conversion API: emit each file's outcome as soon as it is ready.
//!
//! ## Why stream?
//!
//! A batch of lecture decks can take minutes. A stream lets callers show
//! results immediately, write each JSON file as it arrives, or stop early by
//! dropping the stream. No further documents are processed once it is gone.
//!
//! Unlike [`crate::convert::convert_files`], which returns only after every
//! file finishes, [`convert_stream`] yields [`FileOutcome`]s one by one.
//! Documents are still processed strictly one at a time, so outcomes arrive
//! in input order. `on_batch_complete` fires with the last outcome; a stream
//! dropped early never reports completion.

use crate::batch::{preflight, BatchOrchestrator};
use crate::config::ConversionConfig;
use crate::document::Document;
use crate::error::{Doc2JsonError, FileError};
use crate::output::FileOutcome;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-file outcomes, in input order.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = FileOutcome> + Send>>;

/// Convert documents, streaming outcomes in input order.
///
/// # Returns
/// - `Ok(OutcomeStream)` — one [`FileOutcome`] per document
/// - `Err(Doc2JsonError)` — pre-flight rejection or no provider configured
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2json::{convert_stream, ConversionConfig, Document};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let docs = vec![Document::new("unit1.pdf", std::fs::read("unit1.pdf")?)];
/// let mut outcomes = convert_stream(docs, &ConversionConfig::default()).await?;
/// while let Some(outcome) = outcomes.next().await {
///     println!("{}: success={}", outcome.filename, outcome.result.is_success());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(
    documents: Vec<Document>,
    config: &ConversionConfig,
) -> Result<OutcomeStream, Doc2JsonError> {
    let orchestrator = crate::convert::orchestrator(config)?;
    stream_documents(orchestrator, documents)
}

/// Stream `documents` through an existing orchestrator.
pub fn stream_documents(
    orchestrator: BatchOrchestrator,
    documents: Vec<Document>,
) -> Result<OutcomeStream, Doc2JsonError> {
    preflight(&documents, orchestrator.config())?;

    let total = documents.len();
    info!("Starting streaming conversion of {} files", total);
    if let Some(ref cb) = orchestrator.config().progress_callback {
        cb.on_batch_start(total);
    }

    let orchestrator = Arc::new(orchestrator);
    let succeeded = Arc::new(AtomicUsize::new(0));
    let s = stream::iter(documents.into_iter().enumerate()).then(move |(i, document)| {
        let orchestrator = Arc::clone(&orchestrator);
        let succeeded = Arc::clone(&succeeded);
        async move {
            let filename = document.filename.clone();
            let result = if orchestrator.cancellation_token().is_cancelled() {
                FileError::cancelled().into()
            } else {
                orchestrator.process(i + 1, total, document).await
            };
            if result.is_success() {
                succeeded.fetch_add(1, Ordering::Relaxed);
            }
            if i + 1 == total {
                let succeeded = succeeded.load(Ordering::Relaxed);
                info!("Stream complete: {}/{} succeeded", succeeded, total);
                if let Some(ref cb) = orchestrator.config().progress_callback {
                    cb.on_batch_complete(total, succeeded);
                }
            }
            FileOutcome { filename, result }
        }
    });

    Ok(Box::pin(s))
}
