//! Batch orchestration: run every document through the pipeline, one at a
//! time, and collect exactly one outcome per document.
//!
//! ## Why sequential?
//!
//! The only expensive shared resource is the external model's rate limit.
//! Processing documents strictly in input order keeps the request rate
//! bounded without any coordination primitives, makes progress reporting
//! trivially ordered, and bounds peak memory to one document plus the
//! growing [`BatchResult`]. Throughput is traded for predictability.
//!
//! ## Failure isolation
//!
//! Each stage error is converted into a [`FileError`] at the stage that
//! raised it and recorded as that document's outcome; the loop then moves on.
//! Only the pre-flight checks (empty batch, too many files, combined size)
//! abort the whole batch, and they run before any document is read.
//!
//! ## Retry policy
//!
//! Only `rate_limit_error` and `transient_error` are retried, up to
//! `max_attempts` calls in total, waiting `retry_backoff_ms × 2^(n-1)`
//! between attempts, or the provider's retry-after hint when that is longer.
//! No single wait exceeds `max_retry_delay_ms`, and cancelling the batch cuts
//! a pending wait short. With the defaults (3 attempts, 500 ms) the waits are
//! 500 ms → 1 s.

use crate::config::ConversionConfig;
use crate::document::Document;
use crate::error::{AiError, Doc2JsonError, ErrorKind, FileError};
use crate::output::{BatchResult, ConversionResult, FileOutcome};
use crate::pipeline::assemble::assemble;
use crate::pipeline::budget;
use crate::pipeline::extract::{self, FormatReader, OfficeReader};
use crate::pipeline::llm::AiClient;
use crate::pipeline::request::{build_request, ConversionRequest};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs documents through extract → budget → request → model → assemble.
///
/// Results live in the value returned by [`run`](Self::run), so several
/// batches can share one orchestrator. They also share its
/// [`CancellationToken`]: once cancelled, every later batch on this
/// orchestrator is cancelled too. Install a fresh token with
/// [`with_cancellation`](Self::with_cancellation) to run again.
#[derive(Clone)]
pub struct BatchOrchestrator {
    config: ConversionConfig,
    client: Arc<dyn AiClient>,
    reader: Arc<dyn FormatReader>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Orchestrator using the built-in [`OfficeReader`].
    pub fn new(config: ConversionConfig, client: Arc<dyn AiClient>) -> Self {
        Self {
            config,
            client,
            reader: Arc::new(OfficeReader),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the format reader.
    pub fn with_reader(mut self, reader: Arc<dyn FormatReader>) -> Self {
        self.reader = reader;
        self
    }

    /// Use `token` to cancel batches run by this orchestrator.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the batch before its next document.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert every document, in order.
    ///
    /// # Errors
    /// Only pre-flight failures ([`Doc2JsonError::EmptyBatch`],
    /// [`Doc2JsonError::TooManyFiles`], [`Doc2JsonError::BatchTooLarge`]).
    /// Everything after that is recorded per file in the returned
    /// [`BatchResult`].
    pub async fn run(&self, documents: Vec<Document>) -> Result<BatchResult, Doc2JsonError> {
        preflight(&documents, &self.config)?;

        let total = documents.len();
        let start = Instant::now();
        let mut worklist: VecDeque<(usize, Document)> =
            documents.into_iter().enumerate().map(|(i, d)| (i + 1, d)).collect();
        let mut batch = BatchResult::with_capacity(total);

        info!("Starting batch of {} files", total);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        while let Some((index, document)) = worklist.pop_front() {
            if self.cancel.is_cancelled() {
                warn!("Batch cancelled with {} files not started", worklist.len() + 1);
                batch.cancelled = true;
                for (index, document) in std::iter::once((index, document)).chain(worklist.drain(..)) {
                    let error = FileError::cancelled();
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_file_error(index, total, &document.filename, &error.message);
                    }
                    batch.push(FileOutcome {
                        filename: document.filename,
                        result: error.into(),
                    });
                }
                break;
            }

            let filename = document.filename.clone();
            let result = self.process(index, total, document).await;
            batch.push(FileOutcome { filename, result });
        }

        info!(
            "Batch complete: {}/{} succeeded in {:?}",
            batch.summary.succeeded,
            total,
            start.elapsed()
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(total, batch.summary.succeeded);
        }
        Ok(batch)
    }

    /// Convert a single document.
    ///
    /// # Errors
    /// Only pre-flight failures, as for [`run`](Self::run).
    pub async fn convert_document(
        &self,
        document: Document,
    ) -> Result<ConversionResult, Doc2JsonError> {
        preflight(std::slice::from_ref(&document), &self.config)?;
        Ok(self.process(1, 1, document).await)
    }

    /// One document through every stage, firing progress events.
    pub(crate) async fn process(&self, index: usize, total: usize, document: Document) -> ConversionResult {
        let filename = document.filename.clone();
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_start(index, total, &filename);
        }

        let result = self.pipeline(index, document).await;

        if let Some(ref cb) = self.config.progress_callback {
            match result.error() {
                None => cb.on_file_complete(index, total, &filename),
                Some(e) => cb.on_file_error(index, total, &filename, &e.to_string()),
            }
        }
        match result.error() {
            None => info!("[{}/{}] {}: converted", index, total, filename),
            Some(e) => warn!("[{}/{}] {}: {}", index, total, filename, e),
        }
        result
    }

    async fn pipeline(&self, index: usize, document: Document) -> ConversionResult {
        debug!("[{}] {}: extracting ({} bytes)", index, document.filename, document.size());

        // ── Step 1: Extract text (bytes are dropped here) ────────────────
        let extracted = match extract::extract_blocking(Arc::clone(&self.reader), document).await {
            Ok(text) => text,
            Err(e) => return FileError::from(e).into(),
        };
        let usable = extracted.text.trim().chars().count();
        if usable < self.config.min_text_chars {
            return FileError::insufficient_text(usable, self.config.min_text_chars).into();
        }

        // ── Step 2: Budget tokens ────────────────────────────────────────
        let plan = budget::plan(&extracted.text, &self.config);

        // ── Step 3: Build the request ────────────────────────────────────
        let request = build_request(&extracted, &plan, &self.config);
        drop(extracted);

        // ── Step 4: Call the model ───────────────────────────────────────
        let (raw, attempts) = match self.call_with_retry(index, &request).await {
            (CallOutcome::Reply(raw), attempts) => (raw, attempts),
            (CallOutcome::Failed(e), attempts) => {
                let mut error = FileError::from(e);
                if attempts > 1 {
                    error.message = format!("{} (gave up after {} attempts)", error.message, attempts);
                }
                return error.into();
            }
            (CallOutcome::Cancelled(e), attempts) => {
                return FileError::new(
                    ErrorKind::Cancelled,
                    format!("Batch was cancelled while waiting to retry after attempt {attempts}: {e}"),
                )
                .into();
            }
        };

        // ── Step 5: Assemble ─────────────────────────────────────────────
        match assemble(&raw, &plan) {
            Ok(assembled) => ConversionResult::Success {
                data: assembled.document,
                token_plan: plan,
                attempts,
                warnings: assembled.warnings,
            },
            Err(e) => FileError::from(e).into(),
        }
    }

    /// Call the client until success, a non-retryable error, or `max_attempts`.
    /// Returns the outcome and the number of calls made.
    async fn call_with_retry(&self, index: usize, request: &ConversionRequest) -> (CallOutcome, u32) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.client.convert(request).await {
                Ok(raw) => return (CallOutcome::Reply(raw), attempt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = retry_delay(&self.config, attempt, &e);
                    warn!(
                        "[{}] {}: attempt {}/{} failed — {}; retrying in {:?}",
                        index, request.filename, attempt, max_attempts, e, delay
                    );
                    if let Some(ref cb) = self.config.progress_callback {
                        cb.on_file_retry(index, attempt + 1, &e.to_string());
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            warn!("[{}] {}: cancelled during retry wait", index, request.filename);
                            return (CallOutcome::Cancelled(e), attempt);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return (CallOutcome::Failed(e), attempt),
            }
        }
    }
}

enum CallOutcome {
    Reply(String),
    Failed(AiError),
    /// The batch was cancelled while waiting to retry after this error.
    Cancelled(AiError),
}

/// Wait before attempt `attempt + 1`.
fn retry_delay(config: &ConversionConfig, attempt: u32, error: &AiError) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let backoff = Duration::from_millis(config.retry_backoff_ms.saturating_mul(factor));
    let delay = error.retry_after().map_or(backoff, |hint| hint.max(backoff));
    delay.min(Duration::from_millis(config.max_retry_delay_ms))
}

/// Batch-level limits, checked before any document is touched.
pub(crate) fn preflight(documents: &[Document], config: &ConversionConfig) -> Result<(), Doc2JsonError> {
    if documents.is_empty() {
        return Err(Doc2JsonError::EmptyBatch);
    }
    let count = documents.len();
    if config.max_files_per_batch > 0 && count > config.max_files_per_batch {
        return Err(Doc2JsonError::TooManyFiles {
            count,
            max: config.max_files_per_batch,
        });
    }
    let total_bytes: u64 = documents.iter().map(Document::size).sum();
    if total_bytes > config.max_combined_upload_bytes {
        return Err(Doc2JsonError::BatchTooLarge {
            total_bytes,
            max_bytes: config.max_combined_upload_bytes,
        });
    }
    Ok(())
}
