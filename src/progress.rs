//! Progress-callback trait for per-file conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the batch orchestrator works through its files.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a Tokio broadcast channel, a WebSocket or a
//! terminal progress bar; the library never learns how the host application
//! communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_doc2json::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, total: usize, filename: &str) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} {} done", index, total, filename);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch orchestrator as it processes each file.
///
/// Files are processed one after another, so events for one batch never
/// interleave. All methods have default no-op implementations so callers
/// only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after pre-flight checks pass and before the first file.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called before extraction of a file begins.
    ///
    /// # Arguments
    /// * `index`    — 1-indexed position in the batch
    /// * `total`    — files in the batch
    /// * `filename` — the file's name as uploaded
    fn on_file_start(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called before a retry of the model call for a file.
    ///
    /// `attempt` is the 1-indexed number of the attempt about to be made.
    fn on_file_retry(&self, index: usize, attempt: u32, error: &str) {
        let _ = (index, attempt, error);
    }

    /// Called when a file produced a valid subject document.
    fn on_file_complete(&self, index: usize, total: usize, filename: &str) {
        let _ = (index, total, filename);
    }

    /// Called when a file failed, including files skipped by cancellation.
    ///
    /// # Arguments
    /// * `error` — human-readable error description
    fn on_file_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let _ = (index, total, filename, error);
    }

    /// Called once after every file has an outcome.
    ///
    /// # Arguments
    /// * `total_files` — files in the batch
    /// * `succeeded`   — files that converted without error
    fn on_batch_complete(&self, total_files: usize, succeeded: usize) {
        let _ = (total_files, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
