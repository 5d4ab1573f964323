//! Convenience entry points over [`BatchOrchestrator`].
//!
//! ## Which function?
//!
//! | You have                   | Call                 | You get              |
//! |----------------------------|----------------------|----------------------|
//! | one path on disk           | [`convert_file`]     | `ConversionResult`   |
//! | several paths              | [`convert_files`]    | `BatchResult`        |
//! | bytes from an upload       | [`convert_bytes`]    | `ConversionResult`   |
//! | many uploads               | [`convert_documents`]| `BatchResult`        |
//! | no async runtime           | [`convert_sync`]     | `ConversionResult`   |
//!
//! Use [`crate::stream::convert_stream`] instead when you want outcomes as
//! each file finishes.

use crate::batch::BatchOrchestrator;
use crate::config::ConversionConfig;
use crate::document::Document;
use crate::error::Doc2JsonError;
use crate::output::{BatchResult, ConversionResult};
use crate::pipeline::llm::{AiClient, ProviderClient};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Convert one file on disk.
///
/// # Returns
/// `Ok(ConversionResult)` whether the file converted or failed; inspect
/// [`ConversionResult::error`] for the per-file error.
///
/// # Errors
/// Returns `Err(Doc2JsonError)` only when the file cannot be read, it
/// exceeds the upload limit, or no provider can be resolved.
pub async fn convert_file(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Doc2JsonError> {
    let document = read_document(path.as_ref()).await?;
    orchestrator(config)?.convert_document(document).await
}

/// Convert several files on disk, in order.
///
/// All files are read before the batch starts so that size limits are
/// checked up front. An unreadable path aborts the batch.
pub async fn convert_files<P: AsRef<Path>>(
    paths: &[P],
    config: &ConversionConfig,
) -> Result<BatchResult, Doc2JsonError> {
    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        documents.push(read_document(path.as_ref()).await?);
    }
    convert_documents(documents, config).await
}

/// Convert documents already in memory, in order.
pub async fn convert_documents(
    documents: Vec<Document>,
    config: &ConversionConfig,
) -> Result<BatchResult, Doc2JsonError> {
    orchestrator(config)?.run(documents).await
}

/// Convert one uploaded file from its name and bytes.
///
/// # Example
/// ```rust,no_run
/// use edgequake_doc2json::{convert_bytes, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("lecture.pptx")?;
/// let result = convert_bytes("lecture.pptx", bytes, &ConversionConfig::default()).await?;
/// if let Some(doc) = result.data() {
///     println!("{}", serde_json::to_string_pretty(doc)?);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_bytes(
    filename: impl Into<String>,
    bytes: Vec<u8>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Doc2JsonError> {
    orchestrator(config)?
        .convert_document(Document::new(filename, bytes))
        .await
}

/// Convert one file and write the result JSON to `output_path`.
///
/// On success the file holds the subject document; on a per-file failure
/// it holds the error record. Uses an atomic write (temp file in the target
/// directory, then rename) so readers never see a partial file.
pub async fn convert_to_file(
    input: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Doc2JsonError> {
    let result = convert_file(input, config).await?;
    let json = match result.data() {
        Some(data) => serde_json::to_vec_pretty(data),
        None => serde_json::to_vec_pretty(&result),
    }
    .map_err(|e| Doc2JsonError::Internal(format!("serialise result: {e}")))?;
    write_atomic(output_path.as_ref(), &json)?;
    Ok(result)
}

/// Synchronous wrapper around [`convert_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, Doc2JsonError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Doc2JsonError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(path, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

pub(crate) fn orchestrator(config: &ConversionConfig) -> Result<BatchOrchestrator, Doc2JsonError> {
    let client = resolve_client(config)?;
    Ok(BatchOrchestrator::new(config.clone(), client))
}

async fn read_document(path: &Path) -> Result<Document, Doc2JsonError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Doc2JsonError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => Doc2JsonError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Doc2JsonError::Internal(format!("read {}: {e}", path.display())),
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Read {} ({} bytes)", filename, bytes.len());
    Ok(Document::new(filename, bytes))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Doc2JsonError> {
    let fail = |source: std::io::Error| Doc2JsonError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(fail)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(fail)?;
    tmp.write_all(contents).map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Doc2JsonError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the AI client, from most-specific to least-specific.
///
/// 1. **Pre-built client** (`config.ai_client`) — used as-is; the seam for
///    tests and custom backends.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in a
///    [`ProviderClient`].
/// 3. **Named provider + model** (`config.provider_name`) — created via
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key from the environment.
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **`OPENAI_API_KEY`** — OpenAI with the configured or default model.
/// 6. **Full auto-detection** ([`ProviderFactory::from_env`]).
pub fn resolve_client(config: &ConversionConfig) -> Result<Arc<dyn AiClient>, Doc2JsonError> {
    if let Some(ref client) = config.ai_client {
        return Ok(Arc::clone(client));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderClient::new(
        provider,
        config.temperature,
        Duration::from_secs(config.api_timeout_secs),
    )))
}

fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, Doc2JsonError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_provider(name, config.model_name());
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, config.model.as_deref().unwrap_or(&model));
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", config.model_name());
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Doc2JsonError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
