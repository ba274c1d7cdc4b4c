//! Top-level parse orchestration.
//!
//! [`parse_document`] is the single entry point used by the HTTP handler and
//! by library callers. One call is one linear pipeline run over request-owned
//! data; the only thing shared with other calls is the [`Backend`].

use crate::config::ParseConfig;
use crate::error::ParseError;
use crate::model::Backend;
use crate::output::ParseResponse;
use crate::pipeline::aggregate::{aggregate, PageRegions};
use crate::pipeline::classify::{classify, FileKind};
use crate::pipeline::{infer, rasterize, tables};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Instant;
use tracing::{debug, info};

/// Pages of one document with an inference call queued at the backend gate.
///
/// The gate decides how many actually run; this only bounds how many
/// futures one document keeps alive.
const PAGES_IN_FLIGHT: usize = 4;

/// An upload read fully into memory.
#[derive(Debug, Clone, Default)]
pub struct UploadedDocument {
    pub bytes: Vec<u8>,
    /// Client-declared content type. Informational only.
    pub content_type: Option<String>,
    /// Client-supplied filename. Informational only.
    pub filename: Option<String>,
}

impl UploadedDocument {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Parse one document into per-page regions.
///
/// Stops at the first error. No page results are returned for a request
/// that failed anywhere: an unsupported or corrupt upload never reaches the
/// model, and the first failing page aborts the remaining inference calls.
///
/// # Errors
///
/// - [`ParseError::BackendUnavailable`] when the model never came up
/// - client-input errors for unsupported, undecodable or empty documents
/// - [`ParseError::Inference`] / [`ParseError::InferenceTimeout`] naming the
///   failed page
pub async fn parse_document(
    backend: &Backend,
    document: UploadedDocument,
    config: &ParseConfig,
) -> Result<ParseResponse, ParseError> {
    let start = Instant::now();

    // ── Step 1: Backend must be up ───────────────────────────────────────
    if let Some(reason) = backend.unavailable_reason() {
        return Err(ParseError::BackendUnavailable {
            reason: reason.to_string(),
        });
    }

    // ── Step 2: Classify ─────────────────────────────────────────────────
    let kind = classify(
        &document.bytes,
        document.content_type.as_deref(),
        document.filename.as_deref(),
    );
    info!(
        "Parsing {} upload ({} bytes, max_dim={}, detect_tables={})",
        kind.label(),
        document.bytes.len(),
        config.max_dim,
        config.detect_tables
    );

    // ── Step 3: Rasterise ────────────────────────────────────────────────
    let raster_start = Instant::now();
    let pages = match kind {
        FileKind::Image(format) => rasterize::rasterize_image(document.bytes, format, config).await?,
        FileKind::Pdf => rasterize::rasterize_pdf(document.bytes, config).await?,
        FileKind::Unsupported => {
            return Err(ParseError::UnsupportedFileType {
                declared: document.content_type,
            })
        }
    };
    debug!(
        "Rasterised {} pages in {:?}",
        pages.len(),
        raster_start.elapsed()
    );

    // ── Step 4: Inference, fail-fast ─────────────────────────────────────
    // Collected eagerly so the handler future stays `Send`.
    let inferences: Vec<_> = pages
        .iter()
        .map(|page| infer::infer_page(backend, page, config))
        .collect();
    let mut results: Vec<PageRegions> = stream::iter(inferences)
        .buffer_unordered(PAGES_IN_FLIGHT)
        .try_collect()
        .await?;

    // ── Step 5: Table synthesis ──────────────────────────────────────────
    if config.detect_tables {
        for page in &mut results {
            let added = tables::synthesize_tables(&mut page.regions, page.width, page.height);
            if added > 0 {
                debug!("Page {}: synthesised {} table(s)", page.index + 1, added);
            }
        }
    }

    // ── Step 6: Aggregate ────────────────────────────────────────────────
    let mut response = aggregate(results);
    let elapsed = start.elapsed().as_secs_f64();
    response.time_sec = Some((elapsed * 1000.0).round() / 1000.0);

    info!(
        "Parsed {} pages, {} regions in {:.3}s",
        response.pages.len(),
        response.pages.iter().map(|p| p.regions.len()).sum::<usize>(),
        elapsed
    );

    Ok(response)
}
