//! Error types for the edgequake-docparse library.
//!
//! Two error types reflect the two sides of the inference seam:
//!
//! * [`ParseError`]: **fatal for the request**; the document cannot be
//!   turned into a response (unsupported upload, corrupt PDF, backend down,
//!   a page's inference failed). Returned as `Err(ParseError)` from
//!   [`crate::parse::parse_document`] and rendered as an HTTP error body by
//!   the server.
//!
//! * [`ModelError`]: raised by a [`crate::model::LayoutModel`]
//!   implementation. The pipeline classifies it into a `ParseError` at the
//!   point of detection, attaching the page number.
//!
//! Every `ParseError` belongs to exactly one [`ErrorClass`], which decides
//! the HTTP status family and whether the message may be shown to clients.

use thiserror::Error;

/// Coarse classification of a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The upload itself is at fault. 4xx, never retried.
    ClientInput,
    /// The inference backend did not initialise. 503.
    BackendUnavailable,
    /// A page's model invocation failed. 5xx for the whole request.
    Inference,
    /// Anything unexpected. 500 with a generic message.
    Internal,
}

/// All fatal errors returned while parsing one uploaded document.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Client input errors ───────────────────────────────────────────────
    /// The multipart body has no `file` field.
    #[error("Missing required multipart field 'file'")]
    MissingFile,

    /// A request parameter could not be parsed or is out of range.
    #[error("Invalid request parameter '{field}': {reason}")]
    InvalidRequest { field: String, reason: String },

    /// The request body exceeds the configured upload limit.
    #[error("Upload exceeds the {limit_mb} MiB limit")]
    UploadTooLarge { limit_mb: usize },

    /// The upload is neither a supported image nor a PDF.
    #[error("Unsupported file type{}. Only JPEG, PNG and PDF are supported.", describe_declared(.declared))]
    UnsupportedFileType { declared: Option<String> },

    /// The image signature matched but decoding failed.
    #[error("Image could not be decoded: {detail}")]
    CorruptImage { detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF could not be opened: {detail}")]
    CorruptPdf { detail: String },

    /// PDF requires a password.
    #[error("PDF is encrypted and cannot be parsed without a password")]
    EncryptedPdf,

    /// PDF opened but contains no pages.
    #[error("PDF contains no pages")]
    EmptyPdf,

    /// A page of an otherwise valid PDF failed to rasterise.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The inference backend failed to initialise at startup.
    #[error("Inference backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The model call for a page failed.
    #[error("Inference failed on page {page}: {detail}")]
    Inference { page: usize, detail: String },

    /// The model call for a page did not finish in time.
    #[error("Inference timed out after {secs}s on page {page}")]
    InferenceTimeout { page: usize, secs: u64 },

    // ── Internal errors ───────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error("Failed to bind to pdfium library: {0}")]
    PdfiumBindingFailed(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_declared(declared: &Option<String>) -> String {
    match declared {
        Some(ct) => format!(" (declared '{ct}')"),
        None => String::new(),
    }
}

impl ParseError {
    /// The class this error belongs to.
    pub fn class(&self) -> ErrorClass {
        match self {
            ParseError::MissingFile
            | ParseError::InvalidRequest { .. }
            | ParseError::UploadTooLarge { .. }
            | ParseError::UnsupportedFileType { .. }
            | ParseError::CorruptImage { .. }
            | ParseError::CorruptPdf { .. }
            | ParseError::EncryptedPdf
            | ParseError::EmptyPdf
            | ParseError::RasterisationFailed { .. } => ErrorClass::ClientInput,
            ParseError::BackendUnavailable { .. } => ErrorClass::BackendUnavailable,
            ParseError::Inference { .. } | ParseError::InferenceTimeout { .. } => {
                ErrorClass::Inference
            }
            ParseError::PdfiumBindingFailed(_)
            | ParseError::InvalidConfig(_)
            | ParseError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable error kind used in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MissingFile => "missing_file",
            ParseError::InvalidRequest { .. } => "invalid_request",
            ParseError::UploadTooLarge { .. } => "file_too_large",
            ParseError::UnsupportedFileType { .. } => "unsupported_file_type",
            ParseError::CorruptImage { .. } => "invalid_image",
            ParseError::CorruptPdf { .. } => "invalid_pdf",
            ParseError::EncryptedPdf => "encrypted_pdf",
            ParseError::EmptyPdf => "empty_pdf",
            ParseError::RasterisationFailed { .. } => "rasterisation_failed",
            ParseError::BackendUnavailable { .. } => "backend_unavailable",
            ParseError::Inference { .. } => "inference_failed",
            ParseError::InferenceTimeout { .. } => "inference_timeout",
            ParseError::PdfiumBindingFailed(_) => "pdf_engine_unavailable",
            ParseError::InvalidConfig(_) | ParseError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::UploadTooLarge { .. } => 413,
            ParseError::UnsupportedFileType { .. } => 415,
            ParseError::InferenceTimeout { .. } => 504,
            _ => match self.class() {
                ErrorClass::ClientInput => 400,
                ErrorClass::BackendUnavailable => 503,
                ErrorClass::Inference => 500,
                ErrorClass::Internal => 500,
            },
        }
    }

    /// The 1-based page the error refers to, when there is one.
    pub fn page(&self) -> Option<usize> {
        match self {
            ParseError::RasterisationFailed { page, .. }
            | ParseError::Inference { page, .. }
            | ParseError::InferenceTimeout { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Message safe to show to the client.
    ///
    /// Internal errors are replaced by a generic message; their detail only
    /// reaches the server log.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Internal => "An internal error occurred while processing the document".into(),
            _ => self.to_string(),
        }
    }
}

/// An error raised by a [`crate::model::LayoutModel`] implementation.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The model could not be constructed or reached.
    #[error("model initialisation failed: {0}")]
    Init(String),

    /// The model ran but raised a runtime failure (OOM, bad input, …).
    #[error("model runtime failure: {0}")]
    Runtime(String),

    /// The model returned output that violates the region schema.
    #[error("malformed model output: {0}")]
    Malformed(String),

    /// Transport failure talking to an out-of-process model server.
    #[error("model transport error: {0}")]
    Transport(String),
}
