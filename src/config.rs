//! Configuration types for document parsing.
//!
//! Pipeline behaviour is controlled through [`ParseConfig`], built via its
//! [`ParseConfigBuilder`]. The HTTP surface adds [`ServerConfig`]. Both are
//! plain data so the binary can map CLI flags onto them and a request can
//! derive a per-request copy with its own overrides.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Lowest accepted `max_dim`.
pub const MIN_MAX_DIM: u32 = 64;
/// Highest accepted `max_dim`.
pub const MAX_MAX_DIM: u32 = 20_000;
/// Accepted PDF render DPI range.
pub const DPI_RANGE: std::ops::RangeInclusive<u32> = 72..=600;

/// Configuration for parsing one document.
///
/// # Example
/// ```rust
/// use edgequake_docparse::ParseConfig;
///
/// let config = ParseConfig::builder()
///     .max_dim(2048)
///     .detect_tables(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_dim, 2048);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Maximum page dimension (width or height) fed to the model. Default: 4000.
    ///
    /// Pages whose natural longest side exceeds this are downscaled with the
    /// aspect ratio preserved. Bounding boxes are mapped back to the natural
    /// resolution before they leave the pipeline.
    pub max_dim: u32,

    /// DPI used to compute a PDF page's natural pixel size. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Ask the model for table-structure regions. Default: true.
    ///
    /// When the model returns no table for a page, a geometric heuristic over
    /// the text regions may still synthesise one.
    pub detect_tables: bool,

    /// Per-page inference timeout in seconds. Default: 120.
    pub page_timeout_secs: u64,

    /// Pad each page with a white border before inference. Default: false.
    ///
    /// Text touching the page edge is sometimes clipped by the detector;
    /// padding helps at the cost of a larger input. The padding is removed
    /// from returned coordinates.
    pub pad_edges: bool,

    /// Explicit pdfium library path (file or directory). Default: the
    /// pdfium-auto cache (or `PDFIUM_LIB_PATH`), then the system library.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_dim: 4000,
            dpi: 300,
            detect_tables: true,
            page_timeout_secs: 120,
            pad_edges: false,
            pdfium_lib_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }
}

impl ParseConfig {
    /// Create a new builder for `ParseConfig`.
    pub fn builder() -> ParseConfigBuilder {
        ParseConfigBuilder {
            config: Self::default(),
        }
    }

    /// Apply per-request overrides, validating each supplied value.
    pub fn with_overrides(&self, overrides: &RequestOverrides) -> Result<Self, ParseError> {
        let mut config = self.clone();

        if let Some(max_dim) = overrides.max_dim {
            if !(MIN_MAX_DIM..=MAX_MAX_DIM).contains(&max_dim) {
                return Err(ParseError::InvalidRequest {
                    field: "max_dim".into(),
                    reason: format!("must be {MIN_MAX_DIM}–{MAX_MAX_DIM}, got {max_dim}"),
                });
            }
            config.max_dim = max_dim;
        }

        if let Some(dpi) = overrides.dpi {
            if !DPI_RANGE.contains(&dpi) {
                return Err(ParseError::InvalidRequest {
                    field: "dpi".into(),
                    reason: format!(
                        "must be {}–{}, got {dpi}",
                        DPI_RANGE.start(),
                        DPI_RANGE.end()
                    ),
                });
            }
            config.dpi = dpi;
        }

        if let Some(detect_tables) = overrides.detect_tables {
            config.detect_tables = detect_tables;
        }

        Ok(config)
    }
}

/// Builder for [`ParseConfig`].
#[derive(Debug)]
pub struct ParseConfigBuilder {
    config: ParseConfig,
}

impl ParseConfigBuilder {
    pub fn max_dim(mut self, px: u32) -> Self {
        self.config.max_dim = px.clamp(MIN_MAX_DIM, MAX_MAX_DIM);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(*DPI_RANGE.start(), *DPI_RANGE.end());
        self
    }

    pub fn detect_tables(mut self, v: bool) -> Self {
        self.config.detect_tables = v;
        self
    }

    pub fn page_timeout_secs(mut self, secs: u64) -> Self {
        self.config.page_timeout_secs = secs;
        self
    }

    pub fn pad_edges(mut self, v: bool) -> Self {
        self.config.pad_edges = v;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParseConfig, ParseError> {
        let c = &self.config;
        if c.page_timeout_secs == 0 {
            return Err(ParseError::InvalidConfig(
                "Page timeout must be ≥ 1 second".into(),
            ));
        }
        if !DPI_RANGE.contains(&c.dpi) {
            return Err(ParseError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        Ok(self.config)
    }
}

/// Per-request overrides taken from form fields or the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    pub detect_tables: Option<bool>,
    pub max_dim: Option<u32>,
    pub dpi: Option<u32>,
}

impl RequestOverrides {
    /// Fill unset fields from `fallback`. Values already set win.
    pub fn or(self, fallback: RequestOverrides) -> RequestOverrides {
        RequestOverrides {
            detect_tables: self.detect_tables.or(fallback.detect_tables),
            max_dim: self.max_dim.or(fallback.max_dim),
            dpi: self.dpi.or(fallback.dpi),
        }
    }
}

/// Parse a form/query boolean. Accepts the spellings HTML forms and curl
/// users actually send.
pub fn parse_bool(field: &str, value: &str) -> Result<bool, ParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ParseError::InvalidRequest {
            field: field.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Parse a form/query unsigned integer.
pub fn parse_u32(field: &str, value: &str) -> Result<u32, ParseError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|e| ParseError::InvalidRequest {
            field: field.to_string(),
            reason: format!("expected an integer, got '{}' ({e})", value.trim()),
        })
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Largest accepted request body. Default: 200 MiB.
    pub max_upload_bytes: usize,
    /// Treat a backend that reports no GPU as unavailable. Default: false.
    pub require_gpu: bool,
    /// Run one inference on a blank page at startup. Default: true.
    pub warmup: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            max_upload_bytes: 200 * 1024 * 1024,
            require_gpu: false,
            warmup: true,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
