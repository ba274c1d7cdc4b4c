//! # edgequake-docparse
//!
//! Parse images and PDFs into OCR text and layout regions over HTTP.
//!
//! ## Why this crate?
//!
//! OCR/layout models are usually heavyweight runtimes pinned to one GPU.
//! This crate is the service around such a model: it accepts uploads,
//! classifies and rasterises them, feeds pages to the model one at a time,
//! maps every bounding box back to the original page and returns a single
//! JSON document. The model itself stays behind the [`LayoutModel`] trait.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Classify   PDF / PNG / JPEG by signature, anything else rejected
//!  ├─ 2. Rasterise  decode or render via pdfium, cap at max_dim (spawn_blocking)
//!  ├─ 3. Infer      one gated model call per page, bbox × scale factor
//!  ├─ 4. Tables     geometric table synthesis when the model found none
//!  └─ 5. Aggregate  pages in document order + time_sec
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_docparse::{parse_document, Backend, BackendOptions, ParseConfig, RemoteModel, UploadedDocument};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = RemoteModel::connect("http://127.0.0.1:8001", Duration::from_secs(120))
//!         .await
//!         .map(|m| Arc::new(m) as Arc<dyn edgequake_docparse::LayoutModel>);
//!     let backend = Backend::initialize(model, BackendOptions::default()).await;
//!
//!     let bytes = std::fs::read("scan.png")?;
//!     let response = parse_document(&backend, UploadedDocument::new(bytes), &ParseConfig::default()).await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docparse` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ParseConfig, ParseConfigBuilder, RequestOverrides, ServerConfig};
pub use error::{ErrorClass, ModelError, ParseError};
pub use model::{Backend, BackendOptions, Device, InferOptions, LayoutModel, RawRegion, RemoteModel};
pub use output::{BoundingBox, PageResult, ParseResponse, Region, RegionKind, RegionPayload};
pub use parse::{parse_document, UploadedDocument};
pub use server::{router, AppState};
