//! Pipeline stages for document parsing.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; [`crate::parse`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! classify ──▶ rasterize ──▶ infer ──▶ tables ──▶ aggregate
//! (magic)      (image/pdfium) (model)   (heuristic) (document order)
//! ```
//!
//! 1. [`classify`]: decide image / PDF / unsupported from content bytes
//! 2. [`rasterize`]: decode or render pages, cap them at `max_dim`, record
//!    the scale factor; runs in `spawn_blocking`
//! 3. [`infer`]: one gated model call per page, remap boxes to the
//!    original page
//! 4. [`tables`]: optional table synthesis from aligned text lines
//! 5. [`aggregate`]: sort pages and build the response
//!
//! [`encode`] turns a page bitmap into the base64 PNG sent to a remote model.

pub mod aggregate;
pub mod classify;
pub mod encode;
pub mod infer;
pub mod rasterize;
pub mod tables;
