//! Rasterisation: turn an uploaded image or PDF into bounded raster pages.
//!
//! ## Why spawn_blocking?
//!
//! Image decoding, Lanczos resampling and pdfium rendering are CPU-bound, and
//! pdfium uses thread-local state internally. All of it runs on the blocking
//! pool so Tokio worker threads keep serving other requests.
//!
//! ## Why cap pixels?
//!
//! The inference backend's memory use and latency grow with input
//! resolution. `max_dim` caps the longest edge of every page; the ratio
//! between the natural and the capped size is kept on the [`RasterPage`] so
//! model coordinates can be mapped back to the natural page.

use crate::config::ParseConfig;
use crate::error::ParseError;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// One decoded page ready for inference.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 0-based page index in document order.
    pub index: usize,
    /// The bitmap fed to the model, possibly downscaled.
    pub image: DynamicImage,
    /// Natural page width in pixels.
    pub original_width: u32,
    /// Natural page height in pixels.
    pub original_height: u32,
}

impl RasterPage {
    /// 1-based page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    /// Original width / bitmap width.
    pub fn scale_x(&self) -> f64 {
        self.original_width as f64 / self.image.width().max(1) as f64
    }

    /// Original height / bitmap height.
    pub fn scale_y(&self) -> f64 {
        self.original_height as f64 / self.image.height().max(1) as f64
    }

    /// Original longest side / bitmap longest side. 1.0 when not downscaled.
    pub fn scale_factor(&self) -> f64 {
        let original = self.original_width.max(self.original_height) as f64;
        let scaled = self.image.width().max(self.image.height()).max(1) as f64;
        original / scaled
    }

    pub fn is_downscaled(&self) -> bool {
        self.image.width() != self.original_width || self.image.height() != self.original_height
    }
}

/// Fit `(width, height)` inside a `max_dim` square, preserving aspect ratio.
///
/// Sizes already within bounds are returned unchanged. Otherwise the longest
/// side becomes exactly `max_dim` and the other is floored, never below 1.
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_dim || longest == 0 {
        return (width, height);
    }
    let shrink = |side: u32| -> u32 {
        ((side as u64 * max_dim as u64) / longest as u64).max(1) as u32
    };
    if width >= height {
        (max_dim, shrink(height))
    } else {
        (shrink(width), max_dim)
    }
}

/// Decode a single image upload into one page.
pub async fn rasterize_image(
    bytes: Vec<u8>,
    format: ImageFormat,
    config: &ParseConfig,
) -> Result<Vec<RasterPage>, ParseError> {
    let max_dim = config.max_dim;

    tokio::task::spawn_blocking(move || rasterize_image_blocking(&bytes, format, max_dim))
        .await
        .map_err(|e| ParseError::Internal(format!("Decode task panicked: {}", e)))?
        .map(|page| vec![page])
}

fn rasterize_image_blocking(
    bytes: &[u8],
    format: ImageFormat,
    max_dim: u32,
) -> Result<RasterPage, ParseError> {
    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        ParseError::CorruptImage {
            detail: e.to_string(),
        }
    })?;

    let (original_width, original_height) = (decoded.width(), decoded.height());
    if original_width == 0 || original_height == 0 {
        return Err(ParseError::CorruptImage {
            detail: "image has zero width or height".into(),
        });
    }

    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());
    let (target_w, target_h) = fit_within(original_width, original_height, max_dim);
    let image = if (target_w, target_h) == (original_width, original_height) {
        rgb
    } else {
        rgb.resize_exact(target_w, target_h, FilterType::Lanczos3)
    };

    debug!(
        "Decoded image {}x{} → {}x{} px",
        original_width, original_height, target_w, target_h
    );

    Ok(RasterPage {
        index: 0,
        image,
        original_width,
        original_height,
    })
}

/// Render every page of a PDF, in document order.
pub async fn rasterize_pdf(
    bytes: Vec<u8>,
    config: &ParseConfig,
) -> Result<Vec<RasterPage>, ParseError> {
    let dpi = config.dpi;
    let max_dim = config.max_dim;
    let lib_path = config.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        rasterize_pdf_blocking(&bytes, dpi, max_dim, lib_path.as_deref())
    })
    .await
    .map_err(|e| ParseError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of PDF rendering.
fn rasterize_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_dim: u32,
    lib_path: Option<&Path>,
) -> Result<Vec<RasterPage>, ParseError> {
    let pdfium = bind_pdfium(lib_path)?;

    let document = pdfium.load_pdf_from_byte_slice(bytes, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            ParseError::EncryptedPdf
        } else {
            ParseError::CorruptPdf { detail: err_str }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(ParseError::EmptyPdf);
    }
    info!("PDF loaded: {} pages", total_pages);

    let mut results = Vec::with_capacity(total_pages);

    for (idx, page) in pages.iter().enumerate() {
        let (original_width, original_height) =
            natural_page_size(page.width().value, page.height().value, dpi);
        let (target_w, target_h) = fit_within(original_width, original_height, max_dim);

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_w as i32)
            .set_maximum_height(target_h as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ParseError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
        debug!(
            "Rendered page {} → {}x{} px (natural {}x{})",
            idx + 1,
            image.width(),
            image.height(),
            original_width,
            original_height
        );

        results.push(RasterPage {
            index: idx,
            image,
            original_width,
            original_height,
        });
    }

    Ok(results)
}

/// Pixel size of a PDF page given in points, rendered at `dpi`.
pub fn natural_page_size(width_pts: f32, height_pts: f32, dpi: u32) -> (u32, u32) {
    let px_per_point = dpi as f32 / 72.0;
    let side = |pts: f32| (pts * px_per_point).round().max(1.0) as u32;
    (side(width_pts), side(height_pts))
}

/// Bind to a pdfium library.
///
/// An explicit path may name the library file or the directory holding it.
/// Without one, the library provisioned by `pdfium-auto` (from
/// `PDFIUM_LIB_PATH` or its cache) is used, then the system library path.
/// Nothing is downloaded here; `docparse` provisions the cache at startup.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ParseError> {
    let explicit = lib_path.map(|path| {
        if path.is_dir() {
            Pdfium::pdfium_platform_library_name_at_path(path)
        } else {
            path.to_path_buf()
        }
    });

    match explicit.or_else(pdfium_auto::cached_pdfium_path) {
        Some(path) => pdfium_auto::bind_pdfium_from_path(&path)
            .map_err(|e| ParseError::PdfiumBindingFailed(e.to_string())),
        None => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| ParseError::PdfiumBindingFailed(format!("{:?}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .expect("encode should succeed");
        buf
    }

    #[test]
    fn fit_within_keeps_small_pages() {
        assert_eq!(fit_within(800, 600, 4000), (800, 600));
        assert_eq!(fit_within(4000, 10, 4000), (4000, 10));
    }

    #[test]
    fn fit_within_caps_longest_side() {
        assert_eq!(fit_within(8000, 6000, 4000), (4000, 3000));
        assert_eq!(fit_within(1000, 5000, 2500), (500, 2500));
        assert_eq!(fit_within(10_000, 1, 100), (100, 1));
    }

    #[test]
    fn pdf_page_size_follows_dpi() {
        // US Letter is 612x792 pt.
        assert_eq!(natural_page_size(612.0, 792.0, 72), (612, 792));
        assert_eq!(natural_page_size(612.0, 792.0, 300), (2550, 3300));
        assert_eq!(natural_page_size(0.1, 144.0, 72), (1, 144));
    }

    #[test]
    fn pdf_page_at_high_dpi_is_capped() {
        let (w, h) = natural_page_size(612.0, 792.0, 600);
        assert_eq!((w, h), (5100, 6600));
        assert_eq!(fit_within(w, h, 4000), (3090, 4000));
    }

    #[tokio::test]
    async fn small_image_is_not_scaled() {
        let config = ParseConfig::default();
        let pages = rasterize_image(png_bytes(300, 200), ImageFormat::Png, &config)
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!(page.index, 0);
        assert_eq!(page.scale_factor(), 1.0);
        assert!(!page.is_downscaled());
        assert_eq!((page.image.width(), page.image.height()), (300, 200));
    }

    #[tokio::test]
    async fn large_image_is_downscaled_and_records_factor() {
        let config = ParseConfig::builder().max_dim(100).build().unwrap();
        let pages = rasterize_image(png_bytes(400, 200), ImageFormat::Png, &config)
            .await
            .unwrap();
        let page = &pages[0];
        assert_eq!((page.image.width(), page.image.height()), (100, 50));
        assert_eq!((page.original_width, page.original_height), (400, 200));
        assert_eq!(page.scale_factor(), 4.0);
        assert_eq!(page.scale_x(), 4.0);
        assert_eq!(page.scale_y(), 4.0);
    }

    #[tokio::test]
    async fn truncated_image_is_a_client_error() {
        let mut bytes = png_bytes(50, 50);
        bytes.truncate(30);
        let err = rasterize_image(bytes, ImageFormat::Png, &ParseConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_image");
    }
}
