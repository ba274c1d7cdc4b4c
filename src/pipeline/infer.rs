//! Per-page model invocation and coordinate remapping.
//!
//! Each page goes through the backend's call gate, so at most one
//! `infer()` runs at a time on a non-reentrant model, whichever request the
//! page belongs to. The model call is bounded by the configured page
//! timeout; a page that overruns fails the request instead of holding the
//! gate forever.
//!
//! ## Coordinate remap
//!
//! The model answers in the pixel space of the bitmap it was given. Every
//! coordinate is shifted back by the edge padding (when enabled) and
//! multiplied by the page's per-axis scale factor, then clamped to the
//! original page. With no padding and no downscale the factor is exactly
//! 1.0 and the model's numbers pass through bit-for-bit.

use crate::config::ParseConfig;
use crate::error::{ModelError, ParseError};
use crate::model::{Backend, InferOptions, RawRegion};
use crate::output::{BoundingBox, Region, RegionKind, RegionPayload};
use crate::pipeline::aggregate::PageRegions;
use crate::pipeline::rasterize::RasterPage;
use image::{DynamicImage, Rgb, RgbImage};
use std::borrow::Cow;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Run the model on one page and return regions in original-page coordinates.
pub async fn infer_page(
    backend: &Backend,
    page: &RasterPage,
    config: &ParseConfig,
) -> Result<PageRegions, ParseError> {
    let handle = backend.handle()?;
    let page_num = page.page_num();

    let (input, pad) = if config.pad_edges {
        let pad = edge_padding(page.image.width(), page.image.height());
        (Cow::Owned(pad_page(&page.image, pad)), pad)
    } else {
        (Cow::Borrowed(&page.image), 0)
    };

    let options = InferOptions {
        detect_tables: config.detect_tables,
    };

    let permit = handle
        .gate
        .acquire()
        .await
        .map_err(|_| ParseError::BackendUnavailable {
            reason: "inference backend is shutting down".into(),
        })?;

    let start = Instant::now();
    let timeout = Duration::from_secs(config.page_timeout_secs);
    let outcome = tokio::time::timeout(timeout, handle.model.infer(&input, &options)).await;
    drop(permit);

    let raw = match outcome {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            warn!("Page {}: inference failed: {}", page_num, e);
            return Err(ParseError::Inference {
                page: page_num,
                detail: e.to_string(),
            });
        }
        Err(_) => {
            warn!("Page {}: inference timed out after {:?}", page_num, timeout);
            return Err(ParseError::InferenceTimeout {
                page: page_num,
                secs: config.page_timeout_secs,
            });
        }
    };
    debug!(
        "Page {}: {} raw regions in {:?}",
        page_num,
        raw.len(),
        start.elapsed()
    );

    let regions = remap_regions(raw, page, pad as f64, config.detect_tables).map_err(|e| {
        ParseError::Inference {
            page: page_num,
            detail: e.to_string(),
        }
    })?;

    Ok(PageRegions {
        index: page.index,
        width: page.original_width,
        height: page.original_height,
        regions,
    })
}

/// Validate, filter and remap raw model regions for one page.
///
/// Model order is preserved. Blank text regions are dropped, as are table
/// regions when tables were not requested.
pub fn remap_regions(
    raw: Vec<RawRegion>,
    page: &RasterPage,
    pad: f64,
    detect_tables: bool,
) -> Result<Vec<Region>, ModelError> {
    let (sx, sy) = (page.scale_x(), page.scale_y());
    let (max_x, max_y) = (page.original_width as f64, page.original_height as f64);

    let mut regions = Vec::with_capacity(raw.len());
    for r in raw {
        r.validate()?;

        if let RegionPayload::Text { text, .. } = &r.res {
            if r.kind == RegionKind::Text && text.trim().is_empty() {
                continue;
            }
        }
        if r.kind == RegionKind::Table && !detect_tables {
            continue;
        }

        let map = |v: f64, pad: f64, scale: f64, max: f64| ((v - pad) * scale).clamp(0.0, max);
        let bbox = BoundingBox {
            left: map(r.bbox.left, pad, sx, max_x),
            top: map(r.bbox.top, pad, sy, max_y),
            right: map(r.bbox.right, pad, sx, max_x),
            bottom: map(r.bbox.bottom, pad, sy, max_y),
        };

        regions.push(Region {
            kind: r.kind,
            bbox,
            res: r.res,
        });
    }
    Ok(regions)
}

/// White border width: 4% of the longest side, kept within 100–240 px.
pub fn edge_padding(width: u32, height: u32) -> u32 {
    ((width.max(height) as f64 * 0.04) as u32).clamp(100, 240)
}

fn pad_page(image: &DynamicImage, pad: u32) -> DynamicImage {
    let mut canvas = RgbImage::from_pixel(
        image.width() + 2 * pad,
        image.height() + 2 * pad,
        Rgb([255, 255, 255]),
    );
    image::imageops::overlay(&mut canvas, &image.to_rgb8(), pad as i64, pad as i64);
    DynamicImage::ImageRgb8(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(original: (u32, u32), scaled: (u32, u32)) -> RasterPage {
        RasterPage {
            index: 0,
            image: DynamicImage::ImageRgb8(RgbImage::new(scaled.0, scaled.1)),
            original_width: original.0,
            original_height: original.1,
        }
    }

    fn text(bbox: [f64; 4], s: &str) -> RawRegion {
        RawRegion {
            kind: RegionKind::Text,
            bbox: bbox.into(),
            res: RegionPayload::Text {
                text: s.into(),
                confidence: 0.91,
            },
        }
    }

    #[test]
    fn identity_when_not_downscaled() {
        let p = page((800, 600), (800, 600));
        let raw = vec![text([10.25, 20.5, 300.75, 40.125], "Invoice")];
        let out = remap_regions(raw.clone(), &p, 0.0, true).unwrap();
        assert_eq!(out[0].bbox, raw[0].bbox);
        assert_eq!(out[0].res, raw[0].res);
    }

    #[test]
    fn confidence_keeps_full_precision() {
        let p = page((800, 600), (800, 600));
        let raw: RawRegion = serde_json::from_str(
            r#"{"type": "text", "bbox": [1, 2, 30, 40], "res": {"text": "Total", "confidence": 0.987654321}}"#,
        )
        .unwrap();
        let out = remap_regions(vec![raw], &p, 0.0, true).unwrap();
        let json = serde_json::to_string(&out[0]).unwrap();
        assert!(json.contains(r#""confidence":0.987654321"#), "{json}");
    }

    #[test]
    fn downscaled_boxes_map_back_to_original() {
        // 8000x6000 page fed to the model at 4000x3000.
        let p = page((8000, 6000), (4000, 3000));
        let out = remap_regions(vec![text([100.0, 50.0, 4000.0, 3000.0], "x")], &p, 0.0, true)
            .unwrap();
        assert_eq!(out[0].bbox, BoundingBox::new(200.0, 100.0, 8000.0, 6000.0));
    }

    #[test]
    fn padding_is_removed_and_clamped() {
        let p = page((500, 400), (500, 400));
        let out = remap_regions(vec![text([90.0, 110.0, 700.0, 200.0], "edge")], &p, 100.0, true)
            .unwrap();
        assert_eq!(out[0].bbox, BoundingBox::new(0.0, 10.0, 500.0, 100.0));
    }

    #[test]
    fn blank_text_and_unrequested_tables_are_dropped() {
        let p = page((100, 100), (100, 100));
        let table = RawRegion {
            kind: RegionKind::Table,
            bbox: [0.0, 0.0, 50.0, 50.0].into(),
            res: RegionPayload::Table {
                html: "<table></table>".into(),
            },
        };
        let raw = vec![text([0.0, 0.0, 1.0, 1.0], "   "), table.clone(), text([1.0, 1.0, 2.0, 2.0], "ok")];

        let with_tables = remap_regions(raw.clone(), &p, 0.0, true).unwrap();
        assert_eq!(with_tables.len(), 2);
        assert_eq!(with_tables[0].kind, RegionKind::Table);

        let without = remap_regions(raw, &p, 0.0, false).unwrap();
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].text_content(), Some("ok"));
    }

    #[test]
    fn malformed_region_is_rejected() {
        let p = page((100, 100), (100, 100));
        let err = remap_regions(vec![text([50.0, 0.0, 10.0, 10.0], "inverted")], &p, 0.0, true)
            .unwrap_err();
        assert!(matches!(err, ModelError::Malformed(_)));
    }

    #[test]
    fn padding_width_bounds() {
        assert_eq!(edge_padding(100, 100), 100);
        assert_eq!(edge_padding(4000, 3000), 160);
        assert_eq!(edge_padding(10_000, 10), 240);
    }

    #[test]
    fn padded_page_grows_by_twice_the_border() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(30, 20));
        let padded = pad_page(&img, 100);
        assert_eq!((padded.width(), padded.height()), (230, 220));
    }
}
