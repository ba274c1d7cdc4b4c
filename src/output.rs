//! Result types returned by the parsing pipeline and serialised on the wire.
//!
//! ```json
//! {
//!   "pages": [
//!     { "page": 1, "width": 2480, "height": 3508,
//!       "regions": [
//!         {"type": "text",  "bbox": [L,T,R,B], "res": {"text": "...", "confidence": 0.97}},
//!         {"type": "table", "bbox": [L,T,R,B], "res": {"html": "<table>...</table>"}}
//!       ] }
//!   ],
//!   "time_sec": 1.234
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned box `[left, top, right, bottom]` in pixels.
///
/// Serialised as a four-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> f64 {
        (self.left + self.right) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// All four coordinates are finite and the box is not inverted.
    pub fn is_well_formed(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| v.is_finite())
            && self.left <= self.right
            && self.top <= self.bottom
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.left, b.top, b.right, b.bottom]
    }
}

/// Layout class of a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegionKind {
    Text,
    Table,
    /// Any other layout class the model emits (`title`, `figure`, …).
    Other(String),
}

impl RegionKind {
    pub fn as_str(&self) -> &str {
        match self {
            RegionKind::Text => "text",
            RegionKind::Table => "table",
            RegionKind::Other(s) => s,
        }
    }
}

impl From<String> for RegionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "text" => RegionKind::Text,
            "table" => RegionKind::Table,
            _ => RegionKind::Other(s),
        }
    }
}

impl From<RegionKind> for String {
    fn from(k: RegionKind) -> Self {
        match k {
            RegionKind::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific result payload of a region (`res` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionPayload {
    Text { text: String, confidence: f64 },
    Table { html: String },
    /// Payload of any other layout class, passed through as-is.
    Other(serde_json::Map<String, serde_json::Value>),
}

/// One detected layout element on a page.
///
/// `bbox` is always in the coordinate space of the original page, never the
/// possibly downscaled bitmap the model saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "type")]
    pub kind: RegionKind,
    pub bbox: BoundingBox,
    pub res: RegionPayload,
}

impl Region {
    pub fn text(bbox: BoundingBox, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind: RegionKind::Text,
            bbox,
            res: RegionPayload::Text {
                text: text.into(),
                confidence,
            },
        }
    }

    pub fn table(bbox: BoundingBox, html: impl Into<String>) -> Self {
        Self {
            kind: RegionKind::Table,
            bbox,
            res: RegionPayload::Table { html: html.into() },
        }
    }

    /// The recognised text of a text region.
    pub fn text_content(&self) -> Option<&str> {
        match &self.res {
            RegionPayload::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// Regions of one page, in the order the model returned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page number in document order.
    pub page: usize,
    /// Original page width in pixels.
    pub width: u32,
    /// Original page height in pixels.
    pub height: u32,
    pub regions: Vec<Region>,
}

/// The full response for one parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResponse {
    /// One entry per rasterised page, in document order.
    pub pages: Vec<PageResult>,
    /// Wall-clock processing time in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_sec: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn region_wire_shape() {
        let r = Region::text(BoundingBox::new(1.0, 2.0, 30.5, 12.0), "Total", 0.5);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(
            v,
            json!({"type": "text", "bbox": [1.0, 2.0, 30.5, 12.0], "res": {"text": "Total", "confidence": 0.5}})
        );
    }

    #[test]
    fn table_payload_has_no_confidence() {
        let r = Region::table(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "<table></table>");
        let v = serde_json::to_value(&r).unwrap();
        assert!(v["res"].get("confidence").is_none());
        assert_eq!(v["res"]["html"], "<table></table>");
    }

    #[test]
    fn other_layout_classes_round_trip_their_name() {
        let v = json!({"type": "figure", "bbox": [0, 0, 5, 5], "res": {}});
        let r: Region = serde_json::from_value(v).unwrap();
        assert_eq!(r.kind, RegionKind::Other("figure".into()));
        assert!(matches!(r.res, RegionPayload::Other(ref m) if m.is_empty()));
        assert_eq!(serde_json::to_value(&r).unwrap()["type"], "figure");
    }

    #[test]
    fn bbox_well_formedness() {
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_well_formed());
        assert!(!BoundingBox::new(5.0, 0.0, 1.0, 1.0).is_well_formed());
        assert!(!BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_well_formed());
    }

    #[test]
    fn time_sec_is_omitted_when_absent() {
        let resp = ParseResponse {
            pages: vec![],
            time_sec: None,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({"pages": []}));
    }
}
