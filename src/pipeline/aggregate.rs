//! Assemble per-page results into the response document.

use crate::output::{PageResult, ParseResponse, Region};

/// The remapped regions of one page, tagged with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRegions {
    /// 0-based page index.
    pub index: usize,
    /// Original page width in pixels.
    pub width: u32,
    /// Original page height in pixels.
    pub height: u32,
    pub regions: Vec<Region>,
}

/// Order pages by index and wrap them in a [`ParseResponse`].
///
/// Pages may arrive in completion order; the response is always in document
/// order. Region order within a page is left exactly as given.
pub fn aggregate(mut pages: Vec<PageRegions>) -> ParseResponse {
    pages.sort_by_key(|p| p.index);

    ParseResponse {
        pages: pages
            .into_iter()
            .map(|p| PageResult {
                page: p.index + 1,
                width: p.width,
                height: p.height,
                regions: p.regions,
            })
            .collect(),
        time_sec: None,
    }
}
