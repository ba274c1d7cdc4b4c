//! Geometric table synthesis from text regions.
//!
//! Used only when table detection is on and the model found no table on a
//! page. Text lines whose vertical centres agree form rows; three or more
//! closely spaced rows that share a column become one `table` region.
//!
//! All thresholds are fractions of the page size so the result does not
//! depend on render resolution.

use crate::output::{BoundingBox, Region, RegionKind};

/// Row and column alignment tolerance, as a fraction of page height/width.
const ALIGN_TOLERANCE: f64 = 0.02;
/// Maximum vertical distance between consecutive table rows.
const MAX_ROW_GAP: f64 = 0.10;
/// Padding added around the cells of a synthesised table.
const TABLE_PADDING: f64 = 0.01;
const MIN_ROWS: usize = 3;
const MIN_CELLS_PER_ROW: usize = 2;

struct Cell<'a> {
    bbox: BoundingBox,
    text: &'a str,
}

/// Append synthesised tables to `regions` unless the page already has one.
///
/// Returns the number of tables added.
pub fn synthesize_tables(regions: &mut Vec<Region>, width: u32, height: u32) -> usize {
    if width == 0 || height == 0 || regions.iter().any(|r| r.kind == RegionKind::Table) {
        return 0;
    }
    let tables = detect_tables(regions, width as f64, height as f64);
    let added = tables.len();
    regions.extend(tables);
    added
}

/// Detect table-like layouts among the text regions of one page.
pub fn detect_tables(regions: &[Region], width: f64, height: f64) -> Vec<Region> {
    let cells: Vec<Cell<'_>> = regions
        .iter()
        .filter_map(|r| {
            r.text_content().map(|text| Cell {
                bbox: r.bbox,
                text,
            })
        })
        .collect();

    let rows = group_rows(&cells, height);
    if rows.len() < MIN_ROWS {
        return Vec::new();
    }

    let mut tables = Vec::new();
    let mut current: Vec<Vec<&Cell<'_>>> = Vec::new();

    for row in rows {
        let continues = current.last().is_some_and(|prev| {
            let gap = (row[0].bbox.center_y() - prev[0].bbox.center_y()) / height;
            gap < MAX_ROW_GAP && shares_column(prev, &row, width)
        });
        if !continues {
            if current.len() >= MIN_ROWS {
                tables.push(build_table(&current, width, height));
            }
            current.clear();
        }
        current.push(row);
    }
    if current.len() >= MIN_ROWS {
        tables.push(build_table(&current, width, height));
    }

    tables
}

/// Greedy row grouping: each unclaimed cell seeds a row and claims every
/// other unclaimed cell whose centre lies within tolerance. Rows come back
/// sorted top to bottom, cells left to right.
fn group_rows<'c, 'a>(cells: &'c [Cell<'a>], height: f64) -> Vec<Vec<&'c Cell<'a>>> {
    let tolerance = ALIGN_TOLERANCE * height;
    let mut claimed = vec![false; cells.len()];
    let mut rows = Vec::new();

    for (i, seed) in cells.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        claimed[i] = true;
        let mut row = vec![seed];
        for (j, other) in cells.iter().enumerate() {
            if !claimed[j] && (seed.bbox.center_y() - other.bbox.center_y()).abs() < tolerance {
                claimed[j] = true;
                row.push(other);
            }
        }
        if row.len() >= MIN_CELLS_PER_ROW {
            row.sort_by(|a, b| a.bbox.center_x().total_cmp(&b.bbox.center_x()));
            rows.push(row);
        }
    }

    rows.sort_by(|a, b| a[0].bbox.center_y().total_cmp(&b[0].bbox.center_y()));
    rows
}

fn shares_column(prev: &[&Cell<'_>], row: &[&Cell<'_>], width: f64) -> bool {
    let tolerance = ALIGN_TOLERANCE * width;
    prev.iter().any(|p| {
        row.iter()
            .any(|c| (p.bbox.center_x() - c.bbox.center_x()).abs() < tolerance)
    })
}

fn build_table(rows: &[Vec<&Cell<'_>>], width: f64, height: f64) -> Region {
    let mut bbox = rows[0][0].bbox;
    for cell in rows.iter().flatten() {
        bbox = bbox.union(&cell.bbox);
    }
    let (pad_x, pad_y) = (TABLE_PADDING * width, TABLE_PADDING * height);
    let bbox = BoundingBox::new(
        (bbox.left - pad_x).max(0.0),
        (bbox.top - pad_y).max(0.0),
        (bbox.right + pad_x).min(width),
        (bbox.bottom + pad_y).min(height),
    );

    let mut html = String::from("<table>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(&html_escape::encode_text(cell.text.trim()));
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");

    Region::table(bbox, html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RegionPayload;

    fn cell(x: f64, y: f64, text: &str) -> Region {
        Region::text(BoundingBox::new(x, y, x + 80.0, y + 20.0), text, 0.95)
    }

    fn grid(rows: usize) -> Vec<Region> {
        (0..rows)
            .flat_map(|r| {
                let y = 100.0 + r as f64 * 40.0;
                vec![cell(100.0, y, &format!("item {r}")), cell(400.0, y, &format!("{r}.00"))]
            })
            .collect()
    }

    #[test]
    fn three_aligned_rows_make_a_table() {
        let mut regions = grid(3);
        let added = synthesize_tables(&mut regions, 1000, 1000);
        assert_eq!(added, 1);
        assert_eq!(regions.len(), 7);

        let table = regions.last().unwrap();
        assert_eq!(table.kind, RegionKind::Table);
        assert_eq!(table.bbox, BoundingBox::new(90.0, 90.0, 490.0, 210.0));
        match &table.res {
            RegionPayload::Table { html } => {
                assert!(html.starts_with("<table><tr><td>item 0</td><td>0.00</td></tr>"));
                assert_eq!(html.matches("<tr>").count(), 3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn two_rows_are_not_enough() {
        let mut regions = grid(2);
        assert_eq!(synthesize_tables(&mut regions, 1000, 1000), 0);
        assert_eq!(regions.len(), 4);
    }

    #[test]
    fn model_tables_suppress_synthesis() {
        let mut regions = grid(4);
        regions.push(Region::table(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "<table></table>"));
        assert_eq!(synthesize_tables(&mut regions, 1000, 1000), 0);
    }

    #[test]
    fn distant_rows_split_tables() {
        let mut regions = grid(3);
        // Second block starts 50% of the page further down.
        for r in 0..3 {
            let y = 700.0 + r as f64 * 40.0;
            regions.push(cell(100.0, y, "a"));
            regions.push(cell(400.0, y, "b"));
        }
        assert_eq!(detect_tables(&regions, 1000.0, 1000.0).len(), 2);
    }

    #[test]
    fn cell_text_is_escaped() {
        let mut regions = grid(3);
        regions[0] = cell(100.0, 100.0, "a < b & c");
        let tables = detect_tables(&regions, 1000.0, 1000.0);
        match &tables[0].res {
            RegionPayload::Table { html } => assert!(html.contains("a &lt; b &amp; c")),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
