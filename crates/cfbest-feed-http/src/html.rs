// # HTML table extraction
//
// The measurement page renders one `<table class="table-striped">` with a
// header row (`#`, `线路`, `优选IP`, `丢包`, `延迟`, `速度`, `带宽`, `Colo`,
// `时间`) followed by one row per sample.
//
// Scanning is local and case-insensitive: find the table block, then its
// `<tr>` blocks, then `<td>`/`<th>` cells. Unclosed cells end at the next
// cell. Tags are stripped and the common entities decoded.

use cfbest_core::measurement::RawRow;
use cfbest_core::{Error, Result};

/// Header used when the table has no recognizable header row
pub const DEFAULT_HEADERS: [&str; 9] = [
    "#", "线路", "优选IP", "丢包", "延迟", "速度", "带宽", "Colo", "时间",
];

const TABLE_CLASS: &str = "table-striped";

/// Cell texts that mark a row as the header row
const HEADER_MARKERS: &[&str] = &["优选ip", "ip", "address"];

/// Extract raw rows from the measurement table
///
/// Rows with fewer cells than the header are kept; the normalizer reports
/// whatever they are missing.
pub fn parse_table(html: &str) -> Result<Vec<RawRow>> {
    let lower = html.to_ascii_lowercase();

    let table = elements(html, &lower, &["table"])
        .into_iter()
        .find(|el| el.open_tag.contains(TABLE_CLASS))
        .or_else(|| {
            tracing::debug!("No .{} table, falling back to the first table", TABLE_CLASS);
            elements(html, &lower, &["table"]).into_iter().next()
        })
        .ok_or_else(|| Error::fetch("measurement table not found in page"))?;

    let table_lower = table.inner.to_ascii_lowercase();
    let mut rows = elements(table.inner, &table_lower, &["tr"])
        .into_iter()
        .map(|tr| {
            let tr_lower = tr.inner.to_ascii_lowercase();
            elements(tr.inner, &tr_lower, &["td", "th"])
                .into_iter()
                .map(|cell| cell_text(cell.inner))
                .collect::<Vec<String>>()
        })
        .filter(|cells| !cells.is_empty())
        .peekable();

    let has_header = rows.peek().is_some_and(|first| is_header(first));
    let headers: Vec<String> = if has_header {
        rows.next().unwrap_or_default()
    } else {
        DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect()
    };

    Ok(rows
        .map(|cells| headers.iter().cloned().zip(cells).collect::<RawRow>())
        .collect())
}

fn is_header(cells: &[String]) -> bool {
    cells
        .iter()
        .any(|cell| HEADER_MARKERS.contains(&cell.to_lowercase().as_str()))
}

/// One element found by [`elements`]
struct Element<'a> {
    /// Lowercased opening tag, attributes included
    open_tag: String,
    /// Raw content between the opening tag and its end
    inner: &'a str,
}

/// Top-level elements named in `names`, in document order
///
/// `lower` must be `src.to_ascii_lowercase()`, so byte offsets agree.
fn elements<'a>(src: &'a str, lower: &str, names: &[&str]) -> Vec<Element<'a>> {
    let mut out = Vec::new();
    let mut pos = 0;

    while let Some((start, name)) = next_open(lower, pos, names) {
        let Some(open_end) = lower[start..].find('>').map(|i| start + i) else {
            break;
        };
        let inner_start = open_end + 1;

        let close = format!("</{}", name);
        let closed_at = lower[inner_start..].find(&close).map(|i| inner_start + i);
        let next_sibling = next_open(lower, inner_start, names).map(|(i, _)| i);
        let inner_end = match (closed_at, next_sibling) {
            (Some(c), Some(n)) => c.min(n),
            (Some(c), None) => c,
            (None, Some(n)) => n,
            (None, None) => lower.len(),
        };

        out.push(Element {
            open_tag: lower[start..inner_start].to_string(),
            inner: &src[inner_start..inner_end],
        });

        pos = match closed_at {
            Some(c) if c == inner_end => lower[c..].find('>').map_or(lower.len(), |i| c + i + 1),
            _ => inner_end,
        };
    }

    out
}

/// Position and name of the next opening tag among `names`
fn next_open<'n>(lower: &str, from: usize, names: &[&'n str]) -> Option<(usize, &'n str)> {
    let mut pos = from;
    while let Some(rel) = lower[pos..].find('<') {
        let start = pos + rel;
        let rest = &lower[start + 1..];
        let matched = names.iter().copied().find(|name| {
            rest.strip_prefix(*name).is_some_and(|after| {
                after.starts_with(|c: char| c == '>' || c == '/' || c.is_ascii_whitespace())
            })
        });
        if let Some(name) = matched {
            return Some((start, name));
        }
        pos = start + 1;
    }
    None
}

/// Visible text of a cell: tags stripped, entities decoded, whitespace collapsed
fn cell_text(inner: &str) -> String {
    let mut text = String::with_capacity(inner.len());
    let mut in_tag = false;
    for c in inner.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}
