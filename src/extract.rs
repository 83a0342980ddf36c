//! Field extraction: a strict fallback chain over a field's selector list.
//!
//! Queries run in priority order. The first query whose matched text survives
//! trimming and normalization wins; later queries are never consulted and results
//! are never merged.

use crate::normalize::normalize;
use crate::selectors::{Field, Query, SelectorTable};
use scraper::Html;
use tracing::trace;

/// Extract one field's value from a document.
///
/// # Arguments
///
/// * `document` - The parsed page
/// * `queries` - The field's queries in priority order
/// * `declared_encoding` - Encoding label passed through to the normalizer
///
/// # Returns
///
/// The normalized text of the first query that yields non-empty output, or `None`.
pub fn extract(document: &Html, queries: &[Query], declared_encoding: &str) -> Option<String> {
    queries.iter().find_map(|query| {
        let fragments = query.texts(document);
        let joined = fragments
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            trace!(query = query.source(), "Query matched no text");
            return None;
        }
        let cleaned = normalize(&joined, declared_encoding);
        if cleaned.is_empty() {
            trace!(query = query.source(), "Query text empty after normalization");
            return None;
        }
        trace!(query = query.source(), chars = cleaned.len(), "Query matched");
        Some(cleaned)
    })
}

/// Extract a named field using the selector table.
pub fn extract_field(
    document: &Html,
    selectors: &SelectorTable,
    field: Field,
    declared_encoding: &str,
) -> Option<String> {
    extract(document, selectors.queries(field), declared_encoding)
}
