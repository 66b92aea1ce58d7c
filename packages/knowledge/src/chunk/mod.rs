//! Content-aware chunking.
//!
//! [`smart_chunk`] classifies a block of text and dispatches to the
//! matching strategy. Any strategy that produces nothing for nonempty
//! input falls back to prose chunking so ingestion never silently drops
//! a page.

pub mod detect;
pub mod heading;
pub mod prose;
pub mod table;

pub use detect::{detect_content_kind, ContentKind};
pub use heading::{chunk_by_headings, HeadingChunk};
pub use prose::chunk_text;
pub use table::{chunk_table_rows, TableChunk};

use tracing::debug;

/// Neighboring rows carried into each table-row chunk.
const TABLE_ROW_CONTEXT: usize = 1;

/// Chunk text according to its detected shape.
pub fn smart_chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let kind = detect_content_kind(text);
    debug!(?kind, "detected content kind");

    if kind == ContentKind::Table {
        let chunks = chunk_table_rows(text, TABLE_ROW_CONTEXT);
        if !chunks.is_empty() {
            return chunks.iter().map(TableChunk::formatted_text).collect();
        }
        debug!("table chunking produced nothing, falling back to prose");
    }

    if matches!(kind, ContentKind::Heading | ContentKind::Mixed) {
        let chunks = chunk_by_headings(text, chunk_size);
        if !chunks.is_empty() {
            return chunks.iter().map(HeadingChunk::formatted_text).collect();
        }
        debug!("heading chunking produced nothing, falling back to prose");
    }

    chunk_text(text, chunk_size, chunk_overlap)
}
