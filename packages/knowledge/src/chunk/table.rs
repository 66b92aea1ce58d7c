//! Row-wise table chunker.
//!
//! Emits one chunk per data row, restating the column headers next to each
//! cell so a row remains self-describing after retrieval, plus a window of
//! neighboring rows for context.

/// One table row prepared for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChunk {
    /// First cell of the row, treated as the entity name.
    pub entity_name: String,

    /// Column headers.
    pub header: Vec<String>,

    /// Context window of raw rows (neighbors plus the row itself).
    pub rows: Vec<Vec<String>>,
}

impl TableChunk {
    /// Render the searchable text: the target row with headers restated,
    /// then each context row on its own line.
    pub fn formatted_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            lines.push(pair_cells(&self.header, row));
        }
        lines.join("\n")
    }
}

fn pair_cells(header: &[String], row: &[String]) -> String {
    row.iter()
        .enumerate()
        .map(|(i, cell)| match header.get(i) {
            Some(name) if !name.is_empty() => format!("{name}: {cell}"),
            _ => cell.clone(),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Chunk tabular text row by row.
///
/// Handles Markdown pipe tables and tab-separated rows. `row_context_size`
/// is the number of neighboring rows included on each side.
pub fn chunk_table_rows(text: &str, row_context_size: usize) -> Vec<TableChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let rows = parse_rows(text);
    if rows.len() < 2 {
        return Vec::new();
    }

    let header = rows[0].clone();
    let data = &rows[1..];

    data.iter()
        .enumerate()
        .map(|(i, row)| {
            let lo = i.saturating_sub(row_context_size);
            let hi = (i + row_context_size + 1).min(data.len());
            let mut window: Vec<Vec<String>> = data[lo..hi].to_vec();
            // Put the target row first so its pairing leads the text.
            let target = i - lo;
            window.swap(0, target);

            TableChunk {
                entity_name: row.first().cloned().unwrap_or_default(),
                header: header.clone(),
                rows: window,
            }
        })
        .collect()
}

/// Parse cell rows out of pipe or tab tables, skipping separator rows.
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let pipe_rows: Vec<Vec<String>> = lines
        .iter()
        .filter(|l| l.matches('|').count() >= 2)
        .map(|l| split_pipe_row(l))
        .filter(|cells| !is_separator_row(cells))
        .collect();
    if pipe_rows.len() >= 2 {
        return pipe_rows;
    }

    let tab_rows: Vec<Vec<String>> = lines
        .iter()
        .filter(|l| l.contains('\t'))
        .map(|l| l.split('\t').map(|c| c.trim().to_string()).collect())
        .collect();
    if tab_rows.len() >= 2 {
        return tab_rows;
    }

    // Whitespace-aligned numeric tables: columns separated by 2+ spaces.
    let spaced_rows: Vec<Vec<String>> = lines
        .iter()
        .map(|l| {
            l.split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|cells| cells.len() >= 2)
        .collect();
    if spaced_rows.len() >= 2 {
        return spaced_rows;
    }

    Vec::new()
}

fn split_pipe_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONSTERS: &str = "| 名前 | HP | MP |\n|------|-----|-----|\n| りゅうおう | 200 | 100 |\n| ゾーマ | 500 | 255 |\n| スライム | 8 | 0 |";

    #[test]
    fn test_empty_text_returns_no_chunks() {
        assert!(chunk_table_rows("", 1).is_empty());
        assert!(chunk_table_rows("   ", 1).is_empty());
    }

    #[test]
    fn test_markdown_table_chunks_by_row() {
        let chunks = chunk_table_rows(MONSTERS, 0);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].entity_name, "りゅうおう");
        assert!(chunks[0].header.contains(&"HP".to_string()));
        assert!(chunks[0].formatted_text().contains("200"));
        assert_eq!(chunks[1].entity_name, "ゾーマ");
        assert!(chunks[1].formatted_text().contains("500"));
        assert_eq!(chunks[2].entity_name, "スライム");
        assert!(chunks[2].formatted_text().contains("8"));
    }

    #[test]
    fn test_tab_separated_table() {
        let text = "名前\tHP\tMP\nりゅうおう\t200\t100\nゾーマ\t500\t255";
        let chunks = chunk_table_rows(text, 0);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].entity_name, "りゅうおう");
        assert_eq!(chunks[1].entity_name, "ゾーマ");
    }

    #[test]
    fn test_header_restated_in_each_chunk() {
        let chunks = chunk_table_rows(MONSTERS, 0);
        let formatted = chunks[0].formatted_text();
        assert!(formatted.contains("名前: りゅうおう"));
        assert!(formatted.contains("HP: 200"));
        assert!(formatted.contains("MP: 100"));
    }

    #[test]
    fn test_context_rows_included() {
        let text = "| 名前 | HP |\n|------|-----|\n| A | 100 |\n| B | 200 |\n| C | 300 |";
        let chunks = chunk_table_rows(text, 1);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].rows.len(), 3);
        let middle = chunks[1].formatted_text();
        assert!(middle.contains("名前: B"));
        assert!(middle.contains("名前: A"));
        assert!(middle.contains("名前: C"));
        // The target row leads the text.
        assert!(middle.starts_with("名前: B"));
    }

    #[test]
    fn test_single_row_table() {
        let text = "| 名前 | HP |\n|------|-----|\n| りゅうおう | 200 |";
        let chunks = chunk_table_rows(text, 1);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].entity_name, "りゅうおう");
    }

    #[test]
    fn test_whitespace_aligned_table() {
        let text = "名前 HP MP\nりゅうおう 200 100\nゾーマ 500 255";
        let chunks = chunk_table_rows(text, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].entity_name, "りゅうおう");
    }
}
