//! Content-shape classification for chunker dispatch.

use regex::Regex;
use std::sync::OnceLock;

/// Structural shape of a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Plain running text.
    Prose,
    /// Markdown `#`/HTML `<h*>` structure without tabular density.
    Heading,
    /// Pipe/tab tables or numerically dense rows.
    Table,
    /// Both heading markers and tabular content.
    Mixed,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^#{1,6}\s+\S|<h[1-6][\s>]").unwrap())
}

/// Classify a text block.
pub fn detect_content_kind(text: &str) -> ContentKind {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ContentKind::Prose;
    }

    let lines: Vec<&str> = trimmed.lines().map(str::trim).collect();

    let has_table = has_pipe_table(&lines) || has_tab_table(&lines) || is_numeric_dense(&lines);
    let has_heading = lines.iter().any(|line| heading_re().is_match(line));

    match (has_table, has_heading) {
        (true, true) => ContentKind::Mixed,
        (true, false) => ContentKind::Table,
        (false, true) => ContentKind::Heading,
        (false, false) => ContentKind::Prose,
    }
}

/// Two or more lines carrying at least two pipe separators each.
fn has_pipe_table(lines: &[&str]) -> bool {
    lines
        .iter()
        .filter(|line| line.matches('|').count() >= 2)
        .count()
        >= 2
}

/// Two or more tab-separated rows.
fn has_tab_table(lines: &[&str]) -> bool {
    lines.iter().filter(|line| line.contains('\t')).count() >= 2
}

/// Many lines where numeric tokens dominate.
fn is_numeric_dense(lines: &[&str]) -> bool {
    let nonempty: Vec<&&str> = lines.iter().filter(|l| !l.is_empty()).collect();
    if nonempty.len() < 3 {
        return false;
    }

    let dense = nonempty
        .iter()
        .filter(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 3 {
                return false;
            }
            let numeric = tokens.iter().filter(|t| is_numeric_token(t)).count();
            numeric * 2 >= tokens.len()
        })
        .count();

    dense >= 3 && dense * 2 >= nonempty.len()
}

fn is_numeric_token(token: &str) -> bool {
    let cleaned = token.trim_matches(|c: char| matches!(c, ',' | '%' | '円' | '¥' | '$'));
    !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_prose() {
        assert_eq!(detect_content_kind(""), ContentKind::Prose);
        assert_eq!(detect_content_kind("   "), ContentKind::Prose);
    }

    #[test]
    fn test_normal_text_is_prose() {
        let text = "これは通常のテキストです。\n段落形式で書かれた文章です。\n特にテーブルや見出しは含まれていません。";
        assert_eq!(detect_content_kind(text), ContentKind::Prose);
    }

    #[test]
    fn test_markdown_heading() {
        let text = "# 見出し1\nこれは本文です。\n\n## 見出し2\nこれも本文です。";
        assert_eq!(detect_content_kind(text), ContentKind::Heading);
    }

    #[test]
    fn test_html_heading() {
        let text = "<h1>見出し1</h1>\nこれは本文です。\n\n<h2>見出し2</h2>\nこれも本文です。";
        assert_eq!(detect_content_kind(text), ContentKind::Heading);
    }

    #[test]
    fn test_markdown_table() {
        let text = "| 名前 | 値 |\n|------|-----|\n| A    | 100 |\n| B    | 200 |";
        assert_eq!(detect_content_kind(text), ContentKind::Table);
    }

    #[test]
    fn test_tab_separated_table() {
        let text = "名前\t値1\t値2\nA\t100\t200\nB\t150\t250\nC\t180\t280";
        assert_eq!(detect_content_kind(text), ContentKind::Table);
    }

    #[test]
    fn test_numeric_dense_text() {
        let text = "りゅうおう  200  100  140  75\nゾーマ      500  255  220  150\nスライム    8    0    5    4";
        assert_eq!(detect_content_kind(text), ContentKind::Table);
    }

    #[test]
    fn test_table_with_heading_is_mixed() {
        let text = "# モンスター一覧\n\n| 名前 | HP |\n|------|-----|\n| A    | 100 |\n| B    | 200 |";
        assert_eq!(detect_content_kind(text), ContentKind::Mixed);
    }

    #[test]
    fn test_hash_mid_line_is_not_heading() {
        let text = "The #1 result was clear.\nNothing else here.";
        assert_eq!(detect_content_kind(text), ContentKind::Prose);
    }
}
