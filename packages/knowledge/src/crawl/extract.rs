//! HTML → plain-text extraction.
//!
//! Prefers `<article>`, then `<main>`, then `<body>` as the content root,
//! drops boilerplate elements, and collapses whitespace.

use scraper::{ElementRef, Html, Selector};

/// Elements whose subtrees never contribute to page text.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "noscript", "head", "title",
];

/// Extract `(title, text)` from an HTML document.
pub fn extract_text(html: &str) -> (String, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default();

    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| document.select(&sel).next());

    let mut lines: Vec<String> = Vec::new();
    collect_text(root.unwrap_or_else(|| document.root_element()), &mut lines);

    let text = collapse_blank_runs(&lines.join("\n"));
    (title, text)
}

fn collect_text(element: ElementRef<'_>, lines: &mut Vec<String>) {
    let name = element.value().name();
    if EXCLUDED_TAGS.contains(&name) {
        return;
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let cleaned = collapse_spaces(text);
            if !cleaned.is_empty() {
                lines.push(cleaned);
            }
        } else if let Some(child_el) = ElementRef::wrap(child) {
            collect_text(child_el, lines);
        }
    }
}

/// Collapse runs of spaces and tabs to a single space, trimming the ends.
fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else if c == '\n' || c == '\r' {
            // Newlines inside a text node behave like spaces; structure
            // comes from element boundaries.
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out.trim().to_string()
}

/// Collapse runs of three or more newlines down to a blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push('\n');
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out.trim().to_string()
}
