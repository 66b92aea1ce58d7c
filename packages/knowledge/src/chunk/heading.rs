//! Heading-structured chunker.
//!
//! Walks `#`-style sections (HTML headings are normalized to Markdown
//! first), carrying the breadcrumb of parent headings into each chunk so
//! the emitted text stays meaningful once embedded in isolation.

use regex::Regex;
use std::sync::OnceLock;

/// Bodies shorter than this merge into the previous chunk when the sum fits.
const MIN_SECTION_CHARS: usize = 50;

/// A heading plus its body, with the ancestor-heading trail.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingChunk {
    /// Section heading, empty for leading text before the first heading.
    pub heading: String,

    /// Body text of the section piece.
    pub content: String,

    /// Heading level, 1–6 (0 when there is no heading).
    pub level: usize,

    /// Headings of enclosing sections, outermost first.
    pub parents: Vec<String>,
}

impl HeadingChunk {
    /// Render the searchable text: `[A > B]`, `# Heading`, body.
    pub fn formatted_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.parents.is_empty() {
            parts.push(format!("[{}]", self.parents.join(" > ")));
        }
        if !self.heading.is_empty() {
            parts.push(format!("# {}", self.heading));
        }
        if !self.content.is_empty() {
            parts.push(self.content.clone());
        }
        parts.join("\n")
    }
}

fn heading_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap())
}

fn html_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]\s*>").unwrap())
}

/// Split text into heading-scoped chunks of at most `max_chunk_size`
/// characters. Returns an empty vec for empty input.
pub fn chunk_by_headings(text: &str, max_chunk_size: usize) -> Vec<HeadingChunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let text = convert_html_headings(text);
    let sections = split_by_headings(&text);

    if sections.is_empty() {
        return Vec::new();
    }
    if sections.len() == 1 && sections[0].0.is_empty() {
        // No headings at all: one block, split by paragraph if oversized.
        let body = &sections[0].2;
        if body.chars().count() <= max_chunk_size {
            return vec![HeadingChunk {
                heading: String::new(),
                content: body.clone(),
                level: 0,
                parents: Vec::new(),
            }];
        }
        return split_body_preserving_heading("", 0, body, &[], max_chunk_size);
    }

    let mut chunks: Vec<HeadingChunk> = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();

    for (heading, level, content) in sections {
        while stack.last().is_some_and(|(l, _)| *l >= level) {
            stack.pop();
        }
        let parents: Vec<String> = stack.iter().map(|(_, h)| h.clone()).collect();
        if !heading.is_empty() {
            stack.push((level, heading.clone()));
        }

        if content.chars().count() > max_chunk_size {
            chunks.extend(split_body_preserving_heading(
                &heading,
                level,
                &content,
                &parents,
                max_chunk_size,
            ));
        } else if !content.is_empty()
            && (content.chars().count() >= MIN_SECTION_CHARS || !heading.is_empty() || chunks.is_empty())
        {
            chunks.push(HeadingChunk {
                heading,
                content,
                level,
                parents,
            });
        } else if !content.is_empty() {
            // Orphan body: merge into the previous chunk when the sum fits.
            let prev = chunks.last_mut().unwrap();
            let combined = format!("{}\n\n{}", prev.content, content).trim().to_string();
            if combined.chars().count() <= max_chunk_size {
                prev.content = combined;
            } else {
                chunks.push(HeadingChunk {
                    heading,
                    content,
                    level,
                    parents,
                });
            }
        } else if heading.is_empty() {
            continue;
        } else {
            // Heading with no body still marks a section.
            chunks.push(HeadingChunk {
                heading,
                content,
                level,
                parents,
            });
        }
    }

    chunks
}

/// Rewrite `<h1>..</h1>` as `# ..` so one section walker handles both.
fn convert_html_headings(text: &str) -> String {
    html_heading_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let level: usize = caps[1].parse().unwrap_or(1);
            format!("{} {}", "#".repeat(level), caps[2].trim())
        })
        .into_owned()
}

/// Split into `(heading, level, body)` triples in document order.
fn split_by_headings(text: &str) -> Vec<(String, usize, String)> {
    let mut sections = Vec::new();
    let mut heading = String::new();
    let mut level = 0usize;
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = heading_line_re().captures(line.trim_start()) {
            if !body.is_empty() || !heading.is_empty() {
                sections.push((heading.clone(), level, body.join("\n").trim().to_string()));
            }
            heading = caps[2].trim().to_string();
            level = caps[1].len();
            body.clear();
        } else {
            body.push(line);
        }
    }
    if !body.is_empty() || !heading.is_empty() {
        sections.push((heading, level, body.join("\n").trim().to_string()));
    }

    sections
        .into_iter()
        .filter(|(h, _, b)| !h.is_empty() || !b.is_empty())
        .collect()
}

/// Paragraph-split an oversized body, suffixing continuation pieces.
fn split_body_preserving_heading(
    heading: &str,
    level: usize,
    content: &str,
    parents: &[String],
    max_chunk_size: usize,
) -> Vec<HeadingChunk> {
    let mut chunks: Vec<HeadingChunk> = Vec::new();
    let mut parts: Vec<&str> = Vec::new();
    let mut size = 0usize;

    let flush = |parts: &mut Vec<&str>, chunks: &mut Vec<HeadingChunk>| {
        if parts.is_empty() {
            return;
        }
        let piece_heading = if heading.is_empty() {
            String::new()
        } else if chunks.is_empty() {
            heading.to_string()
        } else {
            format!("{heading} (continued)")
        };
        chunks.push(HeadingChunk {
            heading: piece_heading,
            content: parts.join("\n\n"),
            level,
            parents: parents.to_vec(),
        });
        parts.clear();
    };

    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_size = paragraph.chars().count();
        if size + para_size + 2 > max_chunk_size && !parts.is_empty() {
            flush(&mut parts, &mut chunks);
            size = 0;
        }
        parts.push(paragraph);
        size += para_size + 2;
    }
    flush(&mut parts, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(chunk_by_headings("", 200).is_empty());
    }

    #[test]
    fn test_sections_become_chunks() {
        let text = "# 見出し1\n本文1\n\n## 見出し2\n本文2";
        let chunks = chunk_by_headings(text, 200);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "見出し1");
        assert_eq!(chunks[0].level, 1);
        assert!(chunks[0].content.contains("本文1"));
        assert_eq!(chunks[1].heading, "見出し2");
        assert_eq!(chunks[1].level, 2);
        assert_eq!(chunks[1].parents, vec!["見出し1"]);
    }

    #[test]
    fn test_breadcrumb_formatting() {
        let chunk = HeadingChunk {
            heading: "C".to_string(),
            content: "body".to_string(),
            level: 3,
            parents: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(chunk.formatted_text(), "[A > B]\n# C\nbody");
    }

    #[test]
    fn test_html_headings_are_normalized() {
        let text = "<h1>Title</h1>\nBody text under the title goes here.";
        let chunks = chunk_by_headings(text, 200);
        assert_eq!(chunks[0].heading, "Title");
        assert_eq!(chunks[0].level, 1);
    }

    #[test]
    fn test_sibling_headings_do_not_nest() {
        let text = "# A\ncontent a\n\n# B\ncontent b";
        let chunks = chunk_by_headings(text, 200);
        assert!(chunks[1].parents.is_empty());
    }

    #[test]
    fn test_oversized_section_splits_with_continuation() {
        let body = format!("{}\n\n{}", "x".repeat(150), "y".repeat(150));
        let text = format!("# Big\n{body}");
        let chunks = chunk_by_headings(&text, 200);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading, "Big");
        assert_eq!(chunks[1].heading, "Big (continued)");
    }

    #[test]
    fn test_short_orphan_merges_into_previous() {
        let text = "# A\nA body long enough to stand on its own as a section here.\n\n## B\nshort\n\n# C\nAnother standalone section body that is long enough as well.";
        let chunks = chunk_by_headings(text, 500);
        // "short" is under a heading, so it stays its own chunk.
        assert!(chunks.iter().any(|c| c.heading == "B"));
    }

    #[test]
    fn test_no_headings_single_chunk() {
        let text = "Plain text without any headings.";
        let chunks = chunk_by_headings(text, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, "");
        assert_eq!(chunks[0].formatted_text(), text);
    }
}
