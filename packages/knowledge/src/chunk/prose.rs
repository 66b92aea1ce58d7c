//! Overlapping prose chunker.
//!
//! Split priority: paragraph (blank line) → sentence (Japanese `。` and
//! English `.!?`) → character. Consecutive segments merge greedily up to
//! `chunk_size` characters; when a chunk closes, its last `chunk_overlap`
//! characters seed the next chunk. All sizes are in characters, not bytes.

/// Split text into chunks of at most `chunk_size` characters with
/// `chunk_overlap` characters of carried context.
///
/// `chunk_overlap` must be smaller than `chunk_size`; the service enforces
/// this at construction, and out-of-range values are clamped here.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chunk_overlap = chunk_overlap.min(chunk_size.saturating_sub(1));

    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let paragraphs = split_paragraphs(text);
    merge_into_chunks(&paragraphs, chunk_size, chunk_overlap)
}

/// Character count, not bytes: chunk sizes are defined over characters
/// so Japanese text is measured the same as ASCII.
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of a string.
fn char_tail(s: &str, n: usize) -> String {
    let len = char_len(s);
    if len <= n {
        return s.to_string();
    }
    s.chars().skip(len - n).collect()
}

fn char_window(chars: &[char], start: usize, len: usize) -> String {
    chars[start..(start + len).min(chars.len())].iter().collect()
}

/// Split on blank lines (a newline, optional whitespace, another newline).
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut blank_pending = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            blank_pending = !current.is_empty();
        } else {
            if blank_pending {
                paragraphs.push(std::mem::take(&mut current));
                blank_pending = false;
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split on sentence terminators, absorbing trailing whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut ended = false;

    for c in text.chars() {
        if ended && c.is_whitespace() {
            continue;
        }
        if ended {
            let finished = std::mem::take(&mut current);
            if !finished.trim().is_empty() {
                sentences.push(finished.trim().to_string());
            }
            ended = false;
        }
        current.push(c);
        if matches!(c, '。' | '.' | '!' | '?' | '！' | '？') {
            ended = true;
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }

    sentences
}

/// Fixed-size character windows (no overlap).
fn split_characters(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        out.push(char_window(&chars, start, size));
        start += size;
    }
    out
}

fn merge_into_chunks(segments: &[String], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut overlap_buffer = String::new();

    for segment in segments {
        // Oversized segments get their own sentence-level pass.
        if char_len(segment) > chunk_size {
            if !current.is_empty() {
                overlap_buffer = char_tail(&current, chunk_overlap);
                chunks.push(std::mem::take(&mut current));
            }

            let mut sub_segments = split_sentences(segment);
            if sub_segments.len() == 1 && char_len(&sub_segments[0]) > chunk_size {
                sub_segments = split_characters(segment, chunk_size - chunk_overlap);
            }

            let sub_chunks = merge_into_chunks(&sub_segments, chunk_size, chunk_overlap);
            for (i, sub_chunk) in sub_chunks.iter().enumerate() {
                if i == 0 && !overlap_buffer.is_empty() {
                    let combined = format!("{overlap_buffer} {sub_chunk}");
                    if char_len(&combined) <= chunk_size {
                        chunks.push(combined);
                    } else {
                        chunks.push(sub_chunk.clone());
                    }
                } else {
                    chunks.push(sub_chunk.clone());
                }
            }
            if let Some(last) = sub_chunks.last() {
                overlap_buffer = char_tail(last, chunk_overlap);
            }
            continue;
        }

        let combined = if !current.is_empty() {
            format!("{current}\n\n{segment}")
        } else if !overlap_buffer.is_empty() {
            format!("{overlap_buffer} {segment}").trim().to_string()
        } else {
            segment.clone()
        };

        if char_len(&combined) <= chunk_size {
            current = combined;
            continue;
        }

        if !current.is_empty() {
            overlap_buffer = char_tail(&current, chunk_overlap);
            chunks.push(std::mem::take(&mut current));
        }
        current = if !overlap_buffer.is_empty() {
            format!("{overlap_buffer} {segment}").trim().to_string()
        } else {
            segment.clone()
        };

        // Still oversized after prepending overlap: force-split with a
        // sliding window of step chunk_size - chunk_overlap.
        if char_len(&current) > chunk_size {
            let chars: Vec<char> = current.chars().collect();
            let step = chunk_size - chunk_overlap;
            let mut forced: Vec<String> = Vec::new();
            let mut start = 0;
            while start < chars.len() {
                forced.push(char_window(&chars, start, chunk_size));
                if start + chunk_size >= chars.len() {
                    break;
                }
                start += step;
            }

            if let Some((last, head)) = forced.split_last() {
                chunks.extend(head.iter().cloned());
                current = last.clone();
            } else {
                current.clear();
            }
            overlap_buffer.clear();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_text("", 100, 10).is_empty());
        assert!(chunk_text("   \n  ", 100, 10).is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunk_text("Short text.", 100, 10);
        assert_eq!(chunks, vec!["Short text."]);
    }

    #[test]
    fn test_every_chunk_respects_size_bound() {
        let text = "word ".repeat(200);
        for chunk in chunk_text(&text, 50, 10) {
            assert!(chunk.chars().count() <= 50, "oversized: {chunk:?}");
        }
    }

    #[test]
    fn test_paragraphs_merge_greedily() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 60, 10);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Second paragraph."));
    }

    #[test]
    fn test_overlap_carries_tail_of_previous_chunk() {
        let text = format!("{}\n\n{}", "a".repeat(90), "b".repeat(70));
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(90));
        assert!(chunks[1].starts_with(&"a".repeat(20)));
        assert!(chunks[1].ends_with(&"b".repeat(70)));
    }

    #[test]
    fn test_japanese_sentence_split() {
        let sentences = split_sentences("これは文です。次の文です。最後です。");
        assert_eq!(sentences, vec!["これは文です。", "次の文です。", "最後です。"]);
    }

    #[test]
    fn test_english_sentence_split_absorbs_whitespace() {
        let sentences = split_sentences("One. Two!  Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_unbreakable_run_uses_sliding_window() {
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        // Window step of 80 means each boundary repeats 20 characters.
        assert!(chunks[1].starts_with("x"));
    }

    #[test]
    fn test_character_sizes_are_chars_not_bytes() {
        let text = "あ".repeat(150);
        let chunks = chunk_text(&text, 100, 10);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        assert!(chunks.len() >= 2);
    }
}
