//! Tokenization for the keyword index.
//!
//! Japanese+English pipeline: lowercase, split, drop function words and
//! single-character fragments. [`Tokenize`] is the seam where a
//! morphological analyzer (part-of-speech filtered) plugs in; the built-in
//! splitter is the fallback path and announces itself once. Results are
//! memoized in an LRU cache keyed by the input string.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Mutex, Once, OnceLock};

use lru::LruCache;
use tracing::warn;

/// Tokenization cache capacity (entries).
const CACHE_CAPACITY: usize = 10_000;

/// Japanese function words dropped from the index: particles, auxiliaries,
/// common copulas and formal endings.
const JAPANESE_STOPWORDS: &[&str] = &[
    "の", "に", "は", "を", "た", "が", "で", "て", "と", "し", "れ", "さ",
    "ある", "いる", "も", "する", "から", "な", "こと", "として", "い", "や",
    "れる", "など", "なっ", "ない", "この", "ため", "その", "あっ", "よう",
    "また", "もの", "という", "あり", "まで", "られ", "なる", "へ", "か",
    "だ", "これ", "によって", "により", "おり", "より", "による", "ず",
    "なり", "られる", "において", "ば", "なかっ", "なく", "しかし",
    "について", "せ", "だっ", "その他", "できる", "それ", "う", "ので",
    "なお", "のみ", "でき", "き", "つ", "における", "および", "いう",
    "さらに", "でも", "ら", "たり", "その後", "ほか", "ほど", "ます",
    "です", "ました", "でした",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| JAPANESE_STOPWORDS.iter().copied().collect())
}

/// Turns text into index tokens.
pub trait Tokenize: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Built-in splitter: lowercase, split on whitespace and punctuation,
/// drop stopwords and single-character tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleTokenizer;

fn is_split_char(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '.' | ',' | '!' | '?' | ':' | ';' | '"' | '\'' | '(' | ')' | '[' | ']' | '{' | '}'
                | '、' | '。' | '！' | '？' | '・' | '「' | '」' | '（' | '）' | '：' | '；'
        )
}

impl Tokenize for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.trim().to_lowercase();
        lowered
            .split(is_split_char)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter(|t| t.chars().count() > 1)
            .filter(|t| !stopwords().contains(t))
            .map(str::to_string)
            .collect()
    }
}

/// Caching front for a [`Tokenize`] implementation.
pub struct Tokenizer {
    inner: Box<dyn Tokenize>,
    cache: Mutex<LruCache<String, Vec<String>>>,
}

impl Tokenizer {
    /// Tokenizer using the built-in splitter. Warns once per process that
    /// no morphological analyzer is configured.
    pub fn simple() -> Self {
        static WARNED: Once = Once::new();
        WARNED.call_once(|| {
            warn!("no morphological analyzer configured; using the built-in splitter");
        });
        Self::with_analyzer(Box::new(SimpleTokenizer))
    }

    /// Tokenizer backed by a custom analyzer.
    pub fn with_analyzer(inner: Box<dyn Tokenize>) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    /// Tokenize with memoization.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(tokens) = cache.get(text) {
                return tokens.clone();
            }
        }

        let tokens = self.inner.tokenize(text);

        let mut cache = self.cache.lock().unwrap();
        cache.put(text.to_string(), tokens.clone());
        tokens
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::simple()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_splits() {
        let tokens = SimpleTokenizer.tokenize("Python Programming, Rust!");
        assert_eq!(tokens, vec!["python", "programming", "rust"]);
    }

    #[test]
    fn test_japanese_punctuation_splits() {
        let tokens = SimpleTokenizer.tokenize("フロベニウスノルム、行列。ノルム計算！");
        assert_eq!(tokens, vec!["フロベニウスノルム", "行列", "ノルム計算"]);
    }

    #[test]
    fn test_drops_stopwords() {
        let tokens = SimpleTokenizer.tokenize("これ は データ の 検索 です");
        assert_eq!(tokens, vec!["データ", "検索"]);
    }

    #[test]
    fn test_drops_single_character_tokens() {
        let tokens = SimpleTokenizer.tokenize("a b cd 検索");
        assert_eq!(tokens, vec!["cd", "検索"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(SimpleTokenizer.tokenize("").is_empty());
        assert!(SimpleTokenizer.tokenize("   ").is_empty());
    }

    #[test]
    fn test_cache_returns_same_tokens() {
        let tokenizer = Tokenizer::simple();
        let first = tokenizer.tokenize("cached input text");
        let second = tokenizer.tokenize("cached input text");
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_analyzer_is_used() {
        struct Upper;
        impl Tokenize for Upper {
            fn tokenize(&self, text: &str) -> Vec<String> {
                text.split_whitespace().map(str::to_uppercase).collect()
            }
        }

        let tokenizer = Tokenizer::with_analyzer(Box::new(Upper));
        assert_eq!(tokenizer.tokenize("ab cd"), vec!["AB", "CD"]);
    }
}
