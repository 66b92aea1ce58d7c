//! Typed errors for the knowledge engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on failure kinds.

use thiserror::Error;

/// Security-related errors, primarily for SSRF protection.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// Hostname is blocked outright (localhost and friends)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// Host resolves to a loopback address
    #[error("loopback address not allowed: {0}")]
    Loopback(std::net::IpAddr),

    /// Host resolves to a link-local address (includes cloud metadata ranges)
    #[error("link-local address not allowed: {0}")]
    LinkLocal(std::net::IpAddr),

    /// Host resolves to an RFC1918 / unique-local private address
    #[error("private address not allowed: {0}")]
    PrivateAddress(std::net::IpAddr),

    /// Host resolves to a reserved address range
    #[error("reserved address not allowed: {0}")]
    Reserved(std::net::IpAddr),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Errors that can occur during crawl operations.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// URL failed SSRF validation
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// HTTP request failed (connect, TLS, body read)
    #[error("HTTP error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success status code
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    /// Invalid regex supplied as a link filter
    #[error("invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Errors surfaced by the knowledge service and its indexes.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Crawl operation failed
    #[error("crawl failed: {0}")]
    Crawl(#[from] CrawlError),

    /// URL failed SSRF validation
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(String),

    /// URL flagged by the safety checker
    #[error("unsafe URL: {url} (threats: {threats:?})")]
    UnsafeUrl { url: String, threats: Vec<String> },

    /// Safety checker unavailable while configured fail-closed
    #[error("safety check failed: {0}")]
    SafetyCheck(String),

    /// Invalid configuration detected at construction
    #[error("config error: {0}")]
    Config(String),

    /// Unknown tool name on the tool surface
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (dataset load, report write)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for knowledge operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;

/// Result type alias for security validation.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;
