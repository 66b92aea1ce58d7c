//! Ingestion-side plumbing: URL validation, robots.txt, page fetching.

pub mod extract;
pub mod fetch;
pub mod guard;
pub mod robots;

pub use extract::extract_text;
pub use fetch::{PageSource, WebCrawler};
pub use guard::{defragment, UrlGuard};
pub use robots::{RobotsCache, RobotsTxt};
