//! Web crawler with robots.txt enforcement and per-host pacing.
//!
//! Redirects are never followed: a 3xx response yields no page, because a
//! redirect target has not been through SSRF validation. Bodies are decoded
//! with charset detection so Shift_JIS and EUC-JP pages survive intact.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{CrawlerConfig, USER_AGENT};
use crate::crawl::extract::extract_text;
use crate::crawl::guard::{defragment, UrlGuard};
use crate::crawl::robots::RobotsCache;
use crate::error::{CrawlError, CrawlResult, SecurityResult};
use crate::types::CrawledPage;

/// Anything that can validate URLs, fetch pages, and enumerate index-page
/// links. The seam that lets the knowledge service run against fixtures.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Validate and normalize a URL.
    async fn validate(&self, url: &str) -> SecurityResult<String>;

    /// Fetch a single page. `None` on any per-URL failure.
    async fn fetch_page(&self, url: &str) -> Option<CrawledPage>;

    /// Enumerate same-host links from an index page, validated and capped.
    async fn discover(&self, index_url: &str, pattern: Option<&str>) -> CrawlResult<Vec<String>>;
}

/// Per-host request state: requests to one host serialize on the mutex and
/// the next request waits out the effective delay since the last completion.
#[derive(Debug, Default)]
struct HostSlot {
    last_done: Option<Instant>,
    effective_delay: Option<Duration>,
}

/// HTTP crawler.
pub struct WebCrawler {
    client: reqwest::Client,
    guard: UrlGuard,
    robots: Option<RobotsCache>,
    config: CrawlerConfig,
    semaphore: Arc<Semaphore>,
    hosts: Mutex<HashMap<String, Arc<tokio::sync::Mutex<HostSlot>>>>,
}

impl WebCrawler {
    /// Build a crawler from config. Fails only if the TLS backend cannot
    /// be initialized.
    pub fn new(config: CrawlerConfig) -> CrawlResult<Self> {
        Self::with_guard(config, UrlGuard::new())
    }

    /// Build a crawler with a customized guard (extra blocked hosts, or an
    /// allowlisted fixture host in tests).
    pub fn with_guard(config: CrawlerConfig, guard: UrlGuard) -> CrawlResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CrawlError::Http {
                url: String::new(),
                source: e,
            })?;

        let robots = config
            .respect_robots_txt
            .then(|| RobotsCache::new(client.clone(), config.robots_cache_ttl));

        Ok(Self {
            guard,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            hosts: Mutex::new(HashMap::new()),
            robots,
            client,
            config,
        })
    }

    /// Validate and normalize a URL without fetching it.
    pub async fn validate_url(&self, url: &str) -> SecurityResult<String> {
        self.guard.validate(url).await
    }

    /// Fetch one page: validate, robots-check, pace, GET, decode, extract.
    ///
    /// Returns `None` on any failure; errors never escape a single URL.
    pub async fn crawl_page(&self, url: &str) -> Option<CrawledPage> {
        let validated = match self.guard.validate(url).await {
            Ok(u) => u,
            Err(e) => {
                warn!(url = %url, error = %e, "URL validation failed");
                return None;
            }
        };

        if let Some(robots) = &self.robots {
            if !robots.can_fetch(&validated).await {
                return None;
            }
        }

        let host = Url::parse(&validated).ok()?.host_str()?.to_string();
        let slot = self.host_slot(&host);
        let mut state = slot.lock().await;

        let delay = match state.effective_delay {
            Some(d) => d,
            None => {
                let d = self.effective_delay(&validated).await;
                state.effective_delay = Some(d);
                d
            }
        };
        if let Some(last) = state.last_done {
            let elapsed = last.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }

        let result = {
            let _permit = self.semaphore.acquire().await.ok()?;
            self.fetch_and_extract(&validated).await
        };
        state.last_done = Some(Instant::now());
        result
    }

    /// Enumerate links from an index page.
    ///
    /// Keeps only same-host links, optionally filtered by `pattern`,
    /// deduplicated in first-seen order, SSRF-validated, capped at
    /// `max_pages`, and finally stripped of robots-disallowed URLs.
    pub async fn crawl_index_page(
        &self,
        index_url: &str,
        pattern: Option<&str>,
    ) -> CrawlResult<Vec<String>> {
        let validated = self.guard.validate(index_url).await?;
        let pattern = pattern
            .filter(|p| !p.is_empty())
            .map(Regex::new)
            .transpose()?;

        let response = self
            .client
            .get(&validated)
            .send()
            .await
            .map_err(|e| CrawlError::Http {
                url: validated.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_redirection() {
            warn!(url = %validated, status = %status, "redirect refused for index page");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            warn!(url = %validated, status = %status, "failed to fetch index page");
            return Ok(Vec::new());
        }

        let html = decode_response(response, &validated).await?;
        let base = Url::parse(&validated).map_err(crate::error::SecurityError::from)?;
        let index_host = base.host_str().unwrap_or_default().to_string();

        let mut seen: HashSet<String> = HashSet::new();
        let mut urls: Vec<String> = Vec::new();

        for href in extract_links(&html) {
            let Ok(absolute) = base.join(&href) else {
                continue;
            };
            let normalized = defragment(absolute.as_str());

            let link_host = Url::parse(&normalized)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();
            if link_host != index_host {
                debug!(link = %normalized, "skipping external-host link");
                continue;
            }

            if !seen.insert(normalized.clone()) {
                continue;
            }
            if let Some(re) = &pattern {
                if !re.is_match(&normalized) {
                    continue;
                }
            }
            // SSRF validation last so filtered URLs cost no DNS lookups.
            let Ok(valid) = self.guard.validate(&normalized).await else {
                continue;
            };

            urls.push(valid);
            if urls.len() >= self.config.max_pages {
                break;
            }
        }

        if let Some(robots) = &self.robots {
            let mut allowed = Vec::with_capacity(urls.len());
            for url in urls {
                if robots.can_fetch(&url).await {
                    allowed.push(url);
                }
            }
            urls = allowed;
        }

        Ok(urls)
    }

    /// Crawl many pages concurrently; per-URL failures are dropped.
    pub async fn crawl_pages(&self, urls: &[String]) -> Vec<CrawledPage> {
        let mut tasks: FuturesUnordered<_> =
            urls.iter().map(|url| self.crawl_page(url)).collect();

        let mut pages = Vec::new();
        while let Some(page) = tasks.next().await {
            if let Some(page) = page {
                pages.push(page);
            }
        }
        pages
    }

    fn host_slot(&self, host: &str) -> Arc<tokio::sync::Mutex<HostSlot>> {
        let mut hosts = self.hosts.lock().unwrap();
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(HostSlot::default())))
            .clone()
    }

    /// Max of the configured delay and the robots.txt Crawl-delay.
    async fn effective_delay(&self, url: &str) -> Duration {
        let mut delay = self.config.crawl_delay;
        if let Some(robots) = &self.robots {
            if let Some(robots_delay) = robots.crawl_delay(url).await {
                if robots_delay > delay {
                    debug!(url = %url, delay_secs = robots_delay.as_secs_f64(), "using robots.txt Crawl-delay");
                    delay = robots_delay;
                }
            }
        }
        delay
    }

    async fn fetch_and_extract(&self, url: &str) -> Option<CrawledPage> {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "HTTP request failed");
                return None;
            }
        };

        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            warn!(url = %url, status = %status, location = %location, "redirect refused");
            return None;
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "failed to fetch page");
            return None;
        }

        let html = match decode_response(response, url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, error = %e, "failed to read response body");
                return None;
            }
        };

        let (title, text) = extract_text(&html);
        info!(url = %url, chars = text.len(), "crawled page");
        Some(CrawledPage::new(url, title, text))
    }
}

#[async_trait]
impl PageSource for WebCrawler {
    async fn validate(&self, url: &str) -> SecurityResult<String> {
        self.validate_url(url).await
    }

    async fn fetch_page(&self, url: &str) -> Option<CrawledPage> {
        self.crawl_page(url).await
    }

    async fn discover(&self, index_url: &str, pattern: Option<&str>) -> CrawlResult<Vec<String>> {
        self.crawl_index_page(index_url, pattern).await
    }
}

/// Decode a response body with charset detection.
///
/// Preference order: Content-Type header charset, `<meta charset>` sniffed
/// from the first bytes, UTF-8 (lossy) last.
async fn decode_response(response: reqwest::Response, url: &str) -> CrawlResult<String> {
    let header_charset = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_from_content_type);

    let bytes = response.bytes().await.map_err(|e| CrawlError::Http {
        url: url.to_string(),
        source: e,
    })?;

    let encoding = header_charset
        .or_else(|| sniff_meta_charset(&bytes))
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);

    let (decoded, _, _) = encoding.decode(&bytes);
    Ok(decoded.into_owned())
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        part.trim()
            .strip_prefix("charset=")
            .map(|c| c.trim_matches('"').to_string())
    })
}

/// Look for a `<meta charset=...>` or http-equiv declaration in the first
/// kilobyte of the document.
fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    let re = Regex::new(r#"(?i)charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#).unwrap();
    re.captures(&head).map(|cap| cap[1].to_string())
}

/// Pull raw `href` values out of anchor tags.
fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| {
            !href.starts_with('#')
                && !href.starts_with("javascript:")
                && !href.starts_with("mailto:")
                && !href.starts_with("tel:")
        })
        .map(str::to_string)
        .collect()
}
