//! robots.txt parsing and per-host caching.
//!
//! The cache is keyed by `scheme://host:port` and entries expire after a
//! configurable TTL. Fetch or parse failures cache a permissive entry
//! (fail-open); an explicit Disallow is the only thing that blocks a URL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use url::Url;

use crate::config::USER_AGENT;

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent (lowercase)
    rules: HashMap<String, AgentRules>,

    /// Default rules (for *)
    default_rules: AgentRules,
}

/// Rules for a specific user-agent.
#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsTxt {
    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        let mut in_record = false;

        let flush =
            |agents: &mut Vec<String>, rules: &mut AgentRules, robots: &mut RobotsTxt| {
                for agent in agents.drain(..) {
                    if agent == "*" {
                        robots.default_rules = rules.clone();
                    } else {
                        robots.rules.insert(agent, rules.clone());
                    }
                }
                *rules = AgentRules::default();
            };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_record {
                        flush(&mut current_agents, &mut current_rules, &mut robots);
                        in_record = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    in_record = true;
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_record = true;
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_record = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current_rules.crawl_delay = Some(delay);
                    }
                }
                _ => {}
            }
        }

        flush(&mut current_agents, &mut current_rules, &mut robots);
        robots
    }

    fn rules_for(&self, user_agent: &str) -> &AgentRules {
        let agent_lower = user_agent.to_lowercase();
        self.rules
            .get(&agent_lower)
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(k, _)| agent_lower.contains(k.as_str()))
                    .map(|(_, v)| v)
            })
            .unwrap_or(&self.default_rules)
    }

    /// Check if a path is allowed for a user-agent.
    ///
    /// Allow rules take precedence over Disallow rules of the same record.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let rules = self.rules_for(user_agent);

        for allow in &rules.allow {
            if path.starts_with(allow.as_str()) {
                return true;
            }
        }
        for disallow in &rules.disallow {
            if path.starts_with(disallow.as_str()) {
                return false;
            }
        }
        true
    }

    /// Get the declared Crawl-delay for a user-agent.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.rules_for(user_agent)
            .crawl_delay
            .or(self.default_rules.crawl_delay)
            .map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    robots: RobotsTxt,
    fetched_at: Instant,
}

/// Per-host robots.txt cache with TTL expiry.
///
/// A single mutex protects the map; HTTP fetches always happen outside
/// the lock.
pub struct RobotsCache {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl RobotsCache {
    /// Create a cache using the given HTTP client (redirects must already
    /// be disabled on it).
    pub fn new(client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Cache key: `scheme://host:port`, default port inferred from scheme.
    fn cache_key(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let port = url
            .port()
            .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
        Some(format!("{}://{}:{}", url.scheme(), host, port))
    }

    /// Check whether a URL may be fetched for our user agent.
    pub async fn can_fetch(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let robots = self.entry_for(&parsed).await;
        let mut path = parsed.path().to_string();
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }
        let allowed = robots.is_allowed(USER_AGENT, &path);
        if !allowed {
            info!(url = %url, "robots.txt disallows crawling");
        }
        allowed
    }

    /// The Crawl-delay declared for a URL's host, if any.
    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let parsed = Url::parse(url).ok()?;
        self.entry_for(&parsed).await.crawl_delay(USER_AGENT)
    }

    async fn entry_for(&self, url: &Url) -> RobotsTxt {
        let Some(key) = Self::cache_key(url) else {
            return RobotsTxt::default();
        };

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return entry.robots.clone();
                }
            }
        }

        // Cache miss or expired: fetch outside the lock.
        let robots = self.fetch(url).await;

        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            key,
            CacheEntry {
                robots: robots.clone(),
                fetched_at: Instant::now(),
            },
        );
        robots
    }

    async fn fetch(&self, url: &Url) -> RobotsTxt {
        let robots_url = {
            let mut u = url.clone();
            u.set_path("/robots.txt");
            u.set_query(None);
            u.set_fragment(None);
            u
        };

        match self.client.get(robots_url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => {
                    debug!(url = %robots_url, "fetched robots.txt");
                    RobotsTxt::parse(&body)
                }
                Err(e) => {
                    warn!(url = %robots_url, error = %e, "failed to read robots.txt body, allowing all");
                    RobotsTxt::default()
                }
            },
            Ok(resp) => {
                // Missing robots.txt (404 and friends) allows everything.
                debug!(url = %robots_url, status = %resp.status(), "robots.txt not found, allowing all");
                RobotsTxt::default()
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "failed to fetch robots.txt, allowing all");
                RobotsTxt::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let content = r#"
User-agent: *
Disallow: /private/
Disallow: /admin/
Allow: /public/
Crawl-delay: 2
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(robots.is_allowed("KnowledgeBot", "/public/page"));
        assert!(!robots.is_allowed("KnowledgeBot", "/private/page"));
        assert!(!robots.is_allowed("KnowledgeBot", "/admin/"));
        assert!(robots.is_allowed("KnowledgeBot", "/other/page"));
        assert_eq!(
            robots.crawl_delay("KnowledgeBot"),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_specific_user_agent() {
        let content = r#"
User-agent: *
Disallow: /

User-agent: goodbot
Disallow:
Allow: /
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(!robots.is_allowed("BadBot", "/page"));
        assert!(robots.is_allowed("GoodBot", "/page"));
    }

    #[test]
    fn test_allow_overrides_disallow() {
        let content = r#"
User-agent: *
Disallow: /private/
Allow: /private/public/
        "#;

        let robots = RobotsTxt::parse(content);

        assert!(!robots.is_allowed("Bot", "/private/secret"));
        assert!(robots.is_allowed("Bot", "/private/public/page"));
    }

    #[test]
    fn test_empty_robots_allows_all() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed("AnyBot", "/any/path"));
        assert!(robots.crawl_delay("AnyBot").is_none());
    }

    #[test]
    fn test_comments_are_stripped() {
        let content = r#"
# full-line comment
User-agent: *
Disallow: /hidden/ # trailing comment
        "#;

        let robots = RobotsTxt::parse(content);
        assert!(!robots.is_allowed("Bot", "/hidden/page"));
    }

    #[test]
    fn test_fractional_crawl_delay() {
        let content = "User-agent: *\nCrawl-delay: 0.5\nDisallow:";
        let robots = RobotsTxt::parse(content);
        assert_eq!(robots.crawl_delay("Bot"), Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn test_cache_key_includes_default_port() {
        let http = Url::parse("http://example.com/a").unwrap();
        let https = Url::parse("https://example.com/a").unwrap();
        assert_eq!(
            RobotsCache::cache_key(&http).unwrap(),
            "http://example.com:80"
        );
        assert_eq!(
            RobotsCache::cache_key(&https).unwrap(),
            "https://example.com:443"
        );
    }
}
