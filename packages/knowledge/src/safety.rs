//! Optional URL safety checking (Google Safe Browsing v4).
//!
//! The service only depends on [`SafetyCheck`]; whether an unavailable
//! checker allows or denies URLs is the client's fail-open/fail-closed
//! setting. Verdicts are cached with a TTL.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{KnowledgeError, Result};

const API_URL: &str = "https://safebrowsing.googleapis.com/v4/threatMatches:find";
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const MAX_CACHE_ENTRIES: usize = 4096;

/// Verdict for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSafety {
    pub is_safe: bool,
    /// Threat type labels when unsafe (e.g. `MALWARE`).
    pub threats: Vec<String>,
}

impl UrlSafety {
    /// A clean verdict.
    pub fn safe() -> Self {
        Self {
            is_safe: true,
            threats: Vec::new(),
        }
    }
}

/// External URL safety checker.
#[async_trait]
pub trait SafetyCheck: Send + Sync {
    /// Check a single URL.
    async fn check_url(&self, url: &str) -> Result<UrlSafety>;

    /// Check a batch; the default delegates per URL.
    async fn check_urls(&self, urls: &[String]) -> Result<HashMap<String, UrlSafety>> {
        let mut verdicts = HashMap::with_capacity(urls.len());
        for url in urls {
            verdicts.insert(url.clone(), self.check_url(url).await?);
        }
        Ok(verdicts)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    client: ClientInfo<'a>,
    threat_info: ThreatInfo<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientInfo<'a> {
    client_id: &'a str,
    client_version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThreatInfo<'a> {
    threat_types: &'a [&'a str],
    platform_types: &'a [&'a str],
    threat_entry_types: &'a [&'a str],
    threat_entries: Vec<ThreatEntry<'a>>,
}

#[derive(Serialize)]
struct ThreatEntry<'a> {
    url: &'a str,
}

#[derive(Deserialize, Default)]
struct LookupResponse {
    #[serde(default)]
    matches: Vec<ThreatMatch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreatMatch {
    threat_type: String,
    threat: MatchedUrl,
}

#[derive(Deserialize)]
struct MatchedUrl {
    url: String,
}

const THREAT_TYPES: &[&str] = &[
    "MALWARE",
    "SOCIAL_ENGINEERING",
    "UNWANTED_SOFTWARE",
    "POTENTIALLY_HARMFUL_APPLICATION",
];

/// Google Safe Browsing v4 lookup client.
pub struct SafeBrowsingClient {
    client: reqwest::Client,
    api_key: SecretString,
    fail_open: bool,
    cache_ttl: Duration,
    cache: Mutex<LruCache<String, (UrlSafety, Instant)>>,
    endpoint: String,
}

impl SafeBrowsingClient {
    /// Create a client. `fail_open` decides the verdict when the API is
    /// unreachable: allow (true) or error out (false).
    pub fn new(api_key: impl Into<String>, timeout: Duration, fail_open: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KnowledgeError::SafetyCheck(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            api_key: SecretString::from(api_key.into()),
            fail_open,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MAX_CACHE_ENTRIES).expect("nonzero capacity"),
            )),
            endpoint: API_URL.to_string(),
        })
    }

    /// Override the verdict cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Point at a different endpoint (tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn cached(&self, url: &str) -> Option<UrlSafety> {
        let mut cache = self.cache.lock().unwrap();
        match cache.get(url) {
            Some((verdict, at)) if at.elapsed() < self.cache_ttl => Some(verdict.clone()),
            _ => None,
        }
    }

    fn store(&self, url: &str, verdict: &UrlSafety) {
        let mut cache = self.cache.lock().unwrap();
        cache.put(url.to_string(), (verdict.clone(), Instant::now()));
    }

    async fn lookup(&self, urls: &[&str]) -> Result<HashMap<String, Vec<String>>> {
        let request = LookupRequest {
            client: ClientInfo {
                client_id: "knowledge",
                client_version: env!("CARGO_PKG_VERSION"),
            },
            threat_info: ThreatInfo {
                threat_types: THREAT_TYPES,
                platform_types: &["ANY_PLATFORM"],
                threat_entry_types: &["URL"],
                threat_entries: urls.iter().map(|&url| ThreatEntry { url }).collect(),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&request)
            .send()
            .await
            .map_err(|e| KnowledgeError::SafetyCheck(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::SafetyCheck(format!(
                "lookup returned {status}"
            )));
        }

        let parsed: LookupResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::SafetyCheck(format!("invalid response: {e}")))?;

        let mut threats: HashMap<String, Vec<String>> = HashMap::new();
        for m in parsed.matches {
            threats.entry(m.threat.url).or_default().push(m.threat_type);
        }
        Ok(threats)
    }

    fn on_unavailable(&self, url: &str, error: KnowledgeError) -> Result<UrlSafety> {
        if self.fail_open {
            warn!(url, error = %error, "safety check unavailable, allowing URL (fail-open)");
            Ok(UrlSafety::safe())
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl SafetyCheck for SafeBrowsingClient {
    async fn check_url(&self, url: &str) -> Result<UrlSafety> {
        if let Some(verdict) = self.cached(url) {
            debug!(url, "safety verdict from cache");
            return Ok(verdict);
        }

        let threats = match self.lookup(&[url]).await {
            Ok(t) => t,
            Err(e) => return self.on_unavailable(url, e),
        };

        let verdict = match threats.get(url) {
            Some(found) => UrlSafety {
                is_safe: false,
                threats: found.clone(),
            },
            None => UrlSafety::safe(),
        };
        self.store(url, &verdict);
        Ok(verdict)
    }

    async fn check_urls(&self, urls: &[String]) -> Result<HashMap<String, UrlSafety>> {
        let mut verdicts: HashMap<String, UrlSafety> = HashMap::new();
        let mut pending: Vec<&str> = Vec::new();
        for url in urls {
            match self.cached(url) {
                Some(v) => {
                    verdicts.insert(url.clone(), v);
                }
                None => pending.push(url.as_str()),
            }
        }

        if !pending.is_empty() {
            match self.lookup(&pending).await {
                Ok(threats) => {
                    for url in pending {
                        let verdict = match threats.get(url) {
                            Some(found) => UrlSafety {
                                is_safe: false,
                                threats: found.clone(),
                            },
                            None => UrlSafety::safe(),
                        };
                        self.store(url, &verdict);
                        verdicts.insert(url.to_string(), verdict);
                    }
                }
                Err(e) => {
                    if !self.fail_open {
                        return Err(e);
                    }
                    warn!(error = %e, "safety batch check unavailable, allowing URLs (fail-open)");
                    for url in pending {
                        verdicts.insert(url.to_string(), UrlSafety::safe());
                    }
                }
            }
        }

        Ok(verdicts)
    }
}
