//! Configuration for the proxy pool and the retry loop.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::OutcomeKind;
use crate::error::ConfigError;
use crate::source::{CatalogFormat, CatalogSource};

/// Per-kind sleep between a retryable failure and the next attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub challenge: Duration,
    pub throttled: Duration,
    pub blocked: Duration,
    pub transient_network: Duration,
}

impl BackoffPolicy {
    /// Delay before retrying after `kind`. Terminal kinds never wait.
    pub fn delay_for(&self, kind: OutcomeKind) -> Duration {
        match kind {
            OutcomeKind::Challenge => self.challenge,
            OutcomeKind::Throttled => self.throttled,
            OutcomeKind::Blocked => self.blocked,
            OutcomeKind::TransientNetwork => self.transient_network,
            _ => Duration::ZERO,
        }
    }

    /// A policy that never sleeps.
    pub fn none() -> Self {
        Self {
            challenge: Duration::ZERO,
            throttled: Duration::ZERO,
            blocked: Duration::ZERO,
            transient_network: Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            challenge: Duration::from_secs(2),
            throttled: Duration::from_secs(3),
            blocked: Duration::from_secs(3),
            transient_network: Duration::from_secs(2),
        }
    }
}

/// Settings of the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_retries: usize,
    /// Sleep applied after each retryable failure.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// A single static proxy.
    pub static_proxy: Option<String>,
    /// A comma-separated list of static proxies.
    pub proxy_list: Option<String>,
    /// Remote catalogs to fetch proxy lists from.
    pub catalogs: Vec<CatalogSource>,
    /// Whether remote catalogs are fetched at all.
    pub fetch_remote: bool,
    /// Timeout for each catalog fetch.
    pub fetch_timeout: Duration,
    /// Maximum number of proxies taken from one origin.
    pub max_per_origin: usize,
    /// Age after which the candidate set is refreshed.
    pub refresh_interval: Duration,
    /// Minimum time before a proxy is handed out again.
    pub cooldown: Duration,
    /// Number of least-recently-used proxies considered when all are cooling down.
    pub lru_fallback: usize,
    /// Failed/total ratio above which the whole pool is considered stale.
    pub stale_ratio: f64,
    /// Retry loop settings.
    pub retry: RetryPolicy,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    /// Load configuration from the process environment.
    ///
    /// Recognised variables: `PROXY_URL`, `PROXY_LIST`, `PROXY_CATALOGS`
    /// (comma-separated URLs of newline-delimited lists),
    /// `PROXY_FETCH_REMOTE`, `PROXY_REFRESH_INTERVAL_SECS`,
    /// `PROXY_COOLDOWN_SECS` and `PROXY_MAX_RETRIES`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut builder = Self::builder();

        if let Some(url) = var("PROXY_URL") {
            builder = builder.static_proxy(url);
        }
        if let Some(list) = var("PROXY_LIST") {
            builder = builder.proxy_list(list);
        }
        if let Some(catalogs) = var("PROXY_CATALOGS") {
            let sources: Vec<_> = catalogs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|url| CatalogSource::new(url, CatalogFormat::LineDelimited))
                .collect();
            builder = builder.catalogs(sources);
        }
        if let Some(raw) = var("PROXY_FETCH_REMOTE") {
            builder = builder.fetch_remote(parse_bool("PROXY_FETCH_REMOTE", &raw)?);
        }
        if let Some(raw) = var("PROXY_REFRESH_INTERVAL_SECS") {
            let secs: u64 = parse_value("PROXY_REFRESH_INTERVAL_SECS", &raw)?;
            builder = builder.refresh_interval(Duration::from_secs(secs));
        }
        if let Some(raw) = var("PROXY_COOLDOWN_SECS") {
            let secs: u64 = parse_value("PROXY_COOLDOWN_SECS", &raw)?;
            builder = builder.cooldown(Duration::from_secs(secs));
        }
        if let Some(raw) = var("PROXY_MAX_RETRIES") {
            builder = builder.max_retries(parse_value("PROXY_MAX_RETRIES", &raw)?);
        }

        Ok(builder.build())
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    static_proxy: Option<String>,
    proxy_list: Option<String>,
    catalogs: Vec<CatalogSource>,
    fetch_remote: Option<bool>,
    fetch_timeout: Option<Duration>,
    max_per_origin: Option<usize>,
    refresh_interval: Option<Duration>,
    cooldown: Option<Duration>,
    lru_fallback: Option<usize>,
    stale_ratio: Option<f64>,
    max_retries: Option<usize>,
    backoff: Option<BackoffPolicy>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            static_proxy: None,
            proxy_list: None,
            catalogs: Vec::new(),
            fetch_remote: None,
            fetch_timeout: None,
            max_per_origin: None,
            refresh_interval: None,
            cooldown: None,
            lru_fallback: None,
            stale_ratio: None,
            max_retries: None,
            backoff: None,
        }
    }

    /// Set a single static proxy.
    pub fn static_proxy(mut self, url: impl Into<String>) -> Self {
        self.static_proxy = Some(url.into());
        self
    }

    /// Set a comma-separated list of static proxies.
    pub fn proxy_list(mut self, list: impl Into<String>) -> Self {
        self.proxy_list = Some(list.into());
        self
    }

    /// Set the remote catalogs to fetch proxy lists from.
    pub fn catalogs(mut self, catalogs: Vec<CatalogSource>) -> Self {
        self.catalogs = catalogs;
        self
    }

    /// Enable or disable fetching of remote catalogs.
    pub fn fetch_remote(mut self, enabled: bool) -> Self {
        self.fetch_remote = Some(enabled);
        self
    }

    /// Set the timeout for each catalog fetch.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of proxies taken from one origin.
    pub fn max_per_origin(mut self, count: usize) -> Self {
        self.max_per_origin = Some(count);
        self
    }

    /// Set the age after which the candidate set is refreshed.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Set the minimum time before a proxy is handed out again.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set how many least-recently-used proxies are considered when every
    /// usable proxy is cooling down.
    pub fn lru_fallback(mut self, count: usize) -> Self {
        self.lru_fallback = Some(count);
        self
    }

    /// Set the failed/total ratio that marks the pool as stale.
    pub fn stale_ratio(mut self, ratio: f64) -> Self {
        self.stale_ratio = Some(ratio);
        self
    }

    /// Set the maximum number of attempts per operation.
    pub fn max_retries(mut self, count: usize) -> Self {
        self.max_retries = Some(count);
        self
    }

    /// Set the per-kind backoff.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            static_proxy: self.static_proxy,
            proxy_list: self.proxy_list,
            catalogs: self.catalogs,
            fetch_remote: self.fetch_remote.unwrap_or(true),
            fetch_timeout: self.fetch_timeout.unwrap_or(Duration::from_secs(10)),
            max_per_origin: self.max_per_origin.unwrap_or(20),
            refresh_interval: self.refresh_interval.unwrap_or(Duration::from_secs(30 * 60)),
            cooldown: self.cooldown.unwrap_or(Duration::from_secs(10)),
            lru_fallback: self.lru_fallback.unwrap_or(3).max(1),
            stale_ratio: self.stale_ratio.unwrap_or(0.7),
            retry: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(3).max(1),
                backoff: self.backoff.unwrap_or_default(),
            },
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
