//! Acquisition of candidate proxies from static settings and remote catalogs.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use log::{info, warn};
use reqwest::Client;

use crate::config::ProxyPoolConfig;
use crate::error::CatalogError;
use crate::utils;

/// Shape of a remote catalog response.
#[derive(Clone, Copy)]
pub enum CatalogFormat {
    /// One proxy URL or `host:port` per line.
    LineDelimited,
    /// JSON list of objects with `ip` and `port` fields.
    JsonIpPort,
    /// Any other shape: body text and default scheme in, proxy URLs out.
    Custom(fn(&str, &str) -> Vec<String>),
}

impl CatalogFormat {
    fn parse(&self, body: &str, default_scheme: &str) -> Result<Vec<String>, serde_json::Error> {
        match self {
            CatalogFormat::LineDelimited => Ok(utils::parse_proxy_list(body, default_scheme)),
            CatalogFormat::JsonIpPort => utils::parse_json_ip_port(body, default_scheme),
            CatalogFormat::Custom(parse) => Ok(parse(body, default_scheme)),
        }
    }
}

impl fmt::Debug for CatalogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogFormat::LineDelimited => f.write_str("LineDelimited"),
            CatalogFormat::JsonIpPort => f.write_str("JsonIpPort"),
            CatalogFormat::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// A remote proxy catalog.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    pub url: String,
    pub format: CatalogFormat,
    /// Scheme given to bare `host:port` entries.
    pub default_scheme: String,
}

impl CatalogSource {
    pub fn new(url: impl Into<String>, format: CatalogFormat) -> Self {
        Self {
            url: url.into(),
            format,
            default_scheme: "http".to_string(),
        }
    }

    /// Override the scheme given to bare `host:port` entries.
    pub fn default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }
}

/// One place proxies come from.
#[derive(Debug, Clone)]
pub enum Origin {
    /// A single static proxy.
    Static(String),
    /// A comma-separated list of static proxies.
    StaticList(String),
    /// A remote catalog.
    Remote(CatalogSource),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Static(_) => f.write_str("static proxy"),
            Origin::StaticList(_) => f.write_str("static proxy list"),
            Origin::Remote(catalog) => write!(f, "catalog {}", catalog.url),
        }
    }
}

/// Anything able to produce the current candidate proxies.
///
/// Collection is best effort and never fails: origins that cannot be read
/// simply contribute nothing.
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn collect(&self) -> Vec<String>;
}

/// Collects proxies from an ordered list of origins.
pub struct ProxySource {
    origins: Vec<Origin>,
    client: Client,
    fetch_timeout: Duration,
    max_per_origin: usize,
}

impl ProxySource {
    /// Create a source over explicit origins.
    pub fn new(origins: Vec<Origin>, fetch_timeout: Duration, max_per_origin: usize) -> Self {
        Self {
            origins,
            client: Client::new(),
            fetch_timeout,
            max_per_origin,
        }
    }

    /// Build the origin list from configuration: static proxy, static list,
    /// then each catalog when remote fetching is enabled.
    pub fn from_config(config: &ProxyPoolConfig) -> Self {
        let mut origins = Vec::new();
        if let Some(url) = &config.static_proxy {
            origins.push(Origin::Static(url.clone()));
        }
        if let Some(list) = &config.proxy_list {
            origins.push(Origin::StaticList(list.clone()));
        }
        if config.fetch_remote {
            origins.extend(config.catalogs.iter().cloned().map(Origin::Remote));
        }
        Self::new(origins, config.fetch_timeout, config.max_per_origin)
    }

    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    async fn fetch_catalog(&self, catalog: &CatalogSource) -> Result<Vec<String>, CatalogError> {
        let response = self
            .client
            .get(&catalog.url)
            .timeout(self.fetch_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(catalog.format.parse(&body, &catalog.default_scheme)?)
    }

    async fn collect_origin(&self, origin: &Origin) -> Vec<String> {
        match origin {
            Origin::Static(url) => utils::normalize_entry(url, "http").into_iter().collect(),
            Origin::StaticList(list) => utils::parse_comma_list(list, "http"),
            Origin::Remote(catalog) => match self.fetch_catalog(catalog).await {
                Ok(proxies) => proxies,
                Err(CatalogError::Malformed(e)) => {
                    warn!("Malformed payload from {}: {}", catalog.url, e);
                    Vec::new()
                }
                Err(e) => {
                    warn!("Failed to fetch proxies from {}: {}", catalog.url, e);
                    Vec::new()
                }
            },
        }
    }
}

#[async_trait]
impl RouteSource for ProxySource {
    async fn collect(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut all_proxies = Vec::new();

        // Origins are fetched concurrently but merged in configured order.
        let batches = future::join_all(self.origins.iter().map(|o| self.collect_origin(o))).await;

        for (origin, proxies) in self.origins.iter().zip(batches) {
            let taken = proxies.len().min(self.max_per_origin);
            info!("Fetched {} proxies from {} (using {})", proxies.len(), origin, taken);

            for url in proxies.into_iter().take(self.max_per_origin) {
                if seen.insert(url.clone()) {
                    all_proxies.push(url);
                }
            }
        }

        info!("Collected {} unique proxies from {} origins", all_proxies.len(), self.origins.len());
        all_proxies
    }
}

/// A fixed list of proxies, useful for static deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    proxies: Vec<String>,
}

impl StaticSource {
    pub fn new(proxies: Vec<impl Into<String>>) -> Self {
        Self {
            proxies: proxies.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RouteSource for StaticSource {
    async fn collect(&self) -> Vec<String> {
        self.proxies.clone()
    }
}
