//! Proxy representation.

use std::fmt;

/// A candidate route: a proxy identified by its URL string.
///
/// Two proxies are the same route when their strings are identical; no
/// normalisation is applied beyond trimming at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Proxy {
    /// The URL of the proxy (e.g. "socks5://127.0.0.1:1080").
    pub url: String,
}

impl Proxy {
    /// Create a new proxy from its URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Borrow the route identifier.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Convert the proxy URL to a reqwest::Proxy.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(&self.url)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl From<String> for Proxy {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

impl From<&str> for Proxy {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}
