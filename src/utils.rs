//! Utility functions for parsing proxy catalogs.

use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Normalise one catalog entry into a proxy URL.
///
/// Entries that already carry a scheme are kept if they parse as a URL with a
/// host; bare `host:port` entries get `default_scheme` prepended.
pub(crate) fn normalize_entry(entry: &str, default_scheme: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() || entry.starts_with('#') {
        return None;
    }

    let candidate = if entry.contains("://") {
        entry.to_string()
    } else if entry.contains(':') {
        format!("{}://{}", default_scheme, entry)
    } else {
        return None;
    };

    match Url::parse(&candidate) {
        Ok(url) if url.host_str().is_some() => Some(candidate),
        _ => None,
    }
}

/// Parse newline-delimited text content into proxy URLs.
pub(crate) fn parse_proxy_list(content: &str, default_scheme: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| normalize_entry(line, default_scheme))
        .collect()
}

/// Parse a comma-separated static list into proxy URLs.
pub(crate) fn parse_comma_list(value: &str, default_scheme: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|item| normalize_entry(item, default_scheme))
        .collect()
}

#[derive(Debug, Deserialize)]
struct IpPortEntry {
    ip: String,
    port: Value,
}

/// Parse a JSON catalog shaped as a list of `{"ip": .., "port": ..}` objects.
///
/// The list may also be wrapped in an object under `data`, `proxies` or
/// `list`. Ports may be numbers or strings; individual entries that do not
/// fit are skipped. A body that is not JSON, or holds no such list, is an
/// error.
pub(crate) fn parse_json_ip_port(
    content: &str,
    default_scheme: &str,
) -> Result<Vec<String>, serde_json::Error> {
    let value: Value = serde_json::from_str(content)?;

    let items = match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => ["data", "proxies", "list"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            }),
        _ => None,
    }
    .ok_or_else(|| {
        <serde_json::Error as serde::de::Error>::custom("expected a list of ip/port objects")
    })?;

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<IpPortEntry>(item).ok())
        .filter_map(|entry| {
            let port = match entry.port {
                Value::Number(n) => n.as_u64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            if port == 0 || port > u16::MAX as u64 {
                return None;
            }
            normalize_entry(&format!("{}:{}", entry.ip.trim(), port), default_scheme)
        })
        .collect())
}
