//! Simple example of using proxy-retry-pool.

use proxy_retry_pool::{CatalogFormat, CatalogSource, ProxyPoolConfig, ProxyPoolMiddleware};
use reqwest_middleware::ClientBuilder;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Initializing proxy pool...");

    // PROXY_URL / PROXY_LIST / PROXY_CATALOGS etc. from the environment,
    // falling back to a public socks5 list when nothing is configured.
    let mut config = ProxyPoolConfig::from_env()?;
    if config.static_proxy.is_none() && config.proxy_list.is_none() && config.catalogs.is_empty() {
        config.catalogs = vec![CatalogSource::new(
            "https://cdn.jsdelivr.net/gh/proxifly/free-proxy-list@main/proxies/protocols/socks5/data.txt",
            CatalogFormat::LineDelimited,
        )
        .default_scheme("socks5")];
    }

    let proxy_pool = ProxyPoolMiddleware::new(config)
        .await
        .request_timeout(Duration::from_secs(10));
    let pool = proxy_pool.pool().clone();

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(proxy_pool)
        .build();

    println!("Sending request...");
    let response = client.get("https://httpbin.org/ip").send().await?;

    println!("Status: {}", response.status());
    println!("Response: {}", response.text().await?);

    let stats = pool.stats();
    println!("Pool: {} total, {} failed, {} working", stats.total, stats.failed, stats.working);

    Ok(())
}
