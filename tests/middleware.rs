use proxy_retry_pool::{
    BackoffPolicy, Proxy, ProxyPool, ProxyPoolConfig, ProxyPoolMiddleware, StaticSource,
};
use reqwest_middleware::ClientBuilder;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn middleware(proxies: Vec<&str>) -> ProxyPoolMiddleware {
    let config = ProxyPoolConfig::builder()
        .max_retries(3)
        .backoff(BackoffPolicy::none())
        .build();
    let retry = config.retry.clone();
    let pool = ProxyPool::with_source(config, Arc::new(StaticSource::new(proxies)));
    ProxyPoolMiddleware::with_pool(pool, retry).request_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn throttled_request_is_retried() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ip"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1.2.3.4"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware(vec![]))
        .build();
    let response = client
        .get(format!("{}/ip", mock_server.uri()))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "1.2.3.4");
}

#[tokio::test]
async fn terminal_statuses_pass_through() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware(vec![]))
        .build();
    let response = client.get(mock_server.uri()).send().await.unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn persistent_throttling_surfaces_an_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware(vec![]))
        .build();
    let err = client.get(mock_server.uri()).send().await.unwrap_err();

    assert!(err.to_string().contains("throttled"), "{err}");
}

#[tokio::test]
async fn dead_proxy_is_marked_failed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dead = "http://127.0.0.1:1";
    let middleware = middleware(vec![dead]);
    let pool = middleware.pool().clone();
    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();

    let err = client.get(mock_server.uri()).send().await.unwrap_err();

    assert!(err.to_string().contains("transient_network"), "{err}");
    assert!(pool.is_failed(&Proxy::new(dead)));
}
