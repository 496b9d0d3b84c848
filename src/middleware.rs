//! Middleware implementation for reqwest.

use crate::classify::OutcomeKind;
use crate::config::{ProxyPoolConfig, RetryPolicy};
use crate::coordinator::{Operation, RetryCoordinator};
use crate::error::OperationError;
use crate::pool::ProxyPool;
use crate::proxy::Proxy;

use anyhow::anyhow;
use async_trait::async_trait;
use http::StatusCode;
use log::{info, warn};
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

/// Middleware that sends each request through a proxy taken from the pool,
/// retrying through other proxies when the target throttles or blocks.
#[derive(Clone)]
pub struct ProxyPoolMiddleware {
    coordinator: RetryCoordinator,
    request_timeout: Duration,
}

impl ProxyPoolMiddleware {
    /// Create a new proxy pool middleware with the given configuration.
    /// This will populate the proxy pool before returning.
    pub async fn new(config: ProxyPoolConfig) -> Self {
        let pool = ProxyPool::new(config);
        pool.refresh(false).await;

        let stats = pool.stats();
        info!("Proxy pool initialized with {} proxies", stats.total);
        if stats.total == 0 {
            warn!("No proxies available in pool, requests will be sent directly");
        }

        Self::with_pool(Arc::clone(&pool), pool.config.retry.clone())
    }

    /// Create the middleware over an existing pool.
    pub fn with_pool(pool: Arc<ProxyPool>, policy: RetryPolicy) -> Self {
        Self {
            coordinator: RetryCoordinator::new(pool, policy),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the timeout of each proxied request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The pool backing this middleware.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        self.coordinator.pool()
    }
}

/// A single outgoing request, replayable through any proxy.
struct RequestOperation {
    request: reqwest::Request,
    timeout: Duration,
}

#[async_trait]
impl Operation for RequestOperation {
    type Output = reqwest::Response;

    async fn execute(&self, proxy: Option<&Proxy>) -> std::result::Result<reqwest::Response, OperationError> {
        let request = self.request.try_clone().ok_or_else(|| {
            OperationError::tagged(
                OutcomeKind::Unknown,
                "Request object is not cloneable. Are you passing a streaming body?",
            )
        })?;

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(proxy) = proxy {
            let reqwest_proxy = proxy.to_reqwest_proxy().map_err(|e| {
                OperationError::route_setup(format!("Failed to create proxy from {}: {}", proxy, e))
            })?;
            builder = builder.proxy(reqwest_proxy);
        } else {
            // Direct means direct: ignore HTTP_PROXY and friends.
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| OperationError::route_setup(format!("Failed to build client: {}", e)))?;

        let response = client.execute(request).await.map_err(transport_error)?;
        match status_error(response.status()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }
}

/// Map response statuses that call for another proxy.
fn status_error(status: StatusCode) -> Option<OperationError> {
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => OutcomeKind::Throttled,
        StatusCode::FORBIDDEN => OutcomeKind::Blocked,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
            return Some(OperationError::route_setup(format!("proxy rejected request: {}", status)))
        }
        _ => return None,
    };
    Some(OperationError::tagged(kind, format!("server responded {}", status)))
}

/// Describe a transport error with its whole source chain so that keyword
/// matching sees the underlying cause.
fn transport_error(err: reqwest::Error) -> OperationError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    if err.is_timeout() || err.is_connect() {
        OperationError::tagged(OutcomeKind::TransientNetwork, message)
    } else {
        OperationError::message(message)
    }
}

#[async_trait]
impl Middleware for ProxyPoolMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        let operation = RequestOperation {
            request: req,
            timeout: self.request_timeout,
        };

        let outcome = self.coordinator.run(&operation).await;
        let attempts = outcome.attempts.len();
        match outcome.into_result() {
            Ok(response) => Ok(response),
            Err(failure) => {
                let stats = self.pool().stats();
                warn!(
                    "Request failed after {} attempts ({}). Total: {}, Working: {}",
                    attempts, failure.kind, stats.total, stats.working
                );
                Err(Error::Middleware(anyhow!(
                    "{} ({}): {}",
                    failure.message,
                    failure.kind,
                    failure.detail
                )))
            }
        }
    }
}
