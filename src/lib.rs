//! # proxy-retry-pool
//!
//! A health-aware proxy pool coupled to a classified retry loop.
//!
//! The pool collects candidate proxies from static settings and remote
//! catalogs, hands them out under a cooldown policy and tracks which ones
//! failed. The [`RetryCoordinator`] runs an [`Operation`] through pool
//! proxies, classifies each failure into an [`OutcomeKind`] and decides
//! whether to stop or retry through another proxy. A ready-made
//! [`ProxyPoolMiddleware`] applies the same loop to reqwest requests.

pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod source;
mod utils;

pub use classify::{classify, OutcomeKind};
pub use config::{BackoffPolicy, ProxyPoolConfig, ProxyPoolConfigBuilder, RetryPolicy};
pub use coordinator::{AttemptRecord, Failure, Operation, Outcome, RetryCoordinator};
pub use error::{ConfigError, OperationError};
pub use middleware::ProxyPoolMiddleware;
pub use pool::{PoolStats, ProxyPool};
pub use proxy::Proxy;
pub use source::{CatalogFormat, CatalogSource, Origin, ProxySource, RouteSource, StaticSource};
pub use tokio_util::sync::CancellationToken;
