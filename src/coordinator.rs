//! Bounded, classified retry loop over pool-selected proxies.
//!
//! Each attempt takes a proxy from the [`ProxyPool`], runs the operation
//! through it and classifies any failure. Terminal kinds end the loop at
//! once; retryable kinds mark the proxy failed and try again through a
//! different one after a per-kind backoff. Attempts never run in parallel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::classify::{classify, OutcomeKind};
use crate::config::{BackoffPolicy, RetryPolicy};
use crate::error::OperationError;
use crate::pool::ProxyPool;
use crate::proxy::Proxy;

/// The action being made resilient.
#[async_trait]
pub trait Operation: Send + Sync {
    type Output: Send;

    /// Run one attempt, through `proxy` when given, directly otherwise.
    async fn execute(&self, proxy: Option<&Proxy>) -> Result<Self::Output, OperationError>;

    /// Release whatever the attempts allocated. Called once after the loop,
    /// whatever its outcome; errors are logged and ignored.
    async fn teardown(&self) -> Result<(), OperationError> {
        Ok(())
    }
}

/// What happened on one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 0-based attempt index.
    pub index: usize,
    /// Proxy used, `None` for a direct attempt.
    pub proxy: Option<Proxy>,
    /// Classified failure, `None` on success.
    pub kind: Option<OutcomeKind>,
    /// Whether the loop stopped after this attempt.
    pub terminal: bool,
}

/// Final failure of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: OutcomeKind,
    /// Human-readable summary.
    pub message: String,
    /// Text of the underlying error.
    pub detail: String,
}

impl Failure {
    fn from_error(kind: OutcomeKind, error: &OperationError) -> Self {
        let detail = error.to_string();
        let message = match kind {
            OutcomeKind::Unknown => format!("{}: {}", kind.describe(), detail),
            _ => kind.describe().to_string(),
        };
        Self {
            kind,
            message,
            detail,
        }
    }

    fn cancelled(last_kind: Option<OutcomeKind>) -> Self {
        Self {
            kind: last_kind.unwrap_or(OutcomeKind::Unknown),
            message: "Operation cancelled".to_string(),
            detail: String::new(),
        }
    }
}

/// Result of [`RetryCoordinator::run`].
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: Result<T, Failure>,
    pub attempts: Vec<AttemptRecord>,
    /// The run stopped because its cancellation token fired.
    pub cancelled: bool,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Kind of the final failure, `None` on success.
    pub fn kind(&self) -> Option<OutcomeKind> {
        self.result.as_ref().err().map(|f| f.kind)
    }

    /// Human-readable summary, present for successes and failures alike.
    pub fn message(&self) -> &str {
        match &self.result {
            Ok(_) => "Operation succeeded",
            Err(failure) => &failure.message,
        }
    }

    /// Whether the caller must supply an out-of-band verification step and
    /// call again.
    pub fn requires_verification(&self) -> bool {
        self.kind() == Some(OutcomeKind::VerificationRequired)
    }

    pub fn into_result(self) -> Result<T, Failure> {
        self.result
    }
}

/// Decision taken after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Terminal kind: stop now.
    Stop,
    /// Retryable kind, but this was the last allowed attempt.
    Exhausted,
    /// Sleep `delay`, then attempt again.
    Retry { delay: Duration },
}

/// Transition taken after attempt `attempt` (0-based) failed with `kind`.
pub fn next_step(
    kind: OutcomeKind,
    attempt: usize,
    max_retries: usize,
    backoff: &BackoffPolicy,
) -> Step {
    if kind.is_terminal() {
        Step::Stop
    } else if attempt + 1 >= max_retries {
        Step::Exhausted
    } else {
        Step::Retry {
            delay: backoff.delay_for(kind),
        }
    }
}

enum LoopState<T> {
    Attempting(usize),
    RetryPending { next: usize, delay: Duration },
    Succeeded(T),
    Failed(Failure),
}

/// Runs operations against the shared pool with classified retries.
#[derive(Clone)]
pub struct RetryCoordinator {
    pool: Arc<ProxyPool>,
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(pool: Arc<ProxyPool>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Coordinator using the retry policy from the pool's configuration.
    pub fn from_pool(pool: Arc<ProxyPool>) -> Self {
        let policy = pool.config.retry.clone();
        Self::new(pool, policy)
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally or runs out of attempts.
    pub async fn run<O>(&self, op: &O) -> Outcome<O::Output>
    where
        O: Operation + ?Sized,
    {
        self.run_with_cancel(op, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but stops before the next attempt, during a
    /// backoff or during an in-flight attempt once `cancel` fires.
    pub async fn run_with_cancel<O>(&self, op: &O, cancel: &CancellationToken) -> Outcome<O::Output>
    where
        O: Operation + ?Sized,
    {
        let max_retries = self.policy.max_retries.max(1);
        let mut attempts = Vec::new();
        let mut last_kind = None;
        let mut cancelled = false;
        let mut state = LoopState::Attempting(0);

        let result = loop {
            state = match state {
                LoopState::Attempting(index) => {
                    if cancel.is_cancelled() {
                        cancelled = true;
                        break Err(Failure::cancelled(last_kind));
                    }

                    let proxy = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        proxy = self.pool.select() => Some(proxy),
                    };
                    let Some(proxy) = proxy else {
                        cancelled = true;
                        break Err(Failure::cancelled(last_kind));
                    };
                    match &proxy {
                        Some(p) => info!("Using proxy: {} (attempt {}/{})", p, index + 1, max_retries),
                        None => info!("Running without proxy (attempt {}/{})", index + 1, max_retries),
                    }

                    let attempt = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = op.execute(proxy.as_ref()) => Some(result),
                    };
                    let Some(attempt) = attempt else {
                        cancelled = true;
                        break Err(Failure::cancelled(last_kind));
                    };

                    match attempt {
                        Ok(value) => {
                            if let Some(p) = &proxy {
                                self.pool.mark_succeeded(p);
                            }
                            attempts.push(AttemptRecord {
                                index,
                                proxy,
                                kind: None,
                                terminal: true,
                            });
                            LoopState::Succeeded(value)
                        }
                        Err(error) => {
                            let kind = classify(&error);
                            last_kind = Some(kind);
                            let step = next_step(kind, index, max_retries, &self.policy.backoff);

                            if kind.blames_route() {
                                if let Some(p) = &proxy {
                                    self.pool.mark_failed(p);
                                }
                            }
                            if let OperationError::RouteSetup(msg) = &error {
                                warn!("Proxy setup failed (attempt {}): {}", index + 1, msg);
                            }
                            attempts.push(AttemptRecord {
                                index,
                                proxy,
                                kind: Some(kind),
                                terminal: !matches!(step, Step::Retry { .. }),
                            });

                            match step {
                                Step::Retry { delay } => {
                                    warn!(
                                        "Attempt {} failed with {}, retrying in {:?}: {}",
                                        index + 1,
                                        kind,
                                        delay,
                                        error
                                    );
                                    LoopState::RetryPending {
                                        next: index + 1,
                                        delay,
                                    }
                                }
                                Step::Exhausted => {
                                    warn!("Attempt {} failed with {}, no retries left: {}", index + 1, kind, error);
                                    LoopState::Failed(Failure::from_error(kind, &error))
                                }
                                Step::Stop => {
                                    info!("Attempt {} ended with terminal {}: {}", index + 1, kind, error);
                                    LoopState::Failed(Failure::from_error(kind, &error))
                                }
                            }
                        }
                    }
                }
                LoopState::RetryPending { next, delay } => {
                    let slept = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if !slept {
                        cancelled = true;
                        break Err(Failure::cancelled(last_kind));
                    }
                    LoopState::Attempting(next)
                }
                LoopState::Succeeded(value) => break Ok(value),
                LoopState::Failed(failure) => break Err(failure),
            };
        };

        if let Err(e) = op.teardown().await {
            warn!("Teardown failed: {}", e);
        }

        Outcome {
            result,
            attempts,
            cancelled,
        }
    }
}
