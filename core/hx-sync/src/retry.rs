//! Retrying store wrapper.
//!
//! Wraps any [`ObjectStore`] with bounded exponential backoff. Only
//! transport errors whose message matches a transient pattern are
//! retried; `NotFound`, validation, and auth failures surface on the
//! first attempt.

use crate::error::{SyncError, SyncResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

pub struct RetryStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: ObjectStore> RetryStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before the given (1-based) retry attempt: exponential,
    /// capped, with ±25% jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.config.multiplier.powi(attempt.saturating_sub(1) as i32);
        let mut delay = self.config.base_delay.as_secs_f64() * exp;
        let cap = self.config.max_delay.as_secs_f64();
        if delay > cap {
            delay = cap;
        }
        let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
        Duration::from_secs_f64((delay * (1.0 + jitter)).max(0.0))
    }
}

/// Whether an error is worth another attempt.
pub fn is_retryable(err: &SyncError) -> bool {
    let msg = match err {
        SyncError::Transport(msg) => msg.to_ascii_lowercase(),
        _ => return false,
    };
    const TRANSIENT: &[&str] = &[
        "connection refused",
        "connection reset",
        "timeout",
        "timed out",
        "temporary failure",
        "service unavailable",
        "server error",
        "internal error",
        "throttl",
        "slowdown",
        "slow down",
    ];
    TRANSIENT.iter().any(|pattern| msg.contains(pattern))
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryStore<S> {
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut last_err = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match self.inner.list(prefix).await {
                Ok(keys) => return Ok(keys),
                Err(e) => {
                    let retryable = is_retryable(&e);
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                    debug!(prefix, attempt, "retrying list");
                }
            }
        }
        Err(exhausted("list", self.config.max_attempts, last_err))
    }

    async fn get(&self, key: &str) -> SyncResult<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match self.inner.get(key).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    let retryable = is_retryable(&e);
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                    debug!(key, attempt, "retrying get");
                }
            }
        }
        Err(exhausted("get", self.config.max_attempts, last_err))
    }

    async fn put_atomic(&self, key: &str, data: &[u8]) -> SyncResult<()> {
        let mut last_err = None;
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for(attempt)).await;
            }
            match self.inner.put_atomic(key, data).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let retryable = is_retryable(&e);
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                    debug!(key, attempt, "retrying put_atomic");
                }
            }
        }
        Err(exhausted("put_atomic", self.config.max_attempts, last_err))
    }
}

/// Transport errors keep their kind but note the exhaustion; fail-fast
/// kinds (`NotFound`, auth, validation) pass through untouched.
fn exhausted(op: &str, attempts: u32, last_err: Option<SyncError>) -> SyncError {
    match last_err {
        Some(SyncError::Transport(msg)) => {
            SyncError::Transport(format!("{op} failed after {attempts} attempts: {msg}"))
        }
        Some(e) => e,
        None => SyncError::Transport(format!("{op} failed after {attempts} attempts")),
    }
}
