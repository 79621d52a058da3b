//! Retry policies.
//!
//! A [`RetryPolicy`] is a decision function over the outcome of the last
//! attempt.  Policies are cloned per operation through
//! [`RetryPolicy::clone_policy`], so any internal state never leaks across
//! operations sharing a client.

use http::StatusCode;
use rand::Rng;
use std::fmt::Debug;
use std::time::Duration;

use crate::errors::StorageError;
use crate::operation_context::OperationContext;
use crate::request_result::RequestResult;
use crate::storage_uri::{LocationMode, StorageLocation};

/// Shortest wait the exponential policy will return.
pub const MIN_BACKOFF: Duration = Duration::from_millis(10);
/// Longest wait any policy will return.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);
/// Default attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default backoff step.
pub const DEFAULT_DELTA: Duration = Duration::from_secs(4);

/// Input to a retry decision.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Number of attempts made so far (≥ 1).
    pub current_retry_count: u32,
    pub last_request_result: RequestResult,
    /// Location the next attempt would go to if retried.
    pub next_location: StorageLocation,
    pub current_location_mode: LocationMode,
}

/// Output of a retry decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryInfo {
    pub should_retry: bool,
    pub target_location: StorageLocation,
    pub updated_location_mode: LocationMode,
    pub retry_interval: Duration,
}

impl RetryInfo {
    /// Retry at the context's next location after `retry_interval`.
    pub fn from_context(ctx: &RetryContext, retry_interval: Duration) -> Self {
        Self {
            should_retry: true,
            target_location: ctx.next_location,
            updated_location_mode: ctx.current_location_mode,
            retry_interval,
        }
    }

    /// Stop retrying.
    pub fn dont_retry(ctx: &RetryContext) -> Self {
        Self {
            should_retry: false,
            target_location: ctx.last_request_result.target_location,
            updated_location_mode: ctx.current_location_mode,
            retry_interval: Duration::ZERO,
        }
    }
}

/// Decides whether and when a failed attempt is retried.
pub trait RetryPolicy: Send + Sync + Debug {
    fn evaluate(&mut self, ctx: &RetryContext, op: &OperationContext) -> RetryInfo;

    /// A fresh, state-isolated copy for a new operation.
    fn clone_policy(&self) -> Box<dyn RetryPolicy>;
}

/// Whether the outcome recorded in `result` is worth another attempt.
///
/// Transport failures, checksum mismatches, 408 and 5xx (except 501 and
/// 505) are transient.  A 404 from the secondary is replication lag and is
/// retried as well.
pub fn is_retryable(result: &RequestResult) -> bool {
    match &result.error {
        Some(StorageError::Md5Mismatch { .. }) | Some(StorageError::Transport { .. }) => {
            return true
        }
        Some(err) if !err.is_retry_candidate() => return false,
        _ => {}
    }
    match result.status {
        None => result.error.is_some(),
        Some(StatusCode::REQUEST_TIMEOUT) => true,
        Some(StatusCode::NOT_IMPLEMENTED) | Some(StatusCode::HTTP_VERSION_NOT_SUPPORTED) => false,
        Some(s) if s.is_server_error() => true,
        Some(StatusCode::NOT_FOUND) => result.target_location == StorageLocation::Secondary,
        Some(_) => false,
    }
}

// -- NoRetry -----------------------------------------------------------------

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn evaluate(&mut self, ctx: &RetryContext, _op: &OperationContext) -> RetryInfo {
        RetryInfo::dont_retry(ctx)
    }

    fn clone_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}

// -- Linear ------------------------------------------------------------------

/// Fixed wait between attempts.
#[derive(Debug, Clone, Copy)]
pub struct LinearRetry {
    pub delta: Duration,
    pub max_attempts: u32,
}

impl LinearRetry {
    pub fn new(delta: Duration, max_attempts: u32) -> Self {
        Self {
            delta,
            max_attempts,
        }
    }
}

impl Default for LinearRetry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for LinearRetry {
    fn evaluate(&mut self, ctx: &RetryContext, _op: &OperationContext) -> RetryInfo {
        if ctx.current_retry_count >= self.max_attempts || !is_retryable(&ctx.last_request_result)
        {
            return RetryInfo::dont_retry(ctx);
        }
        RetryInfo::from_context(ctx, self.delta.min(MAX_BACKOFF))
    }

    fn clone_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}

// -- Exponential -------------------------------------------------------------

/// Randomized exponential backoff: `delta × 2^(n−1)` scaled by a factor in
/// `[0.8, 1.2)`, clamped to [`MIN_BACKOFF`, `MAX_BACKOFF`].
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRetry {
    pub delta: Duration,
    pub max_attempts: u32,
}

impl ExponentialRetry {
    pub fn new(delta: Duration, max_attempts: u32) -> Self {
        Self {
            delta,
            max_attempts,
        }
    }

    /// Un-jittered wait before attempt `retry_count + 1`.
    pub fn nominal_interval(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(31);
        self.delta.saturating_mul(1u32 << exp)
    }
}

impl Default for ExponentialRetry {
    fn default() -> Self {
        Self::new(DEFAULT_DELTA, DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for ExponentialRetry {
    fn evaluate(&mut self, ctx: &RetryContext, _op: &OperationContext) -> RetryInfo {
        if ctx.current_retry_count >= self.max_attempts || !is_retryable(&ctx.last_request_result)
        {
            return RetryInfo::dont_retry(ctx);
        }
        let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
        let nominal = self.nominal_interval(ctx.current_retry_count).as_secs_f64();
        let wait = Duration::from_secs_f64((nominal * jitter).min(MAX_BACKOFF.as_secs_f64()))
            .clamp(MIN_BACKOFF, MAX_BACKOFF);
        RetryInfo::from_context(ctx, wait)
    }

    fn clone_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(*self)
    }
}

// -- Tests -------------------------------------------------------------------
