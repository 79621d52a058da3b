//! Request execution core.
//!
//! Every operation funnels through [`Executor::execute`]: build, sign,
//! send, classify, read the body, parse.  Failed attempts are handed to the
//! operation's retry policy, and the whole loop runs inside the
//! operation's execution-time budget.  An attempt that is in flight is
//! never cancelled; the budget is checked before each attempt and before
//! each retry wait.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::command::{DownloadTarget, ResponseMode, StorageCommand};
use crate::constants::{HEADER_BLOB_CONTENT_MD5, HEADER_ERROR_CODE, HEADER_REQUEST_ID, MAX_ERROR_BODY};
use crate::errors::{Result, StorageError};
use crate::metrics;
use crate::operation_context::OperationContext;
use crate::request_options::BlobRequestOptions;
use crate::request_result::RequestResult;
use crate::retry::{ExponentialRetry, RetryContext, RetryPolicy};
use crate::storage_uri::{initial_location, next_location, AllowedStorageLocation, StorageLocation};
use crate::transport::{HttpResponse, ResponseHead, Transport};

/// Executes [`StorageCommand`]s against a [`Transport`].
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    default_retry_policy: Arc<dyn RetryPolicy>,
}

impl Executor {
    /// Executor using the default exponential retry policy.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            default_retry_policy: Arc::new(ExponentialRetry::default()),
        }
    }

    /// Policy used when the operation context does not carry one.
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.default_retry_policy = Arc::new(policy);
        self
    }

    pub fn with_boxed_retry_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.default_retry_policy = Arc::from(policy);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Execute `cmd` to completion, retrying per policy.
    pub async fn execute<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
    ) -> Result<T> {
        self.execute_counted(cmd, options, ctx).await.0
    }

    /// Like [`execute`](Self::execute), also returning the number of
    /// attempts made.
    pub async fn execute_counted<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
    ) -> (Result<T>, u32) {
        let span = ctx.span().clone();
        let (result, attempts) = self
            .run(cmd, options, ctx)
            .instrument(span)
            .await;
        if let (Err(err), ResponseMode::Streamed(target)) = (&result, &cmd.mode) {
            target.buffer.set_error(err.clone());
        }
        ctx.mark_finished();
        (result, attempts)
    }

    async fn run<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
    ) -> (Result<T>, u32) {
        let started = Instant::now();
        ctx.mark_started();
        let mut policy = ctx
            .retry_policy()
            .unwrap_or_else(|| self.default_retry_policy.clone_policy());
        let mut location_mode = options.location_mode;
        let mut location = initial_location(location_mode, cmd.allowed_location);
        let mut attempts: u32 = 0;
        let mut last_error: Option<StorageError> = None;

        loop {
            let remaining = match remaining_budget(options.maximum_execution_time, started) {
                Some(r) if r.is_zero() => {
                    return (Err(client_timeout(started, last_error)), attempts);
                }
                r => r,
            };

            attempts += 1;
            let server_timeout = match (options.server_timeout, remaining) {
                (Some(t), Some(r)) => Some(t.min(r)),
                (None, Some(r)) => Some(r),
                (t, None) => t,
            };

            let mut result = RequestResult::start(location);
            let outcome = self
                .attempt(cmd, options, ctx, location, server_timeout, &mut result)
                .await;

            let err = match outcome {
                Ok(value) => {
                    result.finish(None);
                    ctx.push_result(result);
                    return (Ok(value), attempts);
                }
                Err(err) => err,
            };

            result.finish(Some(err.clone()));
            ctx.push_result(result.clone());

            if !err.is_retry_candidate() || is_terminal_for_stream(cmd, &err) {
                debug!(error = %err, "attempt failed with a non-retryable error");
                return (Err(err), attempts);
            }

            let retry_ctx = RetryContext {
                current_retry_count: attempts,
                last_request_result: result,
                next_location: next_location(
                    location,
                    location_mode,
                    cmd.allowed_location,
                    &cmd.storage_uri,
                ),
                current_location_mode: location_mode,
            };
            let info = policy.evaluate(&retry_ctx, ctx);
            if !info.should_retry {
                info!(attempts, error = %err, "giving up");
                return (Err(err), attempts);
            }

            let mut wait = info.retry_interval;
            if let Some(remaining) = remaining_budget(options.maximum_execution_time, started) {
                if remaining.is_zero() {
                    return (Err(client_timeout(started, Some(err))), attempts);
                }
                wait = wait.min(remaining);
            }

            warn!(
                attempt = attempts,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "retrying request"
            );
            metrics::record_retry(&format!("{}", cmd.request.method));
            tokio::time::sleep(wait).await;

            location_mode = info.updated_location_mode;
            location = match (info.target_location, cmd.allowed_location) {
                (StorageLocation::Secondary, AllowedStorageLocation::PrimaryOrSecondary)
                    if cmd.storage_uri.secondary.is_some() =>
                {
                    StorageLocation::Secondary
                }
                _ => StorageLocation::Primary,
            };
            last_error = Some(err);
        }
    }

    /// One physical attempt.  Fills in `result` as far as it gets.
    async fn attempt<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
        location: StorageLocation,
        server_timeout: Option<Duration>,
        result: &mut RequestResult,
    ) -> Result<T> {
        let mut request = cmd.build_request(location, server_timeout, ctx)?;
        if let Some(hook) = ctx.sending_request_hook() {
            hook(&mut request, ctx);
        }
        cmd.credentials.sign(&mut request, ctx)?;

        let operation = metrics::operation_label(&request);
        let attempt_started = Instant::now();
        debug!(method = %request.method, url = %request.url, ?location, "sending request");

        let mut response = match self.transport.send(request.clone()).await {
            Ok(r) => r,
            Err(e) => {
                metrics::record_attempt(&operation, None, attempt_started.elapsed());
                return Err(e);
            }
        };
        result.record_head(&response.head);
        if let Some(hook) = ctx.response_received_hook() {
            hook(&request, &response.head, ctx);
        }
        debug!(status = %response.head.status, "response received");

        let outcome = self.process_response(cmd, options, &mut response, result).await;
        metrics::record_attempt(
            &operation,
            Some(response.head.status.as_u16()),
            attempt_started.elapsed(),
        );
        outcome
    }

    async fn process_response<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        response: &mut HttpResponse,
        result: &mut RequestResult,
    ) -> Result<T> {
        if !cmd.is_expected_status(response.head.status) {
            let body = response
                .read_limited(MAX_ERROR_BODY)
                .await
                .unwrap_or_default();
            return Err(server_error(&response.head, &body));
        }

        match &cmd.mode {
            ResponseMode::Buffered => {
                let body = read_buffered(cmd, response, result).await?;
                (cmd.parser)(&response.head, body)
            }
            ResponseMode::Streamed(target) => {
                stream_into(target, options, response, result).await?;
                let value = (cmd.parser)(&response.head, Bytes::new())?;
                target.buffer.set_complete();
                Ok(value)
            }
        }
    }
}

/// Read the whole body, checking it against `Content-MD5` if asked to.
async fn read_buffered<T>(
    cmd: &StorageCommand<T>,
    response: &mut HttpResponse,
    result: &mut RequestResult,
) -> Result<Bytes> {
    let mut md5 = cmd.calculate_response_md5.then(Md5::new);
    let mut body = BytesMut::new();
    while let Some(chunk) = response.body.chunk().await? {
        if let Some(h) = md5.as_mut() {
            h.update(&chunk);
        }
        body.extend_from_slice(&chunk);
    }
    if let Some(h) = md5 {
        let calculated = BASE64_STANDARD.encode(h.finalize());
        result.calculated_response_md5 = Some(calculated.clone());
        if let Some(expected) = response.head.header("content-md5") {
            if expected != calculated {
                return Err(StorageError::Md5Mismatch {
                    expected: expected.to_string(),
                    calculated,
                });
            }
        }
    }
    Ok(body.freeze())
}

/// Copy the body into the download buffer.  A failed read leaves what was
/// already written in place so the next attempt resumes after it.
async fn stream_into(
    target: &DownloadTarget,
    options: &BlobRequestOptions,
    response: &mut HttpResponse,
    result: &mut RequestResult,
) -> Result<()> {
    let md5_header = if target.is_ranged() {
        response.head.header("content-md5")
    } else {
        response
            .head
            .header("content-md5")
            .or_else(|| response.head.header(HEADER_BLOB_CONTENT_MD5))
    };
    target.record_first_response(&response.head, md5_header);

    let mut received = 0u64;
    while let Some(chunk) = response.body.chunk().await? {
        received += chunk.len() as u64;
        target.buffer.write(chunk).await?;
    }
    metrics::record_bytes_downloaded(received);

    if target.validate_md5 && !options.disable_content_md5_validation {
        if let (Some(expected), Some(calculated)) =
            (target.expected_md5(), target.buffer.current_md5())
        {
            result.calculated_response_md5 = Some(calculated.clone());
            if expected != calculated {
                return Err(StorageError::Md5Mismatch {
                    expected,
                    calculated,
                });
            }
        }
    }
    Ok(())
}

/// Bytes of a streamed download may already be with the consumer, so a
/// checksum failure there cannot be repaired by another attempt.
fn is_terminal_for_stream<T>(cmd: &StorageCommand<T>, err: &StorageError) -> bool {
    matches!(
        (&cmd.mode, err),
        (ResponseMode::Streamed(_), StorageError::Md5Mismatch { .. })
    )
}

fn remaining_budget(max: Option<Duration>, started: Instant) -> Option<Duration> {
    max.map(|m| m.saturating_sub(started.elapsed()))
}

fn client_timeout(started: Instant, last_error: Option<StorageError>) -> StorageError {
    metrics::record_client_timeout();
    StorageError::ClientTimeout {
        elapsed: started.elapsed(),
        last_error: last_error.map(Box::new),
    }
}

/// Build a server error from a non-success response.
pub fn server_error(head: &ResponseHead, body: &[u8]) -> StorageError {
    let (code, message) = crate::xml::parse_error(body).unwrap_or_else(|| {
        let code = head
            .header(HEADER_ERROR_CODE)
            .map(str::to_string)
            .unwrap_or_else(|| {
                head.status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .replace(' ', "")
            });
        (code, String::from_utf8_lossy(body).trim().to_string())
    });
    StorageError::Server {
        status: head.status,
        code,
        message,
        request_id: head.header(HEADER_REQUEST_ID).map(str::to_string),
    }
}

// -- Tests -------------------------------------------------------------------
