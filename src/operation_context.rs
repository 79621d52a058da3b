//! State attached to one end-to-end operation.
//!
//! An [`OperationContext`] is a cheap-to-clone handle: every clone shares
//! the same request-result list and client request id, so chunk uploads
//! running concurrently under one stream append to one list.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use http::HeaderMap;
use tracing::Span;

use crate::request_result::RequestResult;
use crate::retry::RetryPolicy;
use crate::transport::{HttpRequest, ResponseHead};

/// Hook invoked once per attempt before the request is signed.  It may
/// mutate the outgoing request.
pub type SendingRequestHook = Arc<dyn Fn(&mut HttpRequest, &OperationContext) + Send + Sync>;

/// Hook invoked once per attempt as soon as the response head arrives.
pub type ResponseReceivedHook =
    Arc<dyn Fn(&HttpRequest, &ResponseHead, &OperationContext) + Send + Sync>;

struct Inner {
    client_request_id: String,
    sending_request: Option<SendingRequestHook>,
    response_received: Option<ResponseReceivedHook>,
    user_headers: HeaderMap,
    retry_policy: Option<Box<dyn RetryPolicy>>,
    span: Span,
    timing: Mutex<Timing>,
    request_results: Mutex<Vec<RequestResult>>,
}

#[derive(Default)]
struct Timing {
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
}

/// Shared per-operation state.
#[derive(Clone)]
pub struct OperationContext {
    inner: Arc<Inner>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("client_request_id", &self.inner.client_request_id)
            .field("attempts", &self.request_results().len())
            .finish()
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        OperationContext::builder().build()
    }
}

impl OperationContext {
    /// A context with a fresh client request id and no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> OperationContextBuilder {
        OperationContextBuilder::default()
    }

    pub fn client_request_id(&self) -> &str {
        &self.inner.client_request_id
    }

    /// Span every attempt of this operation is instrumented with.
    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn user_headers(&self) -> &HeaderMap {
        &self.inner.user_headers
    }

    pub(crate) fn sending_request_hook(&self) -> Option<&SendingRequestHook> {
        self.inner.sending_request.as_ref()
    }

    pub(crate) fn response_received_hook(&self) -> Option<&ResponseReceivedHook> {
        self.inner.response_received.as_ref()
    }

    /// A fresh copy of the configured retry policy, if any.
    pub fn retry_policy(&self) -> Option<Box<dyn RetryPolicy>> {
        self.inner.retry_policy.as_ref().map(|p| p.clone_policy())
    }

    /// Record when the first execution on this context began.  The time
    /// budget is not measured from here: each execution starts its own.
    pub(crate) fn mark_started(&self) {
        let mut timing = lock(&self.inner.timing);
        if timing.start_time.is_none() {
            timing.start_time = Some(SystemTime::now());
        }
        timing.end_time = None;
    }

    pub(crate) fn mark_finished(&self) {
        lock(&self.inner.timing).end_time = Some(SystemTime::now());
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        lock(&self.inner.timing).start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        lock(&self.inner.timing).end_time
    }

    pub(crate) fn push_result(&self, result: RequestResult) {
        lock(&self.inner.request_results).push(result);
    }

    /// Snapshot of all attempts recorded so far, in attempt order.
    pub fn request_results(&self) -> Vec<RequestResult> {
        lock(&self.inner.request_results).clone()
    }

    /// The most recent attempt, if any.
    pub fn last_result(&self) -> Option<RequestResult> {
        lock(&self.inner.request_results).last().cloned()
    }
}

/// Poisoning only happens if a hook panicked mid-update; the data is
/// append-only so the inner value stays usable.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Builder for [`OperationContext`].
#[derive(Default)]
pub struct OperationContextBuilder {
    client_request_id: Option<String>,
    sending_request: Option<SendingRequestHook>,
    response_received: Option<ResponseReceivedHook>,
    user_headers: HeaderMap,
    retry_policy: Option<Box<dyn RetryPolicy>>,
    span: Option<Span>,
}

impl OperationContextBuilder {
    pub fn client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }

    pub fn on_sending_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut HttpRequest, &OperationContext) + Send + Sync + 'static,
    {
        self.sending_request = Some(Arc::new(hook));
        self
    }

    pub fn on_response_received<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HttpRequest, &ResponseHead, &OperationContext) + Send + Sync + 'static,
    {
        self.response_received = Some(Arc::new(hook));
        self
    }

    /// Headers added to every request of the operation.
    pub fn user_headers(mut self, headers: HeaderMap) -> Self {
        self.user_headers = headers;
        self
    }

    /// Retry policy template; each operation evaluates its own clone.
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Box::new(policy));
        self
    }

    pub fn boxed_retry_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Use `span` instead of the default `storage_operation` span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> OperationContext {
        let client_request_id = self
            .client_request_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let span = self.span.unwrap_or_else(|| {
            tracing::info_span!("storage_operation", client_request_id = %client_request_id)
        });
        OperationContext {
            inner: Arc::new(Inner {
                client_request_id,
                sending_request: self.sending_request,
                response_received: self.response_received,
                user_headers: self.user_headers,
                retry_policy: self.retry_policy,
                span,
                timing: Mutex::new(Timing::default()),
                request_results: Mutex::new(Vec::new()),
            }),
        }
    }
}
