//! Transports for tests: a scripted queue of canned responses and an
//! in-memory blob service.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderValue, Method, StatusCode};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::constants::*;
use crate::errors::{Result, StorageError};
use crate::transport::{HttpRequest, HttpResponse, ResponseBody, ResponseHead, Transport};
use crate::models::SharedAccessPolicy;
use crate::xml::{parse_document, parse_signed_identifiers, render_signed_identifiers, XmlBuilder};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// -- Scripted transport ------------------------------------------------------

enum ScriptedKind {
    Status(StatusCode),
    TransportError(String),
}

/// One canned reply.
pub struct ScriptedResponse {
    kind: ScriptedKind,
    headers: Vec<(String, String)>,
    chunks: Vec<Bytes>,
    fail_after_chunks: bool,
    delay: Duration,
}

impl ScriptedResponse {
    pub fn status(status: StatusCode) -> Self {
        Self {
            kind: ScriptedKind::Status(status),
            headers: Vec::new(),
            chunks: Vec::new(),
            fail_after_chunks: false,
            delay: Duration::ZERO,
        }
    }

    pub fn ok(body: &[u8]) -> Self {
        Self::status(StatusCode::OK).body(body)
    }

    pub fn transport_error(message: &str) -> Self {
        Self {
            kind: ScriptedKind::TransportError(message.to_string()),
            ..Self::status(StatusCode::OK)
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &[u8]) -> Self {
        self.chunks = if body.is_empty() {
            Vec::new()
        } else {
            vec![Bytes::copy_from_slice(body)]
        };
        self
    }

    pub fn chunks(mut self, parts: &[&[u8]]) -> Self {
        self.chunks = parts.iter().map(|p| Bytes::copy_from_slice(p)).collect();
        self
    }

    /// The body errors after the last chunk instead of ending.
    pub fn fail_after_chunks(mut self) -> Self {
        self.fail_after_chunks = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct ScriptedBody {
    chunks: VecDeque<Bytes>,
    fail_at_end: bool,
}

impl ResponseBody for ScriptedBody {
    fn chunk(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>> {
        let next = match self.chunks.pop_front() {
            Some(c) => Ok(Some(c)),
            None if self.fail_at_end => {
                self.fail_at_end = false;
                Err(StorageError::Transport {
                    message: "connection reset mid-body".into(),
                    source: None,
                })
            }
            None => Ok(None),
        };
        Box::pin(async move { next })
    }
}

/// Replies with queued responses in order and records every request.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            lock(&self.requests).push(request);
            let step = lock(&self.script).pop_front();
            let step = step.ok_or_else(|| StorageError::Transport {
                message: "script exhausted".into(),
                source: None,
            })?;
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            let status = match step.kind {
                ScriptedKind::Status(s) => s,
                ScriptedKind::TransportError(message) => {
                    return Err(StorageError::Transport {
                        message,
                        source: None,
                    })
                }
            };
            let mut head = ResponseHead::new(status);
            for (k, v) in &step.headers {
                if let (Ok(name), Ok(value)) = (
                    http::HeaderName::from_bytes(k.as_bytes()),
                    HeaderValue::from_str(v),
                ) {
                    head.headers.insert(name, value);
                }
            }
            Ok(HttpResponse {
                head,
                body: Box::new(ScriptedBody {
                    chunks: step.chunks.into(),
                    fail_at_end: step.fail_after_chunks,
                }),
            })
        })
    }
}

// -- In-memory blob service --------------------------------------------------

/// Predicate selecting requests for fault or latency injection.
pub type RequestMatcher = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// What an injected fault does.
#[derive(Clone)]
pub enum FaultKind {
    /// Reply with this status without touching state.
    Status(StatusCode),
    /// Fail before the request reaches the service.
    Transport,
    /// Apply the request, then lose the response.
    DropResponse,
}

struct Fault {
    matcher: RequestMatcher,
    kind: FaultKind,
    remaining: usize,
}

#[derive(Clone, Default)]
struct Lease {
    id: Option<String>,
}

impl Lease {
    fn is_leased(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Clone)]
struct StoredBlob {
    blob_type: &'static str,
    data: Vec<u8>,
    pages: BTreeSet<u64>,
    headers: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
    content_md5: Option<String>,
    committed: Vec<(String, Bytes)>,
    uncommitted: HashMap<String, Bytes>,
    committed_block_count: u32,
    sequence_number: u64,
    etag: String,
    lease: Lease,
    copy: Option<(String, String)>,
}

impl StoredBlob {
    fn new(blob_type: &'static str, etag: String) -> Self {
        Self {
            blob_type,
            data: Vec::new(),
            pages: BTreeSet::new(),
            headers: BTreeMap::new(),
            metadata: BTreeMap::new(),
            content_md5: None,
            committed: Vec::new(),
            uncommitted: HashMap::new(),
            committed_block_count: 0,
            sequence_number: 0,
            etag,
            lease: Lease::default(),
            copy: None,
        }
    }
}

#[derive(Default)]
struct StoredContainer {
    metadata: BTreeMap<String, String>,
    etag: String,
    lease: Lease,
    public_access: Option<String>,
    access_policies: BTreeMap<String, SharedAccessPolicy>,
    blobs: BTreeMap<String, StoredBlob>,
    /// (blob name, snapshot time) -> blob
    snapshots: BTreeMap<(String, String), StoredBlob>,
}

#[derive(Default)]
struct ServiceState {
    containers: BTreeMap<String, StoredContainer>,
    etag_counter: u64,
    snapshot_counter: u64,
}

impl ServiceState {
    fn next_etag(&mut self) -> String {
        self.etag_counter += 1;
        format!("\"0x8D{:012X}\"", self.etag_counter)
    }
}

/// A transport that behaves like the blob service, backed by memory.
pub struct InMemoryBlobService {
    account: String,
    state: Mutex<ServiceState>,
    faults: Mutex<Vec<Fault>>,
    latency: Mutex<Option<Arc<dyn Fn(&HttpRequest) -> Duration + Send + Sync>>>,
    requests: Mutex<Vec<HttpRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Base URL clients should use for the in-memory service.
pub const IN_MEMORY_ENDPOINT: &str = "http://blobkit.test/devaccount";

impl InMemoryBlobService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            account: "devaccount".to_string(),
            state: Mutex::new(ServiceState::default()),
            faults: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Inject `kind` for the next `times` requests matching `matcher`.
    pub fn inject_fault<F>(&self, matcher: F, kind: FaultKind, times: usize)
    where
        F: Fn(&HttpRequest) -> bool + Send + Sync + 'static,
    {
        lock(&self.faults).push(Fault {
            matcher: Arc::new(matcher),
            kind,
            remaining: times,
        });
    }

    /// Delay every request by `latency(request)` before handling it.
    pub fn set_latency<F>(&self, latency: F)
    where
        F: Fn(&HttpRequest) -> Duration + Send + Sync + 'static,
    {
        *lock(&self.latency) = Some(Arc::new(latency));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Highest number of requests observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Raw content of a committed blob.
    pub fn blob_data(&self, container: &str, blob: &str) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        Some(state.containers.get(container)?.blobs.get(blob)?.data.clone())
    }

    /// Ids of the committed blocks of a block blob, in order.
    pub fn committed_block_ids(&self, container: &str, blob: &str) -> Vec<String> {
        let state = lock(&self.state);
        state
            .containers
            .get(container)
            .and_then(|c| c.blobs.get(blob))
            .map(|b| b.committed.iter().map(|(id, _)| id.clone()).collect())
            .unwrap_or_default()
    }

    fn take_fault(&self, request: &HttpRequest) -> Option<FaultKind> {
        let mut faults = lock(&self.faults);
        let fault = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && (f.matcher)(request))?;
        fault.remaining -= 1;
        Some(fault.kind.clone())
    }
}

/// Client wired to `service` with a fast linear retry policy.
pub fn test_client(service: &Arc<InMemoryBlobService>) -> crate::client::CloudBlobClient {
    crate::client::CloudBlobClient::with_transport(
        crate::storage_uri::StorageUri::new(
            reqwest::Url::parse(IN_MEMORY_ENDPOINT).expect("static endpoint"),
        ),
        crate::credentials::StorageCredentials::Anonymous,
        service.clone(),
    )
    .with_retry_policy(crate::retry::LinearRetry::new(Duration::from_millis(5), 3))
}

/// Matches requests whose `comp` query parameter equals `comp`.
pub fn comp_is(comp: &'static str) -> impl Fn(&HttpRequest) -> bool + Send + Sync + 'static {
    move |req: &HttpRequest| req.url.query_pairs().any(|(k, v)| k == QUERY_COMP && v == comp)
}

impl Transport for InMemoryBlobService {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + '_>> {
        Box::pin(async move {
            lock(&self.requests).push(request.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let latency = lock(&self.latency).clone();
            if let Some(latency) = latency {
                let d = latency(&request);
                if !d.is_zero() {
                    tokio::time::sleep(d).await;
                }
            }

            let fault = self.take_fault(&request);
            let response = match fault {
                Some(FaultKind::Transport) => Err(StorageError::Transport {
                    message: "injected transport failure".into(),
                    source: None,
                }),
                Some(FaultKind::Status(status)) => Ok(error(status, "InjectedFault")),
                Some(FaultKind::DropResponse) => {
                    let _ = self.handle(&request);
                    Err(StorageError::Transport {
                        message: "injected response loss".into(),
                        source: None,
                    })
                }
                None => Ok(self.handle(&request)),
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            response
        })
    }
}

// -- Request handling --------------------------------------------------------

struct Reply {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Reply {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    fn into_response(self) -> HttpResponse {
        let mut head = ResponseHead::new(self.status);
        for (k, v) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                head.headers.append(name, value);
            }
        }
        if let Ok(v) = HeaderValue::from_str(&self.body.len().to_string()) {
            head.headers.entry("content-length").or_insert(v);
        }
        HttpResponse::full(head, self.body)
    }
}

fn error(status: StatusCode, code: &str) -> HttpResponse {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{code}</Code><Message>{code}</Message></Error>"
    );
    Reply::new(status)
        .header(HEADER_ERROR_CODE, code)
        .body(body)
        .into_response()
}

fn md5_base64(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(data))
}

/// Parse `bytes=a-b` / `bytes=a-` against a blob of `len` bytes into an
/// inclusive range.
fn parse_range(value: &str, len: u64) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (a, b) = spec.split_once('-')?;
    let start: u64 = a.parse().ok()?;
    let end = if b.is_empty() {
        len.checked_sub(1)?
    } else {
        b.parse::<u64>().ok()?.min(len.checked_sub(1)?)
    };
    (start <= end).then_some((start, end))
}

struct Parsed<'a> {
    container: Option<String>,
    blob: Option<String>,
    query: HashMap<String, String>,
    request: &'a HttpRequest,
}

impl Parsed<'_> {
    fn q(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    fn h(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.request
            .headers
            .iter()
            .filter_map(|(k, v)| {
                let key = k.as_str().strip_prefix(HEADER_META_PREFIX)?;
                Some((key.to_string(), v.to_str().ok()?.to_string()))
            })
            .collect()
    }
}

const CONTENT_HEADERS: [(&str, &str); 5] = [
    (HEADER_BLOB_CONTENT_TYPE, "content-type"),
    (HEADER_BLOB_CONTENT_ENCODING, "content-encoding"),
    (HEADER_BLOB_CONTENT_LANGUAGE, "content-language"),
    (HEADER_BLOB_CONTENT_DISPOSITION, "content-disposition"),
    (HEADER_BLOB_CACHE_CONTROL, "cache-control"),
];

impl InMemoryBlobService {
    fn parse<'a>(&self, request: &'a HttpRequest) -> Option<Parsed<'a>> {
        let path = request.url.path().trim_start_matches('/');
        let rest = path.strip_prefix(self.account.as_str())?;
        let rest = rest.trim_start_matches('/');
        let (container, blob) = match rest.split_once('/') {
            Some((c, b)) if !b.is_empty() => (Some(c.to_string()), Some(b.to_string())),
            Some((c, _)) => (Some(c.to_string()), None),
            None if rest.is_empty() => (None, None),
            None => (Some(rest.to_string()), None),
        };
        let blob = blob.map(|b| {
            percent_encoding::percent_decode_str(&b)
                .decode_utf8_lossy()
                .into_owned()
        });
        let query = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Some(Parsed {
            container,
            blob,
            query,
            request,
        })
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let Some(p) = self.parse(request) else {
            return error(StatusCode::BAD_REQUEST, "InvalidUri");
        };
        let mut state = lock(&self.state);
        match (&p.container, &p.blob) {
            (None, _) => self.handle_service(&mut state, &p),
            (Some(c), None) => self.handle_container(&mut state, c, &p),
            (Some(c), Some(b)) => self.handle_blob(&mut state, c, b, &p),
        }
    }

    fn handle_service(&self, state: &mut ServiceState, p: &Parsed<'_>) -> HttpResponse {
        if p.request.method != Method::GET || p.q(QUERY_COMP) != Some("list") {
            return error(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb");
        }
        let prefix = p.q(QUERY_PREFIX).unwrap_or_default();
        let marker = p.q(QUERY_MARKER).unwrap_or_default();
        let max: usize = p
            .q(QUERY_MAX_RESULTS)
            .and_then(|m| m.parse().ok())
            .unwrap_or(5000);
        let names: Vec<&String> = state
            .containers
            .keys()
            .filter(|n| n.starts_with(prefix) && n.as_str() >= marker)
            .collect();
        let page = &names[..names.len().min(max)];
        let next = names.get(max).map(|n| n.to_string());

        let render = || -> Result<String> {
            let mut xml = XmlBuilder::new()?;
            xml.start("EnumerationResults")?;
            xml.start("Containers")?;
            for name in page {
                let c = &state.containers[*name];
                xml.start("Container")?;
                xml.text_element("Name", name)?;
                xml.start("Properties")?;
                xml.text_element("Etag", &c.etag)?;
                xml.text_element(
                    "LeaseState",
                    if c.lease.is_leased() { "leased" } else { "available" },
                )?;
                xml.end("Properties")?;
                xml.start("Metadata")?;
                for (k, v) in &c.metadata {
                    xml.text_element(k, v)?;
                }
                xml.end("Metadata")?;
                xml.end("Container")?;
            }
            xml.end("Containers")?;
            xml.text_element("NextMarker", next.as_deref().unwrap_or_default())?;
            xml.end("EnumerationResults")?;
            xml.finish()
        };
        match render() {
            Ok(body) => Reply::new(StatusCode::OK).body(body).into_response(),
            Err(_) => error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }

    fn handle_container(
        &self,
        state: &mut ServiceState,
        name: &str,
        p: &Parsed<'_>,
    ) -> HttpResponse {
        let comp = p.q(QUERY_COMP);
        let method = p.request.method.clone();

        if method == Method::PUT && comp.is_none() {
            if state.containers.contains_key(name) {
                return error(StatusCode::CONFLICT, "ContainerAlreadyExists");
            }
            let etag = state.next_etag();
            state.containers.insert(
                name.to_string(),
                StoredContainer {
                    metadata: p.metadata(),
                    etag: etag.clone(),
                    public_access: p.h(HEADER_BLOB_PUBLIC_ACCESS).map(str::to_string),
                    ..Default::default()
                },
            );
            return Reply::new(StatusCode::CREATED)
                .header("etag", etag)
                .into_response();
        }

        let etag = state.next_etag();
        let Some(container) = state.containers.get_mut(name) else {
            return error(StatusCode::NOT_FOUND, "ContainerNotFound");
        };

        match (method, comp) {
            (Method::DELETE, None) => {
                if container.lease.is_leased()
                    && p.h(HEADER_LEASE_ID) != container.lease.id.as_deref()
                {
                    return error(StatusCode::PRECONDITION_FAILED, "LeaseIdMissing");
                }
                state.containers.remove(name);
                Reply::new(StatusCode::ACCEPTED).into_response()
            }
            (Method::GET, None) | (Method::HEAD, None) => {
                let mut reply = Reply::new(StatusCode::OK)
                    .header("etag", container.etag.clone())
                    .header(
                        HEADER_LEASE_STATE,
                        if container.lease.is_leased() { "leased" } else { "available" },
                    );
                if let Some(access) = &container.public_access {
                    reply = reply.header(HEADER_BLOB_PUBLIC_ACCESS, access.clone());
                }
                for (k, v) in &container.metadata {
                    reply = reply.header(&format!("{HEADER_META_PREFIX}{k}"), v.clone());
                }
                reply.into_response()
            }
            (Method::PUT, Some("metadata")) => {
                container.metadata = p.metadata();
                container.etag = etag.clone();
                Reply::new(StatusCode::OK).header("etag", etag).into_response()
            }
            (Method::PUT, Some("lease")) => lease_action(&mut container.lease, p),
            (Method::GET, Some("acl")) => {
                let Ok(body) = render_signed_identifiers(&container.access_policies) else {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
                };
                let mut reply = Reply::new(StatusCode::OK).header("etag", container.etag.clone());
                if let Some(access) = &container.public_access {
                    reply = reply.header(HEADER_BLOB_PUBLIC_ACCESS, access.clone());
                }
                reply.body(body).into_response()
            }
            (Method::PUT, Some("acl")) => {
                let Ok(policies) = parse_signed_identifiers(&p.request.body) else {
                    return error(StatusCode::BAD_REQUEST, "InvalidXmlDocument");
                };
                if policies.len() > MAX_SHARED_ACCESS_POLICIES {
                    return error(StatusCode::BAD_REQUEST, "InvalidXmlDocument");
                }
                container.access_policies = policies;
                container.public_access = p.h(HEADER_BLOB_PUBLIC_ACCESS).map(str::to_string);
                container.etag = etag.clone();
                Reply::new(StatusCode::OK).header("etag", etag).into_response()
            }
            (Method::GET, Some("list")) => list_blobs(container, p),
            _ => error(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
        }
    }

    fn handle_blob(
        &self,
        state: &mut ServiceState,
        container_name: &str,
        name: &str,
        p: &Parsed<'_>,
    ) -> HttpResponse {
        let etag = state.next_etag();
        state.snapshot_counter += 1;
        let snapshot_counter = state.snapshot_counter;

        // Copy sources are read before borrowing the destination container.
        let copy_source = p.h(HEADER_COPY_SOURCE).map(str::to_string);
        let copy_data = match &copy_source {
            Some(src) if p.q(QUERY_COMP).is_none() && p.request.method == Method::PUT => {
                match self.read_source(state, src) {
                    Some(blob) => Some(blob),
                    None => return error(StatusCode::NOT_FOUND, "CannotVerifyCopySource"),
                }
            }
            _ => None,
        };

        let Some(container) = state.containers.get_mut(container_name) else {
            return error(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        let comp = p.q(QUERY_COMP).map(str::to_string);
        let method = p.request.method.clone();

        if let Some(snapshot) = p.q(QUERY_SNAPSHOT) {
            if method == Method::GET || method == Method::HEAD {
                let key = (name.to_string(), snapshot.to_string());
                return match container.snapshots.get(&key) {
                    Some(blob) => read_blob(blob, p, method == Method::HEAD),
                    None => error(StatusCode::NOT_FOUND, "BlobNotFound"),
                };
            }
        }

        // Conditions common to every blob operation.
        if let Some(blob) = container.blobs.get(name) {
            if let Some(resp) = check_conditions(blob, p) {
                return resp;
            }
        } else if p.h("if-match").is_some() && p.h("if-match") != Some("*") {
            return error(StatusCode::PRECONDITION_FAILED, "ConditionNotMet");
        }

        match (method.clone(), comp.as_deref()) {
            (Method::PUT, None) => {
                if let Some(source) = copy_data {
                    let mut blob = source;
                    blob.etag = etag.clone();
                    blob.lease = Lease::default();
                    let copy_id = uuid::Uuid::new_v4().to_string();
                    blob.copy = copy_source.map(|s| (copy_id.clone(), s));
                    container.blobs.insert(name.to_string(), blob);
                    return Reply::new(StatusCode::ACCEPTED)
                        .header("etag", etag)
                        .header(HEADER_COPY_ID, copy_id)
                        .header(HEADER_COPY_STATUS, "success")
                        .into_response();
                }
                let exists = container.blobs.get(name).is_some_and(|b| !b.etag.is_empty());
                if p.h("if-none-match") == Some("*") && exists {
                    return error(StatusCode::CONFLICT, "BlobAlreadyExists");
                }
                let blob_type = match p.h(HEADER_BLOB_TYPE) {
                    Some("BlockBlob") => "BlockBlob",
                    Some("PageBlob") => "PageBlob",
                    Some("AppendBlob") => "AppendBlob",
                    _ => return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue"),
                };
                let mut blob = StoredBlob::new(blob_type, etag.clone());
                match blob_type {
                    "BlockBlob" => {
                        if let Some(resp) = check_transactional_md5(p) {
                            return resp;
                        }
                        blob.data = p.request.body.to_vec();
                        blob.content_md5 = Some(
                            p.h(HEADER_BLOB_CONTENT_MD5)
                                .map(str::to_string)
                                .unwrap_or_else(|| md5_base64(&blob.data)),
                        );
                    }
                    "PageBlob" => {
                        let size: u64 = match p.h(HEADER_BLOB_CONTENT_LENGTH).and_then(|v| v.parse().ok())
                        {
                            Some(s) if s % PAGE_SIZE == 0 => s,
                            _ => return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue"),
                        };
                        blob.data = vec![0; size as usize];
                        blob.sequence_number = p
                            .h(HEADER_BLOB_SEQUENCE_NUMBER)
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        blob.content_md5 = p.h(HEADER_BLOB_CONTENT_MD5).map(str::to_string);
                    }
                    _ => {
                        blob.content_md5 = p.h(HEADER_BLOB_CONTENT_MD5).map(str::to_string);
                    }
                }
                apply_content_headers(&mut blob, p);
                blob.metadata = p.metadata();
                container.blobs.insert(name.to_string(), blob);
                Reply::new(StatusCode::CREATED)
                    .header("etag", etag)
                    .into_response()
            }
            (Method::PUT, Some("block")) => {
                if let Some(resp) = check_transactional_md5(p) {
                    return resp;
                }
                let Some(id) = p.q(QUERY_BLOCK_ID) else {
                    return error(StatusCode::BAD_REQUEST, "InvalidQueryParameterValue");
                };
                let blob = container
                    .blobs
                    .entry(name.to_string())
                    .or_insert_with(|| StoredBlob::new("BlockBlob", String::new()));
                blob.uncommitted
                    .insert(id.to_string(), p.request.body.clone());
                Reply::new(StatusCode::CREATED).into_response()
            }
            (Method::PUT, Some("blocklist")) => {
                let Ok(doc) = parse_document(&p.request.body) else {
                    return error(StatusCode::BAD_REQUEST, "InvalidXmlDocument");
                };
                let blob = container
                    .blobs
                    .entry(name.to_string())
                    .or_insert_with(|| StoredBlob::new("BlockBlob", String::new()));
                let mut committed = Vec::new();
                for item in &doc.children {
                    let id = item.text.clone();
                    let found = match item.name.as_str() {
                        "Latest" => blob
                            .uncommitted
                            .get(&id)
                            .cloned()
                            .or_else(|| lookup_committed(&blob.committed, &id)),
                        "Committed" => lookup_committed(&blob.committed, &id),
                        "Uncommitted" => blob.uncommitted.get(&id).cloned(),
                        _ => None,
                    };
                    match found {
                        Some(data) => committed.push((id, data)),
                        None => return error(StatusCode::BAD_REQUEST, "InvalidBlockList"),
                    }
                }
                blob.data = committed.iter().flat_map(|(_, d)| d.iter().copied()).collect();
                blob.committed = committed;
                blob.uncommitted.clear();
                blob.content_md5 = p.h(HEADER_BLOB_CONTENT_MD5).map(str::to_string);
                blob.etag = etag.clone();
                apply_content_headers(blob, p);
                blob.metadata = p.metadata();
                Reply::new(StatusCode::CREATED)
                    .header("etag", etag)
                    .into_response()
            }
            (Method::GET, Some("blocklist")) => {
                let Some(blob) = container.blobs.get(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                let filter = p.q(QUERY_BLOCK_LIST_TYPE).unwrap_or("committed");
                let mut uncommitted: Vec<(&String, &Bytes)> = blob.uncommitted.iter().collect();
                uncommitted.sort_by(|a, b| a.0.cmp(b.0));
                let render = || -> Result<String> {
                    let mut xml = XmlBuilder::new()?;
                    xml.start("BlockList")?;
                    if filter != "uncommitted" {
                        xml.start("CommittedBlocks")?;
                        for (id, data) in &blob.committed {
                            xml.start("Block")?;
                            xml.text_element("Name", id)?;
                            xml.text_element("Size", &data.len().to_string())?;
                            xml.end("Block")?;
                        }
                        xml.end("CommittedBlocks")?;
                    }
                    if filter != "committed" {
                        xml.start("UncommittedBlocks")?;
                        for (id, data) in &uncommitted {
                            xml.start("Block")?;
                            xml.text_element("Name", id)?;
                            xml.text_element("Size", &data.len().to_string())?;
                            xml.end("Block")?;
                        }
                        xml.end("UncommittedBlocks")?;
                    }
                    xml.end("BlockList")?;
                    xml.finish()
                };
                match render() {
                    Ok(body) => Reply::new(StatusCode::OK).body(body).into_response(),
                    Err(_) => error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
                }
            }
            (Method::PUT, Some("page")) => {
                let Some(blob) = container.blobs.get_mut(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                if blob.blob_type != "PageBlob" {
                    return error(StatusCode::CONFLICT, "InvalidBlobType");
                }
                if let Some(resp) = check_sequence_conditions(blob, p) {
                    return resp;
                }
                if let Some(resp) = check_transactional_md5(p) {
                    return resp;
                }
                let len = blob.data.len() as u64;
                let range = p.h(HEADER_RANGE).or_else(|| p.h("range"));
                let Some((start, end)) = range.and_then(|r| parse_range(r, u64::MAX)) else {
                    return error(StatusCode::BAD_REQUEST, "InvalidPageRange");
                };
                if start % PAGE_SIZE != 0 || (end + 1) % PAGE_SIZE != 0 || end >= len {
                    return error(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidPageRange");
                }
                let clear = p.h(HEADER_PAGE_WRITE) == Some("clear");
                let span = (end - start + 1) as usize;
                if !clear && p.request.body.len() != span {
                    return error(StatusCode::BAD_REQUEST, "InvalidPageRange");
                }
                for page in (start..=end).step_by(PAGE_SIZE as usize) {
                    if clear {
                        blob.pages.remove(&page);
                    } else {
                        blob.pages.insert(page);
                    }
                }
                let dst = &mut blob.data[start as usize..=end as usize];
                if clear {
                    dst.fill(0);
                } else {
                    dst.copy_from_slice(&p.request.body);
                }
                blob.etag = etag.clone();
                Reply::new(StatusCode::CREATED)
                    .header("etag", etag)
                    .header(HEADER_BLOB_SEQUENCE_NUMBER, blob.sequence_number.to_string())
                    .into_response()
            }
            (Method::GET, Some("pagelist")) => {
                let Some(blob) = container.blobs.get(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                let mut ranges: Vec<(u64, u64)> = Vec::new();
                for &page in &blob.pages {
                    match ranges.last_mut() {
                        Some((_, end)) if *end + 1 == page => *end = page + PAGE_SIZE - 1,
                        _ => ranges.push((page, page + PAGE_SIZE - 1)),
                    }
                }
                let render = || -> Result<String> {
                    let mut xml = XmlBuilder::new()?;
                    xml.start("PageList")?;
                    for (s, e) in &ranges {
                        xml.start("PageRange")?;
                        xml.text_element("Start", &s.to_string())?;
                        xml.text_element("End", &e.to_string())?;
                        xml.end("PageRange")?;
                    }
                    xml.end("PageList")?;
                    xml.finish()
                };
                match render() {
                    Ok(body) => Reply::new(StatusCode::OK).body(body).into_response(),
                    Err(_) => error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
                }
            }
            (Method::PUT, Some("appendblock")) => {
                let Some(blob) = container.blobs.get_mut(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                if blob.blob_type != "AppendBlob" {
                    return error(StatusCode::CONFLICT, "InvalidBlobType");
                }
                let len = blob.data.len() as u64;
                if let Some(pos) = p.h(HEADER_CONDITION_APPEND_POS).and_then(|v| v.parse::<u64>().ok()) {
                    if pos != len {
                        return error(
                            StatusCode::PRECONDITION_FAILED,
                            "AppendPositionConditionNotMet",
                        );
                    }
                }
                if let Some(max) = p.h(HEADER_CONDITION_MAX_SIZE).and_then(|v| v.parse::<u64>().ok()) {
                    if len + p.request.body.len() as u64 > max {
                        return error(
                            StatusCode::PRECONDITION_FAILED,
                            "MaxBlobSizeConditionNotMet",
                        );
                    }
                }
                if let Some(resp) = check_transactional_md5(p) {
                    return resp;
                }
                blob.data.extend_from_slice(&p.request.body);
                blob.committed_block_count += 1;
                blob.etag = etag.clone();
                Reply::new(StatusCode::CREATED)
                    .header("etag", etag)
                    .header(HEADER_BLOB_APPEND_OFFSET, len.to_string())
                    .header(
                        HEADER_BLOB_COMMITTED_BLOCK_COUNT,
                        blob.committed_block_count.to_string(),
                    )
                    .into_response()
            }
            (Method::GET, None) | (Method::HEAD, None) => match container.blobs.get(name) {
                Some(blob) if !blob.etag.is_empty() => read_blob(blob, p, method == Method::HEAD),
                _ => error(StatusCode::NOT_FOUND, "BlobNotFound"),
            },
            (Method::DELETE, None) => {
                if !container.blobs.contains_key(name) {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                }
                let has_snapshots = container.snapshots.keys().any(|(n, _)| n == name);
                match p.h(HEADER_DELETE_SNAPSHOTS) {
                    Some("include") => {
                        container.snapshots.retain(|(n, _), _| n != name);
                        container.blobs.remove(name);
                    }
                    Some("only") => container.snapshots.retain(|(n, _), _| n != name),
                    _ if has_snapshots => {
                        return error(StatusCode::CONFLICT, "SnapshotsPresent");
                    }
                    _ => {
                        container.blobs.remove(name);
                    }
                }
                Reply::new(StatusCode::ACCEPTED).into_response()
            }
            (Method::PUT, Some("properties")) => {
                let Some(blob) = container.blobs.get_mut(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                let resize = p.h(HEADER_BLOB_CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
                if let Some(size) = resize {
                    if blob.blob_type != "PageBlob" || size % PAGE_SIZE != 0 {
                        return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue");
                    }
                    blob.data.resize(size as usize, 0);
                    blob.pages.retain(|&pg| pg < size);
                }
                if let Some(action) = p.h(HEADER_SEQUENCE_NUMBER_ACTION) {
                    let given: u64 = p
                        .h(HEADER_BLOB_SEQUENCE_NUMBER)
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    blob.sequence_number = match action {
                        "max" => blob.sequence_number.max(given),
                        "update" => given,
                        "increment" => blob.sequence_number + 1,
                        _ => return error(StatusCode::BAD_REQUEST, "InvalidHeaderValue"),
                    };
                } else if resize.is_none() {
                    blob.headers.clear();
                    apply_content_headers(blob, p);
                    if let Some(md5) = p.h(HEADER_BLOB_CONTENT_MD5) {
                        blob.content_md5 = Some(md5.to_string());
                    }
                }
                blob.etag = etag.clone();
                Reply::new(StatusCode::OK)
                    .header("etag", etag)
                    .header(HEADER_BLOB_SEQUENCE_NUMBER, blob.sequence_number.to_string())
                    .into_response()
            }
            (Method::PUT, Some("metadata")) => {
                let Some(blob) = container.blobs.get_mut(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                blob.metadata = p.metadata();
                blob.etag = etag.clone();
                Reply::new(StatusCode::OK).header("etag", etag).into_response()
            }
            (Method::PUT, Some("snapshot")) => {
                let Some(blob) = container.blobs.get(name) else {
                    return error(StatusCode::NOT_FOUND, "BlobNotFound");
                };
                let time = format!("2024-01-01T00:00:00.{snapshot_counter:07}Z");
                let mut snap = blob.clone();
                let md = p.metadata();
                if !md.is_empty() {
                    snap.metadata = md;
                }
                container
                    .snapshots
                    .insert((name.to_string(), time.clone()), snap);
                Reply::new(StatusCode::CREATED)
                    .header(HEADER_SNAPSHOT, time)
                    .into_response()
            }
            (Method::PUT, Some("lease")) => match container.blobs.get_mut(name) {
                Some(blob) => lease_action(&mut blob.lease, p),
                None => error(StatusCode::NOT_FOUND, "BlobNotFound"),
            },
            (Method::PUT, Some("copy")) => error(StatusCode::CONFLICT, "NoPendingCopyOperation"),
            _ => error(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
        }
    }

    fn read_source(&self, state: &ServiceState, source: &str) -> Option<StoredBlob> {
        let url = reqwest::Url::parse(source).ok()?;
        let path = url.path().trim_start_matches('/');
        let rest = path.strip_prefix(self.account.as_str())?.trim_start_matches('/');
        let (container, blob) = rest.split_once('/')?;
        let blob = percent_encoding::percent_decode_str(blob)
            .decode_utf8_lossy()
            .into_owned();
        state.containers.get(container)?.blobs.get(&blob).cloned()
    }
}

fn lookup_committed(committed: &[(String, Bytes)], id: &str) -> Option<Bytes> {
    committed
        .iter()
        .find(|(cid, _)| cid == id)
        .map(|(_, d)| d.clone())
}

fn apply_content_headers(blob: &mut StoredBlob, p: &Parsed<'_>) {
    for (request_header, response_header) in CONTENT_HEADERS {
        if let Some(v) = p.h(request_header) {
            blob.headers
                .insert(response_header.to_string(), v.to_string());
        }
    }
}

fn check_transactional_md5(p: &Parsed<'_>) -> Option<HttpResponse> {
    let expected = p.h("content-md5")?;
    (expected != md5_base64(&p.request.body)).then(|| error(StatusCode::BAD_REQUEST, "Md5Mismatch"))
}

fn check_sequence_conditions(blob: &StoredBlob, p: &Parsed<'_>) -> Option<HttpResponse> {
    let n = blob.sequence_number;
    let parse = |name| p.h(name).and_then(|v| v.parse::<u64>().ok());
    let failed = parse(HEADER_IF_SEQUENCE_NUMBER_LE).is_some_and(|v| n > v)
        || parse(HEADER_IF_SEQUENCE_NUMBER_LT).is_some_and(|v| n >= v)
        || parse(HEADER_IF_SEQUENCE_NUMBER_EQ).is_some_and(|v| n != v);
    failed.then(|| error(StatusCode::PRECONDITION_FAILED, "SequenceNumberConditionNotMet"))
}

fn check_conditions(blob: &StoredBlob, p: &Parsed<'_>) -> Option<HttpResponse> {
    if let Some(m) = p.h("if-match") {
        if m != "*" && m != blob.etag {
            return Some(error(StatusCode::PRECONDITION_FAILED, "ConditionNotMet"));
        }
    }
    let is_read = p.request.method == Method::GET || p.request.method == Method::HEAD;
    if let Some(m) = p.h("if-none-match") {
        if m == blob.etag {
            return Some(if is_read {
                Reply::new(StatusCode::NOT_MODIFIED).into_response()
            } else {
                error(StatusCode::PRECONDITION_FAILED, "ConditionNotMet")
            });
        }
    }
    let is_lease_op = p.q(QUERY_COMP) == Some("lease");
    if !is_read && !is_lease_op && blob.lease.is_leased() {
        match p.h(HEADER_LEASE_ID) {
            None => return Some(error(StatusCode::PRECONDITION_FAILED, "LeaseIdMissing")),
            Some(id) if Some(id) != blob.lease.id.as_deref() => {
                return Some(error(StatusCode::PRECONDITION_FAILED, "LeaseIdMismatchWithBlobOperation"))
            }
            _ => {}
        }
    }
    None
}

fn read_blob(blob: &StoredBlob, p: &Parsed<'_>, head_only: bool) -> HttpResponse {
    let len = blob.data.len() as u64;
    let range = p.h(HEADER_RANGE).or_else(|| p.h("range"));
    let mut reply;
    let body: Bytes;
    match range {
        Some(r) => {
            let Some((start, end)) = parse_range(r, len) else {
                return error(StatusCode::RANGE_NOT_SATISFIABLE, "InvalidRange");
            };
            let slice = &blob.data[start as usize..=end as usize];
            reply = Reply::new(StatusCode::PARTIAL_CONTENT)
                .header("content-range", format!("bytes {start}-{end}/{len}"));
            if p.h(HEADER_RANGE_GET_CONTENT_MD5) == Some("true") {
                reply = reply.header("content-md5", md5_base64(slice));
            }
            if let Some(md5) = &blob.content_md5 {
                reply = reply.header(HEADER_BLOB_CONTENT_MD5, md5.clone());
            }
            body = Bytes::copy_from_slice(slice);
        }
        None => {
            reply = Reply::new(StatusCode::OK);
            if let Some(md5) = &blob.content_md5 {
                reply = reply.header("content-md5", md5.clone());
            }
            body = Bytes::from(blob.data.clone());
        }
    }
    reply = reply
        .header("content-length", body.len().to_string())
        .header("etag", blob.etag.clone())
        .header("last-modified", "Mon, 01 Jan 2024 00:00:00 GMT")
        .header(HEADER_BLOB_TYPE, blob.blob_type)
        .header(
            HEADER_LEASE_STATE,
            if blob.lease.is_leased() { "leased" } else { "available" },
        )
        .header(
            HEADER_LEASE_STATUS,
            if blob.lease.is_leased() { "locked" } else { "unlocked" },
        );
    if blob.blob_type == "PageBlob" {
        reply = reply.header(HEADER_BLOB_SEQUENCE_NUMBER, blob.sequence_number.to_string());
    }
    if blob.blob_type == "AppendBlob" {
        reply = reply.header(
            HEADER_BLOB_COMMITTED_BLOCK_COUNT,
            blob.committed_block_count.to_string(),
        );
    }
    if let Some((id, source)) = &blob.copy {
        reply = reply
            .header(HEADER_COPY_ID, id.clone())
            .header(HEADER_COPY_STATUS, "success")
            .header(HEADER_COPY_SOURCE, source.clone())
            .header(HEADER_COPY_PROGRESS, format!("{len}/{len}"));
    }
    for (k, v) in &blob.headers {
        reply = reply.header(k, v.clone());
    }
    for (k, v) in &blob.metadata {
        reply = reply.header(&format!("{HEADER_META_PREFIX}{k}"), v.clone());
    }
    if head_only {
        reply.into_response_without_body()
    } else {
        reply.body(body).into_response()
    }
}

impl Reply {
    fn into_response_without_body(self) -> HttpResponse {
        let mut resp = self.into_response();
        resp.body = Box::new(crate::transport::FullBody::new(Bytes::new()));
        resp
    }
}

fn lease_action(lease: &mut Lease, p: &Parsed<'_>) -> HttpResponse {
    let current = lease.id.clone();
    let given = p.h(HEADER_LEASE_ID);
    match p.h(HEADER_LEASE_ACTION) {
        Some("acquire") => {
            if current.is_some() && given != current.as_deref() {
                return error(StatusCode::CONFLICT, "LeaseAlreadyPresent");
            }
            let id = p
                .h(HEADER_PROPOSED_LEASE_ID)
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            lease.id = Some(id.clone());
            Reply::new(StatusCode::CREATED)
                .header(HEADER_LEASE_ID, id)
                .into_response()
        }
        Some("renew") => match (&current, given) {
            (Some(c), Some(g)) if c == g => Reply::new(StatusCode::OK)
                .header(HEADER_LEASE_ID, c.clone())
                .into_response(),
            _ => error(StatusCode::CONFLICT, "LeaseIdMismatchWithLeaseOperation"),
        },
        Some("change") => match (&current, given, p.h(HEADER_PROPOSED_LEASE_ID)) {
            (Some(c), Some(g), Some(new)) if c == g => {
                lease.id = Some(new.to_string());
                Reply::new(StatusCode::OK)
                    .header(HEADER_LEASE_ID, new)
                    .into_response()
            }
            _ => error(StatusCode::CONFLICT, "LeaseIdMismatchWithLeaseOperation"),
        },
        Some("release") => match (&current, given) {
            (Some(c), Some(g)) if c == g => {
                lease.id = None;
                Reply::new(StatusCode::OK).into_response()
            }
            _ => error(StatusCode::CONFLICT, "LeaseIdMismatchWithLeaseOperation"),
        },
        Some("break") => {
            if current.is_none() {
                return error(StatusCode::CONFLICT, "LeaseNotPresentWithLeaseOperation");
            }
            lease.id = None;
            Reply::new(StatusCode::ACCEPTED)
                .header(HEADER_LEASE_TIME, "0")
                .into_response()
        }
        _ => error(StatusCode::BAD_REQUEST, "InvalidHeaderValue"),
    }
}

fn list_blobs(container: &StoredContainer, p: &Parsed<'_>) -> HttpResponse {
    let prefix = p.q(QUERY_PREFIX).unwrap_or_default();
    let delimiter = p.q(QUERY_DELIMITER);
    let marker = p.q(QUERY_MARKER).unwrap_or_default();
    let max: usize = p
        .q(QUERY_MAX_RESULTS)
        .and_then(|m| m.parse().ok())
        .unwrap_or(5000);
    let include = p.q(QUERY_INCLUDE).unwrap_or_default();
    let with_metadata = include.split(',').any(|i| i == "metadata");
    let with_snapshots = include.split(',').any(|i| i == "snapshots");

    enum Entry<'a> {
        Blob(&'a str, Option<&'a str>, &'a StoredBlob),
        Prefix(String),
    }
    let mut entries: Vec<(String, Entry<'_>)> = Vec::new();
    let mut seen_prefixes = BTreeSet::new();
    for (name, blob) in &container.blobs {
        if blob.etag.is_empty() || !name.starts_with(prefix) {
            continue;
        }
        if let Some(d) = delimiter {
            if let Some(idx) = name[prefix.len()..].find(d) {
                let dir = name[..prefix.len() + idx + d.len()].to_string();
                if seen_prefixes.insert(dir.clone()) {
                    entries.push((dir.clone(), Entry::Prefix(dir)));
                }
                continue;
            }
        }
        if with_snapshots {
            for ((n, time), snap) in &container.snapshots {
                if n == name {
                    entries.push((name.clone(), Entry::Blob(name, Some(time), snap)));
                }
            }
        }
        entries.push((name.clone(), Entry::Blob(name, None, blob)));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.retain(|(k, _)| k.as_str() >= marker);
    let next = entries.get(max).map(|(k, _)| k.clone());
    entries.truncate(max);

    let render = || -> Result<String> {
        let mut xml = XmlBuilder::new()?;
        xml.start_with_attrs("EnumerationResults", &[("ContainerName", "c")])?;
        xml.start("Blobs")?;
        for (_, entry) in &entries {
            match entry {
                Entry::Prefix(dir) => {
                    xml.start("BlobPrefix")?;
                    xml.text_element("Name", dir)?;
                    xml.end("BlobPrefix")?;
                }
                Entry::Blob(name, snapshot, blob) => {
                    xml.start("Blob")?;
                    xml.text_element("Name", name)?;
                    if let Some(s) = snapshot {
                        xml.text_element("Snapshot", s)?;
                    }
                    xml.start("Properties")?;
                    xml.text_element("Etag", &blob.etag)?;
                    xml.text_element("Content-Length", &blob.data.len().to_string())?;
                    xml.text_element("BlobType", blob.blob_type)?;
                    if let Some(md5) = &blob.content_md5 {
                        xml.text_element("Content-MD5", md5)?;
                    }
                    xml.end("Properties")?;
                    if with_metadata {
                        xml.start("Metadata")?;
                        for (k, v) in &blob.metadata {
                            xml.text_element(k, v)?;
                        }
                        xml.end("Metadata")?;
                    }
                    xml.end("Blob")?;
                }
            }
        }
        xml.end("Blobs")?;
        xml.text_element("NextMarker", next.as_deref().unwrap_or_default())?;
        xml.end("EnumerationResults")?;
        xml.finish()
    };
    match render() {
        Ok(body) => Reply::new(StatusCode::OK).body(body).into_response(),
        Err(_) => error(StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
    }
}
