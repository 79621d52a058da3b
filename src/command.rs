//! One logical storage operation, executed by the
//! [`Executor`](crate::Executor).
//!
//! A [`StorageCommand`] is a strategy object: a request template plus a
//! response parser.  [`StorageCommand::build_request`] turns it into a
//! fresh [`HttpRequest`] for every attempt.

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::constants::{
    API_VERSION, HEADER_CLIENT_REQUEST_ID, HEADER_DATE, HEADER_RANGE, HEADER_VERSION,
    QUERY_TIMEOUT, USER_AGENT,
};
use crate::credentials::StorageCredentials;
use crate::download_buffer::StreamDownloadBuffer;
use crate::errors::{Result, StorageError};
use crate::operation_context::OperationContext;
use crate::storage_uri::{AllowedStorageLocation, StorageLocation, StorageUri};
use crate::transport::{HttpRequest, ResponseHead};

/// Turns a successful response into the operation's result.  For streamed
/// downloads the body argument is empty.
pub type ResponseParser<T> = fn(&ResponseHead, Bytes) -> Result<T>;

/// Method, query, headers and body shared by every attempt.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// First header whose name or value was not valid HTTP.
    invalid_header: Option<String>,
}

impl RequestSpec {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            invalid_header: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Add a header.  Invalid names or values are reported when the
    /// request is built, so factories can chain without `?`.
    pub fn header(mut self, name: &str, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                self.invalid_header.get_or_insert_with(|| name.to_string());
            }
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Where a download's body goes and how far it has progressed.
pub struct DownloadTarget {
    pub buffer: Arc<StreamDownloadBuffer>,
    /// First byte of the requested range.
    pub offset: u64,
    /// Requested length; `None` reads to the end of the blob.
    pub length: Option<u64>,
    /// Compare the running MD5 against the advertised one at the end.
    pub validate_md5: bool,
    session: Mutex<DownloadSession>,
}

#[derive(Default, Clone)]
struct DownloadSession {
    etag: Option<String>,
    expected_md5: Option<String>,
    started: bool,
}

impl DownloadTarget {
    pub fn new(buffer: Arc<StreamDownloadBuffer>, offset: u64, length: Option<u64>) -> Self {
        Self {
            buffer,
            offset,
            length,
            validate_md5: false,
            session: Mutex::new(DownloadSession::default()),
        }
    }

    pub fn validate_md5(mut self, validate: bool) -> Self {
        self.validate_md5 = validate;
        self
    }

    fn session(&self) -> DownloadSession {
        self.session
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Whether the caller asked for a sub-range rather than the whole blob.
    pub fn is_ranged(&self) -> bool {
        self.offset > 0 || self.length.is_some()
    }

    /// Record the ETag and MD5 of the first response so later attempts
    /// resume against the same blob version.
    pub(crate) fn record_first_response(&self, head: &ResponseHead, md5_header: Option<&str>) {
        let mut session = self.session.lock().unwrap_or_else(|p| p.into_inner());
        if !session.started {
            session.started = true;
            session.etag = head.header("etag").map(str::to_string);
            session.expected_md5 = md5_header.map(str::to_string);
        }
    }

    pub(crate) fn expected_md5(&self) -> Option<String> {
        self.session().expected_md5
    }

    /// `x-ms-range` value for the next attempt, if one is needed.
    pub fn range_header(&self) -> Option<String> {
        let written = self.buffer.total_written();
        let start = self.offset + written;
        match self.length {
            Some(len) => {
                let end = self.offset + len.saturating_sub(1);
                Some(format!("bytes={start}-{end}"))
            }
            None if start > 0 => Some(format!("bytes={start}-")),
            None => None,
        }
    }
}

/// How the executor treats the response body.
pub enum ResponseMode {
    /// Read the whole body into memory and hand it to the parser.
    Buffered,
    /// Stream the body into a download buffer.
    Streamed(DownloadTarget),
}

/// A request template plus the strategy for interpreting its response.
pub struct StorageCommand<T> {
    pub storage_uri: StorageUri,
    pub credentials: StorageCredentials,
    pub allowed_location: AllowedStorageLocation,
    pub request: RequestSpec,
    /// Non-2xx statuses that still count as success (404 for `exists`,
    /// 409 for `create_if_not_exists`).
    pub accept: Vec<StatusCode>,
    pub parser: ResponseParser<T>,
    pub mode: ResponseMode,
    /// Compute an MD5 over buffered response bodies and compare it with
    /// the `Content-MD5` response header.
    pub calculate_response_md5: bool,
}

impl<T> StorageCommand<T> {
    pub fn new(
        storage_uri: StorageUri,
        credentials: StorageCredentials,
        request: RequestSpec,
        parser: ResponseParser<T>,
    ) -> Self {
        Self {
            storage_uri,
            credentials,
            allowed_location: AllowedStorageLocation::PrimaryOnly,
            request,
            accept: Vec::new(),
            parser,
            mode: ResponseMode::Buffered,
            calculate_response_md5: false,
        }
    }

    /// Allow reads from the secondary endpoint.
    pub fn readable_from_secondary(mut self) -> Self {
        self.allowed_location = AllowedStorageLocation::PrimaryOrSecondary;
        self
    }

    pub fn accept_status(mut self, status: StatusCode) -> Self {
        self.accept.push(status);
        self
    }

    pub fn streamed(mut self, target: DownloadTarget) -> Self {
        self.mode = ResponseMode::Streamed(target);
        self
    }

    pub fn with_response_md5(mut self, calculate: bool) -> Self {
        self.calculate_response_md5 = calculate;
        self
    }

    /// Whether `status` ends the attempt successfully.
    pub fn is_expected_status(&self, status: StatusCode) -> bool {
        status.is_success() || self.accept.contains(&status)
    }

    /// Build the request for one attempt at `location`.
    ///
    /// Depends only on the command, its download progress, the given
    /// timeout and the context, so every attempt gets an equivalent,
    /// freshly-built request.
    pub fn build_request(
        &self,
        location: StorageLocation,
        server_timeout: Option<Duration>,
        ctx: &OperationContext,
    ) -> Result<HttpRequest> {
        if let Some(name) = &self.request.invalid_header {
            return Err(StorageError::invalid_argument(format!(
                "invalid name or value for header {name}"
            )));
        }

        let mut url = self
            .storage_uri
            .location(location)
            .cloned()
            .ok_or_else(|| {
                StorageError::invalid_argument(format!("no URI configured for {location:?}"))
            })?;

        let timeout_secs = server_timeout.map(|t| t.as_secs().max(1));
        if !self.request.query.is_empty() || timeout_secs.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.request.query {
                pairs.append_pair(k, v);
            }
            if let Some(secs) = timeout_secs {
                pairs.append_pair(QUERY_TIMEOUT, &secs.to_string());
            }
        }
        self.credentials.transform_url(&mut url);

        let mut request = HttpRequest::new(self.request.method.clone(), url);
        request.headers = self.request.headers.clone();
        request.body = self.request.body.clone();

        request.set_header(HEADER_VERSION, API_VERSION)?;
        request.set_header(HEADER_DATE, &httpdate::fmt_http_date(SystemTime::now()))?;
        request.set_header(HEADER_CLIENT_REQUEST_ID, ctx.client_request_id())?;
        request.set_header("user-agent", USER_AGENT)?;
        for (name, value) in ctx.user_headers() {
            request.headers.insert(name.clone(), value.clone());
        }

        if let ResponseMode::Streamed(target) = &self.mode {
            if let Some(range) = target.range_header() {
                request.set_header(HEADER_RANGE, &range)?;
            }
            if target.buffer.total_written() > 0 {
                if let Some(etag) = target.session().etag {
                    request.set_header("if-match", &etag)?;
                }
            }
        }

        Ok(request)
    }
}

/// Parser for operations whose response carries nothing of interest.
pub fn parse_unit(_head: &ResponseHead, _body: Bytes) -> Result<()> {
    Ok(())
}

/// Parser returning the raw body.
pub fn parse_body(_head: &ResponseHead, body: Bytes) -> Result<Bytes> {
    Ok(body)
}

/// Parser for existence checks: true unless the service said 404.
pub fn parse_exists(head: &ResponseHead, _body: Bytes) -> Result<bool> {
    Ok(head.status != StatusCode::NOT_FOUND)
}

/// Parser for create-if-not-exists: true when the resource was created.
pub fn parse_created(head: &ResponseHead, _body: Bytes) -> Result<bool> {
    Ok(head.status != StatusCode::CONFLICT)
}

// -- Tests -------------------------------------------------------------------
