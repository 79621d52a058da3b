//! Outcome of one physical HTTP attempt.

use http::StatusCode;
use std::time::{Instant, SystemTime};

use crate::constants::{HEADER_REQUEST_ID, HEADER_BLOB_CONTENT_MD5};
use crate::errors::StorageError;
use crate::storage_uri::StorageLocation;
use crate::transport::ResponseHead;

/// Record of one attempt, appended to the owning
/// [`OperationContext`](crate::OperationContext) in attempt order.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub target_location: StorageLocation,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    /// `None` when no response head arrived.
    pub status: Option<StatusCode>,
    pub service_request_id: Option<String>,
    pub service_request_date: Option<String>,
    pub content_length: Option<u64>,
    pub content_md5: Option<String>,
    pub etag: Option<String>,
    pub error: Option<StorageError>,
    /// Base64 MD5 computed over the received body, when requested.
    pub calculated_response_md5: Option<String>,
    started: Instant,
}

impl RequestResult {
    pub fn start(target_location: StorageLocation) -> Self {
        Self {
            target_location,
            start_time: SystemTime::now(),
            end_time: None,
            status: None,
            service_request_id: None,
            service_request_date: None,
            content_length: None,
            content_md5: None,
            etag: None,
            error: None,
            calculated_response_md5: None,
            started: Instant::now(),
        }
    }

    /// Copy the interesting parts of a response head.
    pub fn record_head(&mut self, head: &ResponseHead) {
        self.status = Some(head.status);
        self.service_request_id = head.header(HEADER_REQUEST_ID).map(str::to_string);
        self.service_request_date = head.header("date").map(str::to_string);
        self.content_length = head.content_length();
        self.content_md5 = head
            .header("content-md5")
            .or_else(|| head.header(HEADER_BLOB_CONTENT_MD5))
            .map(str::to_string);
        self.etag = head.header("etag").map(str::to_string);
    }

    /// Mark the attempt finished, with its error if it failed.
    pub fn finish(&mut self, error: Option<StorageError>) {
        self.end_time = Some(SystemTime::now());
        self.error = error;
    }

    /// Time spent in this attempt so far.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub fn is_success(&self) -> bool {
        self.end_time.is_some() && self.error.is_none()
    }
}
