//! Per-operation request options.

use std::time::Duration;

use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_DOWNLOAD_BUFFER, DEFAULT_PARALLELISM, MAX_BLOCK_SIZE};
use crate::errors::{Result, StorageError};
use crate::models::AccessCondition;
use crate::operation_context::OperationContext;
use crate::storage_uri::LocationMode;

/// Options that shape how an operation is executed.
///
/// Client-level defaults are merged with per-call overrides by
/// [`BlobRequestOptions::apply_defaults`].  A per-call value replaces the
/// client's options as a whole; only the two optional durations fall back
/// to the client when left unset.  To change one field, start from the
/// client's options:
///
/// ```ignore
/// let options = BlobRequestOptions {
///     parallelism_factor: 8,
///     ..client.default_options().clone()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRequestOptions {
    /// Server-side timeout sent as the `timeout` query parameter.
    pub server_timeout: Option<Duration>,
    /// Wall-clock budget for one execution, retries included.  Each chunk
    /// upload and the commit of an output stream get their own.
    pub maximum_execution_time: Option<Duration>,
    /// Upper bound on bytes buffered between a download and its consumer.
    pub maximum_download_buffer_size: usize,
    /// Whether reads may be retried against the secondary endpoint.
    pub location_mode: LocationMode,
    /// Send `Content-MD5` with every chunk and validate per-range hashes.
    pub use_transactional_md5: bool,
    /// Compute and store the whole-blob MD5 on upload.
    pub store_blob_content_md5: bool,
    /// Skip validation of the stored blob MD5 on full downloads.
    pub disable_content_md5_validation: bool,
    /// Number of chunk uploads an output stream keeps in flight.
    pub parallelism_factor: usize,
    /// Block size for block blob output streams.
    pub block_size: usize,
    /// Treat an append-position/max-size 412 on a retried append as
    /// success.  Only sound with a single writer per blob.
    pub absorb_conditional_errors_on_retry: bool,
}

impl Default for BlobRequestOptions {
    fn default() -> Self {
        Self {
            server_timeout: None,
            maximum_execution_time: None,
            maximum_download_buffer_size: DEFAULT_MAX_DOWNLOAD_BUFFER,
            location_mode: LocationMode::PrimaryOnly,
            use_transactional_md5: false,
            store_blob_content_md5: true,
            disable_content_md5_validation: false,
            parallelism_factor: DEFAULT_PARALLELISM,
            block_size: DEFAULT_BLOCK_SIZE,
            absorb_conditional_errors_on_retry: false,
        }
    }
}

impl BlobRequestOptions {
    /// Merge `overrides` over `self`.  Every non-optional field comes from
    /// `overrides`; `server_timeout` and `maximum_execution_time` fall back
    /// to `self` when unset.
    pub fn apply_defaults(&self, overrides: Option<&BlobRequestOptions>) -> BlobRequestOptions {
        match overrides {
            None => self.clone(),
            Some(o) => BlobRequestOptions {
                server_timeout: o.server_timeout.or(self.server_timeout),
                maximum_execution_time: o.maximum_execution_time.or(self.maximum_execution_time),
                ..o.clone()
            },
        }
    }

    /// Reject option combinations that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism_factor == 0 {
            return Err(StorageError::invalid_argument(
                "parallelism_factor must be at least 1",
            ));
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "block_size must be between 1 and {MAX_BLOCK_SIZE} bytes"
            )));
        }
        if self.maximum_download_buffer_size == 0 {
            return Err(StorageError::invalid_argument(
                "maximum_download_buffer_size must be positive",
            ));
        }
        Ok(())
    }
}

/// Optional per-call arguments shared by every operation.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub access_condition: Option<AccessCondition>,
    /// Overrides merged over the client defaults.
    pub request_options: Option<BlobRequestOptions>,
    /// Context to record attempts in; a fresh one is used when unset.
    pub operation_context: Option<OperationContext>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(mut self, condition: AccessCondition) -> Self {
        self.access_condition = Some(condition);
        self
    }

    /// Replace the client's options for this call; see
    /// [`BlobRequestOptions`] for how the two are merged.
    pub fn options(mut self, options: BlobRequestOptions) -> Self {
        self.request_options = Some(options);
        self
    }

    pub fn context(mut self, ctx: OperationContext) -> Self {
        self.operation_context = Some(ctx);
        self
    }
}
