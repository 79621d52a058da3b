//! Storage client error types.
//!
//! Every public operation resolves to either a success value or a single
//! [`StorageError`].  Variants mirror the failure taxonomy of the client:
//! argument errors fail immediately, transport/server/checksum failures
//! are handed to the retry policy, and stream-state errors stay local to
//! the upload/download pipeline.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Boxed inner error carried by [`StorageError::Transport`].
pub type InnerError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors produced by the storage client.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A caller-supplied argument was rejected before anything was sent.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The request never produced a complete HTTP response.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<InnerError>,
    },

    /// The service answered with a non-success status.
    #[error("server returned {status}: {code} {message}")]
    Server {
        status: StatusCode,
        /// Service error code from the `<Error><Code>` body, or the
        /// `x-ms-error-code` header when the body is empty.
        code: String,
        message: String,
        /// Value of `x-ms-request-id`, if the service sent one.
        request_id: Option<String>,
    },

    /// A body checksum did not match the one the service advertised.
    #[error("MD5 mismatch: expected {expected}, calculated {calculated}")]
    Md5Mismatch { expected: String, calculated: String },

    /// The maximum execution time elapsed before the operation finished.
    #[error("operation timed out after {elapsed:?}")]
    ClientTimeout {
        elapsed: Duration,
        /// The failure of the last attempt, if there was one.
        last_error: Option<Box<StorageError>>,
    },

    /// A response body could not be parsed.
    #[error("failed to parse response: {message}")]
    Parse { message: String },

    /// A request body could not be rendered.
    #[error("failed to build request body: {message}")]
    XmlCreation { message: String },

    /// The destination of a download rejected a write.
    #[error("output stream error: {message}")]
    OutputStream { message: String },

    /// A write would exceed the capacity declared for the blob.
    #[error("write of {attempted} bytes exceeds declared capacity of {capacity} bytes")]
    OutputStreamFull { capacity: u64, attempted: u64 },

    /// The stream was already closed.
    #[error("stream is closed")]
    StreamClosed,

    /// A background upload or download task panicked or was cancelled.
    #[error("background task failed: {message}")]
    TaskFailed { message: String },
}

impl StorageError {
    /// Build an [`StorageError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        StorageError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build a [`StorageError::Parse`].
    pub fn parse(message: impl Into<String>) -> Self {
        StorageError::Parse {
            message: message.into(),
        }
    }

    /// Wrap a transport-level error.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Transport {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// Stable string code for this error.
    pub fn code(&self) -> &str {
        match self {
            StorageError::InvalidArgument { .. } => "InvalidArgument",
            StorageError::Transport { .. } => "TransportError",
            StorageError::Server { code, .. } => code,
            StorageError::Md5Mismatch { .. } => "Md5Mismatch",
            StorageError::ClientTimeout { .. } => "ClientTimeout",
            StorageError::Parse { .. } => "ParseError",
            StorageError::XmlCreation { .. } => "XmlCreationError",
            StorageError::OutputStream { .. } => "OutputStreamError",
            StorageError::OutputStreamFull { .. } => "OutputStreamFull",
            StorageError::StreamClosed => "StreamClosed",
            StorageError::TaskFailed { .. } => "TaskFailed",
        }
    }

    /// The HTTP status that caused this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            StorageError::Server { status, .. } => Some(*status),
            StorageError::ClientTimeout {
                last_error: Some(inner),
                ..
            } => inner.status(),
            _ => None,
        }
    }

    /// Whether the executor should consult the retry policy for this
    /// error.  Local errors (arguments, stream state, parsing) never are.
    pub fn is_retry_candidate(&self) -> bool {
        matches!(
            self,
            StorageError::Transport { .. }
                | StorageError::Server { .. }
                | StorageError::Md5Mismatch { .. }
        )
    }

    /// True for a server error with the given status.
    pub fn is_status(&self, expected: StatusCode) -> bool {
        self.status() == Some(expected)
    }
}

// -- Tests -------------------------------------------------------------------
