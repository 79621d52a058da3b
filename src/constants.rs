//! Wire-protocol constants: header names, query keys and size limits.

/// REST API version sent with every request.
pub const API_VERSION: &str = "2023-11-03";

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("blobkit/", env!("CARGO_PKG_VERSION"));

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

/// Default block size used by block blob output streams.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * MIB;

/// Largest block the service accepts in a single put-block.
pub const MAX_BLOCK_SIZE: usize = 100 * MIB;

/// Page blobs are addressed in units of this many bytes.
pub const PAGE_SIZE: u64 = 512;

/// Largest range a single put-page call may write.
pub const MAX_PAGE_WRITE: usize = 4 * MIB;

/// Largest block a single append-block call may write.
pub const MAX_APPEND_BLOCK: usize = 4 * MIB;

/// Largest blob `upload_from_bytes` sends in a single put.
pub const MAX_SINGLE_PUT_SIZE: usize = 256 * MIB;

/// Largest range for which the service returns a per-range MD5.
pub const MAX_RANGE_MD5_SIZE: u64 = 4 * MIB as u64;

/// Stored access policies a container can hold.
pub const MAX_SHARED_ACCESS_POLICIES: usize = 5;

/// Default number of concurrent chunk uploads per output stream.
pub const DEFAULT_PARALLELISM: usize = 3;

/// Default upper bound on bytes buffered between network and consumer.
pub const DEFAULT_MAX_DOWNLOAD_BUFFER: usize = 64 * MIB;

/// Largest error body drained when a request fails.
pub const MAX_ERROR_BODY: usize = 64 * KIB;

// -- Headers -----------------------------------------------------------------

pub const HEADER_PREFIX: &str = "x-ms-";
pub const HEADER_META_PREFIX: &str = "x-ms-meta-";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_DATE: &str = "x-ms-date";
pub const HEADER_VERSION: &str = "x-ms-version";
pub const HEADER_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
pub const HEADER_REQUEST_ID: &str = "x-ms-request-id";
pub const HEADER_ERROR_CODE: &str = "x-ms-error-code";
pub const HEADER_RANGE: &str = "x-ms-range";
pub const HEADER_RANGE_GET_CONTENT_MD5: &str = "x-ms-range-get-content-md5";
pub const HEADER_BLOB_TYPE: &str = "x-ms-blob-type";
pub const HEADER_BLOB_PUBLIC_ACCESS: &str = "x-ms-blob-public-access";
pub const HEADER_BLOB_CACHE_CONTROL: &str = "x-ms-blob-cache-control";
pub const HEADER_BLOB_CONTENT_DISPOSITION: &str = "x-ms-blob-content-disposition";
pub const HEADER_BLOB_CONTENT_ENCODING: &str = "x-ms-blob-content-encoding";
pub const HEADER_BLOB_CONTENT_LANGUAGE: &str = "x-ms-blob-content-language";
pub const HEADER_BLOB_CONTENT_LENGTH: &str = "x-ms-blob-content-length";
pub const HEADER_BLOB_CONTENT_MD5: &str = "x-ms-blob-content-md5";
pub const HEADER_BLOB_CONTENT_TYPE: &str = "x-ms-blob-content-type";
pub const HEADER_BLOB_SEQUENCE_NUMBER: &str = "x-ms-blob-sequence-number";
pub const HEADER_SEQUENCE_NUMBER_ACTION: &str = "x-ms-sequence-number-action";
pub const HEADER_BLOB_APPEND_OFFSET: &str = "x-ms-blob-append-offset";
pub const HEADER_BLOB_COMMITTED_BLOCK_COUNT: &str = "x-ms-blob-committed-block-count";
pub const HEADER_CONDITION_APPEND_POS: &str = "x-ms-blob-condition-appendpos";
pub const HEADER_CONDITION_MAX_SIZE: &str = "x-ms-blob-condition-maxsize";
pub const HEADER_IF_SEQUENCE_NUMBER_LE: &str = "x-ms-if-sequence-number-le";
pub const HEADER_IF_SEQUENCE_NUMBER_LT: &str = "x-ms-if-sequence-number-lt";
pub const HEADER_IF_SEQUENCE_NUMBER_EQ: &str = "x-ms-if-sequence-number-eq";
pub const HEADER_PAGE_WRITE: &str = "x-ms-page-write";
pub const HEADER_DELETE_SNAPSHOTS: &str = "x-ms-delete-snapshots";
pub const HEADER_SNAPSHOT: &str = "x-ms-snapshot";
pub const HEADER_COPY_SOURCE: &str = "x-ms-copy-source";
pub const HEADER_COPY_ID: &str = "x-ms-copy-id";
pub const HEADER_COPY_STATUS: &str = "x-ms-copy-status";
pub const HEADER_COPY_PROGRESS: &str = "x-ms-copy-progress";
pub const HEADER_COPY_COMPLETION_TIME: &str = "x-ms-copy-completion-time";
pub const HEADER_COPY_STATUS_DESCRIPTION: &str = "x-ms-copy-status-description";
pub const HEADER_COPY_ACTION: &str = "x-ms-copy-action";
pub const HEADER_SOURCE_IF_MATCH: &str = "x-ms-source-if-match";
pub const HEADER_SOURCE_IF_NONE_MATCH: &str = "x-ms-source-if-none-match";
pub const HEADER_SOURCE_IF_MODIFIED_SINCE: &str = "x-ms-source-if-modified-since";
pub const HEADER_SOURCE_IF_UNMODIFIED_SINCE: &str = "x-ms-source-if-unmodified-since";
pub const HEADER_LEASE_ID: &str = "x-ms-lease-id";
pub const HEADER_LEASE_ACTION: &str = "x-ms-lease-action";
pub const HEADER_LEASE_DURATION: &str = "x-ms-lease-duration";
pub const HEADER_LEASE_BREAK_PERIOD: &str = "x-ms-lease-break-period";
pub const HEADER_LEASE_TIME: &str = "x-ms-lease-time";
pub const HEADER_LEASE_STATE: &str = "x-ms-lease-state";
pub const HEADER_LEASE_STATUS: &str = "x-ms-lease-status";
pub const HEADER_PROPOSED_LEASE_ID: &str = "x-ms-proposed-lease-id";

// -- Query parameters --------------------------------------------------------

pub const QUERY_COMP: &str = "comp";
pub const QUERY_RESTYPE: &str = "restype";
pub const QUERY_TIMEOUT: &str = "timeout";
pub const QUERY_SNAPSHOT: &str = "snapshot";
pub const QUERY_BLOCK_ID: &str = "blockid";
pub const QUERY_BLOCK_LIST_TYPE: &str = "blocklisttype";
pub const QUERY_COPY_ID: &str = "copyid";
pub const QUERY_PREFIX: &str = "prefix";
pub const QUERY_DELIMITER: &str = "delimiter";
pub const QUERY_MARKER: &str = "marker";
pub const QUERY_MAX_RESULTS: &str = "maxresults";
pub const QUERY_INCLUDE: &str = "include";

/// Default virtual-directory delimiter for hierarchical listings.
pub const DEFAULT_DELIMITER: &str = "/";
