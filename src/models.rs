//! Data types exchanged with the service: properties, listings, block
//! lists, page ranges and access conditions.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use crate::command::RequestSpec;
use crate::constants::*;
use crate::storage_uri::StorageLocation;
use crate::transport::ResponseHead;

/// User-defined `x-ms-meta-*` name/value pairs.
pub type Metadata = BTreeMap<String, String>;

/// Collect `x-ms-meta-*` headers.
pub fn metadata_from_headers(head: &ResponseHead) -> Metadata {
    head.headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(HEADER_META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

/// Add metadata as `x-ms-meta-*` headers.
pub fn apply_metadata(mut spec: RequestSpec, metadata: &Metadata) -> RequestSpec {
    for (k, v) in metadata {
        let name = format!("{HEADER_META_PREFIX}{}", k.to_ascii_lowercase());
        spec = spec.header(&name, v);
    }
    spec
}

// ── Enumerations ────────────────────────────────────────────────────

/// The three blob variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum BlobType {
    BlockBlob,
    PageBlob,
    AppendBlob,
    #[default]
    Unspecified,
}

impl BlobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobType::BlockBlob => "BlockBlob",
            BlobType::PageBlob => "PageBlob",
            BlobType::AppendBlob => "AppendBlob",
            BlobType::Unspecified => "",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "BlockBlob" => BlobType::BlockBlob,
            "PageBlob" => BlobType::PageBlob,
            "AppendBlob" => BlobType::AppendBlob,
            _ => BlobType::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LeaseStatus {
    Locked,
    Unlocked,
    #[default]
    Unspecified,
}

impl LeaseStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "locked" => LeaseStatus::Locked,
            "unlocked" => LeaseStatus::Unlocked,
            _ => LeaseStatus::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LeaseState {
    Available,
    Leased,
    Expired,
    Breaking,
    Broken,
    #[default]
    Unspecified,
}

impl LeaseState {
    pub fn parse(s: &str) -> Self {
        match s {
            "available" => LeaseState::Available,
            "leased" => LeaseState::Leased,
            "expired" => LeaseState::Expired,
            "breaking" => LeaseState::Breaking,
            "broken" => LeaseState::Broken,
            _ => LeaseState::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum LeaseDuration {
    Infinite,
    Fixed,
    #[default]
    Unspecified,
}

impl LeaseDuration {
    pub fn parse(s: &str) -> Self {
        match s {
            "infinite" => LeaseDuration::Infinite,
            "fixed" => LeaseDuration::Fixed,
            _ => LeaseDuration::Unspecified,
        }
    }
}

/// Public read access level of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum ContainerPublicAccess {
    #[default]
    Off,
    Container,
    Blob,
}

impl ContainerPublicAccess {
    /// Header value, `None` for private containers.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            ContainerPublicAccess::Off => None,
            ContainerPublicAccess::Container => Some("container"),
            ContainerPublicAccess::Blob => Some("blob"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "container" => ContainerPublicAccess::Container,
            "blob" => ContainerPublicAccess::Blob,
            _ => ContainerPublicAccess::Off,
        }
    }
}

/// Operations a shared access signature issued under a stored policy may
/// perform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SharedAccessPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl SharedAccessPermissions {
    /// Service form, always in `racwdl` order.
    pub fn as_service_string(&self) -> String {
        [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, c)| *c)
        .collect()
    }

    /// Parse a permission string in any order.  Unknown letters are an
    /// error.
    pub fn parse(s: &str) -> Option<Self> {
        let mut p = Self::default();
        for c in s.chars() {
            match c {
                'r' => p.read = true,
                'a' => p.add = true,
                'c' => p.create = true,
                'w' => p.write = true,
                'd' => p.delete = true,
                'l' => p.list = true,
                _ => return None,
            }
        }
        Some(p)
    }
}

/// A stored access policy.  Times are ISO 8601 UTC strings as the service
/// returns them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharedAccessPolicy {
    pub start: Option<String>,
    pub expiry: Option<String>,
    pub permissions: SharedAccessPermissions,
}

/// Public access level plus stored access policies keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerPermissions {
    pub public_access: ContainerPublicAccess,
    pub shared_access_policies: BTreeMap<String, SharedAccessPolicy>,
}

/// What happens to snapshots when a blob is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteSnapshotsOption {
    /// Delete the blob only; fails if it has snapshots.
    #[default]
    None,
    IncludeSnapshots,
    DeleteSnapshotsOnly,
}

impl DeleteSnapshotsOption {
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            DeleteSnapshotsOption::None => None,
            DeleteSnapshotsOption::IncludeSnapshots => Some("include"),
            DeleteSnapshotsOption::DeleteSnapshotsOnly => Some("only"),
        }
    }
}

/// How a page blob's sequence number is changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceNumberAction {
    /// Set to the larger of the current value and the given one.
    Max(u64),
    Update(u64),
    Increment,
}

// ── Copy state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CopyStatus {
    Pending,
    Success,
    Aborted,
    Failed,
    Invalid,
}

impl CopyStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => CopyStatus::Pending,
            "success" => CopyStatus::Success,
            "aborted" => CopyStatus::Aborted,
            "failed" => CopyStatus::Failed,
            _ => CopyStatus::Invalid,
        }
    }
}

/// Progress of the last copy into a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyState {
    pub copy_id: String,
    pub status: CopyStatus,
    pub source: Option<String>,
    pub bytes_copied: Option<u64>,
    pub total_bytes: Option<u64>,
    pub completion_time: Option<String>,
    pub status_description: Option<String>,
}

impl CopyState {
    /// Build from `x-ms-copy-*` headers; `None` if no copy was recorded.
    pub fn from_headers(head: &ResponseHead) -> Option<Self> {
        let copy_id = head.header(HEADER_COPY_ID)?.to_string();
        let mut state = CopyState {
            copy_id,
            status: CopyStatus::parse(head.header(HEADER_COPY_STATUS).unwrap_or_default()),
            source: head.header(HEADER_COPY_SOURCE).map(str::to_string),
            bytes_copied: None,
            total_bytes: None,
            completion_time: head.header(HEADER_COPY_COMPLETION_TIME).map(str::to_string),
            status_description: head
                .header(HEADER_COPY_STATUS_DESCRIPTION)
                .map(str::to_string),
        };
        if let Some(progress) = head.header(HEADER_COPY_PROGRESS) {
            state.set_progress(progress);
        }
        Some(state)
    }

    /// Parse a `copied/total` progress string.
    pub fn set_progress(&mut self, progress: &str) {
        if let Some((done, total)) = progress.split_once('/') {
            self.bytes_copied = done.trim().parse().ok();
            self.total_bytes = total.trim().parse().ok();
        }
    }
}

// ── Properties ──────────────────────────────────────────────────────

/// System properties of a blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlobProperties {
    pub blob_type: BlobType,
    pub length: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub content_md5: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub lease_status: LeaseStatus,
    pub lease_state: LeaseState,
    pub lease_duration: LeaseDuration,
    pub page_blob_sequence_number: Option<u64>,
    pub append_blob_committed_block_count: Option<u32>,
}

impl BlobProperties {
    /// Read properties from a get/head blob response.  For ranged reads
    /// the length comes from `Content-Range`.
    pub fn from_headers(head: &ResponseHead) -> Self {
        let length = head
            .header("content-range")
            .and_then(|r| r.rsplit_once('/'))
            .and_then(|(_, total)| total.parse().ok())
            .or_else(|| head.content_length())
            .unwrap_or(0);
        let owned = |name: &str| head.header(name).map(str::to_string);
        BlobProperties {
            blob_type: BlobType::parse(head.header(HEADER_BLOB_TYPE).unwrap_or_default()),
            length,
            content_type: owned("content-type"),
            content_encoding: owned("content-encoding"),
            content_language: owned("content-language"),
            content_disposition: owned("content-disposition"),
            cache_control: owned("cache-control"),
            content_md5: owned(HEADER_BLOB_CONTENT_MD5)
                .or_else(|| if head.header("content-range").is_none() { owned("content-md5") } else { None }),
            etag: owned("etag"),
            last_modified: owned("last-modified"),
            lease_status: LeaseStatus::parse(head.header(HEADER_LEASE_STATUS).unwrap_or_default()),
            lease_state: LeaseState::parse(head.header(HEADER_LEASE_STATE).unwrap_or_default()),
            lease_duration: LeaseDuration::parse(
                head.header(HEADER_LEASE_DURATION).unwrap_or_default(),
            ),
            page_blob_sequence_number: head
                .header(HEADER_BLOB_SEQUENCE_NUMBER)
                .and_then(|v| v.parse().ok()),
            append_blob_committed_block_count: head
                .header(HEADER_BLOB_COMMITTED_BLOCK_COUNT)
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Headers for set-properties and for the commit of a new blob.
    pub fn apply_to(&self, mut spec: RequestSpec) -> RequestSpec {
        let pairs = [
            (HEADER_BLOB_CONTENT_TYPE, &self.content_type),
            (HEADER_BLOB_CONTENT_ENCODING, &self.content_encoding),
            (HEADER_BLOB_CONTENT_LANGUAGE, &self.content_language),
            (HEADER_BLOB_CONTENT_DISPOSITION, &self.content_disposition),
            (HEADER_BLOB_CACHE_CONTROL, &self.cache_control),
            (HEADER_BLOB_CONTENT_MD5, &self.content_md5),
        ];
        for (name, value) in pairs {
            if let Some(v) = value {
                spec = spec.header(name, v);
            }
        }
        spec
    }
}

/// Properties plus metadata and copy state, as returned by
/// `fetch_attributes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlobAttributes {
    pub properties: BlobProperties,
    pub metadata: Metadata,
    pub copy_state: Option<CopyState>,
}

impl BlobAttributes {
    pub fn from_headers(head: &ResponseHead) -> Self {
        Self {
            properties: BlobProperties::from_headers(head),
            metadata: metadata_from_headers(head),
            copy_state: CopyState::from_headers(head),
        }
    }
}

/// System properties of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerProperties {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub lease_status: LeaseStatus,
    pub lease_state: LeaseState,
    pub lease_duration: LeaseDuration,
    pub public_access: ContainerPublicAccess,
}

impl ContainerProperties {
    pub fn from_headers(head: &ResponseHead) -> Self {
        ContainerProperties {
            etag: head.header("etag").map(str::to_string),
            last_modified: head.header("last-modified").map(str::to_string),
            lease_status: LeaseStatus::parse(head.header(HEADER_LEASE_STATUS).unwrap_or_default()),
            lease_state: LeaseState::parse(head.header(HEADER_LEASE_STATE).unwrap_or_default()),
            lease_duration: LeaseDuration::parse(
                head.header(HEADER_LEASE_DURATION).unwrap_or_default(),
            ),
            public_access: ContainerPublicAccess::parse(
                head.header(HEADER_BLOB_PUBLIC_ACCESS).unwrap_or_default(),
            ),
        }
    }
}

/// Container properties plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerAttributes {
    pub properties: ContainerProperties,
    pub metadata: Metadata,
}

// ── Listings ────────────────────────────────────────────────────────

/// Cursor for the next page of a segmented listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    pub next_marker: String,
    /// Location that produced the marker; the next page must be read
    /// from the same place.
    pub target_location: StorageLocation,
}

/// One page of a segmented listing.  A missing token means the listing
/// is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSegment<T> {
    pub results: Vec<T>,
    pub continuation_token: Option<ContinuationToken>,
}

/// A container as returned by list-containers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerItem {
    pub name: String,
    pub properties: ContainerProperties,
    pub metadata: Metadata,
}

/// A blob as returned by list-blobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobItem {
    pub name: String,
    pub snapshot: Option<String>,
    pub properties: BlobProperties,
    pub metadata: Metadata,
    pub copy_state: Option<CopyState>,
}

/// Entry of a hierarchical blob listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ListBlobItem {
    Blob(BlobItem),
    /// A virtual directory (common prefix).
    Prefix(String),
}

/// Extra data to include in a blob listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobListingDetails {
    pub snapshots: bool,
    pub metadata: bool,
    pub uncommitted_blobs: bool,
    pub copy: bool,
}

impl BlobListingDetails {
    pub fn all() -> Self {
        Self {
            snapshots: true,
            metadata: true,
            uncommitted_blobs: true,
            copy: true,
        }
    }

    /// `include=` query value, `None` when nothing extra is requested.
    pub fn include_value(&self) -> Option<String> {
        let parts: Vec<&str> = [
            (self.snapshots, "snapshots"),
            (self.metadata, "metadata"),
            (self.uncommitted_blobs, "uncommittedblobs"),
            (self.copy, "copy"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        (!parts.is_empty()).then(|| parts.join(","))
    }
}

// ── Block lists and page ranges ─────────────────────────────────────

/// Which block list a block id refers to in a put-block-list body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockListMode {
    Committed,
    Uncommitted,
    Latest,
}

impl BlockListMode {
    pub fn element_name(&self) -> &'static str {
        match self {
            BlockListMode::Committed => "Committed",
            BlockListMode::Uncommitted => "Uncommitted",
            BlockListMode::Latest => "Latest",
        }
    }
}

/// Which blocks get-block-list returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockListingFilter {
    Committed,
    Uncommitted,
    #[default]
    All,
}

impl BlockListingFilter {
    pub fn query_value(&self) -> &'static str {
        match self {
            BlockListingFilter::Committed => "committed",
            BlockListingFilter::Uncommitted => "uncommitted",
            BlockListingFilter::All => "all",
        }
    }
}

/// A block id with the list it belongs to (and its size when listed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockListItem {
    pub id: String,
    pub mode: BlockListMode,
    pub size: u64,
}

impl BlockListItem {
    pub fn new(id: impl Into<String>, mode: BlockListMode) -> Self {
        Self {
            id: id.into(),
            mode,
            size: 0,
        }
    }
}

/// An inclusive byte range of a page blob that holds data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageRange {
    pub start: u64,
    pub end: u64,
}

impl PageRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Format an inclusive byte range header value.
pub fn range_value(offset: u64, length: u64) -> String {
    format!("bytes={}-{}", offset, offset + length.saturating_sub(1))
}

// ── Access conditions ───────────────────────────────────────────────

/// Preconditions a request must satisfy on the service side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessCondition {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<SystemTime>,
    pub if_unmodified_since: Option<SystemTime>,
    pub lease_id: Option<String>,
    pub if_sequence_number_less_than_or_equal: Option<u64>,
    pub if_sequence_number_less_than: Option<u64>,
    pub if_sequence_number_equal: Option<u64>,
    pub if_append_position_equal: Option<u64>,
    pub if_max_size_less_than_or_equal: Option<u64>,
}

impl AccessCondition {
    pub fn if_match(etag: impl Into<String>) -> Self {
        Self {
            if_match: Some(etag.into()),
            ..Default::default()
        }
    }

    /// Succeeds only if the resource does not exist yet.
    pub fn if_not_exists() -> Self {
        Self {
            if_none_match: Some("*".to_string()),
            ..Default::default()
        }
    }

    pub fn lease(lease_id: impl Into<String>) -> Self {
        Self {
            lease_id: Some(lease_id.into()),
            ..Default::default()
        }
    }

    pub fn if_modified_since(time: SystemTime) -> Self {
        Self {
            if_modified_since: Some(time),
            ..Default::default()
        }
    }

    /// Copy with the append position replaced.
    pub fn with_append_position(&self, position: u64) -> Self {
        Self {
            if_append_position_equal: Some(position),
            ..self.clone()
        }
    }

    /// Headers for the target resource.
    pub fn apply_to(&self, mut spec: RequestSpec) -> RequestSpec {
        if let Some(v) = &self.if_match {
            spec = spec.header("if-match", v);
        }
        if let Some(v) = &self.if_none_match {
            spec = spec.header("if-none-match", v);
        }
        if let Some(t) = self.if_modified_since {
            spec = spec.header("if-modified-since", httpdate::fmt_http_date(t));
        }
        if let Some(t) = self.if_unmodified_since {
            spec = spec.header("if-unmodified-since", httpdate::fmt_http_date(t));
        }
        if let Some(v) = &self.lease_id {
            spec = spec.header(HEADER_LEASE_ID, v);
        }
        let numeric = [
            (HEADER_IF_SEQUENCE_NUMBER_LE, self.if_sequence_number_less_than_or_equal),
            (HEADER_IF_SEQUENCE_NUMBER_LT, self.if_sequence_number_less_than),
            (HEADER_IF_SEQUENCE_NUMBER_EQ, self.if_sequence_number_equal),
            (HEADER_CONDITION_APPEND_POS, self.if_append_position_equal),
            (HEADER_CONDITION_MAX_SIZE, self.if_max_size_less_than_or_equal),
        ];
        for (name, value) in numeric {
            if let Some(v) = value {
                spec = spec.header(name, v.to_string());
            }
        }
        spec
    }

    /// Headers describing a copy source.  Only ETag and date conditions
    /// apply to sources.
    pub fn apply_as_source(&self, mut spec: RequestSpec) -> RequestSpec {
        if let Some(v) = &self.if_match {
            spec = spec.header(HEADER_SOURCE_IF_MATCH, v);
        }
        if let Some(v) = &self.if_none_match {
            spec = spec.header(HEADER_SOURCE_IF_NONE_MATCH, v);
        }
        if let Some(t) = self.if_modified_since {
            spec = spec.header(HEADER_SOURCE_IF_MODIFIED_SINCE, httpdate::fmt_http_date(t));
        }
        if let Some(t) = self.if_unmodified_since {
            spec = spec.header(HEADER_SOURCE_IF_UNMODIFIED_SINCE, httpdate::fmt_http_date(t));
        }
        spec
    }
}

/// Apply an optional access condition.
pub fn apply_condition(spec: RequestSpec, condition: Option<&AccessCondition>) -> RequestSpec {
    match condition {
        Some(c) => c.apply_to(spec),
        None => spec,
    }
}

/// Lease duration for acquire; `None` is an infinite lease.
pub fn lease_duration_value(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => d.as_secs().to_string(),
        None => "-1".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
