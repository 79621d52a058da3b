//! Request templates for every service operation.
//!
//! Each function returns a [`RequestSpec`] that depends only on its
//! arguments.  Addressing, signing and per-attempt headers are added later
//! by [`StorageCommand::build_request`](crate::command::StorageCommand::build_request).

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::Method;
use md5::{Digest, Md5};
use std::time::Duration;

use crate::command::RequestSpec;
use crate::constants::*;
use crate::models::{
    apply_condition, apply_metadata, lease_duration_value, range_value, AccessCondition,
    BlobListingDetails, BlobProperties, BlockListingFilter, ContainerPublicAccess,
    DeleteSnapshotsOption, Metadata, SequenceNumberAction,
};

/// Lease operations shared by containers and blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    /// `None` duration is an infinite lease.
    Acquire {
        duration: Option<Duration>,
        proposed_lease_id: Option<String>,
    },
    Renew,
    Change { proposed_lease_id: String },
    Release,
    /// `None` break period uses the service default.
    Break { break_period: Option<Duration> },
}

impl LeaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseAction::Acquire { .. } => "acquire",
            LeaseAction::Renew => "renew",
            LeaseAction::Change { .. } => "change",
            LeaseAction::Release => "release",
            LeaseAction::Break { .. } => "break",
        }
    }
}

/// Base64 MD5 of `data`, used for transactional `Content-MD5`.
pub fn content_md5(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(data))
}

fn container(method: Method) -> RequestSpec {
    RequestSpec::new(method).query(QUERY_RESTYPE, "container")
}

fn with_snapshot(spec: RequestSpec, snapshot: Option<&str>) -> RequestSpec {
    match snapshot {
        Some(s) => spec.query(QUERY_SNAPSHOT, s),
        None => spec,
    }
}

fn with_transactional_md5(spec: RequestSpec, body: &[u8], enabled: bool) -> RequestSpec {
    if enabled {
        spec.header("content-md5", content_md5(body))
    } else {
        spec
    }
}

fn lease(spec: RequestSpec, action: &LeaseAction, condition: Option<&AccessCondition>) -> RequestSpec {
    let mut spec = apply_condition(
        spec.query(QUERY_COMP, "lease")
            .header(HEADER_LEASE_ACTION, action.as_str()),
        condition,
    );
    match action {
        LeaseAction::Acquire {
            duration,
            proposed_lease_id,
        } => {
            spec = spec.header(HEADER_LEASE_DURATION, lease_duration_value(*duration));
            if let Some(id) = proposed_lease_id {
                spec = spec.header(HEADER_PROPOSED_LEASE_ID, id);
            }
        }
        LeaseAction::Change { proposed_lease_id } => {
            spec = spec.header(HEADER_PROPOSED_LEASE_ID, proposed_lease_id);
        }
        LeaseAction::Break {
            break_period: Some(period),
        } => {
            spec = spec.header(HEADER_LEASE_BREAK_PERIOD, period.as_secs().to_string());
        }
        _ => {}
    }
    spec
}

fn listing(
    spec: RequestSpec,
    prefix: Option<&str>,
    max_results: Option<u32>,
    marker: Option<&str>,
) -> RequestSpec {
    let mut spec = spec.query(QUERY_COMP, "list");
    if let Some(p) = prefix.filter(|p| !p.is_empty()) {
        spec = spec.query(QUERY_PREFIX, p);
    }
    if let Some(m) = marker.filter(|m| !m.is_empty()) {
        spec = spec.query(QUERY_MARKER, m);
    }
    if let Some(n) = max_results {
        spec = spec.query(QUERY_MAX_RESULTS, n.to_string());
    }
    spec
}

// ── Service ─────────────────────────────────────────────────────────

pub fn list_containers(
    prefix: Option<&str>,
    include_metadata: bool,
    max_results: Option<u32>,
    marker: Option<&str>,
) -> RequestSpec {
    let spec = listing(RequestSpec::new(Method::GET), prefix, max_results, marker);
    if include_metadata {
        spec.query(QUERY_INCLUDE, "metadata")
    } else {
        spec
    }
}

// ── Containers ──────────────────────────────────────────────────────

pub fn create_container(metadata: &Metadata, access: ContainerPublicAccess) -> RequestSpec {
    let mut spec = apply_metadata(container(Method::PUT), metadata);
    if let Some(v) = access.header_value() {
        spec = spec.header(HEADER_BLOB_PUBLIC_ACCESS, v);
    }
    spec
}

pub fn delete_container(condition: Option<&AccessCondition>) -> RequestSpec {
    apply_condition(container(Method::DELETE), condition)
}

pub fn container_properties(condition: Option<&AccessCondition>) -> RequestSpec {
    let lease_only = condition.and_then(|c| c.lease_id.clone()).map(AccessCondition::lease);
    apply_condition(container(Method::HEAD), lease_only.as_ref())
}

pub fn set_container_metadata(
    metadata: &Metadata,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let spec = apply_metadata(container(Method::PUT).query(QUERY_COMP, "metadata"), metadata);
    apply_condition(spec, condition)
}

pub fn get_container_acl(condition: Option<&AccessCondition>) -> RequestSpec {
    let lease_only = condition.and_then(|c| c.lease_id.clone()).map(AccessCondition::lease);
    apply_condition(container(Method::GET).query(QUERY_COMP, "acl"), lease_only.as_ref())
}

/// `body` is the rendered `<SignedIdentifiers>` document.  A private
/// container sends no public-access header.
pub fn set_container_acl(
    body: String,
    access: ContainerPublicAccess,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let mut spec = container(Method::PUT)
        .query(QUERY_COMP, "acl")
        .header("content-type", "application/xml");
    if let Some(v) = access.header_value() {
        spec = spec.header(HEADER_BLOB_PUBLIC_ACCESS, v);
    }
    apply_condition(spec, condition).body(body)
}

pub fn container_lease(action: &LeaseAction, condition: Option<&AccessCondition>) -> RequestSpec {
    lease(container(Method::PUT), action, condition)
}

/// List blobs.  A flat listing sends no delimiter; a hierarchical one
/// groups names by `/`.
pub fn list_blobs(
    prefix: Option<&str>,
    flat: bool,
    details: BlobListingDetails,
    max_results: Option<u32>,
    marker: Option<&str>,
) -> RequestSpec {
    let mut spec = listing(container(Method::GET), prefix, max_results, marker);
    if !flat {
        spec = spec.query(QUERY_DELIMITER, DEFAULT_DELIMITER);
    }
    if let Some(include) = details.include_value() {
        spec = spec.query(QUERY_INCLUDE, include);
    }
    spec
}

// ── Blobs (all types) ───────────────────────────────────────────────

/// Ranges are added per attempt by the download target.
pub fn get_blob(snapshot: Option<&str>, condition: Option<&AccessCondition>) -> RequestSpec {
    apply_condition(with_snapshot(RequestSpec::new(Method::GET), snapshot), condition)
}

pub fn blob_properties(snapshot: Option<&str>, condition: Option<&AccessCondition>) -> RequestSpec {
    apply_condition(with_snapshot(RequestSpec::new(Method::HEAD), snapshot), condition)
}

pub fn delete_blob(
    snapshot: Option<&str>,
    snapshots: DeleteSnapshotsOption,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let mut spec = with_snapshot(RequestSpec::new(Method::DELETE), snapshot);
    if let Some(v) = snapshots.header_value() {
        spec = spec.header(HEADER_DELETE_SNAPSHOTS, v);
    }
    apply_condition(spec, condition)
}

pub fn set_blob_properties(
    properties: &BlobProperties,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let spec = properties.apply_to(RequestSpec::new(Method::PUT).query(QUERY_COMP, "properties"));
    apply_condition(spec, condition)
}

pub fn set_blob_metadata(metadata: &Metadata, condition: Option<&AccessCondition>) -> RequestSpec {
    let spec = apply_metadata(RequestSpec::new(Method::PUT).query(QUERY_COMP, "metadata"), metadata);
    apply_condition(spec, condition)
}

pub fn snapshot_blob(metadata: &Metadata, condition: Option<&AccessCondition>) -> RequestSpec {
    let spec = apply_metadata(RequestSpec::new(Method::PUT).query(QUERY_COMP, "snapshot"), metadata);
    apply_condition(spec, condition)
}

pub fn blob_lease(action: &LeaseAction, condition: Option<&AccessCondition>) -> RequestSpec {
    lease(RequestSpec::new(Method::PUT), action, condition)
}

pub fn start_copy(
    source: &str,
    metadata: &Metadata,
    source_condition: Option<&AccessCondition>,
    destination_condition: Option<&AccessCondition>,
) -> RequestSpec {
    let mut spec = apply_metadata(
        RequestSpec::new(Method::PUT).header(HEADER_COPY_SOURCE, source),
        metadata,
    );
    if let Some(c) = source_condition {
        spec = c.apply_as_source(spec);
    }
    apply_condition(spec, destination_condition)
}

pub fn abort_copy(copy_id: &str, condition: Option<&AccessCondition>) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "copy")
        .query(QUERY_COPY_ID, copy_id)
        .header(HEADER_COPY_ACTION, "abort");
    apply_condition(spec, condition)
}

// ── Block blobs ─────────────────────────────────────────────────────

/// Single-shot upload of a whole block blob.
pub fn put_block_blob(
    body: Bytes,
    properties: &BlobProperties,
    metadata: &Metadata,
    condition: Option<&AccessCondition>,
    transactional_md5: bool,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT).header(HEADER_BLOB_TYPE, "BlockBlob");
    let spec = with_transactional_md5(spec, &body, transactional_md5);
    let spec = apply_metadata(properties.apply_to(spec), metadata);
    apply_condition(spec, condition).body(body)
}

pub fn put_block(
    block_id: &str,
    body: Bytes,
    lease_id: Option<&str>,
    transactional_md5: bool,
) -> RequestSpec {
    let mut spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "block")
        .query(QUERY_BLOCK_ID, block_id);
    if let Some(id) = lease_id {
        spec = spec.header(HEADER_LEASE_ID, id);
    }
    with_transactional_md5(spec, &body, transactional_md5).body(body)
}

/// `body` is the rendered `<BlockList>` document.
pub fn put_block_list(
    body: String,
    properties: &BlobProperties,
    metadata: &Metadata,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "blocklist")
        .header("content-type", "application/xml");
    let spec = apply_metadata(properties.apply_to(spec), metadata);
    apply_condition(spec, condition).body(body)
}

pub fn get_block_list(
    filter: BlockListingFilter,
    snapshot: Option<&str>,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let lease_only = condition.and_then(|c| c.lease_id.clone()).map(AccessCondition::lease);
    let spec = RequestSpec::new(Method::GET)
        .query(QUERY_COMP, "blocklist")
        .query(QUERY_BLOCK_LIST_TYPE, filter.query_value());
    apply_condition(with_snapshot(spec, snapshot), lease_only.as_ref())
}

// ── Page blobs ──────────────────────────────────────────────────────

pub fn create_page_blob(
    size: u64,
    sequence_number: Option<u64>,
    properties: &BlobProperties,
    metadata: &Metadata,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let mut spec = RequestSpec::new(Method::PUT)
        .header(HEADER_BLOB_TYPE, "PageBlob")
        .header(HEADER_BLOB_CONTENT_LENGTH, size.to_string());
    if let Some(n) = sequence_number {
        spec = spec.header(HEADER_BLOB_SEQUENCE_NUMBER, n.to_string());
    }
    let spec = apply_metadata(properties.apply_to(spec), metadata);
    apply_condition(spec, condition)
}

pub fn resize_page_blob(size: u64, condition: Option<&AccessCondition>) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "properties")
        .header(HEADER_BLOB_CONTENT_LENGTH, size.to_string());
    apply_condition(spec, condition)
}

pub fn set_sequence_number(
    action: SequenceNumberAction,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT).query(QUERY_COMP, "properties");
    let spec = match action {
        SequenceNumberAction::Max(n) => spec
            .header(HEADER_SEQUENCE_NUMBER_ACTION, "max")
            .header(HEADER_BLOB_SEQUENCE_NUMBER, n.to_string()),
        SequenceNumberAction::Update(n) => spec
            .header(HEADER_SEQUENCE_NUMBER_ACTION, "update")
            .header(HEADER_BLOB_SEQUENCE_NUMBER, n.to_string()),
        SequenceNumberAction::Increment => spec.header(HEADER_SEQUENCE_NUMBER_ACTION, "increment"),
    };
    apply_condition(spec, condition)
}

pub fn put_pages(
    offset: u64,
    body: Bytes,
    condition: Option<&AccessCondition>,
    transactional_md5: bool,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "page")
        .header(HEADER_PAGE_WRITE, "update")
        .header(HEADER_RANGE, range_value(offset, body.len() as u64));
    let spec = with_transactional_md5(spec, &body, transactional_md5);
    apply_condition(spec, condition).body(body)
}

pub fn clear_pages(offset: u64, length: u64, condition: Option<&AccessCondition>) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT)
        .query(QUERY_COMP, "page")
        .header(HEADER_PAGE_WRITE, "clear")
        .header(HEADER_RANGE, range_value(offset, length));
    apply_condition(spec, condition)
}

pub fn get_page_ranges(
    range: Option<(u64, u64)>,
    snapshot: Option<&str>,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let mut spec = with_snapshot(RequestSpec::new(Method::GET).query(QUERY_COMP, "pagelist"), snapshot);
    if let Some((offset, length)) = range {
        spec = spec.header(HEADER_RANGE, range_value(offset, length));
    }
    apply_condition(spec, condition)
}

// ── Append blobs ────────────────────────────────────────────────────

pub fn create_append_blob(
    properties: &BlobProperties,
    metadata: &Metadata,
    condition: Option<&AccessCondition>,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT).header(HEADER_BLOB_TYPE, "AppendBlob");
    let spec = apply_metadata(properties.apply_to(spec), metadata);
    apply_condition(spec, condition)
}

pub fn append_block(
    body: Bytes,
    condition: Option<&AccessCondition>,
    transactional_md5: bool,
) -> RequestSpec {
    let spec = RequestSpec::new(Method::PUT).query(QUERY_COMP, "appendblock");
    let spec = with_transactional_md5(spec, &body, transactional_md5);
    apply_condition(spec, condition).body(body)
}

// ── Tests ───────────────────────────────────────────────────────────
