//! Blob references and the operations common to every blob type.
//!
//! [`CloudBlob`] carries the address, snapshot time and the properties and
//! metadata that uploads and `upload_properties` send.  The typed wrappers
//! in the submodules add block, page and append primitives plus
//! `open_write`.

mod append;
mod block;
mod page;

pub use append::CloudAppendBlob;
pub use block::CloudBlockBlob;
pub use page::CloudPageBlob;

use bytes::Bytes;
use http::StatusCode;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

use crate::client::CloudBlobClient;
use crate::command::{parse_exists, parse_unit, DownloadTarget, ResponseParser, StorageCommand};
use crate::constants::{HEADER_COPY_ID, HEADER_RANGE_GET_CONTENT_MD5, HEADER_SNAPSHOT, MAX_RANGE_MD5_SIZE, QUERY_SNAPSHOT};
use crate::container::{parse_lease_id, parse_lease_time, with_lease, CloudBlobContainer};
use crate::download_buffer::StreamDownloadBuffer;
use crate::errors::{Result, StorageError};
use crate::models::{
    AccessCondition, BlobAttributes, BlobProperties, BlobType, DeleteSnapshotsOption, Metadata,
};
use crate::operation_context::OperationContext;
use crate::request_factory::{self, LeaseAction};
use crate::request_options::{BlobRequestOptions, CallOptions};
use crate::storage_uri::StorageUri;
use crate::streams::BlobInputStream;
use crate::transport::ResponseHead;

/// A blob, or one snapshot of it.
#[derive(Clone)]
pub struct CloudBlob {
    container: CloudBlobContainer,
    name: String,
    uri: StorageUri,
    snapshot: Option<String>,
    properties: BlobProperties,
    metadata: Metadata,
}

impl CloudBlob {
    pub(crate) fn new(container: CloudBlobContainer, name: &str, blob_type: BlobType) -> Self {
        let uri = container.uri().append_path(name);
        Self {
            container,
            name: name.to_string(),
            uri,
            snapshot: None,
            properties: BlobProperties {
                blob_type,
                ..Default::default()
            },
            metadata: Metadata::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> &CloudBlobContainer {
        &self.container
    }

    pub fn client(&self) -> &CloudBlobClient {
        self.container.client()
    }

    pub fn uri(&self) -> &StorageUri {
        &self.uri
    }

    pub fn blob_type(&self) -> BlobType {
        self.properties.blob_type
    }

    pub fn snapshot_time(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Reference to the snapshot of this blob taken at `time`.
    pub fn with_snapshot(&self, time: impl Into<String>) -> Self {
        Self {
            snapshot: Some(time.into()),
            ..self.clone()
        }
    }

    /// Primary URL including the snapshot query, for use as a copy source.
    pub fn snapshot_qualified_url(&self) -> Url {
        let mut url = self.uri.primary.clone();
        if let Some(s) = &self.snapshot {
            url.query_pairs_mut().append_pair(QUERY_SNAPSHOT, s);
        }
        url
    }

    /// Properties sent by uploads and [`upload_properties`](Self::upload_properties).
    pub fn properties(&self) -> &BlobProperties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut BlobProperties {
        &mut self.properties
    }

    /// Metadata sent by uploads and [`upload_metadata`](Self::upload_metadata).
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    // ── Plumbing ────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.is_snapshot() {
            return Err(StorageError::invalid_argument(
                "snapshots are read-only",
            ));
        }
        Ok(())
    }

    pub(crate) fn command<T>(
        &self,
        spec: crate::command::RequestSpec,
        parser: ResponseParser<T>,
    ) -> StorageCommand<T> {
        self.client().command(self.uri.clone(), spec, parser)
    }

    pub(crate) async fn run<T: Send>(
        &self,
        cmd: &StorageCommand<T>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
    ) -> Result<T> {
        self.client().executor().execute(cmd, options, ctx).await
    }

    // ── Downloads ───────────────────────────────────────────────────

    /// Build a streamed download of `offset..offset+length` into a fresh
    /// buffer sized by `options`.
    fn download_command(
        &self,
        offset: u64,
        length: Option<u64>,
        options: &BlobRequestOptions,
        condition: Option<&AccessCondition>,
    ) -> Result<(Arc<StreamDownloadBuffer>, StorageCommand<BlobAttributes>)> {
        if length == Some(0) {
            return Err(StorageError::invalid_argument("range length must be positive"));
        }
        let ranged = offset > 0 || length.is_some();
        let range_md5 = ranged
            && options.use_transactional_md5
            && length.is_some_and(|l| l <= MAX_RANGE_MD5_SIZE);
        let validate = if ranged {
            range_md5
        } else {
            !options.disable_content_md5_validation
        };

        let mut spec = request_factory::get_blob(self.snapshot.as_deref(), condition);
        if range_md5 {
            spec = spec.header(HEADER_RANGE_GET_CONTENT_MD5, "true");
        }
        let buffer = Arc::new(StreamDownloadBuffer::new(
            options.maximum_download_buffer_size,
            validate,
        ));
        let target = DownloadTarget::new(buffer.clone(), offset, length).validate_md5(validate);
        let cmd = self
            .command(spec, parse_blob_attributes)
            .streamed(target)
            .readable_from_secondary();
        Ok((buffer, cmd))
    }

    /// Download the whole blob into `writer`.
    pub async fn download_to_writer<W>(&self, writer: &mut W, call: &CallOptions) -> Result<BlobAttributes>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.download_range_to_writer(0, None, writer, call).await
    }

    /// Download `length` bytes starting at `offset` (to the end when
    /// `length` is `None`) into `writer`.
    pub async fn download_range_to_writer<W>(
        &self,
        offset: u64,
        length: Option<u64>,
        writer: &mut W,
        call: &CallOptions,
    ) -> Result<BlobAttributes>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (options, ctx) = self.client().resolve(call)?;
        let (buffer, cmd) =
            self.download_command(offset, length, &options, call.access_condition.as_ref())?;

        let download = self.run(&cmd, &options, &ctx);
        let drain = async {
            let drained = buffer.drain_to(writer).await;
            if let Err(e) = &drained {
                buffer.set_error(e.clone());
            }
            drained
        };
        let (attributes, drained) = tokio::join!(download, drain);
        let attributes = attributes?;
        drained?;
        Ok(attributes)
    }

    pub async fn download_to_bytes(&self, call: &CallOptions) -> Result<Bytes> {
        let mut out = Vec::new();
        self.download_to_writer(&mut out, call).await?;
        Ok(Bytes::from(out))
    }

    /// Start downloading in the background and return a reader over it.
    pub fn open_read(&self, call: &CallOptions) -> Result<BlobInputStream> {
        let (options, ctx) = self.client().resolve(call)?;
        let (buffer, cmd) = self.download_command(0, None, &options, call.access_condition.as_ref())?;
        let executor = self.client().executor().clone();
        Ok(BlobInputStream::spawn(buffer, async move {
            executor.execute(&cmd, &options, &ctx).await
        }))
    }

    // ── Properties, metadata, existence ─────────────────────────────

    pub async fn exists(&self, call: &CallOptions) -> Result<bool> {
        let spec = request_factory::blob_properties(self.snapshot.as_deref(), None);
        let cmd = self
            .command(spec, parse_exists)
            .accept_status(StatusCode::NOT_FOUND)
            .readable_from_secondary();
        self.client().execute(cmd, call).await
    }

    pub async fn fetch_attributes(&self, call: &CallOptions) -> Result<BlobAttributes> {
        let spec = request_factory::blob_properties(
            self.snapshot.as_deref(),
            call.access_condition.as_ref(),
        );
        let cmd = self
            .command(spec, parse_blob_attributes)
            .readable_from_secondary();
        self.client().execute(cmd, call).await
    }

    /// Fetch attributes and store them on this reference.
    pub async fn refresh_attributes(&mut self, call: &CallOptions) -> Result<()> {
        let attributes = self.fetch_attributes(call).await?;
        self.properties = attributes.properties;
        self.metadata = attributes.metadata;
        Ok(())
    }

    /// Replace the blob's content headers with [`properties`](Self::properties).
    pub async fn upload_properties(&self, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        let spec = request_factory::set_blob_properties(&self.properties, call.access_condition.as_ref());
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Replace the blob's metadata with [`metadata`](Self::metadata).
    pub async fn upload_metadata(&self, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        let spec = request_factory::set_blob_metadata(&self.metadata, call.access_condition.as_ref());
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    // ── Delete and snapshot ─────────────────────────────────────────

    pub async fn delete(&self, snapshots: DeleteSnapshotsOption, call: &CallOptions) -> Result<()> {
        let spec = self.delete_spec(snapshots, call)?;
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Returns whether the blob existed.
    pub async fn delete_if_exists(
        &self,
        snapshots: DeleteSnapshotsOption,
        call: &CallOptions,
    ) -> Result<bool> {
        let spec = self.delete_spec(snapshots, call)?;
        let cmd = self
            .command(spec, parse_exists)
            .accept_status(StatusCode::NOT_FOUND);
        self.client().execute(cmd, call).await
    }

    fn delete_spec(
        &self,
        snapshots: DeleteSnapshotsOption,
        call: &CallOptions,
    ) -> Result<crate::command::RequestSpec> {
        if self.is_snapshot() && snapshots != DeleteSnapshotsOption::None {
            return Err(StorageError::invalid_argument(
                "a snapshot cannot delete other snapshots",
            ));
        }
        Ok(request_factory::delete_blob(
            self.snapshot.as_deref(),
            snapshots,
            call.access_condition.as_ref(),
        ))
    }

    /// Take a read-only snapshot.  Returns a reference to it.
    pub async fn snapshot(&self, metadata: &Metadata, call: &CallOptions) -> Result<CloudBlob> {
        self.ensure_writable()?;
        let spec = request_factory::snapshot_blob(metadata, call.access_condition.as_ref());
        let time = self
            .client()
            .execute(self.command(spec, parse_snapshot_time), call)
            .await?;
        Ok(self.with_snapshot(time))
    }

    // ── Leases ──────────────────────────────────────────────────────

    /// Acquire a lease; `None` duration is infinite.  Returns the lease id.
    pub async fn acquire_lease(
        &self,
        duration: Option<Duration>,
        proposed_lease_id: Option<&str>,
        call: &CallOptions,
    ) -> Result<String> {
        let action = LeaseAction::Acquire {
            duration,
            proposed_lease_id: proposed_lease_id.map(str::to_string),
        };
        self.lease(action, call.access_condition.clone(), call, parse_lease_id)
            .await
    }

    pub async fn renew_lease(&self, lease_id: &str, call: &CallOptions) -> Result<()> {
        self.lease(LeaseAction::Renew, Some(with_lease(call, lease_id)), call, parse_unit)
            .await
    }

    /// Returns the new lease id.
    pub async fn change_lease(
        &self,
        lease_id: &str,
        proposed_lease_id: &str,
        call: &CallOptions,
    ) -> Result<String> {
        let action = LeaseAction::Change {
            proposed_lease_id: proposed_lease_id.to_string(),
        };
        self.lease(action, Some(with_lease(call, lease_id)), call, parse_lease_id)
            .await
    }

    pub async fn release_lease(&self, lease_id: &str, call: &CallOptions) -> Result<()> {
        self.lease(LeaseAction::Release, Some(with_lease(call, lease_id)), call, parse_unit)
            .await
    }

    /// Returns the time remaining before the lease can be re-acquired.
    pub async fn break_lease(
        &self,
        break_period: Option<Duration>,
        call: &CallOptions,
    ) -> Result<Duration> {
        let action = LeaseAction::Break { break_period };
        self.lease(action, call.access_condition.clone(), call, parse_lease_time)
            .await
    }

    async fn lease<T: Send>(
        &self,
        action: LeaseAction,
        condition: Option<AccessCondition>,
        call: &CallOptions,
        parser: ResponseParser<T>,
    ) -> Result<T> {
        self.ensure_writable()?;
        let spec = request_factory::blob_lease(&action, condition.as_ref());
        self.client().execute(self.command(spec, parser), call).await
    }

    // ── Copy ────────────────────────────────────────────────────────

    /// Start a server-side copy from `source` into this blob.  Returns the
    /// copy id.  Metadata comes from [`metadata`](Self::metadata) when
    /// non-empty, otherwise from the source.
    pub async fn start_copy(
        &self,
        source: &Url,
        source_condition: Option<&AccessCondition>,
        call: &CallOptions,
    ) -> Result<String> {
        self.ensure_writable()?;
        let spec = request_factory::start_copy(
            source.as_str(),
            &self.metadata,
            source_condition,
            call.access_condition.as_ref(),
        );
        self.client().execute(self.command(spec, parse_copy_id), call).await
    }

    pub async fn abort_copy(&self, copy_id: &str, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        let spec = request_factory::abort_copy(copy_id, call.access_condition.as_ref());
        self.client().execute(self.command(spec, parse_unit), call).await
    }
}

pub(crate) fn parse_blob_attributes(head: &ResponseHead, _body: Bytes) -> Result<BlobAttributes> {
    Ok(BlobAttributes::from_headers(head))
}

fn parse_snapshot_time(head: &ResponseHead, _body: Bytes) -> Result<String> {
    head.header(HEADER_SNAPSHOT)
        .map(str::to_string)
        .ok_or_else(|| StorageError::parse("snapshot response without x-ms-snapshot"))
}

fn parse_copy_id(head: &ResponseHead, _body: Bytes) -> Result<String> {
    head.header(HEADER_COPY_ID)
        .map(str::to_string)
        .ok_or_else(|| StorageError::parse("copy response without x-ms-copy-id"))
}

/// Access condition for individual chunk writes of an output stream.
/// ETag and date conditions stop holding after the first chunk, so only
/// the lease and numeric conditions carry over.
pub(crate) fn chunk_condition(condition: Option<&AccessCondition>) -> Option<AccessCondition> {
    let c = condition?;
    Some(AccessCondition {
        lease_id: c.lease_id.clone(),
        if_sequence_number_less_than_or_equal: c.if_sequence_number_less_than_or_equal,
        if_sequence_number_less_than: c.if_sequence_number_less_than,
        if_sequence_number_equal: c.if_sequence_number_equal,
        if_max_size_less_than_or_equal: c.if_max_size_less_than_or_equal,
        ..Default::default()
    })
}

// -- Tests -------------------------------------------------------------------
