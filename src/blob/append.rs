use bytes::Bytes;
use http::StatusCode;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use super::{chunk_condition, CloudBlob};
use crate::command::{parse_created, parse_unit};
use crate::constants::{HEADER_BLOB_APPEND_OFFSET, MAX_APPEND_BLOCK};
use crate::errors::{Result, StorageError};
use crate::models::AccessCondition;
use crate::operation_context::OperationContext;
use crate::request_factory;
use crate::request_options::{BlobRequestOptions, CallOptions};
use crate::streams::BlobOutputStream;
use crate::transport::ResponseHead;
use crate::upload::{Chunk, ChunkDescriptor, ChunkLayout, ChunkUploader, UploadHelper};

/// An append blob: content only ever grows, one block at a time.
#[derive(Clone)]
pub struct CloudAppendBlob {
    blob: CloudBlob,
}

impl From<CloudBlob> for CloudAppendBlob {
    fn from(blob: CloudBlob) -> Self {
        Self { blob }
    }
}

impl Deref for CloudAppendBlob {
    type Target = CloudBlob;

    fn deref(&self) -> &CloudBlob {
        &self.blob
    }
}

impl DerefMut for CloudAppendBlob {
    fn deref_mut(&mut self) -> &mut CloudBlob {
        &mut self.blob
    }
}

impl CloudAppendBlob {
    /// Create an empty append blob, replacing any existing blob.
    pub async fn create(&self, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        let spec = request_factory::create_append_blob(
            self.properties(),
            self.metadata(),
            call.access_condition.as_ref(),
        );
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Create an empty append blob unless one exists.  Returns whether it
    /// was created.
    pub async fn create_if_not_exists(&self, call: &CallOptions) -> Result<bool> {
        self.ensure_writable()?;
        let condition = AccessCondition {
            if_none_match: Some("*".to_string()),
            ..call.access_condition.clone().unwrap_or_default()
        };
        let spec = request_factory::create_append_blob(self.properties(), self.metadata(), Some(&condition));
        let cmd = self
            .command(spec, parse_created)
            .accept_status(StatusCode::CONFLICT);
        self.client().execute(cmd, call).await
    }

    /// Append one block.  Returns the offset it was written at.
    pub async fn append_block(&self, data: Bytes, call: &CallOptions) -> Result<u64> {
        self.ensure_writable()?;
        if data.is_empty() || data.len() > MAX_APPEND_BLOCK {
            return Err(StorageError::invalid_argument(format!(
                "append blocks must be between 1 and {MAX_APPEND_BLOCK} bytes"
            )));
        }
        let (options, ctx) = self.client().resolve(call)?;
        let spec = request_factory::append_block(
            data,
            call.access_condition.as_ref(),
            options.use_transactional_md5,
        );
        self.run(&self.command(spec, parse_append_offset), &options, &ctx)
            .await
    }

    /// Open a sequential writer that appends blocks in order.
    ///
    /// With `create_new` the blob is created (or replaced) first under the
    /// call's access condition; otherwise writing continues at the current
    /// end of an existing blob.  Each block is sent with an append-position
    /// condition, so concurrent writers fail instead of interleaving.
    pub async fn open_write(&self, create_new: bool, call: &CallOptions) -> Result<BlobOutputStream> {
        self.ensure_writable()?;
        let (options, ctx) = self.client().resolve(call)?;
        let start_offset = if create_new {
            self.create(call).await?;
            0
        } else {
            self.fetch_attributes(call).await?.properties.length
        };
        debug!(blob = %self.name(), start_offset, "opening append stream");
        let helper = UploadHelper::new(
            Arc::new(AppendUploader {
                blob: self.clone(),
                condition: chunk_condition(call.access_condition.as_ref()).unwrap_or_default(),
                options: options.clone(),
                ctx,
            }),
            ChunkLayout::Append { start_offset },
            options.block_size.min(MAX_APPEND_BLOCK),
            1,
            options.store_blob_content_md5 && create_new,
        );
        Ok(BlobOutputStream::new(helper))
    }
}

fn parse_append_offset(head: &ResponseHead, _body: Bytes) -> Result<u64> {
    head.header(HEADER_BLOB_APPEND_OFFSET)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::parse("append response without a valid x-ms-blob-append-offset"))
}

/// Whether a failed retry of an append means an earlier attempt already
/// landed.
fn is_absorbable(err: &StorageError) -> bool {
    err.is_status(StatusCode::PRECONDITION_FAILED)
        && matches!(
            err.code(),
            "AppendPositionConditionNotMet" | "MaxBlobSizeConditionNotMet"
        )
}

struct AppendUploader {
    blob: CloudAppendBlob,
    /// Lease and max-size conditions; the append position is set per block.
    condition: AccessCondition,
    options: BlobRequestOptions,
    ctx: OperationContext,
}

impl ChunkUploader for AppendUploader {
    fn upload_chunk(&self, chunk: Chunk) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let ChunkDescriptor::Append { offset } = chunk.descriptor else {
                return Err(StorageError::invalid_argument("append upload given a non-append chunk"));
            };
            let condition = self.condition.with_append_position(offset);
            let spec = request_factory::append_block(
                chunk.data,
                Some(&condition),
                self.options.use_transactional_md5,
            );
            let cmd = self.blob.command(spec, parse_append_offset);
            let (result, attempts) = self
                .blob
                .client()
                .executor()
                .execute_counted(&cmd, &self.options, &self.ctx)
                .await;
            match result {
                Ok(_) => Ok(()),
                Err(err)
                    if self.options.absorb_conditional_errors_on_retry
                        && attempts > 1
                        && is_absorbable(&err) =>
                {
                    debug!(offset, attempts, code = err.code(), "absorbing conditional failure on retried append");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    /// Blocks are committed as they are appended; the commit only records
    /// the content MD5 of a newly created blob.
    fn commit(
        &self,
        _descriptors: Vec<ChunkDescriptor>,
        content_md5: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let Some(md5) = content_md5 else {
                return Ok(());
            };
            let mut properties = self.blob.properties().clone();
            properties.content_md5 = Some(md5);
            let lease = self.condition.lease_id.clone().map(AccessCondition::lease);
            let spec = request_factory::set_blob_properties(&properties, lease.as_ref());
            self.blob
                .run(&self.blob.command(spec, parse_unit), &self.options, &self.ctx)
                .await
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::CloudBlobContainer;
    use crate::test_support::{comp_is, test_client, FaultKind, InMemoryBlobService};

    const CHUNK: usize = 1024;

    async fn container(service: &Arc<InMemoryBlobService>) -> CloudBlobContainer {
        let c = test_client(service).container_reference("appends");
        c.create(&CallOptions::new()).await.unwrap();
        c
    }

    fn small_blocks(absorb: bool) -> CallOptions {
        CallOptions::new().options(BlobRequestOptions {
            block_size: CHUNK,
            parallelism_factor: 4,
            absorb_conditional_errors_on_retry: absorb,
            ..Default::default()
        })
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 239) as u8).collect()
    }

    #[tokio::test]
    async fn test_open_write_round_trips_boundary_sizes() {
        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        for len in [0, 1, CHUNK, CHUNK + 1] {
            let name = format!("append-{len}");
            let blob = c.append_blob_reference(&name);
            let data = pattern(len);

            let mut stream = blob.open_write(true, &small_blocks(false)).await.unwrap();
            stream.write(&data).await.unwrap();
            stream.close().await.unwrap();

            let downloaded = blob.download_to_bytes(&CallOptions::new()).await.unwrap();
            assert_eq!(downloaded.as_ref(), data.as_slice(), "len {len}");
        }
        // Appends run one at a time regardless of the parallelism factor.
        assert_eq!(service.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_open_write_continues_existing_blob() {
        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        let blob = c.append_blob_reference("log");
        let call = small_blocks(false);
        blob.create(&call).await.unwrap();
        assert_eq!(blob.append_block(Bytes::from_static(b"head:"), &call).await.unwrap(), 0);

        let mut stream = blob.open_write(false, &call).await.unwrap();
        stream.write(b"tail").await.unwrap();
        stream.close().await.unwrap();

        assert_eq!(service.blob_data("appends", "log").unwrap(), b"head:tail");
        let positions: Vec<_> = service
            .requests()
            .iter()
            .filter(|r| comp_is("appendblock")(r))
            .filter_map(|r| r.header(crate::constants::HEADER_CONDITION_APPEND_POS).map(str::to_string))
            .collect();
        assert_eq!(positions, ["5"]);
    }

    #[tokio::test]
    async fn test_retried_append_absorbed_only_when_enabled() {
        let data = pattern(CHUNK / 2);

        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        let blob = c.append_blob_reference("strict");
        let mut stream = blob.open_write(true, &small_blocks(false)).await.unwrap();
        service.inject_fault(comp_is("appendblock"), FaultKind::DropResponse, 1);
        stream.write(&data).await.unwrap();
        let err = stream.close().await.unwrap_err();
        assert_eq!(err.code(), "AppendPositionConditionNotMet");

        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        let blob = c.append_blob_reference("absorbing");
        let mut stream = blob.open_write(true, &small_blocks(true)).await.unwrap();
        service.inject_fault(comp_is("appendblock"), FaultKind::DropResponse, 1);
        stream.write(&data).await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(service.blob_data("appends", "absorbing").unwrap(), data);
    }

    #[tokio::test]
    async fn test_first_attempt_conflict_is_never_absorbed() {
        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        let blob = c.append_blob_reference("raced");
        let mut stream = blob.open_write(true, &small_blocks(true)).await.unwrap();
        // Another writer appends behind the stream's back.
        blob.append_block(Bytes::from_static(b"other"), &CallOptions::new())
            .await
            .unwrap();
        stream.write(b"mine").await.unwrap();
        let err = stream.close().await.unwrap_err();
        assert_eq!(err.code(), "AppendPositionConditionNotMet");
    }

    #[tokio::test]
    async fn test_create_if_not_exists_and_max_size() {
        let service = InMemoryBlobService::new();
        let c = container(&service).await;
        let blob = c.append_blob_reference("bounded");
        let call = CallOptions::new();
        assert!(blob.create_if_not_exists(&call).await.unwrap());
        assert!(!blob.create_if_not_exists(&call).await.unwrap());

        let bounded = CallOptions::new().condition(AccessCondition {
            if_max_size_less_than_or_equal: Some(8),
            ..Default::default()
        });
        blob.append_block(Bytes::from_static(b"12345"), &bounded).await.unwrap();
        let err = blob
            .append_block(Bytes::from_static(b"6789"), &bounded)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MaxBlobSizeConditionNotMet");
        assert_eq!(
            blob.append_block(Bytes::new(), &call).await.unwrap_err().code(),
            "InvalidArgument"
        );
    }
}
