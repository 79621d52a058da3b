use bytes::Bytes;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

use super::{chunk_condition, CloudBlob};
use crate::command::parse_unit;
use crate::constants::{MAX_BLOCK_SIZE, MAX_SINGLE_PUT_SIZE};
use crate::errors::{Result, StorageError};
use crate::models::{AccessCondition, BlobProperties, BlockListItem, BlockListingFilter};
use crate::operation_context::OperationContext;
use crate::request_factory::{self, content_md5};
use crate::request_options::{BlobRequestOptions, CallOptions};
use crate::streams::BlobOutputStream;
use crate::transport::ResponseHead;
use crate::upload::{Chunk, ChunkDescriptor, ChunkLayout, ChunkUploader, UploadHelper};
use crate::xml;

/// A block blob: content assembled from individually uploaded blocks.
#[derive(Clone)]
pub struct CloudBlockBlob {
    blob: CloudBlob,
}

impl From<CloudBlob> for CloudBlockBlob {
    fn from(blob: CloudBlob) -> Self {
        Self { blob }
    }
}

impl Deref for CloudBlockBlob {
    type Target = CloudBlob;

    fn deref(&self) -> &CloudBlob {
        &self.blob
    }
}

impl DerefMut for CloudBlockBlob {
    fn deref_mut(&mut self) -> &mut CloudBlob {
        &mut self.blob
    }
}

impl CloudBlockBlob {
    /// Upload `data` as the entire blob in a single request, replacing any
    /// existing content and uncommitted blocks.
    pub async fn upload_from_bytes(&self, data: Bytes, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        if data.len() > MAX_SINGLE_PUT_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "{} bytes exceeds the single-put limit of {MAX_SINGLE_PUT_SIZE}; use open_write",
                data.len()
            )));
        }
        let (options, ctx) = self.client().resolve(call)?;
        let mut properties = self.properties().clone();
        if options.store_blob_content_md5 {
            properties.content_md5 = Some(content_md5(&data));
        }
        let spec = request_factory::put_block_blob(
            data,
            &properties,
            self.metadata(),
            call.access_condition.as_ref(),
            options.use_transactional_md5,
        );
        self.run(&self.command(spec, parse_unit), &options, &ctx).await
    }

    /// Upload one uncommitted block.  `block_id` must be base64 and the
    /// same length as every other id in the blob.
    pub async fn put_block(&self, block_id: &str, data: Bytes, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        if data.is_empty() || data.len() > MAX_BLOCK_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "block size must be between 1 and {MAX_BLOCK_SIZE} bytes"
            )));
        }
        let (options, ctx) = self.client().resolve(call)?;
        let lease_id = call.access_condition.as_ref().and_then(|c| c.lease_id.as_deref());
        let spec = request_factory::put_block(block_id, data, lease_id, options.use_transactional_md5);
        self.run(&self.command(spec, parse_unit), &options, &ctx).await
    }

    /// Commit `blocks` in order as the blob's content, with this reference's
    /// properties and metadata.
    pub async fn put_block_list(&self, blocks: &[BlockListItem], call: &CallOptions) -> Result<()> {
        let (options, ctx) = self.client().resolve(call)?;
        self.commit_blocks(
            blocks,
            self.properties(),
            call.access_condition.as_ref(),
            &options,
            &ctx,
        )
        .await
    }

    pub async fn download_block_list(
        &self,
        filter: BlockListingFilter,
        call: &CallOptions,
    ) -> Result<Vec<BlockListItem>> {
        let spec = request_factory::get_block_list(
            filter,
            self.snapshot_time(),
            call.access_condition.as_ref(),
        );
        let cmd = self.command(spec, parse_block_list).readable_from_secondary();
        self.client().execute(cmd, call).await
    }

    /// Open a chunked writer.  Blocks are uploaded as they fill and the
    /// list is committed on `close`, under the call's access condition.
    pub fn open_write(&self, call: &CallOptions) -> Result<BlobOutputStream> {
        self.ensure_writable()?;
        let (options, ctx) = self.client().resolve(call)?;
        if options.block_size > MAX_BLOCK_SIZE {
            return Err(StorageError::invalid_argument(format!(
                "block_size {} exceeds {MAX_BLOCK_SIZE}",
                options.block_size
            )));
        }
        let helper = UploadHelper::new(
            Arc::new(BlockUploader {
                blob: self.clone(),
                condition: call.access_condition.clone(),
                options: options.clone(),
                ctx,
            }),
            ChunkLayout::Block,
            options.block_size,
            options.parallelism_factor,
            options.store_blob_content_md5,
        );
        Ok(BlobOutputStream::new(helper))
    }

    /// Upload everything `reader` yields through [`open_write`](Self::open_write).
    /// Returns the number of bytes uploaded.
    pub async fn upload_from_reader<R>(&self, reader: &mut R, call: &CallOptions) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut stream = self.open_write(call)?;
        let written = stream.write_from(reader).await?;
        stream.close().await?;
        Ok(written)
    }

    async fn commit_blocks(
        &self,
        blocks: &[BlockListItem],
        properties: &BlobProperties,
        condition: Option<&AccessCondition>,
        options: &BlobRequestOptions,
        ctx: &OperationContext,
    ) -> Result<()> {
        self.ensure_writable()?;
        let body = xml::render_block_list(blocks)?;
        let spec = request_factory::put_block_list(body, properties, self.metadata(), condition);
        self.run(&self.command(spec, parse_unit), options, ctx).await
    }
}

fn parse_block_list(_head: &ResponseHead, body: Bytes) -> Result<Vec<BlockListItem>> {
    xml::parse_block_list(&body)
}

struct BlockUploader {
    blob: CloudBlockBlob,
    condition: Option<AccessCondition>,
    options: BlobRequestOptions,
    ctx: OperationContext,
}

impl ChunkUploader for BlockUploader {
    fn upload_chunk(&self, chunk: Chunk) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let ChunkDescriptor::Block { id, .. } = &chunk.descriptor else {
                return Err(StorageError::invalid_argument("block upload given a non-block chunk"));
            };
            let lease = chunk_condition(self.condition.as_ref());
            let lease_id = lease.as_ref().and_then(|c| c.lease_id.as_deref());
            let spec = request_factory::put_block(
                id,
                chunk.data,
                lease_id,
                self.options.use_transactional_md5,
            );
            self.blob
                .run(&self.blob.command(spec, parse_unit), &self.options, &self.ctx)
                .await
        })
    }

    fn commit(
        &self,
        descriptors: Vec<ChunkDescriptor>,
        content_md5: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let blocks: Vec<BlockListItem> = descriptors
                .into_iter()
                .filter_map(|d| match d {
                    ChunkDescriptor::Block { id, mode } => Some(BlockListItem::new(id, mode)),
                    _ => None,
                })
                .collect();
            let mut properties = self.blob.properties().clone();
            if content_md5.is_some() {
                properties.content_md5 = content_md5;
            }
            self.blob
                .commit_blocks(
                    &blocks,
                    &properties,
                    self.condition.as_ref(),
                    &self.options,
                    &self.ctx,
                )
                .await
        })
    }
}

// -- Tests -------------------------------------------------------------------
