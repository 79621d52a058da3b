use bytes::Bytes;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;

use super::{chunk_condition, CloudBlob};
use crate::command::parse_unit;
use crate::constants::{HEADER_BLOB_SEQUENCE_NUMBER, MAX_PAGE_WRITE, PAGE_SIZE};
use crate::errors::{Result, StorageError};
use crate::models::{AccessCondition, PageRange, SequenceNumberAction};
use crate::operation_context::OperationContext;
use crate::request_factory;
use crate::request_options::{BlobRequestOptions, CallOptions};
use crate::streams::BlobOutputStream;
use crate::transport::ResponseHead;
use crate::upload::{Chunk, ChunkDescriptor, ChunkLayout, ChunkUploader, UploadHelper};
use crate::xml;

/// A page blob: a fixed-size, randomly writable sequence of 512-byte pages.
#[derive(Clone)]
pub struct CloudPageBlob {
    blob: CloudBlob,
}

impl From<CloudBlob> for CloudPageBlob {
    fn from(blob: CloudBlob) -> Self {
        Self { blob }
    }
}

impl Deref for CloudPageBlob {
    type Target = CloudBlob;

    fn deref(&self) -> &CloudBlob {
        &self.blob
    }
}

impl DerefMut for CloudPageBlob {
    fn deref_mut(&mut self) -> &mut CloudBlob {
        &mut self.blob
    }
}

fn check_aligned(what: &str, value: u64) -> Result<()> {
    if value % PAGE_SIZE != 0 {
        return Err(StorageError::invalid_argument(format!(
            "{what} {value} is not a multiple of {PAGE_SIZE}"
        )));
    }
    Ok(())
}

/// Page stream chunk size: `block_size` rounded down to whole pages and
/// kept within a single put-pages request.
fn page_chunk_size(block_size: usize) -> usize {
    let page = PAGE_SIZE as usize;
    (block_size / page * page).clamp(page, MAX_PAGE_WRITE)
}

impl CloudPageBlob {
    /// Create (or replace) the blob with `size` zeroed bytes.
    pub async fn create(
        &self,
        size: u64,
        sequence_number: Option<u64>,
        call: &CallOptions,
    ) -> Result<()> {
        self.ensure_writable()?;
        check_aligned("page blob size", size)?;
        let spec = request_factory::create_page_blob(
            size,
            sequence_number,
            self.properties(),
            self.metadata(),
            call.access_condition.as_ref(),
        );
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Grow or truncate to `size` bytes.
    pub async fn resize(&self, size: u64, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        check_aligned("page blob size", size)?;
        let spec = request_factory::resize_page_blob(size, call.access_condition.as_ref());
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Write `data` at `offset`.  Both must be page aligned and `data` at
    /// most 4 MiB.
    pub async fn upload_pages(&self, offset: u64, data: Bytes, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        check_aligned("page offset", offset)?;
        check_aligned("page data length", data.len() as u64)?;
        if data.is_empty() || data.len() > MAX_PAGE_WRITE {
            return Err(StorageError::invalid_argument(format!(
                "page writes must be between {PAGE_SIZE} and {MAX_PAGE_WRITE} bytes"
            )));
        }
        let (options, ctx) = self.client().resolve(call)?;
        let spec = request_factory::put_pages(
            offset,
            data,
            call.access_condition.as_ref(),
            options.use_transactional_md5,
        );
        self.run(&self.command(spec, parse_unit), &options, &ctx).await
    }

    /// Zero `length` bytes at `offset` and drop them from the page ranges.
    pub async fn clear_pages(&self, offset: u64, length: u64, call: &CallOptions) -> Result<()> {
        self.ensure_writable()?;
        check_aligned("page offset", offset)?;
        check_aligned("clear length", length)?;
        if length == 0 {
            return Err(StorageError::invalid_argument("clear length must be positive"));
        }
        let spec = request_factory::clear_pages(offset, length, call.access_condition.as_ref());
        self.client().execute(self.command(spec, parse_unit), call).await
    }

    /// Valid page ranges, optionally restricted to `(offset, length)`.
    pub async fn download_page_ranges(
        &self,
        range: Option<(u64, u64)>,
        call: &CallOptions,
    ) -> Result<Vec<PageRange>> {
        let spec = request_factory::get_page_ranges(
            range,
            self.snapshot_time(),
            call.access_condition.as_ref(),
        );
        let cmd = self.command(spec, parse_page_ranges).readable_from_secondary();
        self.client().execute(cmd, call).await
    }

    /// Apply `action` and return the resulting sequence number.
    pub async fn set_sequence_number(
        &self,
        action: SequenceNumberAction,
        call: &CallOptions,
    ) -> Result<u64> {
        self.ensure_writable()?;
        let spec = request_factory::set_sequence_number(action, call.access_condition.as_ref());
        self.client()
            .execute(self.command(spec, parse_sequence_number), call)
            .await
    }

    /// Create the blob with `size` bytes and open a sequential writer over
    /// it.  Writes past `size` fail with `OutputStreamFull`; closing with a
    /// partial page fails with `InvalidArgument`.
    pub async fn open_write(&self, size: u64, call: &CallOptions) -> Result<BlobOutputStream> {
        self.ensure_writable()?;
        let (options, ctx) = self.client().resolve(call)?;
        self.create(size, None, call).await?;
        let helper = UploadHelper::new(
            Arc::new(PageUploader {
                blob: self.clone(),
                condition: chunk_condition(call.access_condition.as_ref()),
                options: options.clone(),
                ctx,
            }),
            ChunkLayout::Page { capacity: size },
            page_chunk_size(options.block_size),
            options.parallelism_factor,
            options.store_blob_content_md5,
        );
        Ok(BlobOutputStream::new(helper))
    }
}

fn parse_page_ranges(_head: &ResponseHead, body: Bytes) -> Result<Vec<PageRange>> {
    xml::parse_page_ranges(&body)
}

fn parse_sequence_number(head: &ResponseHead, _body: Bytes) -> Result<u64> {
    head.header(HEADER_BLOB_SEQUENCE_NUMBER)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::parse("response without a valid x-ms-blob-sequence-number"))
}

struct PageUploader {
    blob: CloudPageBlob,
    /// Lease and sequence-number conditions only.
    condition: Option<AccessCondition>,
    options: BlobRequestOptions,
    ctx: OperationContext,
}

impl ChunkUploader for PageUploader {
    fn upload_chunk(&self, chunk: Chunk) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let ChunkDescriptor::Page { offset, .. } = chunk.descriptor else {
                return Err(StorageError::invalid_argument("page upload given a non-page chunk"));
            };
            let spec = request_factory::put_pages(
                offset,
                chunk.data,
                self.condition.as_ref(),
                self.options.use_transactional_md5,
            );
            self.blob
                .run(&self.blob.command(spec, parse_unit), &self.options, &self.ctx)
                .await
        })
    }

    /// Pages are live as soon as they are written; the commit only records
    /// the content MD5.
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
            let spec = request_factory::set_blob_properties(&properties, self.condition.as_ref());
            self.blob
                .run(&self.blob.command(spec, parse_unit), &self.options, &self.ctx)
                .await
        })
    }
}

// -- Tests -------------------------------------------------------------------
