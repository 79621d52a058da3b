//! Stream-style adapters returned by `open_write` and `open_read`.

use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::download_buffer::StreamDownloadBuffer;
use crate::errors::{Result, StorageError};
use crate::models::BlobAttributes;
use crate::upload::UploadHelper;

/// Sequential writer over a blob.  Data is uploaded in chunks as it
/// arrives; [`close`](Self::close) must be awaited to commit the blob.
/// Dropping the stream without closing leaves the upload uncommitted.
pub struct BlobOutputStream {
    helper: UploadHelper,
}

impl BlobOutputStream {
    pub(crate) fn new(helper: UploadHelper) -> Self {
        Self { helper }
    }

    /// Accept `data`.  Waits while the upload window is full, so the
    /// returned count is always `data.len()` on success.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.helper.write(data).await
    }

    /// Copy `reader` to the end into the stream.  Returns the bytes copied.
    pub async fn write_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; self.helper.chunk_size().min(1024 * 1024)];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| StorageError::invalid_argument(format!("source read failed: {e}")))?;
            if n == 0 {
                return Ok(total);
            }
            self.helper.write(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Upload everything written so far and wait for it.  Does not commit.
    pub async fn flush(&mut self) -> Result<()> {
        self.helper.flush().await
    }

    /// Flush, wait for all uploads and commit.  Blocks until the commit
    /// finishes; a stream that already failed returns that failure without
    /// committing.
    pub async fn close(&mut self) -> Result<()> {
        self.helper.close().await
    }

    pub fn has_space_available(&self) -> bool {
        self.helper.has_space_available()
    }

    /// Bytes accepted so far.
    pub fn position(&self) -> u64 {
        self.helper.position()
    }
}

/// Sequential reader over a blob download running in the background.
///
/// The download is bounded by the buffer size in the request options: it
/// pauses while the reader falls behind.  Dropping the stream aborts the
/// download.
pub struct BlobInputStream {
    buffer: Arc<StreamDownloadBuffer>,
    task: Option<JoinHandle<Result<BlobAttributes>>>,
}

impl BlobInputStream {
    pub(crate) fn spawn<F>(buffer: Arc<StreamDownloadBuffer>, download: F) -> Self
    where
        F: Future<Output = Result<BlobAttributes>> + Send + 'static,
    {
        Self {
            buffer,
            task: Some(tokio::spawn(download)),
        }
    }

    /// Read up to `buf.len()` bytes.  `Ok(0)` at end of blob.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.buffer.read(buf).await
    }

    /// Read everything that is left into `out`.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let mut total = 0u64;
        while let Some(chunk) = self.buffer.next_chunk().await? {
            out.extend_from_slice(&chunk);
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    /// Bytes handed to the reader so far.
    pub fn bytes_read(&self) -> u64 {
        self.buffer.total_size_streamed()
    }

    /// Wait for the download to finish and return the blob's attributes
    /// as of the download.
    pub async fn finish(mut self) -> Result<BlobAttributes> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| StorageError::TaskFailed {
                message: e.to_string(),
            })?,
            None => Err(StorageError::StreamClosed),
        }
    }
}

/// Blocking reads, for use off the async runtime (for example inside
/// `spawn_blocking`).
impl io::Read for BlobInputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read_blocking(buf).map_err(io::Error::other)
    }
}

impl Drop for BlobInputStream {
    fn drop(&mut self) {
        // Wakes a producer blocked on a full buffer; ignored once the
        // download has completed.
        self.buffer.set_error(StorageError::StreamClosed);
    }
}
