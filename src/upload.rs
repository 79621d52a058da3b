//! Chunked, bounded-parallelism uploader behind every blob output stream.
//!
//! Bytes handed to [`UploadHelper::write`] are accumulated into chunks of a
//! fixed size.  Each full chunk is given its descriptor (block id, page
//! range or append offset) at the moment it is offered, then uploaded on a
//! background task.  At most `parallelism` uploads run at once; `write`
//! waits for a free slot when the window is full.  [`UploadHelper::close`]
//! flushes the tail, waits for every upload and commits the manifest.
//!
//! The first chunk failure becomes the session's terminal error.  Later
//! failures are logged and dropped.  Uploaded but uncommitted blocks are not
//! cleaned up after a failure.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use md5::{Digest, Md5};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::constants::PAGE_SIZE;
use crate::errors::{Result, StorageError};
use crate::metrics;
use crate::models::BlockListMode;

/// Identifies one uploaded unit in the final manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkDescriptor {
    Block { id: String, mode: BlockListMode },
    Page { offset: u64, len: usize },
    Append { offset: u64 },
}

/// One unit of work handed to a [`ChunkUploader`].
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in write order, starting at zero.
    pub index: u64,
    pub descriptor: ChunkDescriptor,
    pub data: Bytes,
}

/// Blob-type specific transfer operations driven by an [`UploadHelper`].
pub trait ChunkUploader: Send + Sync + 'static {
    /// Upload one chunk.  May be called concurrently.
    fn upload_chunk(&self, chunk: Chunk) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finalize the blob once every chunk has been uploaded.
    /// `content_md5` is the base64 MD5 of everything written, when enabled.
    fn commit(
        &self,
        descriptors: Vec<ChunkDescriptor>,
        content_md5: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// How chunks map onto the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    Block,
    /// Fixed-size page blob; writes past `capacity` are rejected.
    Page { capacity: u64 },
    /// Append blob whose current length is `start_offset`.
    Append { start_offset: u64 },
}

/// Block ids are `base64("{session}:{index:06}")`, so every id in a session
/// has the same length.
pub fn block_id(session: &str, index: u64) -> String {
    BASE64_STANDARD.encode(format!("{session}:{index:06}"))
}

#[derive(Default)]
struct SessionState {
    error: Option<StorageError>,
}

impl SessionState {
    fn record(&mut self, err: StorageError) {
        match &self.error {
            None => self.error = Some(err),
            Some(first) => warn!(error = %err, first = %first, "dropping later chunk upload error"),
        }
    }
}

fn lock(state: &Mutex<SessionState>) -> std::sync::MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Chunked writer with a bounded upload window.
pub struct UploadHelper {
    uploader: Arc<dyn ChunkUploader>,
    layout: ChunkLayout,
    chunk_size: usize,
    parallelism: usize,
    session: String,
    buffer: BytesMut,
    next_index: u64,
    /// Bytes already handed to chunk uploads.
    dispatched: u64,
    descriptors: Vec<ChunkDescriptor>,
    window: Arc<Semaphore>,
    tasks: JoinSet<()>,
    state: Arc<Mutex<SessionState>>,
    md5: Option<Md5>,
    closed: bool,
}

impl UploadHelper {
    /// `chunk_size` and `parallelism` are clamped to at least 1.  Append
    /// layouts always upload one chunk at a time.
    pub fn new(
        uploader: Arc<dyn ChunkUploader>,
        layout: ChunkLayout,
        chunk_size: usize,
        parallelism: usize,
        compute_md5: bool,
    ) -> Self {
        let parallelism = match layout {
            ChunkLayout::Append { .. } => 1,
            _ => parallelism.max(1),
        };
        Self {
            uploader,
            layout,
            chunk_size: chunk_size.max(1),
            parallelism,
            session: uuid::Uuid::new_v4().simple().to_string(),
            buffer: BytesMut::new(),
            next_index: 0,
            dispatched: 0,
            descriptors: Vec::new(),
            window: Arc::new(Semaphore::new(parallelism)),
            tasks: JoinSet::new(),
            state: Arc::new(Mutex::new(SessionState::default())),
            md5: compute_md5.then(Md5::new),
            closed: false,
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes accepted so far, including the unflushed tail.
    pub fn position(&self) -> u64 {
        self.dispatched + self.buffer.len() as u64
    }

    /// Whether a chunk upload slot is free right now.
    pub fn has_space_available(&self) -> bool {
        self.window.available_permits() > 0
    }

    /// The session's terminal error, if one has been recorded.
    pub fn error(&self) -> Option<StorageError> {
        lock(&self.state).error.clone()
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed {
            return Err(StorageError::StreamClosed);
        }
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Accept all of `data`, waiting for upload slots as chunks fill up.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_usable()?;
        if let ChunkLayout::Page { capacity } = self.layout {
            let attempted = self.position() + data.len() as u64;
            if attempted > capacity {
                let err = StorageError::OutputStreamFull {
                    capacity,
                    attempted,
                };
                lock(&self.state).record(err.clone());
                return Err(err);
            }
        }
        if let Some(md5) = self.md5.as_mut() {
            md5.update(data);
        }

        let mut rest = data;
        while !rest.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(rest.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.buffer.len() == self.chunk_size {
                self.dispatch().await?;
            }
        }
        Ok(data.len())
    }

    /// Upload the buffered tail and wait for every in-flight chunk.
    pub async fn flush(&mut self) -> Result<()> {
        self.check_usable()?;
        if let ChunkLayout::Page { .. } = self.layout {
            if self.buffer.len() as u64 % PAGE_SIZE != 0 {
                return Err(StorageError::invalid_argument(format!(
                    "page blob writes must be a multiple of {PAGE_SIZE} bytes, {} bytes pending",
                    self.buffer.len()
                )));
            }
        }
        self.dispatch().await?;
        self.wait_all().await;
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Flush, wait for every upload and commit.  A session that already
    /// recorded an error returns it without committing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(StorageError::StreamClosed);
        }
        if let Some(err) = self.error() {
            self.wait_all().await;
            self.closed = true;
            return Err(err);
        }
        let flushed = self.flush().await;
        self.closed = true;
        flushed?;

        let content_md5 = self
            .md5
            .take()
            .map(|md5| BASE64_STANDARD.encode(md5.finalize()));
        let descriptors = std::mem::take(&mut self.descriptors);
        debug!(chunks = descriptors.len(), "committing upload");
        self.uploader.commit(descriptors, content_md5).await
    }

    async fn dispatch(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let permit = self
            .window
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::StreamClosed)?;
        self.reap_finished();
        // An upload that finished while we waited may have failed.
        self.check_usable()?;

        let data = self.buffer.split().freeze();
        let index = self.next_index;
        let descriptor = match self.layout {
            ChunkLayout::Block => ChunkDescriptor::Block {
                id: block_id(&self.session, index),
                mode: BlockListMode::Latest,
            },
            ChunkLayout::Page { .. } => ChunkDescriptor::Page {
                offset: self.dispatched,
                len: data.len(),
            },
            ChunkLayout::Append { start_offset } => ChunkDescriptor::Append {
                offset: start_offset + self.dispatched,
            },
        };
        self.next_index += 1;
        self.dispatched += data.len() as u64;
        self.descriptors.push(descriptor.clone());

        let uploader = self.uploader.clone();
        let state = self.state.clone();
        let len = data.len();
        self.tasks.spawn(async move {
            let chunk = Chunk {
                index,
                descriptor,
                data,
            };
            match uploader.upload_chunk(chunk).await {
                Ok(()) => metrics::record_bytes_uploaded(len),
                Err(err) => lock(&state).record(err),
            }
            drop(permit);
        });
        Ok(())
    }

    /// Drop finished chunk tasks so the set only holds uploads in flight.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.record_join(joined);
        }
    }

    async fn wait_all(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.record_join(joined);
        }
    }

    fn record_join(&self, joined: std::result::Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            lock(&self.state).record(StorageError::TaskFailed {
                message: e.to_string(),
            });
        }
    }
}

// -- Tests -------------------------------------------------------------------
