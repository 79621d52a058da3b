//! Bounded buffer between a download and its consumer.
//!
//! The network side calls [`StreamDownloadBuffer::write`], which suspends
//! while the buffer is full.  The consumer drains it either from a blocking
//! thread ([`read_blocking`](StreamDownloadBuffer::read_blocking),
//! [`process_data`](StreamDownloadBuffer::process_data)) or from async code
//! ([`read`](StreamDownloadBuffer::read),
//! [`next_chunk`](StreamDownloadBuffer::next_chunk),
//! [`drain_to`](StreamDownloadBuffer::drain_to)).  One producer and one
//! consumer are expected at a time.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Buf, Bytes};
use md5::{Digest, Md5};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::errors::{Result, StorageError};

enum Terminal {
    Complete,
    Failed(StorageError),
}

struct State {
    chunks: VecDeque<Bytes>,
    current_length: usize,
    total_written: u64,
    total_size_streamed: u64,
    md5: Option<Md5>,
    final_md5: Option<String>,
    terminal: Option<Terminal>,
}

/// Bounded producer/consumer byte queue with an optional running MD5.
pub struct StreamDownloadBuffer {
    max_size: usize,
    state: Mutex<State>,
    /// Wakes blocking readers.
    readable: Condvar,
    /// Wakes async readers.
    data_available: Notify,
    /// Wakes the producer.
    space_available: Notify,
}

impl StreamDownloadBuffer {
    /// Buffer holding at most `max_size` bytes.  `calculate_md5` enables
    /// the running hash over everything written.
    pub fn new(max_size: usize, calculate_md5: bool) -> Self {
        Self {
            max_size: max_size.max(1),
            state: Mutex::new(State {
                chunks: VecDeque::new(),
                current_length: 0,
                total_written: 0,
                total_size_streamed: 0,
                md5: calculate_md5.then(Md5::new),
                final_md5: None,
                terminal: None,
            }),
            readable: Condvar::new(),
            data_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn wake_readers(&self) {
        self.readable.notify_all();
        self.data_available.notify_one();
    }

    // -- Producer side -------------------------------------------------------

    /// Append `data`, waiting for space whenever the buffer is full.  Large
    /// writes are split so the bound is never exceeded.
    pub async fn write(&self, mut data: Bytes) -> Result<()> {
        while !data.is_empty() {
            {
                let mut state = self.lock();
                if let Some(terminal) = &state.terminal {
                    return Err(match terminal {
                        Terminal::Failed(e) => e.clone(),
                        Terminal::Complete => StorageError::StreamClosed,
                    });
                }
                let room = self.max_size - state.current_length;
                if room > 0 {
                    let piece = data.split_to(room.min(data.len()));
                    if let Some(md5) = state.md5.as_mut() {
                        md5.update(&piece);
                    }
                    state.current_length += piece.len();
                    state.total_written += piece.len() as u64;
                    state.chunks.push_back(piece);
                    drop(state);
                    self.wake_readers();
                    continue;
                }
            }
            self.space_available.notified().await;
        }
        Ok(())
    }

    /// Mark the download finished.  Ignored if a terminal state is
    /// already set.
    pub fn set_complete(&self) {
        let mut state = self.lock();
        if state.terminal.is_none() {
            state.final_md5 = state
                .md5
                .take()
                .map(|m| BASE64_STANDARD.encode(m.finalize()));
            state.terminal = Some(Terminal::Complete);
        }
        drop(state);
        self.wake_readers();
        self.space_available.notify_one();
    }

    /// Fail the download.  Ignored if a terminal state is already set.
    pub fn set_error(&self, error: StorageError) {
        let mut state = self.lock();
        if state.terminal.is_none() {
            state.terminal = Some(Terminal::Failed(error));
        }
        drop(state);
        self.wake_readers();
        self.space_available.notify_one();
    }

    // -- Consumer side -------------------------------------------------------

    /// Copy buffered bytes into `buf`; `Ok(0)` at end of stream.  Only
    /// call from a thread that may block.
    pub fn read_blocking(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.lock();
        loop {
            if let Some(n) = self.take_into(&mut state, buf)? {
                return Ok(n);
            }
            state = self
                .readable
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Hand the front of the buffer to `process`, which returns how many
    /// bytes it consumed.  Returns that count, or `Ok(0)` at end of
    /// stream.  Only call from a thread that may block.
    pub fn process_data<F>(&self, mut process: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<usize>,
    {
        let mut state = self.lock();
        loop {
            if let Some(front) = state.chunks.front().cloned() {
                let used = process(&front)?.min(front.len());
                self.consume(&mut state, used);
                return Ok(used);
            }
            match &state.terminal {
                Some(Terminal::Complete) => return Ok(0),
                Some(Terminal::Failed(e)) => return Err(e.clone()),
                None => {}
            }
            state = self
                .readable
                .wait(state)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Async counterpart of [`read_blocking`](Self::read_blocking).
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut state = self.lock();
                if let Some(n) = self.take_into(&mut state, buf)? {
                    return Ok(n);
                }
            }
            self.data_available.notified().await;
        }
    }

    /// Next buffered chunk as-is; `Ok(None)` at end of stream.
    pub async fn next_chunk(&self) -> Result<Option<Bytes>> {
        loop {
            {
                let mut state = self.lock();
                if let Some(chunk) = state.chunks.pop_front() {
                    let len = chunk.len();
                    state.current_length -= len;
                    state.total_size_streamed += len as u64;
                    drop(state);
                    self.space_available.notify_one();
                    return Ok(Some(chunk));
                }
                match &state.terminal {
                    Some(Terminal::Complete) => return Ok(None),
                    Some(Terminal::Failed(e)) => return Err(e.clone()),
                    None => {}
                }
            }
            self.data_available.notified().await;
        }
    }

    /// Copy everything to `writer` until the stream ends.  Returns the
    /// number of bytes written.
    pub async fn drain_to<W>(&self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut total = 0u64;
        while let Some(chunk) = self.next_chunk().await? {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| StorageError::OutputStream {
                    message: e.to_string(),
                })?;
            total += chunk.len() as u64;
        }
        writer.flush().await.map_err(|e| StorageError::OutputStream {
            message: e.to_string(),
        })?;
        Ok(total)
    }

    /// Copy from the front of the queue into `buf`.  `Ok(None)` means
    /// nothing is buffered yet and the stream is still open.
    fn take_into(&self, state: &mut State, buf: &mut [u8]) -> Result<Option<usize>> {
        if state.chunks.is_empty() {
            return match &state.terminal {
                Some(Terminal::Complete) => Ok(Some(0)),
                Some(Terminal::Failed(e)) => Err(e.clone()),
                None => Ok(None),
            };
        }
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = state.chunks.front() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            copied += n;
            self.consume(state, n);
        }
        Ok(Some(copied))
    }

    fn consume(&self, state: &mut State, mut n: usize) {
        let consumed = n;
        while n > 0 {
            let Some(front) = state.chunks.front_mut() else {
                break;
            };
            if front.len() <= n {
                n -= front.len();
                state.chunks.pop_front();
            } else {
                front.advance(n);
                n = 0;
            }
        }
        state.current_length -= consumed - n;
        state.total_size_streamed += (consumed - n) as u64;
        self.space_available.notify_one();
    }

    // -- Inspection ----------------------------------------------------------

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes currently buffered.
    pub fn current_length(&self) -> usize {
        self.lock().current_length
    }

    /// Bytes ever accepted from the producer.
    pub fn total_written(&self) -> u64 {
        self.lock().total_written
    }

    /// Bytes delivered to the consumer.
    pub fn total_size_streamed(&self) -> u64 {
        self.lock().total_size_streamed
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.lock().terminal, Some(Terminal::Complete))
    }

    /// The recorded failure, if the download failed.
    pub fn error(&self) -> Option<StorageError> {
        match &self.lock().terminal {
            Some(Terminal::Failed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Base64 MD5 of everything written so far, without ending the
    /// stream.  `None` when hashing was not enabled.
    pub fn current_md5(&self) -> Option<String> {
        let state = self.lock();
        state
            .md5
            .clone()
            .map(|m| BASE64_STANDARD.encode(m.finalize()))
            .or_else(|| state.final_md5.clone())
    }

    /// Base64 MD5 of everything written.  Only valid once the download is
    /// complete; `Ok(None)` when hashing was not enabled.
    pub fn check_md5(&self) -> Result<Option<String>> {
        let state = self.lock();
        match state.terminal {
            Some(Terminal::Complete) => Ok(state.final_md5.clone()),
            _ => Err(StorageError::invalid_argument(
                "MD5 is only available after the download completes",
            )),
        }
    }
}

// -- Tests -------------------------------------------------------------------
