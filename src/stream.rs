//! Streaming adapter.
//!
//! [`BlobReader`] drains a ByteStream `Read` into contiguous bytes.
//! [`BlobWriter`] turns arbitrary writes into `WriteRequest` frames of at
//! most [`MAX_CHUNK_SIZE`] bytes with strictly increasing offsets, then ends
//! the upload with exactly one of:
//!
//! - [`close`](BlobWriter::close): a `finish_write` frame at the final
//!   offset, then the server's single response;
//! - [`abort`](BlobWriter::abort): a half-close with no finish frame, which
//!   makes the store discard the partial upload.
//!
//! Dropping an unfinished writer aborts it, so a cancelled handler never
//! commits a partial blob.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::debug;
use xcelerate_protocol::bytestream::WriteRequest;

use crate::interceptor::CallContext;
use crate::remote::{ChunkSink, ChunkSource, RemoteError, RemoteStore};
use crate::session::SessionGeneration;

/// Largest `data` payload sent in one `WriteRequest`.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Reader over one remote blob.
pub struct BlobReader {
    source: Box<dyn ChunkSource>,
    generation: Arc<SessionGeneration>,
}

impl BlobReader {
    pub async fn open(
        remote: &dyn RemoteStore,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Self, RemoteError> {
        let source = remote.open_read(ctx, resource_name).await?;
        Ok(Self {
            source,
            generation: Arc::clone(ctx.generation()),
        })
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, RemoteError> {
        let chunk = self.source.read_next_chunk().await?;
        if let Some(chunk) = &chunk {
            self.generation.stats().record_download(chunk.len() as u64);
        }
        Ok(chunk)
    }

    /// Concatenate the remaining chunks.
    pub async fn read_to_end(mut self) -> Result<Bytes, RemoteError> {
        let first = match self.next_chunk().await? {
            Some(chunk) => chunk,
            None => return Ok(Bytes::new()),
        };
        let Some(second) = self.next_chunk().await? else {
            return Ok(first);
        };

        let mut buf = BytesMut::with_capacity(first.len() + second.len());
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Chunking writer over one remote upload.
pub struct BlobWriter {
    resource_name: String,
    sink: Option<Box<dyn ChunkSink>>,
    pending: BytesMut,
    offset: i64,
    generation: Arc<SessionGeneration>,
}

impl BlobWriter {
    pub async fn open(
        remote: &dyn RemoteStore,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Self, RemoteError> {
        let sink = remote.open_write(ctx, resource_name).await?;
        Ok(Self {
            resource_name: resource_name.to_string(),
            sink: Some(sink),
            pending: BytesMut::new(),
            offset: 0,
            generation: Arc::clone(ctx.generation()),
        })
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Bytes handed to the store so far.
    pub fn offset(&self) -> u64 {
        self.offset as u64
    }

    async fn send(&mut self, data: Bytes, finish_write: bool) -> Result<(), RemoteError> {
        let len = data.len();
        let frame = WriteRequest {
            resource_name: self.resource_name.clone(),
            write_offset: self.offset,
            finish_write,
            data,
        };
        let sink = self.sink.as_mut().ok_or(RemoteError::StreamClosed)?;

        sink.send_chunk(frame).await?;

        self.offset += len as i64;
        self.generation.stats().record_upload(len as u64);
        Ok(())
    }

    /// Queue `data`, sending every full chunk. At most one partial chunk is
    /// held back until the next write or [`close`](Self::close).
    pub async fn write(&mut self, mut data: Bytes) -> Result<(), RemoteError> {
        if !self.pending.is_empty() {
            let take = (MAX_CHUNK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data.split_to(take));
            if self.pending.len() < MAX_CHUNK_SIZE {
                return Ok(());
            }
            let chunk = self.pending.split().freeze();
            self.send(chunk, false).await?;
        }

        while data.len() >= MAX_CHUNK_SIZE {
            let chunk = data.split_to(MAX_CHUNK_SIZE);
            self.send(chunk, false).await?;
        }
        self.pending.extend_from_slice(&data);
        Ok(())
    }

    /// Flush, send the finish frame and wait for the committed size.
    ///
    /// On failure the stream is aborted, never left half-finished.
    pub async fn close(mut self) -> Result<u64, RemoteError> {
        if !self.pending.is_empty() {
            let chunk = self.pending.split().freeze();
            self.send(chunk, false).await?;
        }
        self.send(Bytes::new(), true).await?;

        let sink = self.sink.take().ok_or(RemoteError::StreamClosed)?;
        let committed = sink.close().await?;
        Ok(committed.max(0) as u64)
    }

    /// Abandon the upload without a finish frame.
    pub fn abort(mut self) {
        self.abort_sink();
    }

    fn abort_sink(&mut self) {
        if let Some(sink) = self.sink.take() {
            debug!(
                resource = %self.resource_name,
                offset = self.offset,
                "aborting upload"
            );
            sink.abort();
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        self.abort_sink();
    }
}

/// Read a whole blob.
pub async fn download(
    remote: &dyn RemoteStore,
    ctx: &CallContext,
    resource_name: &str,
) -> Result<Bytes, RemoteError> {
    BlobReader::open(remote, ctx, resource_name)
        .await?
        .read_to_end()
        .await
}

/// Upload a whole in-memory blob, aborting on any failure.
pub async fn upload(
    remote: &dyn RemoteStore,
    ctx: &CallContext,
    resource_name: &str,
    blob: Bytes,
) -> Result<u64, RemoteError> {
    let mut writer = BlobWriter::open(remote, ctx, resource_name).await?;
    if let Err(err) = writer.write(blob).await {
        writer.abort();
        return Err(err);
    }
    writer.close().await
}
