//! In-process remote store.
//!
//! Behaves like a ByteStream server that validates offsets and only commits
//! an upload once it saw `finish_write` and a clean half-close. Everything
//! the proxy sends is recorded so tests can assert on the exact frames,
//! aborts, handshakes and metadata.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tonic::metadata::MetadataMap;
use tonic::Status;
use xcelerate_protocol::bytestream::WriteRequest;

use super::{ChunkSink, ChunkSource, RemoteError, RemoteStore};
use crate::headers::OutgoingHeaders;
use crate::interceptor::CallContext;
use crate::stream::MAX_CHUNK_SIZE;

/// Offset, size and flags of one received `WriteRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFrame {
    pub resource_name: String,
    pub write_offset: i64,
    pub len: usize,
    pub finish_write: bool,
}

/// How a write stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Open,
    Closed,
    Aborted,
}

/// One write stream as seen by the store.
#[derive(Debug, Clone)]
pub struct RecordedStream {
    pub resource_name: String,
    pub frames: Vec<RecordedFrame>,
    pub end: StreamEnd,
}

type WriteHook = Arc<dyn Fn(&WriteRequest) + Send + Sync>;

#[derive(Default)]
struct Inner {
    blobs: HashMap<String, Bytes>,
    streams: Vec<RecordedStream>,
    reads: Vec<String>,
    call_headers: Vec<MetadataMap>,
    capability_headers: Vec<MetadataMap>,
    read_failure: Option<Status>,
    write_failure: Option<(usize, Status)>,
    capabilities_failure: Option<Status>,
    write_hook: Option<WriteHook>,
}

/// Shared in-memory store. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryRemote")
            .field("blobs", &inner.blobs.len())
            .field("streams", &inner.streams.len())
            .finish()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a blob directly, bypassing the write path.
    pub fn insert(&self, resource_name: impl Into<String>, blob: impl Into<Bytes>) {
        self.lock().blobs.insert(resource_name.into(), blob.into());
    }

    pub fn blob(&self, resource_name: &str) -> Option<Bytes> {
        self.lock().blobs.get(resource_name).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Every write stream opened so far, in open order.
    pub fn streams(&self) -> Vec<RecordedStream> {
        self.lock().streams.clone()
    }

    /// Resource names of every read opened so far.
    pub fn reads(&self) -> Vec<String> {
        self.lock().reads.clone()
    }

    /// Metadata of every read and write call.
    pub fn call_headers(&self) -> Vec<MetadataMap> {
        self.lock().call_headers.clone()
    }

    pub fn capabilities_calls(&self) -> usize {
        self.lock().capability_headers.len()
    }

    pub fn capability_headers(&self) -> Vec<MetadataMap> {
        self.lock().capability_headers.clone()
    }

    /// Fail every following read with `status`.
    pub fn fail_reads(&self, status: Status) {
        self.lock().read_failure = Some(status);
    }

    /// Accept `frames` frames per stream, then fail the next send with `status`.
    pub fn fail_writes_after(&self, frames: usize, status: Status) {
        self.lock().write_failure = Some((frames, status));
    }

    pub fn fail_capabilities(&self, status: Status) {
        self.lock().capabilities_failure = Some(status);
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.read_failure = None;
        inner.write_failure = None;
        inner.capabilities_failure = None;
    }

    /// Run `hook` on every received frame, after it was recorded.
    pub fn on_write(&self, hook: impl Fn(&WriteRequest) + Send + Sync + 'static) {
        self.lock().write_hook = Some(Arc::new(hook));
    }

    fn finish_stream(&self, index: usize, end: StreamEnd) {
        if let Some(stream) = self.lock().streams.get_mut(index) {
            if stream.end == StreamEnd::Open {
                stream.end = end;
            }
        }
    }
}

#[tonic::async_trait]
impl RemoteStore for MemoryRemote {
    async fn open_read(
        &self,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Box<dyn ChunkSource>, RemoteError> {
        let mut inner = self.lock();
        inner.reads.push(resource_name.to_string());
        inner.call_headers.push(ctx.headers().metadata().clone());

        if let Some(status) = inner.read_failure.clone() {
            return Err(status.into());
        }
        let blob = inner
            .blobs
            .get(resource_name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(resource_name.to_string()))?;

        Ok(Box::new(MemoryReadStream { remaining: blob }))
    }

    async fn open_write(
        &self,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Box<dyn ChunkSink>, RemoteError> {
        let mut inner = self.lock();
        inner.call_headers.push(ctx.headers().metadata().clone());
        inner.streams.push(RecordedStream {
            resource_name: resource_name.to_string(),
            frames: Vec::new(),
            end: StreamEnd::Open,
        });
        let index = inner.streams.len() - 1;

        Ok(Box::new(MemoryWriteStream {
            remote: self.clone(),
            index,
            resource_name: resource_name.to_string(),
            received: BytesMut::new(),
            finished: false,
            done: false,
        }))
    }

    async fn get_capabilities(
        &self,
        headers: &OutgoingHeaders,
        _timeout: Option<Duration>,
    ) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if let Some(status) = inner.capabilities_failure.clone() {
            return Err(status.into());
        }
        inner.capability_headers.push(headers.metadata().clone());
        Ok(())
    }
}

struct MemoryReadStream {
    remaining: Bytes,
}

#[tonic::async_trait]
impl ChunkSource for MemoryReadStream {
    async fn read_next_chunk(&mut self) -> Result<Option<Bytes>, RemoteError> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        let take = self.remaining.len().min(MAX_CHUNK_SIZE);
        Ok(Some(self.remaining.split_to(take)))
    }
}

struct MemoryWriteStream {
    remote: MemoryRemote,
    index: usize,
    resource_name: String,
    received: BytesMut,
    finished: bool,
    done: bool,
}

#[tonic::async_trait]
impl ChunkSink for MemoryWriteStream {
    async fn send_chunk(&mut self, frame: WriteRequest) -> Result<(), RemoteError> {
        let hook = {
            let mut inner = self.remote.lock();
            let failure = inner.write_failure.clone();
            let stream = &mut inner.streams[self.index];

            if let Some((limit, status)) = failure {
                if stream.frames.len() >= limit {
                    return Err(status.into());
                }
            }
            if self.finished {
                return Err(Status::invalid_argument("frame after finish_write").into());
            }
            if frame.resource_name != self.resource_name {
                return Err(Status::invalid_argument("resource name changed mid-stream").into());
            }
            if frame.write_offset != self.received.len() as i64 {
                return Err(Status::invalid_argument(format!(
                    "write_offset {} does not match committed size {}",
                    frame.write_offset,
                    self.received.len()
                ))
                .into());
            }

            stream.frames.push(RecordedFrame {
                resource_name: frame.resource_name.clone(),
                write_offset: frame.write_offset,
                len: frame.data.len(),
                finish_write: frame.finish_write,
            });
            inner.write_hook.clone()
        };

        self.received.extend_from_slice(&frame.data);
        self.finished = frame.finish_write;

        if let Some(hook) = hook {
            hook(&frame);
        }
        // A network send suspends here, which is where a dropped handler stops.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<i64, RemoteError> {
        self.done = true;
        if !self.finished {
            self.remote.finish_stream(self.index, StreamEnd::Aborted);
            return Err(Status::failed_precondition("stream closed without finish_write").into());
        }

        let committed = self.received.len() as i64;
        let blob = std::mem::take(&mut self.received).freeze();
        self.remote.insert(self.resource_name.clone(), blob);
        self.remote.finish_stream(self.index, StreamEnd::Closed);
        Ok(committed)
    }

    fn abort(mut self: Box<Self>) {
        self.done = true;
        self.remote.finish_stream(self.index, StreamEnd::Aborted);
    }
}

impl Drop for MemoryWriteStream {
    fn drop(&mut self) {
        // A stream dropped mid-upload looks like a broken connection.
        if !self.done {
            self.remote.finish_stream(self.index, StreamEnd::Aborted);
        }
    }
}
