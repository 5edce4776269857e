//! Remote store seam.
//!
//! Handlers never talk to tonic clients directly; they go through
//! [`RemoteStore`], which opens byte streams and runs the capabilities
//! handshake. Two implementations:
//!
//! - [`GrpcRemote`]: ByteStream + Capabilities clients over a shared channel;
//! - [`MemoryRemote`]: in-process store for tests, recording every frame.

pub mod grpc;
pub mod memory;

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tonic::{Code, Status};
use xcelerate_protocol::bytestream::WriteRequest;

use crate::headers::OutgoingHeaders;
use crate::interceptor::CallContext;

pub use grpc::GrpcRemote;
pub use memory::{MemoryRemote, RecordedFrame, RecordedStream, StreamEnd};

/// Errors talking to the remote store.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("remote store returned {}: {}", .0.code(), .0.message())]
    Status(Status),

    #[error("write stream closed before the upload finished")]
    StreamClosed,

    #[error("failed to set up remote channel: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl From<Status> for RemoteError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::NotFound => Self::NotFound(status.message().to_string()),
            Code::DeadlineExceeded => Self::DeadlineExceeded(status.message().to_string()),
            _ => Self::Status(status),
        }
    }
}

/// Server-streaming side of a `Read`.
#[tonic::async_trait]
pub trait ChunkSource: Send {
    /// Next `data` payload, or `None` once the stream ended cleanly.
    async fn read_next_chunk(&mut self) -> Result<Option<Bytes>, RemoteError>;
}

/// Client-streaming side of a `Write`.
///
/// A sink ends with exactly one of [`close`](ChunkSink::close) or
/// [`abort`](ChunkSink::abort).
#[tonic::async_trait]
pub trait ChunkSink: Send {
    /// Send one frame, waiting for flow control.
    async fn send_chunk(&mut self, frame: WriteRequest) -> Result<(), RemoteError>;

    /// Half-close after the finish frame and wait for the committed size.
    async fn close(self: Box<Self>) -> Result<i64, RemoteError>;

    /// Drop the upload without a finish frame; the store discards it.
    fn abort(self: Box<Self>);
}

/// Operations the proxy needs from the remote store.
#[tonic::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn open_read(
        &self,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Box<dyn ChunkSource>, RemoteError>;

    async fn open_write(
        &self,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Box<dyn ChunkSink>, RemoteError>;

    /// `GetCapabilities`; only success or failure matters.
    async fn get_capabilities(
        &self,
        headers: &OutgoingHeaders,
        timeout: Option<Duration>,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            RemoteError::from(Status::not_found("blob/x")),
            RemoteError::NotFound(msg) if msg == "blob/x"
        ));
        // A cancel from the store side is a transport failure, not ours.
        assert!(matches!(
            RemoteError::from(Status::cancelled("reset by peer")),
            RemoteError::Status(s) if s.code() == Code::Cancelled
        ));
        assert!(matches!(
            RemoteError::from(Status::deadline_exceeded("slow")),
            RemoteError::DeadlineExceeded(_)
        ));
        assert!(matches!(
            RemoteError::from(Status::unavailable("down")),
            RemoteError::Status(s) if s.code() == Code::Unavailable
        ));
    }

    #[test]
    fn test_status_error_message_names_code() {
        let err = RemoteError::from(Status::permission_denied("bad token"));
        let message = err.to_string();
        assert!(message.contains("bad token"), "{}", message);
    }
}
