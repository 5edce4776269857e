//! ByteStream / Capabilities client over tonic.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Response, Status, Streaming};
use xcelerate_protocol::bytestream::byte_stream_client::ByteStreamClient;
use xcelerate_protocol::bytestream::{ReadRequest, ReadResponse, WriteRequest, WriteResponse};
use xcelerate_protocol::remote_execution::capabilities_client::CapabilitiesClient;
use xcelerate_protocol::remote_execution::GetCapabilitiesRequest;

use super::{ChunkSink, ChunkSource, RemoteError, RemoteStore};
use crate::headers::OutgoingHeaders;
use crate::interceptor::CallContext;

/// Remote store reached over gRPC. Clones share one channel.
#[derive(Debug, Clone)]
pub struct GrpcRemote {
    bytestream: ByteStreamClient<Channel>,
    capabilities: CapabilitiesClient<Channel>,
}

impl GrpcRemote {
    /// Create clients for `endpoint` without dialling yet.
    ///
    /// `https://` endpoints use TLS with the platform's root certificates.
    pub fn connect_lazy(endpoint: &str, connect_timeout: Duration) -> Result<Self, RemoteError> {
        let mut builder = Endpoint::from_shared(endpoint.to_string())?
            .connect_timeout(connect_timeout)
            .tcp_nodelay(true);
        if endpoint.starts_with("https://") {
            builder = builder.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        Ok(Self::from_channel(builder.connect_lazy()))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            bytestream: ByteStreamClient::new(channel.clone()),
            capabilities: CapabilitiesClient::new(channel),
        }
    }
}

#[tonic::async_trait]
impl RemoteStore for GrpcRemote {
    async fn open_read(
        &self,
        ctx: &CallContext,
        resource_name: &str,
    ) -> Result<Box<dyn ChunkSource>, RemoteError> {
        let request = ctx.request(ReadRequest {
            resource_name: resource_name.to_string(),
            read_offset: 0,
            read_limit: 0,
        });
        let stream = self.bytestream.clone().read(request).await?.into_inner();
        Ok(Box::new(GrpcReadStream { inner: stream }))
    }

    async fn open_write(
        &self,
        ctx: &CallContext,
        _resource_name: &str,
    ) -> Result<Box<dyn ChunkSink>, RemoteError> {
        // One frame in flight: each send waits until tonic pulled the previous one.
        let (tx, rx) = mpsc::channel(1);
        let request = ctx.request(ReceiverStream::new(rx));
        let mut client = self.bytestream.clone();
        let response = tokio::spawn(async move { client.write(request).await });

        Ok(Box::new(GrpcWriteStream {
            tx: Some(tx),
            response: Some(response),
        }))
    }

    async fn get_capabilities(
        &self,
        headers: &OutgoingHeaders,
        timeout: Option<Duration>,
    ) -> Result<(), RemoteError> {
        let mut request = headers.request(GetCapabilitiesRequest::default());
        if let Some(timeout) = timeout {
            request.set_timeout(timeout);
        }
        self.capabilities.clone().get_capabilities(request).await?;
        Ok(())
    }
}

struct GrpcReadStream {
    inner: Streaming<ReadResponse>,
}

#[tonic::async_trait]
impl ChunkSource for GrpcReadStream {
    async fn read_next_chunk(&mut self) -> Result<Option<Bytes>, RemoteError> {
        Ok(self.inner.message().await?.map(|response| response.data))
    }
}

type WriteCall = JoinHandle<Result<Response<WriteResponse>, Status>>;

struct GrpcWriteStream {
    tx: Option<mpsc::Sender<WriteRequest>>,
    response: Option<WriteCall>,
}

impl GrpcWriteStream {
    /// The call ended early; recover the status it ended with.
    async fn call_failure(&mut self) -> RemoteError {
        self.tx = None;
        match self.response.take() {
            Some(call) => match call.await {
                Ok(Err(status)) => status.into(),
                _ => RemoteError::StreamClosed,
            },
            None => RemoteError::StreamClosed,
        }
    }
}

#[tonic::async_trait]
impl ChunkSink for GrpcWriteStream {
    async fn send_chunk(&mut self, frame: WriteRequest) -> Result<(), RemoteError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(RemoteError::StreamClosed);
        };
        if tx.send(frame).await.is_ok() {
            return Ok(());
        }
        Err(self.call_failure().await)
    }

    async fn close(mut self: Box<Self>) -> Result<i64, RemoteError> {
        // Dropping the sender ends the request stream.
        self.tx = None;
        let call = self.response.take().ok_or(RemoteError::StreamClosed)?;
        match call.await {
            Ok(Ok(response)) => Ok(response.into_inner().committed_size),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(RemoteError::StreamClosed),
        }
    }

    fn abort(mut self: Box<Self>) {
        self.tx = None;
        if let Some(call) = self.response.take() {
            call.abort();
        }
    }
}

impl Drop for GrpcWriteStream {
    fn drop(&mut self) {
        if let Some(call) = self.response.take() {
            call.abort();
        }
    }
}
