//! Xcelerate Proxy - LLVM compilation cache proxy
//!
//! Serves the compiler's CAS and KeyValue gRPC services, plus a Session
//! service for the host CLI, on a local UNIX socket. Every operation is
//! forwarded to a remote ByteStream store: CAS objects and KV entry maps are
//! framed into single blobs, content-addressed with BLAKE3 and streamed in
//! 1 MiB chunks. Outgoing calls carry per-session metadata, and each new
//! invocation is registered with a `GetCapabilities` handshake.

pub mod codec;
pub mod config;
pub mod headers;
pub mod interceptor;
pub mod keys;
pub mod remote;
pub mod server;
pub mod service;
pub mod session;
pub mod stream;

pub use codec::{CasObject, CodecError, ContentId};
pub use config::{ConfigError, ProxyConfig};
pub use headers::{Credentials, HandshakeError, HeaderError, HeaderInjector, OutgoingHeaders};
pub use interceptor::{CallContext, Interceptor};
pub use remote::{GrpcRemote, MemoryRemote, RemoteError, RemoteStore};
pub use server::{Proxy, ProxyServer, ServerError};
pub use service::{BlobInput, CasService, HandlerError, KvService, SessionService};
pub use session::{SessionFields, SessionState, StatsSnapshot};
pub use stream::{BlobReader, BlobWriter, MAX_CHUNK_SIZE};
