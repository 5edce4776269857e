//! Compiler-facing gRPC services.
//!
//! The LLVM services never fail a lookup at the RPC level: a miss and a
//! degraded backend are both encoded in the response payload. Only local
//! file errors surface as a gRPC status. [`HandlerError`]
//! carries that decision for every CAS and KV handler.

pub mod cas;
pub mod kv;
pub mod session;

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tonic::Status;
use tracing::{debug, warn};

use crate::codec::CodecError;
use crate::remote::RemoteError;

pub use cas::{BlobInput, CasService};
pub use kv::KvService;
pub use session::SessionService;

/// Failure inside a CAS or KV handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Remote(RemoteError),

    #[error("blob decode failed: {0}")]
    Codec(#[from] CodecError),

    #[error("failed to read {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<RemoteError> for HandlerError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(name) => Self::NotFound(name),
            other => Self::Remote(other),
        }
    }
}

/// What a failed handler puts in its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// `OBJECT_NOT_FOUND` / `KEY_NOT_FOUND`.
    Miss,
    /// `ERROR` with this description.
    Degraded(String),
}

impl HandlerError {
    /// Classify for the response, or fail the call outright.
    pub fn classify(self, method: &str) -> Result<Failure, Status> {
        match self {
            Self::NotFound(name) => {
                debug!(method, resource = %name, "cache miss");
                Ok(Failure::Miss)
            }
            Self::Remote(err) => {
                warn!(method, error = %err, "remote store call failed");
                Ok(Failure::Degraded(err.to_string()))
            }
            Self::Codec(err) => {
                warn!(method, error = %err, "stored blob is malformed");
                Ok(Failure::Degraded(format!("blob decode failed: {}", err)))
            }
            err @ Self::LocalIo { .. } => {
                warn!(method, error = %err, "local file read failed");
                Err(Status::internal(err.to_string()))
            }
        }
    }
}
