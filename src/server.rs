//! Proxy server
//!
//! Wires the three compiler-facing services to one shared session and
//! remote store, and serves them on a UNIX socket. The socket file is owned
//! by the process: a stale one is removed on bind, ours is removed on
//! shutdown.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tracing::info;
use xcelerate_protocol::cas::casdb_service_server::CasdbServiceServer;
use xcelerate_protocol::keyvalue::key_value_db_server::KeyValueDbServer;
use xcelerate_protocol::session::session_server::SessionServer;

use crate::headers::{Credentials, HeaderInjector};
use crate::interceptor::Interceptor;
use crate::remote::RemoteStore;
use crate::service::{CasService, KvService, SessionService};
use crate::session::SessionState;

/// Errors that can occur while binding or serving
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to remove stale socket {}: {source}", .path.display())]
    Unlink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create socket directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to bind {}: {source}", .path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Server error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Shared state behind all three services.
pub struct Proxy {
    interceptor: Arc<Interceptor>,
    remote: Arc<dyn RemoteStore>,
}

impl Proxy {
    pub fn new(credentials: Credentials, remote: Arc<dyn RemoteStore>) -> Self {
        let session = Arc::new(SessionState::default());
        let injector = HeaderInjector::new(credentials, Arc::clone(&remote));
        Self {
            interceptor: Arc::new(Interceptor::new(session, injector)),
            remote,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        self.interceptor.session()
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn cas_service(&self) -> CasService {
        CasService::new(Arc::clone(&self.remote), Arc::clone(&self.interceptor))
    }

    pub fn kv_service(&self) -> KvService {
        KvService::new(Arc::clone(&self.remote), Arc::clone(&self.interceptor))
    }

    pub fn session_service(&self) -> SessionService {
        SessionService::new(Arc::clone(&self.interceptor))
    }

    /// All three services on one tonic router.
    pub fn router(&self) -> Router {
        Server::builder()
            .add_service(CasdbServiceServer::new(self.cas_service()))
            .add_service(KeyValueDbServer::new(self.kv_service()))
            .add_service(SessionServer::new(self.session_service()))
    }
}

fn remove_socket(path: &Path) -> Result<(), ServerError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ServerError::Unlink {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A bound UNIX socket, ready to serve.
#[derive(Debug)]
pub struct ProxyServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ProxyServer {
    /// Bind `path`, replacing a stale socket file. Must run inside a tokio
    /// runtime.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, ServerError> {
        let path = path.into();
        remove_socket(&path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ServerError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|source| ServerError::Bind {
            path: path.clone(),
            source,
        })?;
        info!(socket = %path.display(), "listening");
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serve until `shutdown` resolves, drain in-flight calls, then remove
    /// the socket file.
    pub async fn serve_with_shutdown<F>(self, proxy: &Proxy, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let incoming = UnixListenerStream::new(self.listener);
        let served = proxy
            .router()
            .serve_with_incoming_shutdown(incoming, shutdown)
            .await;

        info!(socket = %self.path.display(), "shut down");
        remove_socket(&self.path)?;
        Ok(served?)
    }
}
