//! LLVM CAS service: `Get`, `Put`, `Load`, `Save`.
//!
//! `Get`/`Put` move framed objects (payload plus references) whose id is
//! the hash of the framed bytes. `Load`/`Save` move raw payloads whose id is
//! the hash of the payload itself. Both kinds live under the same key space.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tonic::{Request, Response, Status};
use xcelerate_protocol::cas::casdb_service_server::CasdbService;
use xcelerate_protocol::cas::{
    cas_bytes, CasBytes, CasGetRequest, CasGetResponse, CasLoadRequest, CasLoadResponse,
    CasPutRequest, CasPutResponse, CasSaveRequest, CasSaveResponse,
};

use super::{Failure, HandlerError};
use crate::codec::{self, CasObject, ContentId};
use crate::interceptor::{CallContext, Interceptor};
use crate::keys;
use crate::remote::RemoteStore;
use crate::stream::{self, BlobWriter, MAX_CHUNK_SIZE};

/// Blob contents as the compiler hands them over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobInput {
    Inline(Bytes),
    File(PathBuf),
}

impl BlobInput {
    /// An absent `CASBytes` is an empty inline blob.
    pub fn from_wire(bytes: Option<CasBytes>) -> Self {
        match bytes.and_then(|b| b.contents) {
            Some(cas_bytes::Contents::Blob(data)) => Self::Inline(Bytes::from(data)),
            Some(cas_bytes::Contents::FilePath(path)) => Self::File(PathBuf::from(path)),
            None => Self::Inline(Bytes::new()),
        }
    }

    async fn read_all(self) -> Result<Bytes, HandlerError> {
        match self {
            Self::Inline(data) => Ok(data),
            Self::File(path) => match tokio::fs::read(&path).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(source) => Err(HandlerError::LocalIo { path, source }),
            },
        }
    }
}

fn local_io(path: &Path) -> impl FnOnce(io::Error) -> HandlerError + '_ {
    move |source| HandlerError::LocalIo {
        path: path.to_path_buf(),
        source,
    }
}

/// `CASDBService` backed by a [`RemoteStore`].
pub struct CasService {
    remote: Arc<dyn RemoteStore>,
    interceptor: Arc<Interceptor>,
}

impl CasService {
    pub fn new(remote: Arc<dyn RemoteStore>, interceptor: Arc<Interceptor>) -> Self {
        Self {
            remote,
            interceptor,
        }
    }

    /// Fetch and unframe the object stored under `id`.
    pub async fn get_object(&self, ctx: &CallContext, id: &[u8]) -> Result<CasObject, HandlerError> {
        let blob = stream::download(self.remote.as_ref(), ctx, &keys::cas_key(id)).await?;
        Ok(codec::decode_object(blob)?)
    }

    /// Fetch the stored bytes under `id` verbatim.
    pub async fn load_blob(&self, ctx: &CallContext, id: &[u8]) -> Result<Bytes, HandlerError> {
        Ok(stream::download(self.remote.as_ref(), ctx, &keys::cas_key(id)).await?)
    }

    /// Frame and store an object; its id is the hash of the framed bytes.
    pub async fn put_object(
        &self,
        ctx: &CallContext,
        data: BlobInput,
        references: &[Vec<u8>],
    ) -> Result<ContentId, HandlerError> {
        let data = data.read_all().await?;
        let serialized = codec::encode_object(&data, references)?;
        let id = ContentId::of(&serialized);

        stream::upload(self.remote.as_ref(), ctx, &keys::cas_key_for(&id), serialized).await?;
        Ok(id)
    }

    /// Store raw bytes; their id is the hash of the bytes themselves.
    ///
    /// Files are read twice: once to hash, then again from the start to
    /// upload, so memory use stays at one chunk.
    pub async fn save_blob(&self, ctx: &CallContext, data: BlobInput) -> Result<ContentId, HandlerError> {
        match data {
            BlobInput::Inline(data) => {
                let id = ContentId::of(&data);
                stream::upload(self.remote.as_ref(), ctx, &keys::cas_key_for(&id), data).await?;
                Ok(id)
            }
            BlobInput::File(path) => self.save_file(ctx, &path).await,
        }
    }

    async fn save_file(&self, ctx: &CallContext, path: &Path) -> Result<ContentId, HandlerError> {
        let mut file = File::open(path).await.map_err(local_io(path))?;

        let mut hasher = blake3::Hasher::new();
        let mut hashed: u64 = 0;
        let mut buf = BytesMut::with_capacity(MAX_CHUNK_SIZE);
        loop {
            buf.clear();
            let n = file.read_buf(&mut buf).await.map_err(local_io(path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf);
            hashed += n as u64;
        }
        let id = ContentId::from(hasher.finalize());

        file.seek(SeekFrom::Start(0)).await.map_err(local_io(path))?;

        let mut writer =
            BlobWriter::open(self.remote.as_ref(), ctx, &keys::cas_key_for(&id)).await?;
        loop {
            let mut chunk = BytesMut::with_capacity(MAX_CHUNK_SIZE);
            let n = file.read_buf(&mut chunk).await.map_err(local_io(path))?;
            if n == 0 {
                break;
            }
            writer.write(chunk.freeze()).await?;
        }

        if writer.offset() != hashed {
            writer.abort();
            return Err(local_io(path)(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file changed while it was being uploaded",
            )));
        }
        writer.close().await?;
        Ok(id)
    }
}

#[tonic::async_trait]
impl CasdbService for CasService {
    async fn get(&self, request: Request<CasGetRequest>) -> Result<Response<CasGetResponse>, Status> {
        let ctx = self.interceptor.enter("Get", request.metadata()).await?;
        let id = request.into_inner().cas_id.unwrap_or_default().id;

        let response = match self.get_object(&ctx, &id).await {
            Ok(object) => {
                ctx.stats().record_hit();
                CasGetResponse::success(
                    Vec::from(object.data),
                    object.references.into_iter().map(Vec::from).collect(),
                )
            }
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => {
                    ctx.stats().record_miss();
                    CasGetResponse::not_found()
                }
                Failure::Degraded(description) => CasGetResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }

    async fn put(&self, request: Request<CasPutRequest>) -> Result<Response<CasPutResponse>, Status> {
        let ctx = self.interceptor.enter("Put", request.metadata()).await?;
        let object = request.into_inner().data.unwrap_or_default();
        let references: Vec<Vec<u8>> = object.references.into_iter().map(|r| r.id).collect();

        let response = match self
            .put_object(&ctx, BlobInput::from_wire(object.blob), &references)
            .await
        {
            Ok(id) => CasPutResponse::success(id.to_vec()),
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => CasPutResponse::error("remote store rejected the upload"),
                Failure::Degraded(description) => CasPutResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }

    async fn load(&self, request: Request<CasLoadRequest>) -> Result<Response<CasLoadResponse>, Status> {
        let ctx = self.interceptor.enter("Load", request.metadata()).await?;
        // write_to_disk is ignored: contents are always returned inline.
        let id = request.into_inner().cas_id.unwrap_or_default().id;

        let response = match self.load_blob(&ctx, &id).await {
            Ok(data) => {
                ctx.stats().record_hit();
                CasLoadResponse::success(Vec::from(data))
            }
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => {
                    ctx.stats().record_miss();
                    CasLoadResponse::not_found()
                }
                Failure::Degraded(description) => CasLoadResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }

    async fn save(&self, request: Request<CasSaveRequest>) -> Result<Response<CasSaveResponse>, Status> {
        let ctx = self.interceptor.enter("Save", request.metadata()).await?;
        let blob = request.into_inner().data.unwrap_or_default().blob;

        let response = match self.save_blob(&ctx, BlobInput::from_wire(blob)).await {
            Ok(id) => CasSaveResponse::success(id.to_vec()),
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => CasSaveResponse::error("remote store rejected the upload"),
                Failure::Degraded(description) => CasSaveResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }
}
