//! LLVM key-value service: `GetValue`, `PutValue`.
//!
//! Each key maps to one small blob holding the framed entry map. A put
//! replaces the whole map.

use std::collections::BTreeMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use xcelerate_protocol::keyvalue::key_value_db_server::KeyValueDb;
use xcelerate_protocol::keyvalue::{
    GetValueRequest, GetValueResponse, PutValueRequest, PutValueResponse, Value,
};

use super::{Failure, HandlerError};
use crate::codec;
use crate::interceptor::{CallContext, Interceptor};
use crate::keys;
use crate::remote::RemoteStore;
use crate::stream;

/// Entries stored under one key.
pub type Entries = BTreeMap<String, Vec<u8>>;

/// `KeyValueDB` backed by a [`RemoteStore`].
pub struct KvService {
    remote: Arc<dyn RemoteStore>,
    interceptor: Arc<Interceptor>,
}

impl KvService {
    pub fn new(remote: Arc<dyn RemoteStore>, interceptor: Arc<Interceptor>) -> Self {
        Self {
            remote,
            interceptor,
        }
    }

    pub async fn get_entries(&self, ctx: &CallContext, key: &[u8]) -> Result<Entries, HandlerError> {
        let blob = stream::download(self.remote.as_ref(), ctx, &keys::kv_key(key)).await?;
        Ok(codec::decode_value(blob)?)
    }

    pub async fn put_entries(
        &self,
        ctx: &CallContext,
        key: &[u8],
        entries: &Entries,
    ) -> Result<(), HandlerError> {
        let blob = codec::encode_value(entries)?;
        stream::upload(self.remote.as_ref(), ctx, &keys::kv_key(key), blob).await?;
        Ok(())
    }
}

#[tonic::async_trait]
impl KeyValueDb for KvService {
    async fn get_value(
        &self,
        request: Request<GetValueRequest>,
    ) -> Result<Response<GetValueResponse>, Status> {
        let ctx = self.interceptor.enter("GetValue", request.metadata()).await?;
        let key = request.into_inner().key;

        let response = match self.get_entries(&ctx, &key).await {
            Ok(entries) => {
                ctx.stats().record_hit();
                GetValueResponse::success(Value { entries })
            }
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => {
                    ctx.stats().record_miss();
                    GetValueResponse::not_found()
                }
                Failure::Degraded(description) => GetValueResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }

    async fn put_value(
        &self,
        request: Request<PutValueRequest>,
    ) -> Result<Response<PutValueResponse>, Status> {
        let ctx = self.interceptor.enter("PutValue", request.metadata()).await?;
        let request = request.into_inner();
        let entries = request.value.unwrap_or_default().entries;

        let response = match self.put_entries(&ctx, &request.key, &entries).await {
            Ok(()) => PutValueResponse::success(),
            Err(err) => match err.classify(ctx.method())? {
                Failure::Miss => PutValueResponse::error("remote store rejected the upload"),
                Failure::Degraded(description) => PutValueResponse::error(description),
            },
        };
        Ok(Response::new(response))
    }
}
