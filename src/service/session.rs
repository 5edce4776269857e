//! Build session control: `SetSession`, `GetSessionStats`.
//!
//! Neither call talks to the remote store, so they go through
//! [`Interceptor::observe`] and never trigger the handshake themselves.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::info;
use xcelerate_protocol::session::session_server::Session;
use xcelerate_protocol::session::{
    GetSessionStatsRequest, GetSessionStatsResponse, SetSessionRequest, SetSessionResponse,
};

use crate::interceptor::Interceptor;
use crate::session::{SessionFields, StatsSnapshot};

pub struct SessionService {
    interceptor: Arc<Interceptor>,
}

impl SessionService {
    pub fn new(interceptor: Arc<Interceptor>) -> Self {
        Self { interceptor }
    }

    /// Activate a new session. Counters restart at zero and the next
    /// outgoing call re-registers the invocation.
    pub fn activate(&self, fields: SessionFields) {
        info!(
            invocation_id = %fields.invocation_id,
            app = %fields.app_slug,
            build = %fields.build_slug,
            step = %fields.step_slug,
            "session activated"
        );
        self.interceptor.session().activate(fields);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.interceptor.session().snapshot().stats().snapshot()
    }
}

#[tonic::async_trait]
impl Session for SessionService {
    async fn set_session(
        &self,
        request: Request<SetSessionRequest>,
    ) -> Result<Response<SetSessionResponse>, Status> {
        self.interceptor.observe("SetSession");
        let request = request.into_inner();

        self.activate(SessionFields::new(
            request.invocation_id,
            request.app_slug,
            request.build_slug,
            request.step_slug,
        ));
        Ok(Response::new(SetSessionResponse {}))
    }

    async fn get_session_stats(
        &self,
        _request: Request<GetSessionStatsRequest>,
    ) -> Result<Response<GetSessionStatsResponse>, Status> {
        self.interceptor.observe("GetSessionStats");
        let stats = self.stats();

        Ok(Response::new(GetSessionStatsResponse {
            uploaded_bytes: stats.uploaded_bytes,
            downloaded_bytes: stats.downloaded_bytes,
            hits: stats.hits,
            misses: stats.misses,
        }))
    }
}
