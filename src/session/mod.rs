//! Build session state.
//!
//! The host CLI activates a session (invocation, app, build, step) before
//! each build. Every activation produces a new [`SessionGeneration`]; the
//! process-wide [`SessionState`] only swaps which generation is current.
//!
//! A generation owns everything that must reset with the session:
//!
//! - the cached outgoing metadata, empty until the first outgoing call
//!   marshals it and completes the `GetCapabilities` handshake;
//! - the transfer counters reported by `GetSessionStats`.
//!
//! Handlers take an `Arc` of the current generation when they start, so a
//! `SetSession` arriving mid-flight never changes what a running call sends.

mod stats;

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OnceCell;

use crate::headers::OutgoingHeaders;

pub use stats::{SessionStats, StatsSnapshot};

/// Identifiers of one build session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFields {
    /// Never empty; a random UUID is assigned when the caller passes none.
    pub invocation_id: String,
    pub app_slug: String,
    pub build_slug: String,
    pub step_slug: String,
}

impl SessionFields {
    pub fn new(
        invocation_id: impl Into<String>,
        app_slug: impl Into<String>,
        build_slug: impl Into<String>,
        step_slug: impl Into<String>,
    ) -> Self {
        let mut invocation_id = invocation_id.into();
        if invocation_id.is_empty() {
            invocation_id = uuid::Uuid::new_v4().to_string();
        }
        Self {
            invocation_id,
            app_slug: app_slug.into(),
            build_slug: build_slug.into(),
            step_slug: step_slug.into(),
        }
    }

    /// A session with only a generated invocation id.
    pub fn anonymous() -> Self {
        Self::new("", "", "", "")
    }
}

/// One activated session and the state that lives and dies with it.
#[derive(Debug)]
pub struct SessionGeneration {
    fields: SessionFields,
    headers: OnceCell<Arc<OutgoingHeaders>>,
    stats: SessionStats,
}

impl SessionGeneration {
    fn new(fields: SessionFields) -> Self {
        Self {
            fields,
            headers: OnceCell::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn fields(&self) -> &SessionFields {
        &self.fields
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// True once the outgoing metadata has been marshalled and the
    /// handshake for this invocation succeeded.
    pub fn is_fresh(&self) -> bool {
        self.headers.initialized()
    }

    /// Cached outgoing metadata, running `init` on the first call.
    ///
    /// Concurrent first callers wait on a single `init`. A failed `init`
    /// leaves the cache empty, so the next call retries it.
    pub async fn fresh_headers<F, Fut, E>(&self, init: F) -> Result<Arc<OutgoingHeaders>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<OutgoingHeaders>, E>>,
    {
        self.headers.get_or_try_init(init).await.map(Arc::clone)
    }
}

/// Process-wide pointer to the current session generation.
#[derive(Debug)]
pub struct SessionState {
    current: Mutex<Arc<SessionGeneration>>,
}

impl SessionState {
    pub fn new(fields: SessionFields) -> Self {
        Self {
            current: Mutex::new(Arc::new(SessionGeneration::new(fields))),
        }
    }

    /// The generation outgoing calls should use right now.
    ///
    /// The lock is held only to clone the `Arc`.
    pub fn snapshot(&self) -> Arc<SessionGeneration> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Activate a new session: fresh counters, metadata to be re-marshalled.
    pub fn activate(&self, fields: SessionFields) -> Arc<SessionGeneration> {
        let generation = Arc::new(SessionGeneration::new(fields));
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::clone(&generation);
        generation
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(SessionFields::anonymous())
    }
}
