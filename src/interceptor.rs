//! Incoming call interception.
//!
//! Every compiler-facing call passes through [`Interceptor`]. It logs the
//! method and, for calls that reach the remote store, produces the
//! [`CallContext`] the handler uses for all of its outgoing requests: the
//! session snapshot, the merged metadata and the propagated deadline.
//!
//! Incoming cancellation needs no token: tonic drops the handler future when
//! the client goes away, and dropping an unfinished upload aborts it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tonic::metadata::MetadataMap;
use tonic::{Request, Status};
use tracing::{debug, warn};

use crate::headers::{HeaderInjector, OutgoingHeaders};
use crate::session::{SessionGeneration, SessionState, SessionStats};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Per-call state shared by a handler and the streams it opens.
#[derive(Debug)]
pub struct CallContext {
    method: &'static str,
    headers: Arc<OutgoingHeaders>,
    generation: Arc<SessionGeneration>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(
        method: &'static str,
        headers: Arc<OutgoingHeaders>,
        generation: Arc<SessionGeneration>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            method,
            headers,
            generation,
            deadline,
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn headers(&self) -> &OutgoingHeaders {
        &self.headers
    }

    pub fn generation(&self) -> &Arc<SessionGeneration> {
        &self.generation
    }

    /// Counters of the session this call started in.
    pub fn stats(&self) -> &SessionStats {
        self.generation.stats()
    }

    /// Time left before the incoming deadline, if the caller set one.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Build an outgoing request: session metadata plus the remaining deadline.
    pub fn request<T>(&self, message: T) -> Request<T> {
        let mut request = self.headers.request(message);
        if let Some(remaining) = self.remaining() {
            request.set_timeout(remaining);
        }
        request
    }
}

/// Parse a `grpc-timeout` header value (`<digits><unit>`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

fn incoming_deadline(metadata: &MetadataMap) -> Option<Instant> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    parse_grpc_timeout(value).map(|timeout| Instant::now() + timeout)
}

/// The single entry point for incoming calls.
pub struct Interceptor {
    session: Arc<SessionState>,
    injector: HeaderInjector,
}

impl Interceptor {
    pub fn new(session: Arc<SessionState>, injector: HeaderInjector) -> Self {
        Self { session, injector }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Log a call that does not talk to the remote store.
    pub fn observe(&self, method: &str) {
        debug!(method, "incoming call");
    }

    /// Log a call and prepare its outgoing context.
    ///
    /// Metadata or handshake failures become `INTERNAL`.
    pub async fn enter(
        &self,
        method: &'static str,
        incoming: &MetadataMap,
    ) -> Result<CallContext, Status> {
        self.observe(method);

        let deadline = incoming_deadline(incoming);
        let generation = self.session.snapshot();
        let timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));

        let headers = self
            .injector
            .headers_for(&generation, timeout)
            .await
            .map_err(|err| {
                warn!(method, error = %err, "failed to prepare outgoing metadata");
                Status::internal(err.to_string())
            })?;

        Ok(CallContext::new(method, headers, generation, deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grpc_timeout_units() {
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_grpc_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_grpc_timeout("10S"), Some(Duration::from_secs(10)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("7u"), Some(Duration::from_micros(7)));
        assert_eq!(parse_grpc_timeout("9n"), Some(Duration::from_nanos(9)));
    }

    #[test]
    fn test_parse_grpc_timeout_rejects_malformed() {
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[test]
    fn test_context_request_propagates_deadline() {
        let generation = SessionState::default().snapshot();
        let deadline = Instant::now() + Duration::from_secs(30);
        let ctx = CallContext::new(
            "Get",
            Arc::new(OutgoingHeaders::empty()),
            generation,
            Some(deadline),
        );

        let request = ctx.request(());
        assert!(request.metadata().get(GRPC_TIMEOUT_HEADER).is_some());
    }

    #[test]
    fn test_context_without_deadline_sets_no_timeout() {
        let generation = SessionState::default().snapshot();
        let ctx = CallContext::new("Get", Arc::new(OutgoingHeaders::empty()), generation, None);

        assert!(ctx.remaining().is_none());
        assert!(ctx.request(()).metadata().get(GRPC_TIMEOUT_HEADER).is_none());
    }
}
