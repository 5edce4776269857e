//! Outgoing metadata for remote store calls.
//!
//! Two layers are merged onto every request sent to the remote store:
//!
//! - static credentials: `x-flare-buildtool`, `authorization`, `x-org-id`;
//! - per-session identifiers: the marshalled Bazel `RequestMetadata` under
//!   `build.bazel.remote.execution.v2.requestmetadata-bin`, plus `x-app-id`,
//!   `x-flare-build-id` and `x-flare-step-id`.
//!
//! Empty values are omitted. The merged map is built once per session
//! generation, together with the `GetCapabilities` handshake the store uses
//! to register a new invocation.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use thiserror::Error;
use tonic::metadata::{AsciiMetadataValue, BinaryMetadataValue, MetadataMap};
use tonic::{Extensions, Request};
use tracing::info;
use xcelerate_protocol::remote_execution::{RequestMetadata, ToolDetails};

use crate::remote::{RemoteError, RemoteStore};
use crate::session::{SessionFields, SessionGeneration};

pub const BUILD_TOOL_HEADER: &str = "x-flare-buildtool";
pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const ORG_ID_HEADER: &str = "x-org-id";
pub const APP_ID_HEADER: &str = "x-app-id";
pub const BUILD_ID_HEADER: &str = "x-flare-build-id";
pub const STEP_ID_HEADER: &str = "x-flare-step-id";
pub const REQUEST_METADATA_HEADER: &str = "build.bazel.remote.execution.v2.requestmetadata-bin";

/// Errors building outgoing metadata.
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("value for metadata header '{header}' is not a valid header value")]
    InvalidValue { header: &'static str },
}

/// Errors preparing a session for outgoing calls.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("GetCapabilities handshake failed: {0}")]
    Capabilities(#[source] RemoteError),
}

/// Static credentials attached to every outgoing call.
#[derive(Clone, Default)]
pub struct Credentials {
    pub token: String,
    pub org_id: String,
    pub tool_name: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .field("org_id", &self.org_id)
            .field("tool_name", &self.tool_name)
            .finish()
    }
}

/// Fully merged metadata for one session generation.
#[derive(Debug, Clone, Default)]
pub struct OutgoingHeaders {
    metadata: MetadataMap,
}

fn ascii_value(header: &'static str, value: &str) -> Result<AsciiMetadataValue, HeaderError> {
    AsciiMetadataValue::try_from(value).map_err(|_| HeaderError::InvalidValue { header })
}

impl OutgoingHeaders {
    /// Headers with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge credentials and session identifiers into one metadata map.
    pub fn build(credentials: &Credentials, session: &SessionFields) -> Result<Self, HeaderError> {
        let mut metadata = MetadataMap::new();

        let ascii = [
            (BUILD_TOOL_HEADER, credentials.tool_name.clone()),
            (
                AUTHORIZATION_HEADER,
                if credentials.token.is_empty() {
                    String::new()
                } else {
                    format!("bearer {}", credentials.token)
                },
            ),
            (ORG_ID_HEADER, credentials.org_id.clone()),
            (APP_ID_HEADER, session.app_slug.clone()),
            (BUILD_ID_HEADER, session.build_slug.clone()),
            (STEP_ID_HEADER, session.step_slug.clone()),
        ];
        for (header, value) in ascii {
            if !value.is_empty() {
                metadata.insert(header, ascii_value(header, &value)?);
            }
        }

        let request_metadata = RequestMetadata {
            tool_details: Some(ToolDetails {
                tool_name: credentials.tool_name.clone(),
                tool_version: String::new(),
            }),
            tool_invocation_id: session.invocation_id.clone(),
            ..Default::default()
        };
        metadata.insert_bin(
            REQUEST_METADATA_HEADER,
            BinaryMetadataValue::from_bytes(&request_metadata.encode_to_vec()),
        );

        Ok(Self { metadata })
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Wrap `message` in a request carrying these headers.
    pub fn request<T>(&self, message: T) -> Request<T> {
        Request::from_parts(self.metadata.clone(), Extensions::default(), message)
    }
}

/// Builds outgoing metadata and runs the per-invocation handshake.
pub struct HeaderInjector {
    credentials: Credentials,
    remote: Arc<dyn RemoteStore>,
}

impl HeaderInjector {
    pub fn new(credentials: Credentials, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            credentials,
            remote,
        }
    }

    /// Metadata for `generation`, marshalling it and issuing
    /// `GetCapabilities` if this is the first call of the session.
    pub async fn headers_for(
        &self,
        generation: &SessionGeneration,
        timeout: Option<Duration>,
    ) -> Result<Arc<OutgoingHeaders>, HandshakeError> {
        generation
            .fresh_headers(|| async {
                let fields = generation.fields();
                let headers = OutgoingHeaders::build(&self.credentials, fields)?;

                info!(
                    invocation_id = %fields.invocation_id,
                    "registering invocation with remote store"
                );
                self.remote
                    .get_capabilities(&headers, timeout)
                    .await
                    .map_err(HandshakeError::Capabilities)?;

                Ok::<_, HandshakeError>(Arc::new(headers))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials {
            token: "secret".to_string(),
            org_id: "org-1".to_string(),
            tool_name: "xcelerate".to_string(),
        }
    }

    #[test]
    fn test_build_sets_all_headers() {
        let session = SessionFields::new("inv-A", "app", "build", "step");
        let headers = OutgoingHeaders::build(&credentials(), &session).unwrap();
        let md = headers.metadata();

        assert_eq!(md.get(BUILD_TOOL_HEADER).unwrap(), "xcelerate");
        assert_eq!(md.get(AUTHORIZATION_HEADER).unwrap(), "bearer secret");
        assert_eq!(md.get(ORG_ID_HEADER).unwrap(), "org-1");
        assert_eq!(md.get(APP_ID_HEADER).unwrap(), "app");
        assert_eq!(md.get(BUILD_ID_HEADER).unwrap(), "build");
        assert_eq!(md.get(STEP_ID_HEADER).unwrap(), "step");
        assert_eq!(md.len(), 7);
    }

    #[test]
    fn test_request_metadata_is_marshalled() {
        let session = SessionFields::new("inv-A", "", "", "");
        let headers = OutgoingHeaders::build(&credentials(), &session).unwrap();

        let raw = headers
            .metadata()
            .get_bin(REQUEST_METADATA_HEADER)
            .unwrap()
            .to_bytes()
            .unwrap();
        let decoded = RequestMetadata::decode(raw).unwrap();

        assert_eq!(decoded.tool_invocation_id, "inv-A");
        assert_eq!(decoded.tool_details.unwrap().tool_name, "xcelerate");
    }

    #[test]
    fn test_empty_values_are_omitted() {
        let session = SessionFields::new("inv-A", "", "", "");
        let headers = OutgoingHeaders::build(&Credentials::default(), &session).unwrap();
        let md = headers.metadata();

        assert!(md.get(AUTHORIZATION_HEADER).is_none());
        assert!(md.get(ORG_ID_HEADER).is_none());
        assert!(md.get(APP_ID_HEADER).is_none());
        assert!(md.get_bin(REQUEST_METADATA_HEADER).is_some());
        assert_eq!(md.len(), 1);
    }

    #[test]
    fn test_invalid_token_is_rejected() {
        let mut creds = credentials();
        creds.token = "line\nbreak".to_string();
        let err = OutgoingHeaders::build(&creds, &SessionFields::anonymous()).unwrap_err();
        assert!(matches!(
            err,
            HeaderError::InvalidValue {
                header: AUTHORIZATION_HEADER
            }
        ));
    }

    #[test]
    fn test_request_carries_headers() {
        let headers = OutgoingHeaders::build(&credentials(), &SessionFields::anonymous()).unwrap();
        let request = headers.request(());
        assert_eq!(request.metadata().get(ORG_ID_HEADER).unwrap(), "org-1");
    }

    #[test]
    fn test_debug_redacts_token() {
        let printed = format!("{:?}", credentials());
        assert!(!printed.contains("secret"));
    }
}
