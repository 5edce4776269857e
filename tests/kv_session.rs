//! KeyValue and Session Service Tests
//!
//! Covers full-replacement KV semantics, the per-invocation capabilities
//! handshake and session-scoped statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use prost::Message;
use tonic::{Code, Request};
use xcelerate_protocol::cas::casdb_service_server::CasdbService;
use xcelerate_protocol::cas::{CasDataId, CasGetRequest};
use xcelerate_protocol::keyvalue::key_value_db_server::KeyValueDb;
use xcelerate_protocol::keyvalue::{
    get_value_response, GetValueRequest, GetValueResponse, PutValueRequest, Value,
};
use xcelerate_protocol::remote_execution::RequestMetadata;
use xcelerate_protocol::session::session_server::Session;
use xcelerate_protocol::session::{GetSessionStatsRequest, SetSessionRequest};
use xcelerate_proxy::headers::{APP_ID_HEADER, REQUEST_METADATA_HEADER};
use xcelerate_proxy::{keys, Credentials, MemoryRemote, Proxy};

fn setup() -> (MemoryRemote, Proxy) {
    let remote = MemoryRemote::new();
    let credentials = Credentials {
        tool_name: "xcelerate".to_string(),
        ..Default::default()
    };
    let proxy = Proxy::new(credentials, Arc::new(remote.clone()));
    (remote, proxy)
}

fn entries(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_vec()))
        .collect()
}

fn put_value(key: &[u8], pairs: &[(&str, &[u8])]) -> Request<PutValueRequest> {
    Request::new(PutValueRequest {
        key: key.to_vec(),
        value: Some(Value {
            entries: entries(pairs),
        }),
    })
}

fn get_value(key: &[u8]) -> Request<GetValueRequest> {
    Request::new(GetValueRequest { key: key.to_vec() })
}

fn value_of(response: GetValueResponse) -> BTreeMap<String, Vec<u8>> {
    assert_eq!(response.outcome(), get_value_response::Outcome::Success);
    match response.contents {
        Some(get_value_response::Contents::Value(value)) => value.entries,
        other => panic!("expected value, got {:?}", other),
    }
}

fn set_session(invocation_id: &str, app_slug: &str) -> Request<SetSessionRequest> {
    Request::new(SetSessionRequest {
        invocation_id: invocation_id.to_string(),
        app_slug: app_slug.to_string(),
        build_slug: String::new(),
        step_slug: String::new(),
    })
}

fn cas_get(id: u8) -> Request<CasGetRequest> {
    Request::new(CasGetRequest {
        cas_id: Some(CasDataId::from_bytes(vec![id; 32])),
        write_to_disk: false,
    })
}

fn invocation_of(metadata: &tonic::metadata::MetadataMap) -> String {
    let raw = metadata
        .get_bin(REQUEST_METADATA_HEADER)
        .unwrap()
        .to_bytes()
        .unwrap();
    RequestMetadata::decode(raw).unwrap().tool_invocation_id
}

// =============================================================================
// KeyValue
// =============================================================================

#[tokio::test]
async fn test_put_value_then_get_value() {
    let (remote, proxy) = setup();
    let kv = proxy.kv_service();

    let put = kv.put_value(put_value(b"k", &[("a", b"1")])).await.unwrap().into_inner();
    assert!(put.error.is_none());
    assert!(remote.blob(&keys::kv_key(b"k")).is_some());

    let got = value_of(kv.get_value(get_value(b"k")).await.unwrap().into_inner());
    assert_eq!(got, entries(&[("a", b"1")]));
}

#[tokio::test]
async fn test_put_value_replaces_whole_map() {
    let (_remote, proxy) = setup();
    let kv = proxy.kv_service();

    kv.put_value(put_value(b"k", &[("a", b"1")])).await.unwrap();
    kv.put_value(put_value(b"k", &[("b", b"2")])).await.unwrap();

    let got = value_of(kv.get_value(get_value(b"k")).await.unwrap().into_inner());
    assert_eq!(got, entries(&[("b", b"2")]));
}

#[tokio::test]
async fn test_get_value_missing_is_key_not_found() {
    let (_remote, proxy) = setup();

    let response = proxy
        .kv_service()
        .get_value(get_value(b"absent"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.outcome(), get_value_response::Outcome::KeyNotFound);
    assert_eq!(proxy.session().snapshot().stats().snapshot().misses, 1);
}

#[tokio::test]
async fn test_get_value_with_invalid_key_bytes_is_error() {
    let (remote, proxy) = setup();
    remote.insert(keys::kv_key(b"k"), vec![1u8, 1, 0xff, 0]);

    let response = proxy
        .kv_service()
        .get_value(get_value(b"k"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.outcome(), get_value_response::Outcome::Error);
}

#[tokio::test]
async fn test_put_value_failure_reports_error() {
    let (remote, proxy) = setup();
    remote.fail_writes_after(0, tonic::Status::unavailable("down"));

    let response = proxy
        .kv_service()
        .put_value(put_value(b"k", &[("a", b"1")]))
        .await
        .unwrap()
        .into_inner();

    assert!(response.error.unwrap().description.contains("down"));
    assert_eq!(remote.blob_count(), 0);
}

#[tokio::test]
async fn test_get_value_remote_cancelled_is_error() {
    let (remote, proxy) = setup();
    remote.fail_reads(tonic::Status::cancelled("stream reset by store"));

    let response = proxy
        .kv_service()
        .get_value(get_value(b"k"))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.outcome(), get_value_response::Outcome::Error);
    assert_eq!(proxy.session().snapshot().stats().snapshot().misses, 0);
}

// =============================================================================
// Capabilities handshake
// =============================================================================

#[tokio::test]
async fn test_handshake_once_per_invocation() {
    let (remote, proxy) = setup();
    let session = proxy.session_service();
    let cas = proxy.cas_service();

    session.set_session(set_session("inv-A", "")).await.unwrap();
    assert_eq!(remote.capabilities_calls(), 0);

    cas.get(cas_get(1)).await.unwrap();
    cas.get(cas_get(2)).await.unwrap();
    assert_eq!(remote.capabilities_calls(), 1);

    session.set_session(set_session("inv-B", "")).await.unwrap();
    cas.get(cas_get(3)).await.unwrap();
    assert_eq!(remote.capabilities_calls(), 2);

    let handshakes = remote.capability_headers();
    assert_eq!(invocation_of(&handshakes[0]), "inv-A");
    assert_eq!(invocation_of(&handshakes[1]), "inv-B");
}

#[tokio::test]
async fn test_concurrent_first_calls_share_one_handshake() {
    let (remote, proxy) = setup();
    let kv = Arc::new(proxy.kv_service());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..8u8 {
        let kv = Arc::clone(&kv);
        tasks.spawn(async move { kv.get_value(get_value(&[i])).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    assert_eq!(remote.capabilities_calls(), 1);
}

#[tokio::test]
async fn test_failed_handshake_is_internal_and_retried() {
    let (remote, proxy) = setup();
    let cas = proxy.cas_service();
    remote.fail_capabilities(tonic::Status::unauthenticated("bad token"));

    let status = cas.get(cas_get(1)).await.unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(remote.reads().is_empty());

    remote.clear_failures();
    cas.get(cas_get(1)).await.unwrap();
    assert_eq!(remote.capabilities_calls(), 1);
}

#[tokio::test]
async fn test_session_headers_follow_set_session() {
    let (remote, proxy) = setup();
    let session = proxy.session_service();
    let cas = proxy.cas_service();

    session.set_session(set_session("inv-A", "app-1")).await.unwrap();
    cas.get(cas_get(1)).await.unwrap();
    session.set_session(set_session("inv-B", "app-2")).await.unwrap();
    cas.get(cas_get(1)).await.unwrap();

    let calls = remote.call_headers();
    assert_eq!(calls[0].get(APP_ID_HEADER).unwrap(), "app-1");
    assert_eq!(invocation_of(&calls[0]), "inv-A");
    assert_eq!(calls[1].get(APP_ID_HEADER).unwrap(), "app-2");
    assert_eq!(invocation_of(&calls[1]), "inv-B");
}

#[tokio::test]
async fn test_empty_invocation_id_is_generated() {
    let (remote, proxy) = setup();

    proxy
        .session_service()
        .set_session(set_session("", ""))
        .await
        .unwrap();
    proxy.cas_service().get(cas_get(1)).await.unwrap();

    let invocation = invocation_of(&remote.capability_headers()[0]);
    assert!(uuid::Uuid::parse_str(&invocation).is_ok(), "{}", invocation);
}

// =============================================================================
// Session stats
// =============================================================================

#[tokio::test]
async fn test_stats_count_transfers_and_reset_on_set_session() {
    let (_remote, proxy) = setup();
    let session = proxy.session_service();
    let kv = proxy.kv_service();

    kv.put_value(put_value(b"k", &[("a", b"1")])).await.unwrap();
    kv.get_value(get_value(b"k")).await.unwrap();
    kv.get_value(get_value(b"missing")).await.unwrap();

    let stats = session
        .get_session_stats(Request::new(GetSessionStatsRequest {}))
        .await
        .unwrap()
        .into_inner();
    // count + len("a") "a" + len("1") "1"
    assert_eq!(stats.uploaded_bytes, 5);
    assert_eq!(stats.downloaded_bytes, 5);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    session.set_session(set_session("inv-next", "")).await.unwrap();
    let stats = session
        .get_session_stats(Request::new(GetSessionStatsRequest {}))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        (stats.uploaded_bytes, stats.downloaded_bytes, stats.hits, stats.misses),
        (0, 0, 0, 0)
    );
}
