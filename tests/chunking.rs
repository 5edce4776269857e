//! Upload Chunking Tests
//!
//! Frame layout the remote store sees for blobs around the 1 MiB chunk
//! boundary.

use std::sync::Arc;

use tonic::Request;
use xcelerate_protocol::cas::casdb_service_server::CasdbService;
use xcelerate_protocol::cas::{CasBlob, CasBytes, CasSaveRequest};
use xcelerate_proxy::remote::{RecordedStream, StreamEnd};
use xcelerate_proxy::{Credentials, MemoryRemote, Proxy, MAX_CHUNK_SIZE};

const MIB: i64 = MAX_CHUNK_SIZE as i64;

async fn save(len: usize) -> RecordedStream {
    let remote = MemoryRemote::new();
    let proxy = Proxy::new(Credentials::default(), Arc::new(remote.clone()));

    proxy
        .cas_service()
        .save(Request::new(CasSaveRequest {
            data: Some(CasBlob {
                blob: Some(CasBytes::inline(vec![0x5a; len])),
            }),
        }))
        .await
        .unwrap();

    let mut streams = remote.streams();
    assert_eq!(streams.len(), 1);
    streams.remove(0)
}

fn layout(stream: &RecordedStream) -> Vec<(i64, usize, bool)> {
    stream
        .frames
        .iter()
        .map(|f| (f.write_offset, f.len, f.finish_write))
        .collect()
}

#[tokio::test]
async fn test_two_and_a_half_mib_save() {
    let stream = save(5 * MAX_CHUNK_SIZE / 2).await;

    assert_eq!(
        layout(&stream),
        vec![
            (0, MAX_CHUNK_SIZE, false),
            (MIB, MAX_CHUNK_SIZE, false),
            (2 * MIB, MAX_CHUNK_SIZE / 2, false),
            (5 * MIB / 2, 0, true),
        ]
    );
    assert_eq!(stream.end, StreamEnd::Closed);
}

#[tokio::test]
async fn test_exactly_one_mib() {
    let stream = save(MAX_CHUNK_SIZE).await;

    assert_eq!(
        layout(&stream),
        vec![(0, MAX_CHUNK_SIZE, false), (MIB, 0, true)]
    );
}

#[tokio::test]
async fn test_one_mib_plus_one_byte() {
    let stream = save(MAX_CHUNK_SIZE + 1).await;

    assert_eq!(
        layout(&stream),
        vec![
            (0, MAX_CHUNK_SIZE, false),
            (MIB, 1, false),
            (MIB + 1, 0, true),
        ]
    );
}

#[tokio::test]
async fn test_empty_save_sends_only_finish_frame() {
    let stream = save(0).await;

    assert_eq!(layout(&stream), vec![(0, 0, true)]);
    assert_eq!(stream.end, StreamEnd::Closed);
}

#[tokio::test]
async fn test_resource_name_is_fixed_for_whole_stream() {
    let stream = save(3 * MAX_CHUNK_SIZE).await;

    assert!(stream.resource_name.starts_with("blob/xcelerate-cas-"));
    assert!(stream
        .frames
        .iter()
        .all(|f| f.resource_name == stream.resource_name));
}
