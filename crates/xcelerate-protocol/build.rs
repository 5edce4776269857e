//! Compiles the `.proto` sources under `proto/` into tonic services.
//!
//! Descriptors are produced by `protox`, so no `protoc` binary is needed.

const PROTOS: &[&str] = &[
    "compilation_caching_cas.proto",
    "compilation_caching_kv.proto",
    "session.proto",
    "bytestream.proto",
    "remote_execution.proto",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    for proto in PROTOS {
        println!("cargo:rerun-if-changed=proto/{proto}");
    }

    let descriptors = protox::compile(PROTOS, ["proto"])?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // Chunk payloads are sliced without copying.
        .bytes([".google.bytestream"])
        // Sorted entries keep the KV blob encoding deterministic.
        .btree_map([".compilation_cache_service.keyvalue.v1.Value.entries"])
        .compile_fds(descriptors)?;

    Ok(())
}
