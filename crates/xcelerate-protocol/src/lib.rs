//! Xcelerate Protocol Types
//!
//! Generated gRPC bindings for both sides of the proxy:
//!
//! - compiler-facing: [`cas`] (`CASDBService`), [`keyvalue`] (`KeyValueDB`)
//!   and [`session`] (`Session`), served over a UNIX socket;
//! - store-facing: [`bytestream`] (`ByteStream`) and [`remote_execution`]
//!   (`Capabilities`, `RequestMetadata`), dialled over TCP/TLS.
//!
//! The CAS and KV packages are `compilation_cache_service.*.v1`, not
//! `llvm.cas`/`llvm.kv`: those are the service paths the compiler dials.
//!
//! The [`response`] module adds one constructor per LLVM outcome so handlers
//! never assemble the tagged unions by hand.

pub mod response;

/// LLVM compilation caching CAS service (`compilation_cache_service.cas.v1`).
pub mod cas {
    tonic::include_proto!("compilation_cache_service.cas.v1");
}

/// LLVM compilation caching key-value service (`compilation_cache_service.keyvalue.v1`).
pub mod keyvalue {
    tonic::include_proto!("compilation_cache_service.keyvalue.v1");
}

/// Build session control (`llvm.session`).
pub mod session {
    tonic::include_proto!("llvm.session");
}

/// Google ByteStream API (`google.bytestream`).
pub mod bytestream {
    tonic::include_proto!("google.bytestream");
}

/// Bazel remote execution subset (`build.bazel.remote.execution.v2`).
pub mod remote_execution {
    tonic::include_proto!("build.bazel.remote.execution.v2");
}

/// Tool name reported in `RequestMetadata` and `x-flare-buildtool`.
pub const TOOL_NAME: &str = "xcelerate";
