//! Response constructors.
//!
//! Every LLVM response is a tagged union of `SUCCESS | NOT_FOUND | ERROR`.
//! These helpers build each variant in one call, mirroring how the compiler
//! interprets them: not-found is a cache miss, error is a degraded result.

use crate::cas::{
    cas_bytes, cas_get_response, cas_load_response, cas_put_response, cas_save_response,
    CasBlob, CasBytes, CasDataId, CasGetResponse, CasLoadResponse, CasObject, CasPutResponse,
    CasSaveResponse, ResponseError,
};
use crate::keyvalue::{self, get_value_response, GetValueResponse, PutValueResponse, Value};

fn cas_error(description: impl Into<String>) -> ResponseError {
    ResponseError {
        description: description.into(),
    }
}

fn kv_error(description: impl Into<String>) -> keyvalue::ResponseError {
    keyvalue::ResponseError {
        description: description.into(),
    }
}

impl CasDataId {
    /// Wrap a raw content id.
    pub fn from_bytes(id: impl Into<Vec<u8>>) -> Self {
        Self { id: id.into() }
    }
}

impl CasBytes {
    /// Inline blob contents.
    pub fn inline(data: impl Into<Vec<u8>>) -> Self {
        Self {
            contents: Some(cas_bytes::Contents::Blob(data.into())),
        }
    }

    /// Blob stored at a path on the local filesystem.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            contents: Some(cas_bytes::Contents::FilePath(path.into())),
        }
    }
}

impl CasGetResponse {
    /// Object found: payload bytes plus its references in order.
    pub fn success(data: Vec<u8>, references: Vec<Vec<u8>>) -> Self {
        Self {
            outcome: cas_get_response::Outcome::Success as i32,
            contents: Some(cas_get_response::Contents::Data(CasObject {
                blob: Some(CasBytes::inline(data)),
                references: references.into_iter().map(CasDataId::from_bytes).collect(),
            })),
        }
    }

    /// No object is stored under the requested id.
    pub fn not_found() -> Self {
        Self {
            outcome: cas_get_response::Outcome::ObjectNotFound as i32,
            contents: None,
        }
    }

    /// Lookup failed for a reason other than a miss.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            outcome: cas_get_response::Outcome::Error as i32,
            contents: Some(cas_get_response::Contents::Error(cas_error(description))),
        }
    }
}

impl CasLoadResponse {
    /// Raw blob found.
    pub fn success(data: Vec<u8>) -> Self {
        Self {
            outcome: cas_load_response::Outcome::Success as i32,
            contents: Some(cas_load_response::Contents::Data(CasBlob {
                blob: Some(CasBytes::inline(data)),
            })),
        }
    }

    /// No blob is stored under the requested id.
    pub fn not_found() -> Self {
        Self {
            outcome: cas_load_response::Outcome::ObjectNotFound as i32,
            contents: None,
        }
    }

    /// Lookup failed for a reason other than a miss.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            outcome: cas_load_response::Outcome::Error as i32,
            contents: Some(cas_load_response::Contents::Error(cas_error(description))),
        }
    }
}

impl CasPutResponse {
    pub fn success(id: Vec<u8>) -> Self {
        Self {
            contents: Some(cas_put_response::Contents::CasId(CasDataId::from_bytes(id))),
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            contents: Some(cas_put_response::Contents::Error(cas_error(description))),
        }
    }
}

impl CasSaveResponse {
    pub fn success(id: Vec<u8>) -> Self {
        Self {
            contents: Some(cas_save_response::Contents::CasId(CasDataId::from_bytes(id))),
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            contents: Some(cas_save_response::Contents::Error(cas_error(description))),
        }
    }
}

impl GetValueResponse {
    /// Key found; `value` carries the full entry map.
    pub fn success(value: Value) -> Self {
        Self {
            outcome: get_value_response::Outcome::Success as i32,
            contents: Some(get_value_response::Contents::Value(value)),
        }
    }

    pub fn not_found() -> Self {
        Self {
            outcome: get_value_response::Outcome::KeyNotFound as i32,
            contents: None,
        }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            outcome: get_value_response::Outcome::Error as i32,
            contents: Some(get_value_response::Contents::Error(kv_error(description))),
        }
    }
}

impl PutValueResponse {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self {
            error: Some(kv_error(description)),
        }
    }
}
