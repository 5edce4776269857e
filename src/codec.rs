//! Blob codec and content ids.
//!
//! The remote store only sees opaque blobs, so CAS objects and KV entry maps
//! are framed into a single byte string before upload. The layout is frozen:
//! every content id is a BLAKE3 hash of these bytes, and changing a single
//! framing byte orphans everything already stored.
//!
//! All lengths and counts are unsigned LEB128 varints (the protobuf length
//! delimiter encoding):
//!
//! ```text
//! object := len(data) data  count(refs) { len(ref) ref }*
//! value  := count(entries)  { len(key) key  len(val) val }*   keys ascending
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Length in bytes of a content id.
pub const ID_LEN: usize = blake3::OUT_LEN;

/// Errors from encoding or decoding a blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("blob truncated while reading {what}")]
    Truncated { what: &'static str },

    #[error("blob has {0} trailing bytes after the last field")]
    TrailingBytes(usize),

    #[error("entry key is not valid UTF-8")]
    InvalidKey,

    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
}

/// A decoded CAS object: payload bytes plus child ids, in stored order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CasObject {
    pub data: Bytes,
    pub references: Vec<Bytes>,
}

/// BLAKE3 digest of a serialized blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId([u8; ID_LEN]);

impl ContentId {
    /// Hash a complete serialized blob.
    pub fn of(serialized: &[u8]) -> Self {
        Self::from(blake3::hash(serialized))
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for ContentId {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn put_len(buf: &mut BytesMut, len: usize, what: &'static str) -> Result<(), CodecError> {
    prost::encode_length_delimiter(len, buf).map_err(|e| CodecError::Encode {
        what,
        reason: e.to_string(),
    })
}

fn put_field(buf: &mut BytesMut, field: &[u8], what: &'static str) -> Result<(), CodecError> {
    put_len(buf, field.len(), what)?;
    buf.extend_from_slice(field);
    Ok(())
}

fn take_len(buf: &mut Bytes, what: &'static str) -> Result<usize, CodecError> {
    prost::decode_length_delimiter(&mut *buf).map_err(|_| CodecError::Truncated { what })
}

fn take_field(buf: &mut Bytes, what: &'static str) -> Result<Bytes, CodecError> {
    let len = take_len(buf, what)?;
    if len > buf.remaining() {
        return Err(CodecError::Truncated { what });
    }
    Ok(buf.split_to(len))
}

fn expect_end(buf: &Bytes) -> Result<(), CodecError> {
    match buf.remaining() {
        0 => Ok(()),
        n => Err(CodecError::TrailingBytes(n)),
    }
}

/// Serialize a CAS object. Reference order and duplicates are preserved.
pub fn encode_object<R: AsRef<[u8]>>(data: &[u8], references: &[R]) -> Result<Bytes, CodecError> {
    let refs_len: usize = references.iter().map(|r| r.as_ref().len() + 10).sum();
    let mut buf = BytesMut::with_capacity(data.len() + refs_len + 20);

    put_field(&mut buf, data, "object data")?;
    put_len(&mut buf, references.len(), "reference count")?;
    for reference in references {
        put_field(&mut buf, reference.as_ref(), "reference")?;
    }
    Ok(buf.freeze())
}

/// Parse a blob produced by [`encode_object`].
pub fn decode_object(mut buf: Bytes) -> Result<CasObject, CodecError> {
    let data = take_field(&mut buf, "object data")?;
    let count = take_len(&mut buf, "reference count")?;

    // Every reference costs at least its one-byte length prefix.
    let mut references = Vec::with_capacity(count.min(buf.remaining()));
    for _ in 0..count {
        references.push(take_field(&mut buf, "reference")?);
    }
    expect_end(&buf)?;

    Ok(CasObject { data, references })
}

/// Serialize a KV entry map. `BTreeMap` iteration fixes the entry order.
pub fn encode_value(entries: &BTreeMap<String, Vec<u8>>) -> Result<Bytes, CodecError> {
    let size: usize = entries.iter().map(|(k, v)| k.len() + v.len() + 20).sum();
    let mut buf = BytesMut::with_capacity(size + 10);

    put_len(&mut buf, entries.len(), "entry count")?;
    for (key, value) in entries {
        put_field(&mut buf, key.as_bytes(), "entry key")?;
        put_field(&mut buf, value, "entry value")?;
    }
    Ok(buf.freeze())
}

/// Parse a blob produced by [`encode_value`].
pub fn decode_value(mut buf: Bytes) -> Result<BTreeMap<String, Vec<u8>>, CodecError> {
    let count = take_len(&mut buf, "entry count")?;

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = take_field(&mut buf, "entry key")?;
        let value = take_field(&mut buf, "entry value")?;
        let key = String::from_utf8(key.to_vec()).map_err(|_| CodecError::InvalidKey)?;
        entries.insert(key, value.to_vec());
    }
    expect_end(&buf)?;

    Ok(entries)
}
