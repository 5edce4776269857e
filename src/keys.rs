//! Remote key namespace.
//!
//! The remote store has a single flat ByteStream namespace. CAS objects and
//! KV entries share it under distinct prefixes:
//!
//! ```text
//! blob/xcelerate-cas-<hex(content id)>
//! blob/xcelerate-kv-<hex(compiler key)>
//! ```

use crate::codec::ContentId;

/// Prefix for CAS objects and raw `Save` blobs.
pub const CAS_PREFIX: &str = "blob/xcelerate-cas-";

/// Prefix for KV entry maps.
pub const KV_PREFIX: &str = "blob/xcelerate-kv-";

/// Resource name for a CAS object, from the raw id bytes the compiler holds.
pub fn cas_key(id: &[u8]) -> String {
    format!("{}{}", CAS_PREFIX, hex::encode(id))
}

/// Resource name for a freshly computed content id.
pub fn cas_key_for(id: &ContentId) -> String {
    format!("{}{}", CAS_PREFIX, id.to_hex())
}

/// Resource name for a KV entry.
pub fn kv_key(key: &[u8]) -> String {
    format!("{}{}", KV_PREFIX, hex::encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_key_is_lowercase_hex() {
        assert_eq!(cas_key(&[0xAB, 0x01]), "blob/xcelerate-cas-ab01");
    }

    #[test]
    fn test_kv_key_uses_kv_prefix() {
        assert_eq!(kv_key(b"k"), "blob/xcelerate-kv-6b");
        assert_eq!(kv_key(b""), "blob/xcelerate-kv-");
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        assert_ne!(cas_key(b"k"), kv_key(b"k"));
    }

    #[test]
    fn test_cas_key_for_matches_raw_form() {
        let id = ContentId::of(b"payload");
        assert_eq!(cas_key_for(&id), cas_key(id.as_bytes()));
    }
}
