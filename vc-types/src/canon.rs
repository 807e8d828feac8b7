//! Canonical JSON encoding and SHA-256 hashing used for trace payload hashes
//! and speech-plan content-hash IDs.
//!
//! `serde_json::Value`'s object type is a `BTreeMap` (the `preserve_order`
//! feature is deliberately not enabled anywhere in this workspace), so
//! `serde_json::to_string` already yields sorted keys with compact
//! separators — that is the canonical form two independent runs must agree
//! on for byte-identical hashing.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encode `value` as canonical JSON: sorted keys, compact separators.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).expect("canonical_json: value must be JSON-serializable")
}

/// SHA-256 hex digest of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 hex digest over the canonical JSON encoding of `value`.
pub fn hash_payload<T: Serialize>(value: &T) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}
