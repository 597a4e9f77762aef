//! Request hashing for server-side deduplication.
//!
//! Members of the calling DON may send requests that differ only in
//! non-deterministic fields (a local signature, say). Those attributes are
//! listed by dotted path and removed from `inputs` before hashing.

use crate::error::Result;
use capability_types::{to_payload, CapabilityRequest};
use serde_json::Value;
use sha2::{Digest, Sha256};

fn remove_path(value: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = value;
    for segment in parents {
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Value::Object(map) = current {
        map.remove(*last);
    }
}

/// SHA-256 over the canonical encoding of `request` without the excluded
/// input attributes.
pub fn request_hash(request: &CapabilityRequest, excluded_attributes: &[String]) -> Result<[u8; 32]> {
    let mut stripped = request.clone();
    for path in excluded_attributes {
        remove_path(&mut stripped.inputs, path);
    }
    let bytes = to_payload(&stripped)?;
    Ok(Sha256::digest(&bytes).into())
}
