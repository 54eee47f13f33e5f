//! Content listings: installed file path -> content hash.

use crate::bundle::Bundle;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Length of a hex-encoded SHA-256 digest
const HEX_DIGEST_LEN: usize = 64;

/// Lowercase hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compare a computed hex digest against one reported by the peer.
///
/// Case-insensitive for hex digests. A digest in any other format (base64,
/// truncated, another algorithm) never matches.
pub fn hashes_match(computed: &str, reported: &str) -> bool {
    reported.len() == HEX_DIGEST_LEN
        && reported.bytes().all(|b| b.is_ascii_hexdigit())
        && computed.eq_ignore_ascii_case(reported)
}

/// Snapshot of what a peer has installed for one component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentListing {
    files: BTreeMap<String, String>,
}

impl ContentListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash every file entry of `bundle`. Directories are not listed.
    pub fn from_bundle(bundle: &Bundle) -> Self {
        let files = bundle
            .files()
            .map(|(path, data)| (path.to_string(), content_hash(data)))
            .collect();
        Self { files }
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| BridgeError::InvalidPayload(format!("content listing: {}", e)))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.files.insert(path.into(), hash.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FromIterator<(String, String)> for ContentListing {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_comparison() {
        let h = content_hash(b"abc");
        assert!(hashes_match(&h, &h));
        assert!(hashes_match(&h, &h.to_uppercase()));
        // Base64 of the same digest
        assert!(!hashes_match(
            &h,
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        ));
        assert!(!hashes_match(&h, &h[..32]));
        assert!(!hashes_match(&h, ""));
    }

    #[test]
    fn test_from_bundle_skips_directories() {
        let mut bundle = Bundle::new();
        bundle.insert_dir("lib").unwrap();
        bundle.insert_file("lib/a.js", "a").unwrap();

        let listing = ContentListing::from_bundle(&bundle);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.get("lib/a.js"), Some(content_hash(b"a").as_str()));
    }

    #[test]
    fn test_json_shape() {
        let listing = ContentListing::from_json(br#"{"a.js":"00ff"}"#).unwrap();
        assert_eq!(listing.get("a.js"), Some("00ff"));
        assert_eq!(
            serde_json::to_value(&listing).unwrap(),
            serde_json::json!({ "a.js": "00ff" })
        );
        assert!(ContentListing::from_json(b"[1,2]").is_err());
    }
}
