//! Manifest payloads and their content-addressed names
//!
//! A payload maps manifest keys to serialized objects. It is persisted in
//! immutable Secrets whose names are derived from the content, so deploying
//! the same payload twice resolves to the same Secret:
//!
//! ```text
//! Payload {a.yaml, b.yaml}      ──▶ managedresource-istio-5f2c09ab
//! Payload {a.yaml, b.yaml'}     ──▶ managedresource-istio-91d0e4c7
//! ```
//!
//! Payloads larger than a single Secret can hold are split into several
//! partitions, each with its own content-addressed name.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};
use crate::validation;

/// Maximum bytes stored in one payload Secret (1MB - some overhead)
pub const MAX_SECRET_PAYLOAD: usize = 1_000_000;

/// Hex characters of the checksum used in Secret names
const NAME_HASH_LENGTH: usize = 8;

/// Manifest key to serialized object bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    entries: BTreeMap<String, Vec<u8>>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a manifest, returning the previous bytes under that key
    pub fn insert(&mut self, key: impl Into<String>, data: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.entries.insert(key.into(), data.into())
    }

    pub fn with(mut self, key: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(key, data);
        self
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Bytes the payload occupies in a Secret's data map
    pub fn size(&self) -> usize {
        self.entries.iter().map(|(k, v)| entry_size(k, v)).sum()
    }

    /// Reject keys a Secret cannot hold
    pub fn validate(&self) -> Result<()> {
        self.keys().try_for_each(validation::validate_payload_key)
    }

    /// SHA-256 over the canonical `(key, 0, value, 0)*` stream, hex encoded
    ///
    /// Keys are visited in sorted order, so insertion order never changes
    /// the checksum.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.entries {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value);
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Split into partitions of at most `max_bytes` each
    ///
    /// Keys keep their sorted order across partitions. An empty payload
    /// yields a single empty partition so the bundle still references one
    /// Secret.
    pub fn partition(&self, max_bytes: usize) -> Result<Vec<Payload>> {
        let mut partitions = Vec::new();
        let mut current = Payload::new();
        let mut current_size = 0;

        for (key, value) in &self.entries {
            let size = entry_size(key, value);
            if size > max_bytes {
                return Err(CoreError::PayloadTooLarge {
                    key: key.clone(),
                    size,
                    max: max_bytes,
                });
            }
            if current_size + size > max_bytes && !current.is_empty() {
                partitions.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current.insert(key.clone(), value.clone());
            current_size += size;
        }

        partitions.push(current);
        Ok(partitions)
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<u8>> {
        self.entries
    }
}

impl<K: Into<String>, V: Into<Vec<u8>>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len() + value.len()
}

/// Content-addressed Secret name: `<prefix>-<first 8 hex chars of checksum>`
pub fn content_name(prefix: &str, payload: &Payload) -> String {
    let checksum = payload.checksum();
    format!("{}-{}", prefix, &checksum[..NAME_HASH_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_content_same_name() {
        let a = Payload::new().with("a.yaml", "X").with("b.yaml", "Y");
        let b: Payload = [("b.yaml", "Y"), ("a.yaml", "X")].into_iter().collect();
        assert_eq!(content_name("managedresource-n1", &a), content_name("managedresource-n1", &b));
    }

    #[test]
    fn test_different_content_different_name() {
        let a = Payload::new().with("a.yaml", "X");
        let b = Payload::new().with("a.yaml", "Z");
        assert_ne!(content_name("p", &a), content_name("p", &b));
    }

    #[test]
    fn test_key_value_boundary_is_unambiguous() {
        let a = Payload::new().with("ab", "c");
        let b = Payload::new().with("a", "bc");
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_content_name_shape() {
        let name = content_name("managedresource-n1", &Payload::new().with("a.yaml", "X"));
        let (prefix, hash) = name.rsplit_once('-').unwrap();
        assert_eq!(prefix, "managedresource-n1");
        assert_eq!(hash.len(), 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_partition_small_payload() {
        let payload = Payload::new().with("a.yaml", "X").with("b.yaml", "Y");
        let parts = payload.partition(MAX_SECRET_PAYLOAD).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], payload);
    }

    #[test]
    fn test_partition_splits_large_payload() {
        let payload = Payload::new()
            .with("a", vec![b'x'; 40])
            .with("b", vec![b'y'; 40])
            .with("c", vec![b'z'; 40]);
        let parts = payload.partition(100).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(parts[1].keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_partition_rejects_oversized_manifest() {
        let payload = Payload::new().with("huge.yaml", vec![0u8; 200]);
        assert!(matches!(
            payload.partition(100),
            Err(CoreError::PayloadTooLarge { key, .. }) if key == "huge.yaml"
        ));
    }

    #[test]
    fn test_partition_empty_payload() {
        let parts = Payload::new().partition(MAX_SECRET_PAYLOAD).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_empty());
    }

    #[test]
    fn test_validate_keys() {
        assert!(Payload::new().with("a.yaml", "X").validate().is_ok());
        assert!(Payload::new().with("dir/a.yaml", "X").validate().is_err());
    }
}
