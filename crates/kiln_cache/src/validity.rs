//! Opaque fingerprints supplied by stages.

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::persist;

/// A stage-defined fingerprint of an item.
///
/// The driver never interprets the bytes. Two states are equal when their
/// bytes are equal.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidityState(Vec<u8>);

impl ValidityState {
    /// Wraps raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Uses a content hash as the fingerprint.
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash.as_bytes().to_vec())
    }

    /// Encodes any serializable value as the fingerprint.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, CacheError> {
        persist::encode(value).map(Self)
    }

    /// The fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ValidityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValidityState(")?;
        for byte in self.0.iter().take(16) {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 16 {
            write!(f, "..")?;
        }
        write!(f, ")")
    }
}
