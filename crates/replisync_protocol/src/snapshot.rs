//! Persisted and wire form of a replicated set.

use crate::error::ProtocolResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The externally persisted representation of a [`ReplicatedSet`].
///
/// Serializes as `{ "id": string, "items": [ <element> ] }`. Storage and
/// transport treat a snapshot as an opaque unit keyed by `id`; `items` may
/// arrive in any order and may contain duplicates written by other
/// producers.
///
/// [`ReplicatedSet`]: crate::ReplicatedSet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    /// Set id.
    pub id: String,
    /// Elements of the set.
    pub items: Vec<T>,
}

impl<T> Snapshot<T> {
    /// Creates a new snapshot.
    pub fn new(id: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            id: id.into(),
            items,
        }
    }

    /// Creates a snapshot with no elements.
    pub fn empty(id: impl Into<String>) -> Self {
        Self::new(id, Vec::new())
    }

    /// Returns the number of stored elements, duplicates included.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Serialize> Snapshot<T> {
    /// Encodes to a JSON string.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes to JSON bytes.
    pub fn to_json_vec(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<T: DeserializeOwned> Snapshot<T> {
    /// Decodes from a JSON string.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
