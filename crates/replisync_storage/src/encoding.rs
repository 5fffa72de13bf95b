//! On-disk snapshot encodings.

use crate::error::{StorageError, StorageResult};
use replisync_protocol::{Element, Snapshot};
use serde::{Deserialize, Serialize};

/// Encoding used for stored snapshot files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotEncoding {
    /// The `{ "id": ..., "items": [...] }` JSON form, shared with the wire.
    #[default]
    Json,
    /// The same structure as compact CBOR.
    Cbor,
}

impl SnapshotEncoding {
    /// Returns the file extension for this encoding.
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotEncoding::Json => "json",
            SnapshotEncoding::Cbor => "cbor",
        }
    }

    /// Encodes a snapshot.
    pub fn encode<T: Element>(&self, snapshot: &Snapshot<T>) -> StorageResult<Vec<u8>> {
        match self {
            SnapshotEncoding::Json => serde_json::to_vec(snapshot).map_err(StorageError::codec),
            SnapshotEncoding::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(snapshot, &mut buf).map_err(StorageError::codec)?;
                Ok(buf)
            }
        }
    }

    /// Decodes a snapshot.
    pub fn decode<T: Element>(&self, bytes: &[u8]) -> StorageResult<Snapshot<T>> {
        match self {
            SnapshotEncoding::Json => serde_json::from_slice(bytes).map_err(StorageError::codec),
            SnapshotEncoding::Cbor => ciborium::from_reader(bytes).map_err(StorageError::codec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_wire_form() {
        let snapshot = Snapshot::new("s", vec![1u32, 2]);
        let bytes = SnapshotEncoding::Json.encode(&snapshot).unwrap();
        assert_eq!(bytes, br#"{"id":"s","items":[1,2]}"#);
    }

    #[test]
    fn cbor_roundtrip() {
        let snapshot = Snapshot::new("s", vec!["x".to_string()]);
        let bytes = SnapshotEncoding::Cbor.encode(&snapshot).unwrap();
        let decoded: Snapshot<String> = SnapshotEncoding::Cbor.decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn decode_garbage_fails() {
        let result = SnapshotEncoding::Json.decode::<String>(b"not json");
        assert!(matches!(result, Err(StorageError::Codec(_))));
    }

    #[test]
    fn extensions() {
        assert_eq!(SnapshotEncoding::Json.extension(), "json");
        assert_eq!(SnapshotEncoding::Cbor.extension(), "cbor");
    }
}
