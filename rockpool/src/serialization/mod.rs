//! Serialization abstraction for wire envelopes and message payloads.
//!
//! The core never touches a concrete format directly: everything goes
//! through the [`Serializer`] trait so the encoding can be swapped without
//! touching the messaging layer. [`JsonSerializer`] is the default.

use serde::{Deserialize, Serialize};

/// Result type for serialization operations.
pub type Result<T> = std::result::Result<T, SerializationError>;

/// Errors that can occur while encoding or decoding a message.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SerializationError {
    /// Encoding a value to bytes failed.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Decoding bytes to a value failed.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Base serialization trait.
///
/// Both directions are fallible; a failure is fatal to the single message,
/// never to the channel carrying it.
pub trait Serializer: Clone + Send + Sync {
    /// Serialize a value to bytes.
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value.
    fn deserialize<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON serializer using serde_json.
///
/// Human-readable on the wire, which makes control-plane traffic easy to
/// inspect. Binary formats can be dropped in behind [`Serializer`] where
/// bandwidth matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Create a new JSON serializer.
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| SerializationError::SerializationFailed(format!("JSON error: {}", e)))
    }

    fn deserialize<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| SerializationError::DeserializationFailed(format!("JSON error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMessage {
        id: u64,
        name: String,
    }

    #[test]
    fn test_json_serializer_roundtrip() {
        let serializer = JsonSerializer::new();
        let original = TestMessage {
            id: 42,
            name: "test".to_string(),
        };

        let bytes = serializer.serialize(&original).unwrap();
        let deserialized: TestMessage = serializer.deserialize(&bytes).unwrap();

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_json_serializer_invalid_data() {
        let serializer = JsonSerializer::new();
        let invalid_data = b"not valid json";

        let result: Result<TestMessage> = serializer.deserialize(invalid_data);
        assert!(matches!(
            result,
            Err(SerializationError::DeserializationFailed(_))
        ));
    }
}
