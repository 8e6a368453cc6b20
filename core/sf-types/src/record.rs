//! Record type - one input unit read from a shard.

use serde_json::{Map, Value};

/// A single input record read from a shard.
///
/// The pipeline is oblivious to the meaning of `passthrough` fields; they are
/// copied verbatim into the output row. Only `text` is sent to the
/// classification service.
#[derive(Debug, Clone)]
pub struct Record {
    /// Positional row index within the shard (0-indexed). This is the resume
    /// key: offsets are positional, not content-derived, so resume
    /// correctness depends on the shard's natural row order.
    pub offset: u64,

    /// Identifier, unique within the shard (e.g. `blob_id` in the source
    /// corpus). Falls back to `<shard_id>:<offset>` when the source has no
    /// id column.
    pub id: String,

    /// The free-text payload to classify.
    pub text: String,

    /// All other source columns, passed through to the output untouched.
    pub passthrough: Map<String, Value>,
}

impl Record {
    /// Create a record with no passthrough fields.
    pub fn new(offset: u64, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            offset,
            id: id.into(),
            text: text.into(),
            passthrough: Map::new(),
        }
    }

    /// Attach passthrough fields.
    pub fn with_passthrough(mut self, fields: Map<String, Value>) -> Self {
        self.passthrough = fields;
        self
    }

    /// Byte length of the text payload.
    pub fn payload_len(&self) -> usize {
        self.text.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creation() {
        let record = Record::new(7, "blob-abc", "fn main() {}");
        assert_eq!(record.offset, 7);
        assert_eq!(record.id, "blob-abc");
        assert_eq!(record.payload_len(), 12);
        assert!(record.passthrough.is_empty());
    }

    #[test]
    fn test_record_passthrough() {
        let mut fields = Map::new();
        fields.insert("language".to_string(), Value::String("Rust".to_string()));
        let record = Record::new(0, "id", "text").with_passthrough(fields);
        assert_eq!(
            record.passthrough.get("language"),
            Some(&Value::String("Rust".to_string()))
        );
    }
}
