//! Batch type - the unit of dispatch, retry, sink commit and checkpoint advance.

use crate::Record;

/// An ordered group of records submitted as one inference request.
///
/// A batch either fully succeeds (every record gets an outcome, possibly a
/// per-record error) or is retried as a whole. Its ending offset is what the
/// checkpoint advances to after the sink commit.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Shard this batch was cut from.
    pub shard_id: String,

    /// Index of this batch within the shard (0-indexed), for logging.
    pub index: u64,

    /// Offset of the first record in this batch within the shard.
    pub start_offset: u64,

    /// The records, in shard order.
    pub records: Vec<Record>,
}

impl Batch {
    /// Create a batch starting at the given shard offset.
    pub fn new(shard_id: impl Into<String>, index: u64, records: Vec<Record>) -> Self {
        let start_offset = records.first().map(|r| r.offset).unwrap_or(0);
        Self {
            shard_id: shard_id.into(),
            index,
            start_offset,
            records,
        }
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exclusive end offset: the checkpoint value after this batch commits.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.records.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_offsets() {
        let records = (5..8).map(|i| Record::new(i, format!("r{i}"), "x")).collect();
        let batch = Batch::new("shard-a", 1, records);
        assert_eq!(batch.start_offset, 5);
        assert_eq!(batch.end_offset(), 8);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_empty_batch() {
        let batch = Batch::new("shard-a", 0, vec![]);
        assert!(batch.is_empty());
        assert_eq!(batch.end_offset(), 0);
    }
}
