//! Positional parquet decoding into records.

use arrow::json::LineDelimitedWriter;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use serde_json::{Map, Value};
use sf_error::ReaderError;
use sf_types::{Record, Shard};
use std::collections::VecDeque;
use std::fs::File;
use tracing::debug;

/// Configuration for the shard reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Rows decoded per arrow batch.
    pub batch_size: usize,

    /// Column holding the text payload.
    pub text_column: String,

    /// Column holding the record identifier.
    pub id_column: String,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 2048,
            text_column: "content".to_string(),
            id_column: "blob_id".to_string(),
        }
    }
}

impl ReaderConfig {
    /// Create a configuration with the given column names.
    pub fn new(text_column: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            text_column: text_column.into(),
            id_column: id_column.into(),
            ..Default::default()
        }
    }

    /// Set the decode batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Opens shards and produces lazy record iterators.
#[derive(Debug, Clone)]
pub struct ShardReader {
    config: ReaderConfig,
}

impl ShardReader {
    /// Create a reader with the given configuration.
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Open a shard at a resume offset.
    ///
    /// Returns a lazy, finite iterator over records in the shard's natural
    /// row order starting at `resume_offset`. The parquet footer and the
    /// presence of the text column are checked here; malformed pages
    /// surface as errors during iteration.
    pub fn open(&self, shard: &Shard, resume_offset: u64) -> Result<RecordIter, ReaderError> {
        let file = File::open(&shard.path).map_err(|source| ReaderError::Io {
            shard_id: shard.shard_id.clone(),
            source,
        })?;

        let builder =
            ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| ReaderError::CorruptShard {
                shard_id: shard.shard_id.clone(),
                message: format!("unreadable parquet footer: {e}"),
            })?;

        if builder
            .schema()
            .field_with_name(&self.config.text_column)
            .is_err()
        {
            return Err(ReaderError::MissingColumn {
                shard_id: shard.shard_id.clone(),
                column: self.config.text_column.clone(),
            });
        }

        let reader = builder
            .with_batch_size(self.config.batch_size)
            .with_offset(resume_offset as usize)
            .build()
            .map_err(|e| ReaderError::CorruptShard {
                shard_id: shard.shard_id.clone(),
                message: format!("failed to build record reader: {e}"),
            })?;

        debug!(
            shard = %shard.shard_id,
            resume_offset,
            "Opened shard for reading"
        );

        Ok(RecordIter {
            shard_id: shard.shard_id.clone(),
            reader,
            pending: VecDeque::new(),
            next_offset: resume_offset,
            text_column: self.config.text_column.clone(),
            id_column: self.config.id_column.clone(),
        })
    }
}

/// Lazy iterator over the records of one shard.
pub struct RecordIter {
    shard_id: String,
    reader: ParquetRecordBatchReader,
    pending: VecDeque<Record>,
    next_offset: u64,
    text_column: String,
    id_column: String,
}

impl RecordIter {
    /// Decode the next arrow batch into pending records.
    ///
    /// Rows are rendered through arrow's JSON writer so that passthrough
    /// columns survive verbatim regardless of their arrow type.
    fn refill(&mut self) -> Result<bool, ReaderError> {
        let batch = match self.reader.next() {
            Some(Ok(batch)) => batch,
            Some(Err(e)) => {
                return Err(ReaderError::CorruptShard {
                    shard_id: self.shard_id.clone(),
                    message: format!("failed to decode row group: {e}"),
                });
            }
            None => return Ok(false),
        };

        let mut writer = LineDelimitedWriter::new(Vec::new());
        writer
            .write(&batch)
            .and_then(|_| writer.finish())
            .map_err(|e| ReaderError::CorruptShard {
                shard_id: self.shard_id.clone(),
                message: format!("failed to render rows: {e}"),
            })?;
        let buf = writer.into_inner();

        for line in buf.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
            let mut row: Map<String, Value> =
                serde_json::from_slice(line).map_err(|e| ReaderError::CorruptShard {
                    shard_id: self.shard_id.clone(),
                    message: format!("failed to parse rendered row: {e}"),
                })?;

            let offset = self.next_offset;
            self.next_offset += 1;

            // Null text is rendered as an absent key; empty text is caught
            // downstream as a per-record error so cardinality is preserved.
            let text = match row.remove(&self.text_column) {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => String::new(),
            };

            let id = match row.get(&self.id_column) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("{}:{}", self.shard_id, offset),
            };

            self.pending.push_back(Record {
                offset,
                id,
                text,
                passthrough: row,
            });
        }

        Ok(true)
    }
}

impl Iterator for RecordIter {
    type Item = Result<Record, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            match self.refill() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use sf_types::Fingerprint;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_shard(dir: &TempDir, name: &str, rows: usize) -> Shard {
        let schema = Arc::new(Schema::new(vec![
            Field::new("blob_id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, true),
            Field::new("size", DataType::Int64, false),
        ]));
        let ids: Vec<String> = (0..rows).map(|i| format!("blob-{i:04}")).collect();
        let texts: Vec<Option<String>> = (0..rows)
            .map(|i| {
                if i == 2 {
                    None // one null payload
                } else {
                    Some(format!("text body {i}"))
                }
            })
            .collect();
        let sizes: Vec<i64> = (0..rows as i64).collect();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(texts)),
                Arc::new(Int64Array::from(sizes)),
            ],
        )
        .unwrap();

        let path = dir.path().join(name);
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let fingerprint = Fingerprint::of_file(&path).unwrap();
        Shard::new(path, fingerprint)
    }

    #[test]
    fn test_read_all_records_in_order() {
        let dir = TempDir::new().unwrap();
        let shard = write_shard(&dir, "shard-a.parquet", 5);
        let reader = ShardReader::new(ReaderConfig::default());

        let records: Vec<Record> = reader
            .open(&shard, 0)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 5);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.offset, i as u64);
            assert_eq!(r.id, format!("blob-{i:04}"));
        }
        // null payload decoded as empty text, row not dropped
        assert_eq!(records[2].text, "");
        assert_eq!(records[3].text, "text body 3");
        // passthrough preserves non-text columns including the id
        assert_eq!(records[0].passthrough["size"], serde_json::json!(0));
        assert_eq!(records[0].passthrough["blob_id"], serde_json::json!("blob-0000"));
        assert!(!records[0].passthrough.contains_key("content"));
    }

    #[test]
    fn test_resume_offset() {
        let dir = TempDir::new().unwrap();
        let shard = write_shard(&dir, "shard-a.parquet", 10);
        let reader = ShardReader::new(ReaderConfig::default());

        let records: Vec<Record> = reader
            .open(&shard, 7)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].offset, 7);
        assert_eq!(records[0].id, "blob-0007");
    }

    #[test]
    fn test_resume_past_end_is_empty() {
        let dir = TempDir::new().unwrap();
        let shard = write_shard(&dir, "shard-a.parquet", 4);
        let reader = ShardReader::new(ReaderConfig::default());

        let records: Vec<Record> = reader
            .open(&shard, 100)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_text_column() {
        let dir = TempDir::new().unwrap();
        let shard = write_shard(&dir, "shard-a.parquet", 3);
        let reader = ShardReader::new(ReaderConfig::new("no_such_column", "blob_id"));

        match reader.open(&shard, 0) {
            Err(ReaderError::MissingColumn { column, .. }) => {
                assert_eq!(column, "no_such_column");
            }
            Err(other) => panic!("expected MissingColumn, got {other:?}"),
            Ok(_) => panic!("open succeeded without the text column"),
        }
    }

    #[test]
    fn test_garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.parquet");
        std::fs::write(&path, b"this is not a parquet file").unwrap();
        let shard = Shard::new(&path, Fingerprint::of_file(&path).unwrap());

        let reader = ShardReader::new(ReaderConfig::default());
        match reader.open(&shard, 0) {
            Err(ReaderError::CorruptShard { .. }) => {}
            Err(other) => panic!("expected CorruptShard, got {other:?}"),
            Ok(_) => panic!("open succeeded on a non-parquet file"),
        }
    }
}
