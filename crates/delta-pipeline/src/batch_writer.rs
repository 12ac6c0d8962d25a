use delta_model::{BatchShard, BlobType, ChangeEvent, TableId, TableSchema};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct BatchWriterConfig {
    pub max_events_per_batch: usize,
    pub max_batch_age: Duration,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            max_events_per_batch: 10_000,
            max_batch_age: Duration::from_secs(30),
        }
    }
}

struct OpenShard {
    shard: BatchShard,
    opened_at: Instant,
}

/// Buffers per-table events into shards keyed by `(table, schemaFingerprint)`.
/// A schema-fingerprint change always ends the current shard, since the
/// blob and the downstream staging table it loads into both commit to one
/// fixed column layout.
pub struct BatchWriter {
    config: BatchWriterConfig,
    open: Mutex<HashMap<TableId, OpenShard>>,
}

impl BatchWriter {
    pub fn new(config: BatchWriterConfig) -> Self {
        Self {
            config,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `event` to `table`'s open shard. Returns the prior shard,
    /// sealed, if `schema` doesn't match what's currently open (the new
    /// event starts a fresh shard) or if appending it reaches the
    /// size/age threshold.
    pub async fn append(
        &self,
        table: &TableId,
        schema: &TableSchema,
        blob_type: BlobType,
        event: ChangeEvent,
    ) -> Option<BatchShard> {
        let fingerprint = schema.fingerprint();
        let mut open = self.open.lock().await;

        let schema_changed = open
            .get(table)
            .map(|o| o.shard.schema_fingerprint != fingerprint)
            .unwrap_or(false);

        let sealed_for_schema_change = if schema_changed {
            open.remove(table).map(|o| o.shard)
        } else {
            None
        };

        let entry = open.entry(table.clone()).or_insert_with(|| OpenShard {
            shard: BatchShard::new(
                table.clone(),
                fingerprint,
                chrono::Utc::now().timestamp_millis(),
                blob_type,
                schema.clone(),
            ),
            opened_at: Instant::now(),
        });
        entry.shard.events.push(event);

        let should_seal = entry.shard.events.len() >= self.config.max_events_per_batch
            || entry.opened_at.elapsed() >= self.config.max_batch_age;

        if sealed_for_schema_change.is_some() {
            return sealed_for_schema_change;
        }

        if should_seal {
            return open.remove(table).map(|o| o.shard);
        }

        None
    }

    /// Force-seals a table's open shard, e.g. on a periodic flush tick or
    /// before applying DDL.
    pub async fn seal(&self, table: &TableId) -> Option<BatchShard> {
        self.open.lock().await.remove(table).map(|o| o.shard)
    }

    pub async fn has_open_shard(&self, table: &TableId) -> bool {
        self.open.lock().await.contains_key(table)
    }

    /// Seals every open shard older than `max_age`, regardless of size.
    /// Called from the periodic flush tick so a table with a trickle of
    /// events doesn't wait indefinitely for `max_events_per_batch`.
    pub async fn seal_aged(&self, max_age: Duration) -> Vec<BatchShard> {
        let mut open = self.open.lock().await;
        let aged: Vec<TableId> = open
            .iter()
            .filter(|(_, o)| o.opened_at.elapsed() >= max_age)
            .map(|(t, _)| t.clone())
            .collect();
        aged.into_iter()
            .filter_map(|t| open.remove(&t).map(|o| o.shard))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_model::{ColumnSchema, DataType, DmlEvent, DmlOperation, Value};

    fn schema() -> TableSchema {
        TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)])
    }

    fn event(seq: u64) -> ChangeEvent {
        ChangeEvent::Dml(DmlEvent {
            operation: DmlOperation::Insert,
            database: "db".to_string(),
            table: "orders".to_string(),
            after: vec![("id".to_string(), Value::Int64(seq as i64))],
            before_pk: None,
            row_id: None,
            source_timestamp: None,
            sort_keys: None,
            snapshot: false,
            offset: delta_model::Offset(vec![]),
            sequence_number: seq,
        })
    }

    fn table() -> TableId {
        TableId::new("p", "d", "orders")
    }

    #[tokio::test]
    async fn seals_when_event_count_reaches_threshold() {
        let writer = BatchWriter::new(BatchWriterConfig {
            max_events_per_batch: 2,
            max_batch_age: Duration::from_secs(600),
        });
        assert!(writer.append(&table(), &schema(), BlobType::Streaming, event(1)).await.is_none());
        let sealed = writer.append(&table(), &schema(), BlobType::Streaming, event(2)).await;
        assert!(sealed.is_some());
        assert_eq!(sealed.unwrap().events.len(), 2);
        assert!(!writer.has_open_shard(&table()).await);
    }

    #[tokio::test]
    async fn schema_change_seals_prior_shard_and_starts_fresh() {
        let writer = BatchWriter::new(BatchWriterConfig::default());
        writer.append(&table(), &schema(), BlobType::Streaming, event(1)).await;

        let mut new_schema = schema();
        new_schema.columns.push(ColumnSchema::new("amount", DataType::Numeric, true));

        let sealed = writer.append(&table(), &new_schema, BlobType::Streaming, event(2)).await;
        assert_eq!(sealed.unwrap().events.len(), 1);
        assert!(writer.has_open_shard(&table()).await);
    }

    #[tokio::test]
    async fn manual_seal_returns_partial_shard() {
        let writer = BatchWriter::new(BatchWriterConfig::default());
        writer.append(&table(), &schema(), BlobType::Streaming, event(1)).await;
        let sealed = writer.seal(&table()).await;
        assert_eq!(sealed.unwrap().events.len(), 1);
        assert!(!writer.has_open_shard(&table()).await);
    }

    #[tokio::test]
    async fn seal_aged_sweeps_idle_shards_but_leaves_fresh_ones() {
        let writer = BatchWriter::new(BatchWriterConfig::default());
        writer.append(&table(), &schema(), BlobType::Streaming, event(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut other = table();
        other.table = "shipments".to_string();
        writer.append(&other, &schema(), BlobType::Streaming, event(2)).await;

        let sealed = writer.seal_aged(Duration::from_millis(10)).await;
        assert_eq!(sealed.len(), 1);
        assert!(!writer.has_open_shard(&table()).await);
        assert!(writer.has_open_shard(&other).await);
    }
}
