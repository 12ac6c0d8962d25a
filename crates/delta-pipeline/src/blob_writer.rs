use apache_avro::types::Value as AvroValue;
use apache_avro::{Schema as AvroSchema, Writer as AvroWriter};
use delta_connectors::BlobStore;
use delta_model::{
    table::supplementary_columns as col, BatchShard, BlobFormat, ChangeEvent, ColumnSchema, DataType,
    TableBlob, TableId, TableSchema, Value,
};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobWriterError {
    #[error("blob store error: {0}")]
    Store(#[from] delta_connectors::BlobStoreError),

    #[error("avro schema error: {0}")]
    AvroSchema(String),
}

/// Serializes sealed batch shards to the blob store, preferring Avro and
/// falling back to newline-delimited JSON when the shard's schema can't be
/// expressed as a valid Avro record (e.g. a `Struct` column with no fields
/// yet, during schema evolution).
pub struct BlobWriter {
    store: Arc<dyn BlobStore>,
    bucket: String,
    app_name: String,
}

impl BlobWriter {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            app_name: app_name.into(),
        }
    }

    fn object_key(&self, table: &TableId, batch_id: i64) -> String {
        format!(
            "cdap/delta/{}/{}/{}/{}",
            self.app_name, table.dataset, table.table, batch_id
        )
    }

    pub async fn write(&self, shard: &BatchShard, primary_keys: &[String], sort_key_count: usize) -> Result<TableBlob, BlobWriterError> {
        let (bytes, format) = match encode_avro(shard, primary_keys, sort_key_count) {
            Ok(bytes) => (bytes, BlobFormat::Avro),
            Err(_) => (encode_json(shard), BlobFormat::Json),
        };

        let key = self.object_key(&shard.table, shard.batch_id);
        self.store.put_object(&self.bucket, &key, bytes.clone()).await?;
        let blob_handle = self.store.object_uri(&self.bucket, &key);

        Ok(TableBlob {
            table: shard.table.clone(),
            source_schema_name: shard.schema_fingerprint.clone(),
            batch_id: shard.batch_id,
            blob_type: shard.blob_type,
            blob_handle,
            staging_schema: staging_schema(&shard.schema, primary_keys, sort_key_count),
            target_schema: shard.schema.clone(),
            num_events: shard.events.len(),
            format,
        })
    }
}

/// The staging table carries every target column plus the bookkeeping
/// columns the diff subquery and MERGE statement key off of: the before-image
/// of each primary key (for matching a target row when the source carries no
/// row id), and the `_sort` struct when the source is unordered.
pub fn staging_schema(schema: &TableSchema, primary_keys: &[String], sort_key_count: usize) -> TableSchema {
    let mut columns = schema.columns.clone();
    for pk in primary_keys {
        let data_type = schema.column(pk).map(|c| c.data_type).unwrap_or(DataType::String);
        columns.push(ColumnSchema::new(col::before_prefixed(pk), data_type, true));
    }
    columns.push(ColumnSchema::new(col::SEQUENCE_NUM, DataType::Int64, false));
    columns.push(ColumnSchema::new(col::SOURCE_TIMESTAMP, DataType::Timestamp, true));
    columns.push(ColumnSchema::new(col::ROW_ID, DataType::String, true));
    columns.push(ColumnSchema::new(col::OP, DataType::String, false));
    columns.push(ColumnSchema::new(col::BATCH_ID, DataType::Int64, false));
    if sort_key_count > 0 {
        columns.push(ColumnSchema::new(col::SORT, DataType::Struct, true));
    }
    columns
}

fn avro_field_type(dt: DataType, nullable: bool) -> serde_json::Value {
    let base = match dt {
        DataType::Int64 => serde_json::json!("long"),
        DataType::Float64 => serde_json::json!("double"),
        DataType::Numeric => serde_json::json!("string"),
        DataType::Bool => serde_json::json!("boolean"),
        DataType::String => serde_json::json!("string"),
        DataType::Bytes => serde_json::json!("bytes"),
        DataType::Date => serde_json::json!({"type": "int", "logicalType": "date"}),
        DataType::Timestamp => {
            serde_json::json!({"type": "long", "logicalType": "timestamp-micros"})
        }
        DataType::Struct => unreachable!("avro_schema rejects STRUCT columns before calling this"),
    };
    if nullable {
        serde_json::json!(["null", base])
    } else {
        base
    }
}

/// The Avro type a `_sort` struct field should take on, inferred from the
/// first event in the shard that actually carries a value at that index
/// (sort key values are homogeneously typed per index across a shard).
fn sort_key_avro_type(shard: &BatchShard, index: usize) -> serde_json::Value {
    let sample = shard.events.iter().find_map(|e| match e {
        ChangeEvent::Dml(d) => d.sort_keys.as_ref().and_then(|keys| keys.get(index)),
        ChangeEvent::Ddl(_) => None,
    });
    match sample {
        Some(Value::Int64(_)) => serde_json::json!("long"),
        Some(Value::Float64(_)) => serde_json::json!("double"),
        Some(Value::Numeric(_)) => serde_json::json!("string"),
        Some(Value::Bool(_)) => serde_json::json!("boolean"),
        Some(Value::String(_)) => serde_json::json!("string"),
        Some(Value::Bytes(_)) => serde_json::json!("bytes"),
        Some(Value::Date(_)) => serde_json::json!({"type": "int", "logicalType": "date"}),
        Some(Value::Timestamp(_)) => serde_json::json!({"type": "long", "logicalType": "timestamp-micros"}),
        Some(Value::Struct(_)) | Some(Value::Null) | None => serde_json::json!("string"),
    }
}

fn avro_schema(shard: &BatchShard, primary_keys: &[String], sort_key_count: usize) -> Result<AvroSchema, BlobWriterError> {
    let mut fields = Vec::new();
    for c in &shard.schema.columns {
        if c.data_type == DataType::Struct {
            return Err(BlobWriterError::AvroSchema(format!(
                "column {} is STRUCT, no stable Avro mapping",
                c.name
            )));
        }
        fields.push(serde_json::json!({
            "name": c.name,
            "type": avro_field_type(c.data_type, c.nullable),
        }));
    }
    for pk in primary_keys {
        let data_type = shard.schema.column(pk).map(|c| c.data_type).unwrap_or(DataType::String);
        fields.push(serde_json::json!({
            "name": col::before_prefixed(pk),
            "type": avro_field_type(data_type, true),
            "default": null,
        }));
    }
    fields.push(serde_json::json!({"name": col::SEQUENCE_NUM, "type": "long"}));
    fields.push(serde_json::json!({"name": col::SOURCE_TIMESTAMP, "type": ["null", "long"], "default": null}));
    fields.push(serde_json::json!({"name": col::ROW_ID, "type": ["null", "string"], "default": null}));
    fields.push(serde_json::json!({"name": col::OP, "type": "string"}));
    fields.push(serde_json::json!({"name": col::BATCH_ID, "type": "long"}));
    if sort_key_count > 0 {
        let sort_fields: Vec<_> = (0..sort_key_count)
            .map(|i| {
                serde_json::json!({
                    "name": col::sort_key_field(i),
                    "type": ["null", sort_key_avro_type(shard, i)],
                    "default": null,
                })
            })
            .collect();
        fields.push(serde_json::json!({
            "name": col::SORT,
            "type": ["null", {"type": "record", "name": "DeltaSortKey", "fields": sort_fields}],
            "default": null,
        }));
    }

    let schema_json = serde_json::json!({
        "type": "record",
        "name": "DeltaStagingRow",
        "fields": fields,
    });
    AvroSchema::parse_str(&schema_json.to_string()).map_err(|e| BlobWriterError::AvroSchema(e.to_string()))
}

fn value_to_avro(v: &Value, nullable: bool) -> AvroValue {
    let inner = match v {
        Value::Int64(n) => AvroValue::Long(*n),
        Value::Float64(f) => AvroValue::Double(*f),
        Value::Numeric(d) => AvroValue::String(d.to_string()),
        Value::Bool(b) => AvroValue::Boolean(*b),
        Value::String(s) => AvroValue::String(s.clone()),
        Value::Bytes(b) => AvroValue::Bytes(b.clone()),
        Value::Date(d) => AvroValue::Date((*d - chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()).num_days() as i32),
        Value::Timestamp(ts) => AvroValue::TimestampMicros(ts.timestamp_micros()),
        Value::Struct(_) | Value::Null => return AvroValue::Union(0, Box::new(AvroValue::Null)),
    };
    if nullable {
        AvroValue::Union(1, Box::new(inner))
    } else {
        inner
    }
}

fn encode_avro(shard: &BatchShard, primary_keys: &[String], sort_key_count: usize) -> Result<Vec<u8>, BlobWriterError> {
    let schema = avro_schema(shard, primary_keys, sort_key_count)?;
    let mut writer = AvroWriter::new(&schema, Vec::new());

    for event in &shard.events {
        let dml = match event {
            ChangeEvent::Dml(d) => d,
            ChangeEvent::Ddl(_) => continue,
        };
        let mut record = Vec::new();
        for col_schema in &shard.schema.columns {
            let value = dml
                .after_value(&col_schema.name)
                .cloned()
                .unwrap_or(Value::Null);
            record.push((col_schema.name.clone(), value_to_avro(&value, col_schema.nullable)));
        }
        for pk in primary_keys {
            let before_value = dml.before_pk_value(pk).cloned().unwrap_or(Value::Null);
            record.push((col::before_prefixed(pk), value_to_avro(&before_value, true)));
        }
        record.push((col::SEQUENCE_NUM.to_string(), AvroValue::Long(dml.sequence_number as i64)));
        record.push((
            col::SOURCE_TIMESTAMP.to_string(),
            match dml.source_timestamp {
                Some(ts) => AvroValue::Union(1, Box::new(AvroValue::TimestampMicros(ts))),
                None => AvroValue::Union(0, Box::new(AvroValue::Null)),
            },
        ));
        record.push((
            col::ROW_ID.to_string(),
            match &dml.row_id {
                Some(id) => AvroValue::Union(1, Box::new(AvroValue::String(id.clone()))),
                None => AvroValue::Union(0, Box::new(AvroValue::Null)),
            },
        ));
        record.push((col::OP.to_string(), AvroValue::String(dml.operation.as_op_tag().to_string())));
        record.push((col::BATCH_ID.to_string(), AvroValue::Long(shard.batch_id)));
        if sort_key_count > 0 {
            let sort_value = match &dml.sort_keys {
                Some(keys) => {
                    let fields: Vec<_> = (0..sort_key_count)
                        .map(|i| {
                            let v = keys.get(i).cloned().unwrap_or(Value::Null);
                            (col::sort_key_field(i), value_to_avro(&v, true))
                        })
                        .collect();
                    AvroValue::Union(1, Box::new(AvroValue::Record(fields)))
                }
                None => AvroValue::Union(0, Box::new(AvroValue::Null)),
            };
            record.push((col::SORT.to_string(), sort_value));
        }

        writer
            .append(AvroValue::Record(record))
            .map_err(|e| BlobWriterError::AvroSchema(e.to_string()))?;
    }

    writer.into_inner().map_err(|e| BlobWriterError::AvroSchema(e.to_string()))
}

fn encode_json(shard: &BatchShard) -> Vec<u8> {
    let mut out = Vec::new();
    for event in &shard.events {
        if let ChangeEvent::Dml(dml) = event {
            if let Ok(line) = serde_json::to_vec(dml) {
                out.extend_from_slice(&line);
                out.push(b'\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use delta_connectors::InMemoryBlobStore;
    use delta_model::{BlobType, DmlEvent, DmlOperation, Offset};

    fn shard() -> BatchShard {
        let schema = TableSchema::new(vec![ColumnSchema::new("id", DataType::Int64, false)]);
        let mut shard = BatchShard::new(
            TableId::new("p", "d", "orders"),
            schema.fingerprint(),
            1700000000000,
            BlobType::Streaming,
            schema,
        );
        shard.events.push(ChangeEvent::Dml(DmlEvent {
            operation: DmlOperation::Insert,
            database: "d".to_string(),
            table: "orders".to_string(),
            after: vec![("id".to_string(), Value::Int64(1))],
            before_pk: None,
            row_id: None,
            source_timestamp: None,
            sort_keys: None,
            snapshot: false,
            offset: Offset(vec![]),
            sequence_number: 1,
        }));
        shard
    }

    #[tokio::test]
    async fn writes_avro_blob_for_plain_schema() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        store.create_bucket("staging").await.unwrap();
        let writer = BlobWriter::new(store.clone(), "staging", "myapp");
        let pks = vec!["id".to_string()];
        let blob = writer.write(&shard(), &pks, 0).await.unwrap();
        assert_eq!(blob.format, BlobFormat::Avro);
        assert_eq!(blob.num_events, 1);
        assert!(blob.staging_schema.column(&col::before_prefixed("id")).is_some());
    }

    #[tokio::test]
    async fn falls_back_to_json_for_struct_columns() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        store.create_bucket("staging").await.unwrap();
        let writer = BlobWriter::new(store.clone(), "staging", "myapp");

        let mut s = shard();
        s.schema.columns.push(ColumnSchema::new("payload", DataType::Struct, true));
        let pks = vec!["id".to_string()];
        let blob = writer.write(&s, &pks, 0).await.unwrap();
        assert_eq!(blob.format, BlobFormat::Json);
    }

    #[tokio::test]
    async fn unordered_sort_keys_round_trip_into_the_sort_struct_column() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        store.create_bucket("staging").await.unwrap();
        let writer = BlobWriter::new(store.clone(), "staging", "myapp");

        let mut s = shard();
        if let ChangeEvent::Dml(dml) = &mut s.events[0] {
            dml.sort_keys = Some(vec![Value::Int64(42)]);
        }
        let pks = vec!["id".to_string()];
        let blob = writer.write(&s, &pks, 1).await.unwrap();
        assert_eq!(blob.format, BlobFormat::Avro);
        assert!(blob.staging_schema.column(col::SORT).is_some());
    }
}
