//! Renders the DDL statements C4 (DdlApplier) issues against the warehouse:
//! dataset create/drop, table create/drop/truncate/rename/add-column.

use crate::{ast::common::TableRef, dialect::Dialect, renderer::Renderer};
use delta_model::{ColumnSchema, TableSchema};

pub const DEFAULT_MAX_CLUSTERING_COLUMNS: usize = 4;

/// Primary-key columns eligible to cluster the target table, capped at
/// `max_clustering_columns` and filtered to types BigQuery allows as
/// clustering keys.
pub fn clustering_columns(
    schema: &TableSchema,
    primary_keys: &[String],
    max_clustering_columns: usize,
) -> Vec<String> {
    primary_keys
        .iter()
        .filter(|pk| {
            schema
                .column(pk)
                .map(|c| c.data_type.cluster_eligible())
                .unwrap_or(false)
        })
        .take(max_clustering_columns)
        .cloned()
        .collect()
}

pub fn render_create_dataset(dialect: &dyn Dialect, dataset: &str) -> String {
    format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        dialect.quote_identifier(dataset)
    )
}

pub fn render_drop_dataset(dialect: &dyn Dialect, dataset: &str) -> String {
    format!(
        "DROP SCHEMA IF EXISTS {} CASCADE",
        dialect.quote_identifier(dataset)
    )
}

pub fn render_create_table(
    dialect: &dyn Dialect,
    table: &TableRef,
    schema: &TableSchema,
    primary_keys: &[String],
    max_clustering_columns: usize,
) -> String {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("CREATE TABLE IF NOT EXISTS ");
    r.render_table_ref(table);
    r.sql.push_str(" (");
    for (i, col) in schema.columns.iter().enumerate() {
        if i > 0 {
            r.sql.push_str(", ");
        }
        r.sql.push_str(&dialect.quote_identifier(&col.name));
        r.sql.push(' ');
        r.sql.push_str(&dialect.render_data_type(col.data_type));
        if !col.nullable {
            r.sql.push_str(" NOT NULL");
        }
    }
    r.sql.push(')');

    let clustering = clustering_columns(schema, primary_keys, max_clustering_columns);
    if !clustering.is_empty() {
        r.sql.push_str(" CLUSTER BY ");
        let quoted: Vec<String> = clustering
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect();
        r.sql.push_str(&quoted.join(", "));
    }
    r.finish()
}

pub fn render_drop_table(dialect: &dyn Dialect, table: &TableRef) -> String {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("DROP TABLE IF EXISTS ");
    r.render_table_ref(table);
    r.finish()
}

pub fn render_truncate_table(dialect: &dyn Dialect, table: &TableRef) -> String {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("TRUNCATE TABLE ");
    r.render_table_ref(table);
    r.finish()
}

pub fn render_rename_table(dialect: &dyn Dialect, table: &TableRef, new_name: &str) -> String {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("ALTER TABLE ");
    r.render_table_ref(table);
    r.sql.push_str(" RENAME TO ");
    r.sql.push_str(&dialect.quote_identifier(new_name));
    r.finish()
}

pub fn render_add_column(dialect: &dyn Dialect, table: &TableRef, column: &ColumnSchema) -> String {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("ALTER TABLE ");
    r.render_table_ref(table);
    r.sql.push_str(" ADD COLUMN IF NOT EXISTS ");
    r.sql.push_str(&dialect.quote_identifier(&column.name));
    r.sql.push(' ');
    r.sql.push_str(&dialect.render_data_type(column.data_type));
    r.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::BigQuery;
    use delta_model::DataType;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("id", DataType::Int64, false),
            ColumnSchema::new("amount", DataType::Numeric, true),
            ColumnSchema::new("payload", DataType::Struct, true),
        ])
    }

    #[test]
    fn clustering_skips_struct_columns() {
        let pks = vec!["id".to_string(), "payload".to_string()];
        let cols = clustering_columns(&schema(), &pks, DEFAULT_MAX_CLUSTERING_COLUMNS);
        assert_eq!(cols, vec!["id".to_string()]);
    }

    #[test]
    fn create_table_includes_cluster_by() {
        let table = TableRef::new("analytics", "orders");
        let pks = vec!["id".to_string()];
        let sql = render_create_table(&BigQuery, &table, &schema(), &pks, DEFAULT_MAX_CLUSTERING_COLUMNS);
        assert!(sql.contains("CLUSTER BY `id`"));
        assert!(sql.contains("`id` INT64 NOT NULL"));
    }
}
