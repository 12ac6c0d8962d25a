//! The single SQL dialect this planner targets: BigQuery GoogleSQL. Kept as
//! a trait (rather than free functions) so identifier quoting and literal
//! rendering stay swappable at one seam.

use delta_model::DataType;

pub trait Dialect: Send + Sync {
    fn quote_identifier(&self, ident: &str) -> String;
    fn render_data_type(&self, data_type: DataType) -> String;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BigQuery;

impl Dialect for BigQuery {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn render_data_type(&self, data_type: DataType) -> String {
        data_type.bigquery_name().to_string()
    }

    fn name(&self) -> &'static str {
        "BigQuery"
    }
}
