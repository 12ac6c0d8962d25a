//! Converts the AST in [`crate::ast`] into BigQuery SQL text.

use crate::{ast::common::TableRef, dialect::Dialect};

pub mod expr;
pub mod merge;

pub trait Render {
    fn render(&self, r: &mut Renderer);
}

pub struct Renderer<'a> {
    pub sql: String,
    pub dialect: &'a dyn Dialect,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            sql: String::new(),
            dialect,
        }
    }

    pub fn finish(self) -> String {
        self.sql
    }

    pub fn render_table_ref(&mut self, table: &TableRef) {
        if let Some(dataset) = &table.dataset {
            self.sql.push_str(&self.dialect.quote_identifier(dataset));
            self.sql.push('.');
        }
        self.sql.push_str(&self.dialect.quote_identifier(&table.name));
    }
}
