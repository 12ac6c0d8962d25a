use crate::ast::{common::TableRef, expr::Expr};

#[derive(Debug, Clone)]
pub struct MergeAssignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub enum MergeMatchedAction {
    Delete,
    Update(Vec<MergeAssignment>),
}

/// One `WHEN MATCHED AND <op_filter> [AND <extra_cond>] THEN <action>`
/// clause.
#[derive(Debug, Clone)]
pub struct MergeWhenMatched {
    pub op_filter: Expr,
    pub extra_cond: Option<Expr>,
    pub action: MergeMatchedAction,
}

/// One `WHEN NOT MATCHED AND <op_filter> THEN INSERT (...) VALUES (...)`
/// clause. Ordered source inserts one row for INSERT/UPDATE; unordered
/// sources add a second clause inserting a tombstone for DELETE.
#[derive(Debug, Clone)]
pub struct MergeWhenNotMatched {
    pub op_filter: Expr,
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

/// The generalized `MERGE` statement, built over a diff-subquery source
/// rather than a plain table. `when_matched` and
/// `when_not_matched` are ordered lists rendered in order, as BigQuery
/// evaluates `WHEN` clauses top to bottom and stops at the first match.
#[derive(Debug, Clone)]
pub struct Merge {
    pub target: TableRef,
    pub target_alias: String,
    pub source_sql: String,
    pub source_alias: String,
    pub on: Expr,
    pub when_matched: Vec<MergeWhenMatched>,
    pub when_not_matched: Vec<MergeWhenNotMatched>,
}
