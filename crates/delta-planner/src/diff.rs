//! The diff subquery: flattens every event written to a batch shard down
//! to the single latest surviving event per logical row, via a self
//! outer-join on the staging table gated by `_sequence_num > L`. This
//! predicate is what makes the merge idempotent against at-least-once
//! replay.

use crate::{
    ast::expr::Expr,
    dialect::Dialect,
    renderer::{Render, Renderer},
};
use delta_model::{
    table::supplementary_columns as col, MergeMode, SourceOrdering,
};

pub struct DiffQueryPlan<'a> {
    pub staging_table_sql: &'a str,
    pub batch_id: i64,
    pub latest_merged: u64,
    pub mode: MergeMode,
    pub primary_keys: &'a [String],
    pub sort_key_count: usize,
}

/// Builds the `A happens before B` ordering comparator.
fn order_expr(mode: &MergeMode, sort_key_count: usize) -> Expr {
    if matches!(mode.ordering, SourceOrdering::Ordered) {
        return Expr::ident("A", col::SEQUENCE_NUM).lt(Expr::ident("B", col::SEQUENCE_NUM));
    }

    let fallback = Expr::or(vec![
        Expr::ident("A", col::SOURCE_TIMESTAMP).lt(Expr::ident("B", col::SOURCE_TIMESTAMP)),
        Expr::and(vec![
            Expr::ident("A", col::SOURCE_TIMESTAMP).eq(Expr::ident("B", col::SOURCE_TIMESTAMP)),
            Expr::ident("A", col::SEQUENCE_NUM).lt(Expr::ident("B", col::SEQUENCE_NUM)),
        ]),
    ]);

    if sort_key_count == 0 {
        return fallback;
    }

    // BigQuery struct field access (`A._sort.key_0`) doesn't round-trip
    // through a single quoted identifier, so these paths are built as raw
    // fragments rather than through `Expr::ident`.
    let sort_field = |side: &str, idx: usize| {
        Expr::raw(format!("`{side}`.`{}`.`{}`", col::SORT, col::sort_key_field(idx)))
    };

    // Lexicographic comparison: key_0 < key_0, or (key_0 = key_0 and key_1 <
    // key_1), or ...
    let mut lex_terms = Vec::with_capacity(sort_key_count);
    for i in 0..sort_key_count {
        let mut prefix_eq: Vec<Expr> = (0..i)
            .map(|j| sort_field("A", j).eq(sort_field("B", j)))
            .collect();
        prefix_eq.push(sort_field("A", i).lt(sort_field("B", i)));
        lex_terms.push(Expr::and(prefix_eq));
    }
    let sort_keys_known = Expr::and(vec![
        sort_field("A", 0).is_not_null(),
        sort_field("B", 0).is_not_null(),
        Expr::or(lex_terms),
    ]);

    let sort_keys_missing = Expr::and(vec![
        Expr::or(vec![sort_field("A", 0).is_null(), sort_field("B", 0).is_null()]),
        fallback,
    ]);

    Expr::or(vec![sort_keys_known, sort_keys_missing])
}

fn join_condition(mode: &MergeMode, primary_keys: &[String], sort_key_count: usize) -> Expr {
    let mut terms = if mode.has_row_id() {
        vec![Expr::ident("A", col::ROW_ID).eq(Expr::ident("B", col::ROW_ID))]
    } else {
        primary_keys
            .iter()
            .map(|pk| Expr::ident("A", pk).eq(Expr::ident("B", &col::before_prefixed(pk))))
            .collect()
    };
    terms.push(order_expr(mode, sort_key_count));
    Expr::and(terms)
}

fn where_condition(mode: &MergeMode, primary_keys: &[String]) -> Expr {
    if mode.has_row_id() {
        Expr::ident("B", col::ROW_ID).is_null()
    } else {
        Expr::and(
            primary_keys
                .iter()
                .map(|pk| Expr::ident("B", &col::before_prefixed(pk)).is_null())
                .collect(),
        )
    }
}

pub fn render_diff_subquery(dialect: &dyn Dialect, plan: &DiffQueryPlan) -> String {
    let inner = format!(
        "SELECT * FROM {} WHERE {} = {} AND {} > {}",
        plan.staging_table_sql,
        dialect.quote_identifier(col::BATCH_ID),
        plan.batch_id,
        dialect.quote_identifier(col::SEQUENCE_NUM),
        plan.latest_merged,
    );

    let mut r = Renderer::new(dialect);
    join_condition(&plan.mode, plan.primary_keys, plan.sort_key_count).render(&mut r);
    let join = r.finish();

    let mut r = Renderer::new(dialect);
    where_condition(&plan.mode, plan.primary_keys).render(&mut r);
    let filter = r.finish();

    format!(
        "SELECT A.* FROM ({inner}) AS A LEFT OUTER JOIN ({inner}) AS B ON {join} WHERE {filter}"
    )
}
