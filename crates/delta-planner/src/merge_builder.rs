//! Assembles the full `MERGE` statement for one batch: the diff subquery as
//! the merge source, joined to the target on primary key, with the four
//! ordered/unordered x row-id/no-row-id variants folded into which
//! `WHEN` clauses get emitted.

use crate::{
    ast::{
        common::TableRef,
        expr::Expr,
        merge::{Merge, MergeAssignment, MergeMatchedAction, MergeWhenMatched, MergeWhenNotMatched},
    },
    diff::{render_diff_subquery, DiffQueryPlan},
    dialect::Dialect,
};
use delta_model::{table::supplementary_columns as col, MergeMode};

const OP_INSERT: &str = "'INSERT'";
const OP_UPDATE: &str = "'UPDATE'";
const OP_DELETE: &str = "'DELETE'";

pub struct MergeBuildPlan<'a> {
    pub target_table: TableRef,
    pub staging_table_sql: &'a str,
    pub batch_id: i64,
    pub latest_merged: u64,
    pub mode: MergeMode,
    pub primary_keys: &'a [String],
    pub sort_key_count: usize,
    /// Target columns carrying source data, excluding supplementary columns
    /// and the primary key (PK values are carried via the join and the
    /// tombstone insert, not re-assigned).
    pub value_columns: &'a [String],
    pub soft_deletes: bool,
}

fn insert_update_assignments(plan: &MergeBuildPlan) -> Vec<MergeAssignment> {
    let mut assignments: Vec<MergeAssignment> = plan
        .value_columns
        .iter()
        .map(|c| MergeAssignment {
            column: c.clone(),
            value: Expr::ident("D", c),
        })
        .collect();
    assignments.push(MergeAssignment {
        column: col::SEQUENCE_NUM.to_string(),
        value: Expr::ident("D", col::SEQUENCE_NUM),
    });
    assignments.push(MergeAssignment {
        column: col::SOURCE_TIMESTAMP.to_string(),
        value: Expr::ident("D", col::SOURCE_TIMESTAMP),
    });
    if plan.mode.has_row_id() {
        assignments.push(MergeAssignment {
            column: col::ROW_ID.to_string(),
            value: Expr::ident("D", col::ROW_ID),
        });
    }
    if plan.soft_deletes {
        // A row that comes back to life via INSERT/UPDATE after a prior
        // soft-delete must clear the tombstone flag.
        assignments.push(MergeAssignment {
            column: col::IS_DELETED.to_string(),
            value: Expr::raw("FALSE"),
        });
    }
    assignments
}

fn insert_columns_values(plan: &MergeBuildPlan) -> (Vec<String>, Vec<Expr>) {
    let mut columns: Vec<String> = plan.primary_keys.to_vec();
    let mut values: Vec<Expr> = plan.primary_keys.iter().map(|c| Expr::ident("D", c)).collect();
    for c in plan.value_columns {
        columns.push(c.clone());
        values.push(Expr::ident("D", c));
    }
    columns.push(col::SEQUENCE_NUM.to_string());
    values.push(Expr::ident("D", col::SEQUENCE_NUM));
    columns.push(col::SOURCE_TIMESTAMP.to_string());
    values.push(Expr::ident("D", col::SOURCE_TIMESTAMP));
    if plan.mode.has_row_id() {
        columns.push(col::ROW_ID.to_string());
        values.push(Expr::ident("D", col::ROW_ID));
    }
    if plan.soft_deletes {
        columns.push(col::IS_DELETED.to_string());
        values.push(Expr::raw("FALSE"));
    }
    (columns, values)
}

/// Columns/values for the tombstone row inserted when an unordered source
/// delivers a DELETE for a row the target has never seen. Carries only
/// identity columns plus `_is_deleted = TRUE`; a later out-of-order
/// INSERT/UPDATE for the same key is then a normal matched-row update.
fn tombstone_columns_values(plan: &MergeBuildPlan) -> (Vec<String>, Vec<Expr>) {
    let mut columns: Vec<String> = plan.primary_keys.to_vec();
    let mut values: Vec<Expr> = plan.primary_keys.iter().map(|c| Expr::ident("D", c)).collect();
    columns.push(col::SEQUENCE_NUM.to_string());
    values.push(Expr::ident("D", col::SEQUENCE_NUM));
    columns.push(col::SOURCE_TIMESTAMP.to_string());
    values.push(Expr::ident("D", col::SOURCE_TIMESTAMP));
    if plan.mode.has_row_id() {
        columns.push(col::ROW_ID.to_string());
        values.push(Expr::ident("D", col::ROW_ID));
    }
    columns.push(col::IS_DELETED.to_string());
    values.push(Expr::raw("TRUE"));
    (columns, values)
}

pub fn build_merge(dialect: &dyn Dialect, plan: &MergeBuildPlan) -> Merge {
    let diff_sql = render_diff_subquery(
        dialect,
        &DiffQueryPlan {
            staging_table_sql: plan.staging_table_sql,
            batch_id: plan.batch_id,
            latest_merged: plan.latest_merged,
            mode: plan.mode,
            primary_keys: plan.primary_keys,
            sort_key_count: plan.sort_key_count,
        },
    );

    let on = if plan.mode.has_row_id() {
        Expr::ident("T", col::ROW_ID).eq(Expr::ident("D", col::ROW_ID))
    } else {
        Expr::and(
            plan.primary_keys
                .iter()
                .map(|pk| Expr::ident("T", pk).eq(Expr::ident("D", &col::before_prefixed(pk))))
                .collect(),
        )
    };

    let insert_update_filter =
        Expr::ident("D", col::OP).in_values(vec![OP_INSERT.to_string(), OP_UPDATE.to_string()]);
    let delete_filter = Expr::ident("D", col::OP).eq(Expr::raw(OP_DELETE));

    let delete_action = if plan.soft_deletes {
        MergeMatchedAction::Update(vec![
            MergeAssignment {
                column: col::IS_DELETED.to_string(),
                value: Expr::raw("TRUE"),
            },
            MergeAssignment {
                column: col::SEQUENCE_NUM.to_string(),
                value: Expr::ident("D", col::SEQUENCE_NUM),
            },
        ])
    } else {
        MergeMatchedAction::Delete
    };

    let when_matched = vec![
        MergeWhenMatched {
            op_filter: insert_update_filter.clone(),
            extra_cond: None,
            action: MergeMatchedAction::Update(insert_update_assignments(plan)),
        },
        MergeWhenMatched {
            op_filter: delete_filter.clone(),
            extra_cond: None,
            action: delete_action,
        },
    ];

    let (insert_cols, insert_vals) = insert_columns_values(plan);
    let mut when_not_matched = vec![MergeWhenNotMatched {
        op_filter: insert_update_filter,
        columns: insert_cols,
        values: insert_vals,
    }];

    // An ordered source never delivers a DELETE before the matching INSERT,
    // so a not-matched DELETE can only mean the row was already reconciled
    // away; nothing to do. An unordered source has no such guarantee and
    // needs the tombstone so a later out-of-order INSERT/UPDATE for the same
    // key lands as a matched-row revival instead of a fresh insert.
    if plan.mode.is_unordered() {
        let (ts_cols, ts_vals) = tombstone_columns_values(plan);
        when_not_matched.push(MergeWhenNotMatched {
            op_filter: delete_filter,
            columns: ts_cols,
            values: ts_vals,
        });
    }

    Merge {
        target: plan.target_table.clone(),
        target_alias: "T".to_string(),
        source_sql: diff_sql,
        source_alias: "D".to_string(),
        on,
        when_matched,
        when_not_matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::BigQuery;
    use delta_model::{RowIdSupport, SourceOrdering};

    fn plan<'a>(pks: &'a [String], cols: &'a [String], mode: MergeMode, soft: bool) -> MergeBuildPlan<'a> {
        MergeBuildPlan {
            target_table: TableRef::new("analytics", "orders"),
            staging_table_sql: "`proj`.`stg`.`orders_staging`",
            batch_id: 1700000000000,
            latest_merged: 41,
            mode,
            primary_keys: pks,
            sort_key_count: 0,
            value_columns: cols,
            soft_deletes: soft,
        }
    }

    #[test]
    fn ordered_row_id_hard_delete_has_no_tombstone_clause() {
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Ordered, RowIdSupport(true));
        let merge = build_merge(&BigQuery, &plan(&pks, &cols, mode, false));
        assert_eq!(merge.when_not_matched.len(), 1);
        assert!(matches!(merge.when_matched[1].action, MergeMatchedAction::Delete));
    }

    #[test]
    fn unordered_soft_delete_adds_tombstone_insert_clause() {
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Unordered, RowIdSupport(false));
        let merge = build_merge(&BigQuery, &plan(&pks, &cols, mode, true));
        assert_eq!(merge.when_not_matched.len(), 2);
        assert!(matches!(merge.when_matched[1].action, MergeMatchedAction::Update(_)));
    }

    #[test]
    fn rendered_sql_contains_merge_and_row_id_on_clause() {
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Ordered, RowIdSupport(true));
        let merge = build_merge(&BigQuery, &plan(&pks, &cols, mode, false));
        let mut r = crate::renderer::Renderer::new(&BigQuery);
        use crate::renderer::Render;
        merge.render(&mut r);
        let sql = r.finish();
        assert!(sql.starts_with("MERGE `analytics`.`orders` T USING ("));
        assert!(sql.contains("ON (`T`.`_row_id` = `D`.`_row_id`)"));
        assert!(sql.ends_with(';'));
    }

    #[test]
    fn no_row_id_on_clause_matches_target_pk_against_diff_before_pk() {
        let pks = vec!["id".to_string()];
        let cols = vec!["amount".to_string()];
        let mode = MergeMode::new(SourceOrdering::Unordered, RowIdSupport(false));
        let merge = build_merge(&BigQuery, &plan(&pks, &cols, mode, false));
        let mut r = crate::renderer::Renderer::new(&BigQuery);
        use crate::renderer::Render;
        merge.render(&mut r);
        let sql = r.finish();
        assert!(sql.contains("ON (`T`.`id` = `D`.`_before_id`)"));
    }
}
