use crate::ast::merge::{Merge, MergeMatchedAction, MergeWhenMatched, MergeWhenNotMatched};
use crate::renderer::{Render, Renderer};

impl Render for Merge {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("MERGE ");
        r.render_table_ref(&self.target);
        r.sql.push(' ');
        r.sql.push_str(&self.target_alias);

        r.sql.push_str(" USING (");
        r.sql.push_str(&self.source_sql);
        r.sql.push_str(") ");
        r.sql.push_str(&self.source_alias);

        r.sql.push_str(" ON ");
        self.on.render(r);

        for clause in &self.when_matched {
            r.sql.push(' ');
            clause.render(r);
        }
        for clause in &self.when_not_matched {
            r.sql.push(' ');
            clause.render(r);
        }
        r.sql.push(';');
    }
}

impl Render for MergeWhenMatched {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("WHEN MATCHED AND ");
        self.op_filter.render(r);
        if let Some(cond) = &self.extra_cond {
            r.sql.push_str(" AND ");
            cond.render(r);
        }
        r.sql.push_str(" THEN ");
        match &self.action {
            MergeMatchedAction::Delete => r.sql.push_str("DELETE"),
            MergeMatchedAction::Update(assignments) => {
                r.sql.push_str("UPDATE SET ");
                for (i, assignment) in assignments.iter().enumerate() {
                    if i > 0 {
                        r.sql.push_str(", ");
                    }
                    r.sql.push_str(&r.dialect.quote_identifier(&assignment.column));
                    r.sql.push_str(" = ");
                    assignment.value.render(r);
                }
            }
        }
    }
}

impl Render for MergeWhenNotMatched {
    fn render(&self, r: &mut Renderer) {
        r.sql.push_str("WHEN NOT MATCHED AND ");
        self.op_filter.render(r);
        r.sql.push_str(" THEN INSERT (");
        let quoted: Vec<String> = self
            .columns
            .iter()
            .map(|c| r.dialect.quote_identifier(c))
            .collect();
        r.sql.push_str(&quoted.join(", "));
        r.sql.push_str(") VALUES (");
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                r.sql.push_str(", ");
            }
            value.render(r);
        }
        r.sql.push(')');
    }
}
