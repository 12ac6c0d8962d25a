use crate::{
    ast::expr::{binary_op_sql, Expr},
    renderer::{Render, Renderer},
};

impl Render for Expr {
    fn render(&self, r: &mut Renderer) {
        match self {
            Expr::Identifier(ident) => {
                if let Some(qualifier) = &ident.qualifier {
                    r.sql.push_str(&r.dialect.quote_identifier(qualifier));
                    r.sql.push('.');
                }
                r.sql.push_str(&r.dialect.quote_identifier(&ident.name));
            }
            Expr::Literal(text) => r.sql.push_str(text),
            Expr::BinaryOp(op) => {
                r.sql.push('(');
                op.left.render(r);
                r.sql.push(' ');
                r.sql.push_str(binary_op_sql(op.op));
                r.sql.push(' ');
                op.right.render(r);
                r.sql.push(')');
            }
            Expr::And(parts) => render_combinator(r, parts, "AND"),
            Expr::Or(parts) => render_combinator(r, parts, "OR"),
            Expr::IsNull(inner) => {
                r.sql.push('(');
                inner.render(r);
                r.sql.push_str(" IS NULL)");
            }
            Expr::IsNotNull(inner) => {
                r.sql.push('(');
                inner.render(r);
                r.sql.push_str(" IS NOT NULL)");
            }
            Expr::In(inner, values) => {
                inner.render(r);
                r.sql.push_str(" IN (");
                r.sql.push_str(&values.join(", "));
                r.sql.push(')');
            }
        }
    }
}

fn render_combinator(r: &mut Renderer, parts: &[Expr], joiner: &str) {
    if parts.is_empty() {
        r.sql.push_str("TRUE");
        return;
    }
    r.sql.push('(');
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            r.sql.push(' ');
            r.sql.push_str(joiner);
            r.sql.push(' ');
        }
        part.render(r);
    }
    r.sql.push(')');
}
