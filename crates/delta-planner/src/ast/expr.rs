#[derive(Debug, Clone)]
pub struct Ident {
    pub qualifier: Option<String>,
    pub name: String,
}

impl Ident {
    pub fn new(qualifier: &str, name: &str) -> Self {
        Self {
            qualifier: Some(qualifier.to_string()),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    Lt,
    Gt,
}

impl BinaryOperator {
    fn as_sql(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::Lt => "<",
            BinaryOperator::Gt => ">",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryOp {
    pub left: Expr,
    pub op: BinaryOperator,
    pub right: Expr,
}

/// Expression AST covering exactly what the merge-query generator needs:
/// column references, raw literals (`TRUE`, `"DELETE"`), comparisons and
/// boolean combinators. Deliberately smaller than a general SQL expression
/// grammar: tagged variants over subtype polymorphism.
#[derive(Debug, Clone)]
pub enum Expr {
    Identifier(Ident),
    /// Raw SQL text inserted verbatim (numeric/boolean/string literals,
    /// and escape-hatch fragments for things the AST doesn't model).
    Literal(String),
    BinaryOp(Box<BinaryOp>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    In(Box<Expr>, Vec<String>),
}

impl Expr {
    pub fn ident(qualifier: &str, name: &str) -> Expr {
        Expr::Identifier(Ident::new(qualifier, name))
    }

    pub fn raw(sql: impl Into<String>) -> Expr {
        Expr::Literal(sql.into())
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::BinaryOp(Box::new(BinaryOp {
            left: self,
            op: BinaryOperator::Eq,
            right: other,
        }))
    }

    pub fn lt(self, other: Expr) -> Expr {
        Expr::BinaryOp(Box::new(BinaryOp {
            left: self,
            op: BinaryOperator::Lt,
            right: other,
        }))
    }

    pub fn gt(self, other: Expr) -> Expr {
        Expr::BinaryOp(Box::new(BinaryOp {
            left: self,
            op: BinaryOperator::Gt,
            right: other,
        }))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn and(exprs: Vec<Expr>) -> Expr {
        Expr::And(exprs)
    }

    pub fn or(exprs: Vec<Expr>) -> Expr {
        Expr::Or(exprs)
    }

    pub fn in_values(self, values: Vec<String>) -> Expr {
        Expr::In(Box::new(self), values)
    }
}

pub(crate) fn binary_op_sql(op: BinaryOperator) -> &'static str {
    op.as_sql()
}
