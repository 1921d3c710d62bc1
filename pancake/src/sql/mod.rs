//! Minimal SQL expression tree for the ClickHouse dialect.
//!
//! Everything the compiler emits is built from [`Expr`] and
//! [`SelectCommand`] values and rendered through their `Display` impls, so
//! quoting and operator spacing live in exactly one place (`render.rs`).

mod render;
mod select;

pub use render::{quote_identifier, quote_string};
pub use select::{Cte, FromClause, SelectCommand};

/// Infix operators rendered without surrounding spaces.
pub const SYMBOL_OPERATORS: &[&str] = &[
    "=", "==", "!=", "<>", "<", "<=", ">", ">=", "+", "-", "*", "/", "%",
];

/// Full-text pseudo operator understood by the query executor.
pub const MATCH_OPERATOR: &str = "__quesma_match";

/// Column name the executor expands to every full-text field.
pub const FULLTEXT_FIELD: &str = "__quesma_fulltext_field_name";

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// No explicit direction in the rendered SQL.
    Default,
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    /// `Default` sorts ascending in ClickHouse.
    pub fn or_asc(self) -> Self {
        match self {
            Self::Default => Self::Asc,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(expr: Expr, direction: Direction) -> Self {
        Self { expr, direction }
    }

    pub fn asc(expr: Expr) -> Self {
        Self::new(expr, Direction::Asc)
    }

    pub fn desc(expr: Expr) -> Self {
        Self::new(expr, Direction::Desc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A (possibly table-qualified) column or alias reference.
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Literal),
    /// SQL text emitted verbatim.
    Raw(String),
    Star,
    /// `name(args)`, or `name(params)(args)` for parametric aggregates.
    Function {
        name: String,
        params: Vec<Expr>,
        args: Vec<Expr>,
    },
    Infix {
        left: Box<Expr>,
        op: String,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Paren(Box<Expr>),
    Window {
        function: Box<Expr>,
        partition_by: Vec<Expr>,
        order_by: Vec<OrderBy>,
    },
    Alias {
        expr: Box<Expr>,
        alias: String,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(Literal::String(s.into()))
    }

    pub fn int(i: i64) -> Self {
        Self::Literal(Literal::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Self::Literal(Literal::Float(f))
    }

    pub fn bool(b: bool) -> Self {
        Self::Literal(Literal::Bool(b))
    }

    pub fn null() -> Self {
        Self::Literal(Literal::Null)
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// Number literal that renders as an integer when it has no fraction.
    pub fn number(f: f64) -> Self {
        if f.fract() == 0.0 && f.abs() < 9.0e15 {
            Self::int(f as i64)
        } else {
            Self::float(f)
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Function {
            name: name.into(),
            params: Vec::new(),
            args,
        }
    }

    pub fn parametric(name: impl Into<String>, params: Vec<Expr>, args: Vec<Expr>) -> Self {
        Self::Function {
            name: name.into(),
            params,
            args,
        }
    }

    pub fn count_star() -> Self {
        Self::function("count", vec![Self::Star])
    }

    pub fn infix(left: Expr, op: impl Into<String>, right: Expr) -> Self {
        Self::Infix {
            left: Box::new(left),
            op: op.into(),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::infix(left, "==", right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Self::infix(left, "AND", right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::infix(left, "OR", right)
    }

    pub fn is_not_null(expr: Expr) -> Self {
        Self::infix(expr, "IS NOT", Self::null())
    }

    pub fn is_null(expr: Expr) -> Self {
        Self::infix(expr, "IS", Self::null())
    }

    /// Left-folds `exprs` with AND. `None` for an empty list.
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Self::and)
    }

    pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Self::or)
    }

    /// ANDs two optional predicates.
    pub fn and_opt(left: Option<Expr>, right: Option<Expr>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Self::and(l, r)),
            (l, r) => l.or(r),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Self::Not(Box::new(expr))
    }

    pub fn paren(expr: Expr) -> Self {
        Self::Paren(Box::new(expr))
    }

    pub fn window(function: Expr, partition_by: Vec<Expr>, order_by: Vec<OrderBy>) -> Self {
        Self::Window {
            function: Box::new(function),
            partition_by,
            order_by,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        Self::Alias {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }

    /// Strips an outer `AS` so two selects of the same value compare equal.
    pub fn unaliased(&self) -> &Expr {
        match self {
            Self::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    pub fn is_count_star(&self) -> bool {
        matches!(
            self,
            Self::Function { name, params, args }
                if name == "count" && params.is_empty() && matches!(args.as_slice(), [Self::Star])
        )
    }

    /// Unqualified column names referenced anywhere in the expression, in
    /// first-seen order.
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Self::Column { table: None, name } => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Self::Column { .. } | Self::Literal(_) | Self::Raw(_) | Self::Star => {}
            Self::Function { params, args, .. } => {
                for e in params.iter().chain(args) {
                    e.collect_columns(out);
                }
            }
            Self::Infix { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::Not(e) | Self::Paren(e) | Self::Alias { expr: e, .. } => e.collect_columns(out),
            Self::Window {
                function,
                partition_by,
                order_by,
            } => {
                function.collect_columns(out);
                for e in partition_by {
                    e.collect_columns(out);
                }
                for o in order_by {
                    o.expr.collect_columns(out);
                }
            }
        }
    }

    /// Qualifies every bare column reference with `table`.
    pub fn qualify(&self, table: &str) -> Expr {
        match self {
            Self::Column { table: None, name } => Self::qualified(table, name.clone()),
            Self::Function { name, params, args } => Self::Function {
                name: name.clone(),
                params: params.clone(),
                args: args.iter().map(|a| a.qualify(table)).collect(),
            },
            Self::Infix { left, op, right } => Self::Infix {
                left: Box::new(left.qualify(table)),
                op: op.clone(),
                right: Box::new(right.qualify(table)),
            },
            Self::Not(e) => Self::Not(Box::new(e.qualify(table))),
            Self::Paren(e) => Self::Paren(Box::new(e.qualify(table))),
            Self::Alias { expr, alias } => Self::Alias {
                expr: Box::new(expr.qualify(table)),
                alias: alias.clone(),
            },
            Self::Window {
                function,
                partition_by,
                order_by,
            } => Self::Window {
                function: Box::new(function.qualify(table)),
                partition_by: partition_by.iter().map(|e| e.qualify(table)).collect(),
                order_by: order_by
                    .iter()
                    .map(|o| OrderBy::new(o.expr.qualify(table), o.direction))
                    .collect(),
            },
            other => other.clone(),
        }
    }
}

impl From<Literal> for Expr {
    fn from(literal: Literal) -> Self {
        Self::Literal(literal)
    }
}

/// Converts a JSON scalar into a SQL literal.
pub fn literal_from_json(value: &serde_json::Value) -> Option<Expr> {
    use serde_json::Value;
    match value {
        Value::String(s) => Some(Expr::string(s.clone())),
        Value::Bool(b) => Some(Expr::bool(*b)),
        Value::Null => Some(Expr::null()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Expr::int(i))
            } else {
                n.as_f64().map(Expr::float)
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_all_folds_left() {
        let e = Expr::and_all(vec![
            Expr::column("a"),
            Expr::column("b"),
            Expr::column("c"),
        ])
        .unwrap();
        assert_eq!(e.to_string(), r#"(("a" AND "b") AND "c")"#);
    }

    #[test]
    fn test_and_all_empty() {
        assert!(Expr::and_all(Vec::new()).is_none());
    }

    #[test]
    fn test_referenced_columns_dedup() {
        let e = Expr::infix(
            Expr::function("floor", vec![Expr::column("x")]),
            "+",
            Expr::column("x"),
        );
        assert_eq!(e.referenced_columns(), vec!["x".to_string()]);
    }

    #[test]
    fn test_qualify_columns() {
        let e = Expr::eq(Expr::column("host"), Expr::string("a"));
        assert_eq!(e.qualify("hit_table").to_string(), r#""hit_table"."host"=='a'"#);
    }

    #[test]
    fn test_number_literal() {
        assert_eq!(Expr::number(1000.0).to_string(), "1000");
        assert_eq!(Expr::number(-5.5).to_string(), "-5.5");
    }

    #[test]
    fn test_literal_from_json() {
        assert_eq!(
            literal_from_json(&serde_json::json!("x")).unwrap(),
            Expr::string("x")
        );
        assert_eq!(
            literal_from_json(&serde_json::json!(3)).unwrap(),
            Expr::int(3)
        );
        assert!(literal_from_json(&serde_json::json!([1])).is_none());
    }
}
