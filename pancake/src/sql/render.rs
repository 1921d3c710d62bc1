use super::{Cte, Direction, Expr, FromClause, Literal, OrderBy, SelectCommand, SYMBOL_OPERATORS};
use std::fmt::{self, Display, Formatter, Write};

/// Double-quotes an identifier, escaping embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Single-quotes a string literal.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn write_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => f.write_str(&quote_string(s)),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Null => f.write_str("NULL"),
        }
    }
}

impl Display for OrderBy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        match self.direction {
            Direction::Default => Ok(()),
            Direction::Asc => f.write_str(" ASC"),
            Direction::Desc => f.write_str(" DESC"),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table, name } => {
                if let Some(table) = table {
                    write!(f, "{}.", quote_identifier(table))?;
                }
                f.write_str(&quote_identifier(name))
            }
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Raw(sql) => f.write_str(sql),
            Expr::Star => f.write_char('*'),
            Expr::Function { name, params, args } => {
                f.write_str(name)?;
                if !params.is_empty() {
                    f.write_char('(')?;
                    write_list(f, params)?;
                    f.write_char(')')?;
                }
                f.write_char('(')?;
                write_list(f, args)?;
                f.write_char(')')
            }
            Expr::Infix { left, op, right } => {
                if op == "AND" || op == "OR" {
                    write!(f, "({left} {op} {right})")
                } else if SYMBOL_OPERATORS.contains(&op.as_str()) {
                    write!(f, "{left}{op}{right}")
                } else {
                    write!(f, "{left} {op} {right}")
                }
            }
            Expr::Not(e) => write!(f, "NOT ({e})"),
            Expr::Paren(e) => write!(f, "({e})"),
            Expr::Window {
                function,
                partition_by,
                order_by,
            } => {
                write!(f, "{function} OVER (")?;
                if !partition_by.is_empty() {
                    f.write_str("PARTITION BY ")?;
                    write_list(f, partition_by)?;
                }
                if !order_by.is_empty() {
                    if !partition_by.is_empty() {
                        f.write_char(' ')?;
                    }
                    f.write_str("ORDER BY ")?;
                    write_list(f, order_by)?;
                }
                f.write_char(')')
            }
            Expr::Alias { expr, alias } => write!(f, "{expr} AS {}", quote_identifier(alias)),
        }
    }
}

impl Display for FromClause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FromClause::Table(name) => {
                if is_plain_identifier(name) {
                    f.write_str(name)
                } else {
                    f.write_str(&quote_identifier(name))
                }
            }
            FromClause::Subquery(select) => write!(f, "({select})"),
            FromClause::Aliased { source, alias } => {
                write!(f, "{source} AS {}", quote_identifier(alias))
            }
            FromClause::LeftJoin { left, right, on } => {
                let on = on.to_string();
                if on.starts_with('(') && on.ends_with(')') {
                    write!(f, "{left} LEFT OUTER JOIN {right} ON {on}")
                } else {
                    write!(f, "{left} LEFT OUTER JOIN {right} ON ({on})")
                }
            }
        }
    }
}

impl Display for Cte {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} AS ({})", self.name, self.query)
    }
}

impl Display for SelectCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if !self.ctes.is_empty() {
            f.write_str("WITH ")?;
            for (i, cte) in self.ctes.iter().enumerate() {
                if i > 0 {
                    f.write_str(" , ")?;
                }
                write!(f, "{cte}")?;
            }
            f.write_char(' ')?;
        }
        f.write_str("SELECT ")?;
        write_list(f, &self.columns)?;
        write!(f, " FROM {}", self.from)?;
        if let Some(w) = &self.where_clause {
            write!(f, " WHERE {w}")?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            write_list(f, &self.group_by)?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            write_list(f, &self.order_by)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}
