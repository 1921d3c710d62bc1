use super::{Expr, OrderBy};

/// A single `SELECT` statement, optionally preceded by CTEs.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectCommand {
    pub ctes: Vec<Cte>,
    pub columns: Vec<Expr>,
    pub from: FromClause,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
}

impl SelectCommand {
    pub fn new(columns: Vec<Expr>, from: FromClause) -> Self {
        Self {
            ctes: Vec::new(),
            columns,
            from,
            where_clause: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Empty select over a named table; callers fill in the rest.
    pub fn from_table(table: impl Into<String>) -> Self {
        Self::new(Vec::new(), FromClause::Table(table.into()))
    }

    pub fn into_subquery(self) -> FromClause {
        FromClause::Subquery(Box::new(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub query: SelectCommand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    Table(String),
    Subquery(Box<SelectCommand>),
    Aliased {
        source: Box<FromClause>,
        alias: String,
    },
    LeftJoin {
        left: Box<FromClause>,
        right: Box<FromClause>,
        on: Expr,
    },
}

impl FromClause {
    pub fn aliased(self, alias: impl Into<String>) -> Self {
        Self::Aliased {
            source: Box::new(self),
            alias: alias.into(),
        }
    }
}
