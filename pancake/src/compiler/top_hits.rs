//! `top_hits` and `top_metrics`.
//!
//! Each node gets its own statement: the enclosing buckets' grouping query
//! goes into a CTE, which is left-joined back to the raw table on the bucket
//! key expressions. `ROW_NUMBER()` over each group then picks the first
//! `size` hits by the requested sort.

use super::bucket::checked_size;
use super::generate::generate;
use super::layer::{PancakeModel, TopHitsSlot};
use super::naming::{
    top_hits_alias, top_metrics_alias, Path, TOP_HITS_GROUP_TABLE, TOP_HITS_JOIN,
    TOP_HITS_RANK_ALIAS,
};
use super::output::{ColumnMeta, ColumnRole};
use super::CompileContext;
use crate::aggregation::{MetricAggregation, SortField};
use crate::schema::FieldClass;
use crate::sql::{Cte, Expr, FromClause, OrderBy, SelectCommand};
use crate::{Error, Result};
use tracing::warn;

const GROUP_ALIAS: &str = "group_table";
const HIT_ALIAS: &str = "hit_table";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopKind {
    Hits,
    Metrics,
}

#[derive(Debug, Clone)]
pub struct AuxiliaryQuerySpec {
    pub kind: TopKind,
    /// Source field of each selected column.
    pub fields: Vec<String>,
    pub columns: Vec<Expr>,
    pub sort: Vec<OrderBy>,
    pub size: usize,
}

fn sort_exprs(ctx: &CompileContext<'_>, sort: &[SortField]) -> Result<Vec<OrderBy>> {
    let mut out = Vec::new();
    for s in sort {
        if s.field == "_score" || s.field == "_doc" {
            warn!(field = %s.field, "sorting hits by relevance is not supported; ignored");
            continue;
        }
        let (_, column) = ctx.column(&s.field, FieldClass::Any, "sort")?;
        out.push(OrderBy::new(column, s.direction.or_asc()));
    }
    Ok(out)
}

pub(crate) fn translate_top(
    ctx: &CompileContext<'_>,
    metric: &MetricAggregation,
    path: &Path,
) -> Result<AuxiliaryQuerySpec> {
    let (kind, requested, sort, size) = match metric {
        MetricAggregation::TopHits(t) => {
            let fields = if t.fields.is_empty() {
                ctx.schema.field_names()
            } else {
                t.fields.clone()
            };
            if fields.is_empty() {
                return Err(Error::invalid(
                    path,
                    "top_hits needs _source.includes when the table has no declared fields",
                ));
            }
            (TopKind::Hits, fields, &t.sort, t.size.unwrap_or(ctx.config.default_top_hits_size))
        }
        MetricAggregation::TopMetrics(t) => {
            if t.metrics.is_empty() {
                return Err(Error::invalid(path, "top_metrics needs at least one metric field"));
            }
            if t.sort.is_empty() {
                return Err(Error::invalid(path, "top_metrics needs a sort"));
            }
            // the sort value is reported next to the metrics
            let mut fields = t.metrics.clone();
            fields.extend(t.sort.iter().map(|s| s.field.clone()));
            (TopKind::Metrics, fields, &t.sort, t.size.unwrap_or(1))
        }
        other => {
            return Err(Error::unsupported(
                path,
                format!("{} is not a hits aggregation", other.type_name()),
            ))
        }
    };
    let size = checked_size(size, path)?;

    let mut fields = Vec::new();
    let mut columns = Vec::new();
    for name in requested {
        let field = ctx.schema.resolve(&name)?;
        if field.field_type.is_geo() {
            fields.push(format!("{name}.lat"));
            columns.push(Expr::column(field.lat_column_name()));
            fields.push(format!("{name}.lon"));
            columns.push(Expr::column(field.lon_column_name()));
        } else {
            columns.push(Expr::column(field.column_name()));
            fields.push(name);
        }
    }

    Ok(AuxiliaryQuerySpec {
        kind,
        fields,
        columns,
        sort: sort_exprs(ctx, sort)?,
        size,
    })
}

/// Builds the statement answering `top` for the buckets of `model`.
pub(crate) fn top_hits_statement(
    model: &PancakeModel,
    top: &TopHitsSlot,
    table: &str,
) -> Result<(SelectCommand, Vec<ColumnMeta>)> {
    let spec = &top.spec;
    let alias = |i: usize| match spec.kind {
        TopKind::Hits => top_hits_alias(&top.base, i),
        TopKind::Metrics => top_metrics_alias(&top.base, i),
    };
    let mut hit_metas: Vec<ColumnMeta> = spec
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| ColumnMeta {
            alias: alias(i),
            path: top.path.clone(),
            role: ColumnRole::TopHits(i),
            value_name: Some(field.clone()),
            groups: Vec::new(),
        })
        .collect();

    let group = generate(model, table, true)?;
    let on = Expr::and_all(group.group_keys.iter().map(|(key, expr)| {
        Expr::infix(Expr::qualified(GROUP_ALIAS, key.clone()), "=", expr.qualify(HIT_ALIAS))
    }));
    let Some(on) = on else {
        // no enclosing buckets: plain sorted select
        let select = SelectCommand {
            columns: spec
                .columns
                .iter()
                .enumerate()
                .map(|(i, c)| c.clone().alias(alias(i)))
                .collect(),
            where_clause: model.where_clause.clone(),
            order_by: spec.sort.clone(),
            limit: Some(spec.size),
            ..SelectCommand::from_table(table)
        };
        return Ok((select, hit_metas));
    };

    let mut join_columns: Vec<Expr> = group
        .columns
        .iter()
        .map(|c| Expr::qualified(GROUP_ALIAS, c.alias.clone()).alias(c.alias.clone()))
        .collect();
    join_columns.extend(
        spec.columns
            .iter()
            .enumerate()
            .map(|(i, c)| c.qualify(HIT_ALIAS).alias(alias(i))),
    );
    join_columns.push(
        Expr::window(
            Expr::function("ROW_NUMBER", vec![]),
            group
                .group_keys
                .iter()
                .map(|(key, _)| Expr::qualified(GROUP_ALIAS, key.clone()))
                .collect(),
            spec.sort
                .iter()
                .map(|o| OrderBy::new(o.expr.qualify(HIT_ALIAS), o.direction))
                .collect(),
        )
        .alias(TOP_HITS_RANK_ALIAS),
    );
    let join = SelectCommand {
        columns: join_columns,
        where_clause: model.where_clause.as_ref().map(|w| w.qualify(HIT_ALIAS)),
        ..SelectCommand::new(
            Vec::new(),
            FromClause::LeftJoin {
                left: Box::new(FromClause::Table(TOP_HITS_GROUP_TABLE.to_string()).aliased(GROUP_ALIAS)),
                right: Box::new(FromClause::Table(table.to_string()).aliased(HIT_ALIAS)),
                on,
            },
        )
    };

    let mut metas: Vec<ColumnMeta> = group
        .columns
        .into_iter()
        .filter(|c| c.role != ColumnRole::Rank)
        .collect();
    let mut columns: Vec<Expr> = metas.iter().map(|c| Expr::column(c.alias.clone())).collect();
    columns.extend(hit_metas.iter().map(|c| Expr::column(c.alias.clone())));
    columns.push(Expr::column(TOP_HITS_RANK_ALIAS));

    let mut order_by = if group.rank_aliases.is_empty() {
        group.final_order
    } else {
        group
            .rank_aliases
            .iter()
            .map(|r| OrderBy::asc(Expr::column(r.clone())))
            .collect()
    };
    order_by.push(OrderBy::asc(Expr::column(TOP_HITS_RANK_ALIAS)));

    let select = SelectCommand {
        ctes: vec![
            Cte {
                name: TOP_HITS_GROUP_TABLE.to_string(),
                query: group.select,
            },
            Cte {
                name: TOP_HITS_JOIN.to_string(),
                query: join,
            },
        ],
        columns,
        where_clause: Some(Expr::infix(
            Expr::column(TOP_HITS_RANK_ALIAS),
            "<=",
            Expr::int(i64::try_from(spec.size).unwrap_or(i64::MAX)),
        )),
        order_by,
        ..SelectCommand::from_table(TOP_HITS_JOIN)
    };

    metas.append(&mut hit_metas);
    metas.push(ColumnMeta {
        alias: TOP_HITS_RANK_ALIAS.to_string(),
        path: top.path.clone(),
        role: ColumnRole::TopHitsRank,
        value_name: None,
        groups: Vec::new(),
    });
    Ok((select, metas))
}
