//! SQL generation for one pancake.
//!
//! Columns are emitted layer by layer: a layer's metrics first, then its
//! bucket's key, count and ordering columns. Values of a level that sits
//! above a finer `GROUP BY` are re-aggregated with window functions over
//! that level's keys. With more than one grouped level the select is
//! wrapped twice: once to compute a `dense_rank()` per level, once to prune
//! and order by those ranks.

use super::combinator::{apply_condition, window_aggregate};
use super::layer::{
    BucketSlot, BucketSql, CombinatorGroup, GroupedBucket, MetricSlot, OrderTarget, PancakeModel,
    RangeEdge,
};
use super::naming::{
    count_alias, key_alias, metric_alias, order_alias, parent_count_alias, range_from_alias,
    range_to_alias, rank_alias, Path, TOTAL_COUNT_ALIAS,
};
use super::output::{ColumnMeta, ColumnRole};
use super::pipeline::{bucket_script_column, resolve_in_model};
use crate::sql::{Direction, Expr, FromClause, OrderBy, SelectCommand};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct SelectColumn {
    expr: Expr,
    meta: ColumnMeta,
    /// Grouping keys are shared by every combinator group.
    group_key: bool,
    /// Row-independent values are shared too, and never made conditional.
    constant: bool,
}

impl SelectColumn {
    fn new(expr: Expr, alias: String, path: &Path, role: ColumnRole) -> Self {
        Self {
            expr,
            meta: ColumnMeta {
                alias,
                path: path.clone(),
                role,
                value_name: None,
                groups: Vec::new(),
            },
            group_key: false,
            constant: false,
        }
    }
}

#[derive(Debug, Clone)]
struct RankSpec {
    alias: String,
    path: Path,
    partition_by: Vec<String>,
    order_by: Vec<(String, Direction)>,
    /// Highest rank kept: the requested size plus one extra bucket.
    limit: Option<usize>,
}

impl RankSpec {
    fn order_exprs(&self) -> Vec<OrderBy> {
        self.order_by
            .iter()
            .map(|(alias, direction)| OrderBy::new(Expr::column(alias.clone()), *direction))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GeneratedQuery {
    pub select: SelectCommand,
    pub columns: Vec<ColumnMeta>,
    /// Grouping key aliases and the expressions they were computed from.
    pub group_keys: Vec<(String, Expr)>,
    /// Rank aliases, outermost level first. Empty in the single-level form.
    pub rank_aliases: Vec<String>,
    pub final_order: Vec<OrderBy>,
}

fn sum_of_counts(partition: &[String]) -> Expr {
    Expr::window(
        Expr::function("sum", vec![Expr::count_star()]),
        partition.iter().map(Expr::column).collect(),
        Vec::new(),
    )
}

/// Document count of a bucket; windowed when finer groups follow.
fn bucket_count(deeper_groups: bool, partition: &[String]) -> Expr {
    if deeper_groups {
        sum_of_counts(partition)
    } else {
        Expr::count_star()
    }
}

/// Resolves a grouped bucket's ordering rule to column aliases, adding an
/// `order_N` column when a sub-aggregation value is not otherwise selected.
/// Own keys are appended ascending as the tie-break.
fn bucket_ordering(
    model: &PancakeModel,
    layer: usize,
    bucket: &BucketSlot,
    grouped: &GroupedBucket,
    partition: &[String],
    windowed: bool,
    columns: &mut Vec<SelectColumn>,
) -> Result<Vec<(String, Direction)>> {
    let mut order: Vec<(String, Direction)> = Vec::new();
    for (n, ordering) in grouped.order.iter().enumerate() {
        let alias = match &ordering.target {
            OrderTarget::Key(k) => key_alias(&bucket.base, *k),
            OrderTarget::Count => count_alias(&bucket.base),
            OrderTarget::Metric { reference, fallback } => {
                match (resolve_in_model(model, layer + 1, reference, &bucket.path), fallback) {
                    (Ok(alias), _) => alias,
                    (Err(Error::UnresolvableBucketsPath { .. }), Some(fallback)) => {
                        let alias = order_alias(&bucket.base, grouped.keys.len() + n);
                        let expr = if windowed {
                            window_aggregate(fallback, &partition.iter().map(Expr::column).collect::<Vec<_>>())
                        } else {
                            fallback.clone()
                        };
                        columns.push(SelectColumn::new(
                            expr,
                            alias.clone(),
                            &bucket.path,
                            ColumnRole::OrderBy(n),
                        ));
                        alias
                    }
                    (Err(e), _) => return Err(e),
                }
            }
        };
        if !order.iter().any(|(a, _)| a == &alias) {
            order.push((alias, ordering.direction.or_asc()));
        }
    }
    for k in 0..grouped.keys.len() {
        let alias = key_alias(&bucket.base, k);
        if !order.iter().any(|(a, _)| a == &alias) {
            order.push((alias, Direction::Asc));
        }
    }
    Ok(order)
}

/// Splits every column from `start` on into one conditional copy per
/// group; grouping keys and constants stay shared.
fn apply_combinator(columns: &mut Vec<SelectColumn>, start: usize, groups: &[CombinatorGroup]) {
    let tail = columns.split_off(start);
    let (keys, values): (Vec<_>, Vec<_>) = tail.into_iter().partition(|c| c.group_key || c.constant);
    columns.extend(keys);
    for group in groups {
        for column in &values {
            let mut meta = column.meta.clone();
            meta.alias = format!("{}{}", group.prefix, meta.alias);
            meta.groups.insert(0, group.label.clone());
            columns.push(SelectColumn {
                expr: apply_condition(&column.expr, &group.predicate),
                meta,
                group_key: false,
                constant: false,
            });
        }
    }
}

/// Row source with the sampler's row cap applied, and the `WHERE` left for
/// the grouping select.
fn row_source(
    table: &str,
    sample_limit: Option<usize>,
    where_clause: Option<Expr>,
    columns: &[SelectColumn],
    group_by: &[Expr],
) -> (FromClause, Option<Expr>) {
    let Some(limit) = sample_limit else {
        return (FromClause::Table(table.to_string()), where_clause);
    };
    let mut referenced: Vec<String> = Vec::new();
    for expr in columns.iter().map(|c| &c.expr).chain(group_by) {
        for name in expr.referenced_columns() {
            if !referenced.contains(&name) {
                referenced.push(name);
            }
        }
    }
    let projection = if referenced.is_empty() {
        vec![Expr::Star]
    } else {
        referenced.into_iter().map(Expr::column).collect()
    };
    let sample = SelectCommand {
        columns: projection,
        where_clause,
        limit: Some(limit),
        ..SelectCommand::from_table(table)
    };
    (sample.into_subquery(), None)
}

/// Builds the statement for one pancake. `keep_ranks` also outputs the
/// per-level rank columns, which the top-hits join reuses for ordering.
pub(crate) fn generate(model: &PancakeModel, table: &str, keep_ranks: bool) -> Result<GeneratedQuery> {
    let moved = model.filter_moves_to_where();
    let grouped_from = |i: usize| {
        model
            .layers
            .iter()
            .skip(i)
            .any(|l| l.bucket.as_ref().is_some_and(BucketSlot::has_group_by))
    };

    let mut columns: Vec<SelectColumn> = Vec::new();
    let mut group_by: Vec<Expr> = Vec::new();
    let mut partition: Vec<String> = Vec::new();
    let mut ranks: Vec<RankSpec> = Vec::new();
    let mut combinators: Vec<(usize, &[CombinatorGroup])> = Vec::new();
    let mut after: Option<Expr> = None;

    for (i, layer) in model.layers.iter().enumerate() {
        if grouped_from(i) {
            let partition_exprs: Vec<Expr> = partition.iter().map(Expr::column).collect();
            for metric in &layer.metrics {
                for (j, column) in metric.columns.iter().enumerate() {
                    columns.push(metric_column(metric, j, window_aggregate(&column.expr, &partition_exprs), column.value_name.clone()));
                }
            }
        } else {
            for metric in &layer.metrics {
                for (j, column) in metric.columns.iter().enumerate() {
                    columns.push(metric_column(metric, j, column.expr.clone(), column.value_name.clone()));
                }
            }
        }

        let Some(bucket) = &layer.bucket else {
            continue;
        };
        let deeper_groups = grouped_from(i + 1);
        let start = columns.len();

        match &bucket.sql {
            BucketSql::Grouped(grouped) => {
                if grouped.parent_count {
                    columns.push(SelectColumn::new(
                        sum_of_counts(&partition),
                        parent_count_alias(&bucket.base),
                        &bucket.path,
                        ColumnRole::ParentCount,
                    ));
                }
                let parent_partition = partition.clone();
                for (k, key) in grouped.keys.iter().enumerate() {
                    let alias = key_alias(&bucket.base, k);
                    group_by.push(key.clone().alias(alias.clone()));
                    let mut column = SelectColumn::new(key.clone(), alias.clone(), &bucket.path, ColumnRole::Key(k));
                    column.group_key = true;
                    columns.push(column);
                    partition.push(alias);
                }
                columns.push(SelectColumn::new(
                    bucket_count(deeper_groups, &partition),
                    count_alias(&bucket.base),
                    &bucket.path,
                    ColumnRole::Count,
                ));
                let order_by = bucket_ordering(model, i, bucket, grouped, &partition, deeper_groups, &mut columns)?;
                ranks.push(RankSpec {
                    alias: rank_alias(&bucket.base),
                    path: bucket.path.clone(),
                    partition_by: parent_partition,
                    order_by,
                    limit: grouped.limit.map(|l| l.saturating_add(1)),
                });
                if let Some(predicate) = &grouped.after {
                    if ranks.len() > 1 {
                        return Err(Error::unsupported(
                            &bucket.path,
                            "composite with an after key nested in another multi-bucket aggregation",
                        ));
                    }
                    after = Some(predicate.clone());
                }
            }
            BucketSql::Combinator { groups, .. } => {
                columns.push(SelectColumn::new(
                    bucket_count(deeper_groups, &partition),
                    count_alias(&bucket.base),
                    &bucket.path,
                    ColumnRole::Count,
                ));
                columns.extend(range_bound_columns(bucket, groups));
                if !(i == 0 && moved) {
                    combinators.push((start, groups.as_slice()));
                }
            }
            BucketSql::Sampler(_) | BucketSql::Ungrouped => {
                columns.push(SelectColumn::new(
                    bucket_count(deeper_groups, &partition),
                    count_alias(&bucket.base),
                    &bucket.path,
                    ColumnRole::Count,
                ));
            }
        }
    }

    let mut pipelines = Vec::new();
    for (i, layer) in model.layers.iter().enumerate() {
        for slot in &layer.pipelines {
            if let Some(expr) = bucket_script_column(model, i, slot)? {
                let column = SelectColumn::new(expr, metric_alias(&slot.base, 0), &slot.path, ColumnRole::Pipeline);
                pipelines.push(column);
            }
        }
    }

    for (start, groups) in combinators.into_iter().rev() {
        apply_combinator(&mut columns, start, groups);
    }

    let group_keys = columns
        .iter()
        .filter(|c| c.group_key)
        .map(|c| (c.meta.alias.clone(), c.expr.clone()))
        .collect();
    let aliases: Vec<Expr> = columns
        .iter()
        .map(|c| Expr::column(c.meta.alias.clone()))
        .collect();
    let mut metas: Vec<ColumnMeta> = columns.iter().map(|c| c.meta.clone()).collect();

    let where_clause = Expr::and_opt(model.where_clause.clone(), after);
    let (from, where_clause) = row_source(table, model.sample_limit, where_clause, &columns, &group_by);
    let grouping = SelectCommand {
        columns: columns
            .into_iter()
            .map(|c| c.expr.alias(c.meta.alias))
            .collect(),
        where_clause,
        group_by,
        ..SelectCommand::new(Vec::new(), from)
    };

    let (mut select, final_order, rank_aliases) = if ranks.len() <= 1 {
        let mut select = grouping;
        if let Some(rank) = ranks.first() {
            select.order_by = rank.order_exprs();
            select.limit = rank.limit;
        }
        let order = select.order_by.clone();
        (select, order, Vec::new())
    } else {
        let mut ranked = aliases.clone();
        ranked.extend(ranks.iter().map(|r| {
            Expr::window(
                Expr::function("dense_rank", vec![]),
                r.partition_by.iter().map(Expr::column).collect(),
                r.order_exprs(),
            )
            .alias(r.alias.clone())
        }));
        let ranked = SelectCommand::new(ranked, grouping.into_subquery());

        let mut outer_columns = aliases.clone();
        if keep_ranks {
            for r in &ranks {
                outer_columns.push(Expr::column(r.alias.clone()));
                metas.push(ColumnMeta {
                    alias: r.alias.clone(),
                    path: r.path.clone(),
                    role: ColumnRole::Rank,
                    value_name: None,
                    groups: Vec::new(),
                });
            }
        }
        let prune = Expr::and_all(ranks.iter().filter_map(|r| {
            r.limit
                .map(|limit| {
                    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
                    Expr::infix(Expr::column(r.alias.clone()), "<=", Expr::int(limit))
                })
        }));
        let order: Vec<OrderBy> = ranks
            .iter()
            .map(|r| OrderBy::asc(Expr::column(r.alias.clone())))
            .collect();
        let outer = SelectCommand {
            columns: outer_columns,
            where_clause: prune,
            order_by: order.clone(),
            ..SelectCommand::new(Vec::new(), ranked.into_subquery())
        };
        (outer, order, ranks.iter().map(|r| r.alias.clone()).collect())
    };

    if !pipelines.is_empty() {
        let scripted = pipelines
            .iter()
            .map(|p| p.expr.clone().alias(p.meta.alias.clone()));
        if rank_aliases.is_empty() {
            let mut wrapped = aliases;
            wrapped.extend(scripted);
            select = SelectCommand {
                columns: wrapped,
                order_by: final_order.clone(),
                ..SelectCommand::new(Vec::new(), select.into_subquery())
            };
        } else {
            select.columns.extend(scripted);
        }
        metas.extend(pipelines.into_iter().map(|p| p.meta));
    }

    Ok(GeneratedQuery {
        select,
        columns: metas,
        group_keys,
        rank_aliases,
        final_order,
    })
}

/// `date_range` bounds as epoch millis, evaluated once per statement.
fn range_bound_columns(bucket: &BucketSlot, groups: &[CombinatorGroup]) -> Vec<SelectColumn> {
    let mut columns = Vec::new();
    for (i, group) in groups.iter().enumerate() {
        for (edge, bound) in &group.bounds {
            let (alias, role) = match edge {
                RangeEdge::From => (range_from_alias(&bucket.base, i), ColumnRole::RangeFrom(i)),
                RangeEdge::To => (range_to_alias(&bucket.base, i), ColumnRole::RangeTo(i)),
            };
            let millis = Expr::function(
                "toUnixTimestamp64Milli",
                vec![Expr::function("toDateTime64", vec![bound.clone(), Expr::int(3)])],
            );
            let mut column = SelectColumn::new(millis, alias, &bucket.path, role);
            column.constant = true;
            columns.push(column);
        }
    }
    columns
}

fn metric_column(
    metric: &MetricSlot,
    index: usize,
    expr: Expr,
    value_name: Option<String>,
) -> SelectColumn {
    let (alias, role) = if metric.path.is_root() {
        (TOTAL_COUNT_ALIAS.to_string(), ColumnRole::TotalCount)
    } else {
        (metric_alias(&metric.base, index), ColumnRole::Metric(index))
    };
    let mut column = SelectColumn::new(expr, alias, &metric.path, role);
    column.meta.value_name = value_name;
    column
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::layer::{
        BucketOrdering, CombinatorKind, MetricColumn, PancakeKind, PancakeLayer,
    };

    fn terms_slot(name: &[&str], field: &str, size: usize) -> BucketSlot {
        let path = Path::new(name.iter().copied());
        BucketSlot {
            base: path.segments().join("__"),
            path,
            type_name: "terms",
            sql: BucketSql::Grouped(GroupedBucket {
                keys: vec![Expr::column(field)],
                order: vec![BucketOrdering {
                    target: OrderTarget::Count,
                    direction: Direction::Desc,
                }],
                limit: Some(size),
                parent_count: true,
                after: None,
            }),
        }
    }

    fn avg_slot(name: &[&str], field: &str) -> MetricSlot {
        let path = Path::new(name.iter().copied());
        MetricSlot {
            base: path.segments().join("__"),
            path,
            type_name: "avg",
            columns: vec![MetricColumn {
                expr: Expr::function("avgOrNull", vec![Expr::column(field)]),
                value_name: None,
            }],
        }
    }

    fn model(layers: Vec<PancakeLayer>) -> PancakeModel {
        PancakeModel {
            kind: PancakeKind::Main,
            layers,
            where_clause: None,
            sample_limit: None,
            top: None,
        }
    }

    fn bucket_layer(bucket: BucketSlot) -> PancakeLayer {
        PancakeLayer {
            bucket: Some(bucket),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_terms_uses_order_by_limit() {
        let m = model(vec![bucket_layer(terms_slot(&["0"], "DestWeather", 2)), PancakeLayer::default()]);
        let q = generate(&m, "flights", false).unwrap();
        assert_eq!(
            q.select.to_string(),
            concat!(
                r#"SELECT sum(count(*)) OVER () AS "aggr__0__parent_count", "DestWeather" AS "aggr__0__key_0", "#,
                r#"count(*) AS "aggr__0__count" FROM flights GROUP BY "DestWeather" AS "aggr__0__key_0" "#,
                r#"ORDER BY "aggr__0__count" DESC, "aggr__0__key_0" ASC LIMIT 3"#
            )
        );
        assert!(q.rank_aliases.is_empty());
        assert_eq!(q.columns[1].role, ColumnRole::Key(0));
    }

    #[test]
    fn test_nested_terms_are_ranked() {
        let m = model(vec![
            bucket_layer(terms_slot(&["2"], "a", 10)),
            bucket_layer(terms_slot(&["2", "8"], "b", 5)),
            PancakeLayer::default(),
        ]);
        let sql = generate(&m, "t", false).unwrap().select.to_string();
        assert!(sql.contains(
            r#"dense_rank() OVER (ORDER BY "aggr__2__count" DESC, "aggr__2__key_0" ASC) AS "aggr__2__order_1_rank""#
        ));
        assert!(sql.contains(
            r#"dense_rank() OVER (PARTITION BY "aggr__2__key_0" ORDER BY "aggr__2__8__count" DESC, "aggr__2__8__key_0" ASC) AS "aggr__2__8__order_1_rank""#
        ));
        assert!(sql.contains(r#"WHERE ("aggr__2__order_1_rank"<=11 AND "aggr__2__8__order_1_rank"<=6)"#));
        assert!(sql.ends_with(r#"ORDER BY "aggr__2__order_1_rank" ASC, "aggr__2__8__order_1_rank" ASC"#));
        assert!(sql.contains(r#"sum(count(*)) OVER (PARTITION BY "aggr__2__key_0") AS "aggr__2__count""#));
    }

    #[test]
    fn test_metric_above_finer_grouping_is_windowed() {
        let m = model(vec![
            bucket_layer(terms_slot(&["2"], "a", 10)),
            PancakeLayer {
                metrics: vec![avg_slot(&["2", "1"], "x")],
                bucket: Some(terms_slot(&["2", "8"], "b", 5)),
                ..Default::default()
            },
            PancakeLayer::default(),
        ]);
        let sql = generate(&m, "t", false).unwrap().select.to_string();
        assert!(sql.contains(
            r#"avgOrNullMerge(avgOrNullState("x")) OVER (PARTITION BY "aggr__2__key_0") AS "metric__2__1_col_0""#
        ));
    }

    #[test]
    fn test_order_by_metric_resolves_to_its_alias() {
        let mut bucket = terms_slot(&["2"], "a", 10);
        if let BucketSql::Grouped(g) = &mut bucket.sql {
            g.order = vec![BucketOrdering {
                target: OrderTarget::Metric {
                    reference: "1".into(),
                    fallback: None,
                },
                direction: Direction::Desc,
            }];
        }
        let m = model(vec![
            bucket_layer(bucket),
            PancakeLayer {
                metrics: vec![avg_slot(&["2", "1"], "x")],
                ..Default::default()
            },
        ]);
        let sql = generate(&m, "t", false).unwrap().select.to_string();
        assert!(sql.ends_with(r#"ORDER BY "metric__2__1_col_0" DESC, "aggr__2__key_0" ASC LIMIT 11"#));
    }

    #[test]
    fn test_unresolvable_order_path() {
        let mut bucket = terms_slot(&["2"], "a", 10);
        if let BucketSql::Grouped(g) = &mut bucket.sql {
            g.order = vec![BucketOrdering {
                target: OrderTarget::Metric {
                    reference: "nope".into(),
                    fallback: None,
                },
                direction: Direction::Desc,
            }];
        }
        let m = model(vec![bucket_layer(bucket), PancakeLayer::default()]);
        assert!(matches!(
            generate(&m, "t", false),
            Err(Error::UnresolvableBucketsPath { .. })
        ));
    }

    #[test]
    fn test_filters_duplicate_columns_per_group() {
        let filters = BucketSlot {
            path: Path::new(["f"]),
            base: "f".into(),
            type_name: "filters",
            sql: BucketSql::Combinator {
                kind: CombinatorKind::Filters,
                groups: vec![
                    CombinatorGroup {
                        prefix: "filter_0__".into(),
                        label: "a".into(),
                        predicate: Expr::eq(Expr::column("h"), Expr::string("a")),
                        bounds: Vec::new(),
                    },
                    CombinatorGroup {
                        prefix: "filter_1__".into(),
                        label: "b".into(),
                        predicate: Expr::eq(Expr::column("h"), Expr::string("b")),
                        bounds: Vec::new(),
                    },
                ],
            },
        };
        let m = model(vec![
            PancakeLayer {
                metrics: vec![avg_slot(&["m"], "x")],
                bucket: Some(filters),
                ..Default::default()
            },
            PancakeLayer {
                metrics: vec![avg_slot(&["f", "1"], "x")],
                ..Default::default()
            },
        ]);
        let q = generate(&m, "t", false).unwrap();
        assert_eq!(
            q.select.to_string(),
            concat!(
                r#"SELECT avgOrNull("x") AS "metric__m_col_0", "#,
                r#"countIf("h"=='a') AS "filter_0__aggr__f__count", avgIfOrNull("x", "h"=='a') AS "filter_0__metric__f__1_col_0", "#,
                r#"countIf("h"=='b') AS "filter_1__aggr__f__count", avgIfOrNull("x", "h"=='b') AS "filter_1__metric__f__1_col_0" "#,
                r#"FROM t"#
            )
        );
        assert_eq!(q.columns[1].groups, vec!["a".to_string()]);
    }

    #[test]
    fn test_date_range_bounds_are_shared() {
        let ranges = BucketSlot {
            path: Path::new(["d"]),
            base: "d".into(),
            type_name: "date_range",
            sql: BucketSql::Combinator {
                kind: CombinatorKind::Range,
                groups: vec![CombinatorGroup {
                    prefix: "range_0__".into(),
                    label: "range_0".into(),
                    predicate: Expr::infix(Expr::column("ts"), ">=", Expr::raw("now()")),
                    bounds: vec![(RangeEdge::From, Expr::raw("now()"))],
                }],
            },
        };
        let m = model(vec![bucket_layer(ranges), PancakeLayer::default()]);
        let q = generate(&m, "t", false).unwrap();
        assert_eq!(
            q.select.to_string(),
            concat!(
                r#"SELECT toUnixTimestamp64Milli(toDateTime64(now(), 3)) AS "aggr__d__range_0_from", "#,
                r#"countIf("ts">=now()) AS "range_0__aggr__d__count" FROM t"#
            )
        );
        assert_eq!(q.columns[0].role, ColumnRole::RangeFrom(0));
        assert!(q.columns[0].groups.is_empty());
    }

    #[test]
    fn test_sampler_wraps_source() {
        let sampler = BucketSlot {
            path: Path::new(["s"]),
            base: "s".into(),
            type_name: "sampler",
            sql: BucketSql::Sampler(100),
        };
        let mut m = model(vec![
            bucket_layer(sampler),
            PancakeLayer {
                metrics: vec![avg_slot(&["s", "a"], "x")],
                ..Default::default()
            },
        ]);
        m.sample_limit = Some(100);
        m.where_clause = Some(Expr::infix(Expr::column("y"), ">", Expr::int(1)));
        let sql = generate(&m, "t", false).unwrap().select.to_string();
        assert_eq!(
            sql,
            r#"SELECT count(*) AS "aggr__s__count", avgOrNull("x") AS "metric__s__a_col_0" FROM (SELECT "x" FROM t WHERE "y">1 LIMIT 100)"#
        );
    }
}
