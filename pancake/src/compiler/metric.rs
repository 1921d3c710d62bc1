//! Metric translators. Each metric becomes one or more aggregate columns;
//! every column is null (or zero for counts) over an empty group.

use super::bucket::{format_es_double, with_missing};
use super::layer::{MetricColumn, MetricSlot};
use super::naming::Path;
use super::CompileContext;
use crate::aggregation::{MetricAggregation, MetricField, SimpleMetric};
use crate::schema::FieldClass;
use crate::sql::Expr;
use crate::{Error, Result};

pub(crate) fn translate_metric(
    ctx: &CompileContext<'_>,
    metric: &MetricAggregation,
    path: &Path,
) -> Result<MetricSlot> {
    let columns = match metric {
        MetricAggregation::Simple { function, field } => simple(ctx, *function, field, path)?,
        MetricAggregation::Percentiles {
            field, percents, ..
        } => {
            if percents.iter().any(|p| !(0.0..=100.0).contains(p)) {
                return Err(Error::invalid(path, "percents must be between 0 and 100"));
            }
            let value = metric_value(ctx, field, FieldClass::NumericOrDate, "percentiles", path)?;
            percents
                .iter()
                .map(|p| MetricColumn {
                    expr: Expr::parametric(
                        "quantiles",
                        vec![Expr::raw(format!("{:.6}", p / 100.0))],
                        vec![value.clone()],
                    ),
                    value_name: Some(format_es_double(*p)),
                })
                .collect()
        }
        MetricAggregation::PercentileRanks { field, values, .. } => {
            if values.is_empty() {
                return Err(Error::invalid(path, "percentile_ranks needs at least one value"));
            }
            let value = metric_value(ctx, field, FieldClass::Numeric, "percentile_ranks", path)?;
            values
                .iter()
                .map(|v| MetricColumn {
                    expr: Expr::infix(
                        Expr::infix(
                            Expr::function(
                                "countIf",
                                vec![Expr::infix(value.clone(), "<=", Expr::number(*v))],
                            ),
                            "/",
                            Expr::count_star(),
                        ),
                        "*",
                        Expr::int(100),
                    ),
                    value_name: Some(format_es_double(*v)),
                })
                .collect()
        }
        MetricAggregation::GeoCentroid { field } => {
            let (lat, lon) = geo_columns(ctx, field, "geo_centroid")?;
            vec![
                named("avgOrNull", vec![lat], "lat"),
                named("avgOrNull", vec![lon], "lon"),
                named("count", vec![], "count"),
            ]
        }
        MetricAggregation::GeoBounds { field } => {
            let (lat, lon) = geo_columns(ctx, field, "geo_bounds")?;
            vec![
                named("minOrNull", vec![lon.clone()], "top_left.lon"),
                named("argMinOrNull", vec![lat.clone(), lon.clone()], "top_left.lat"),
                named("maxOrNull", vec![lon.clone()], "bottom_right.lon"),
                named("argMaxOrNull", vec![lat, lon], "bottom_right.lat"),
            ]
        }
        MetricAggregation::TopHits(_) | MetricAggregation::TopMetrics(_) => {
            return Err(Error::unsupported(
                path,
                format!("{} is compiled as its own statement", metric.type_name()),
            ))
        }
    };

    Ok(MetricSlot {
        path: path.clone(),
        base: ctx.names.base(path),
        type_name: metric.type_name(),
        columns,
    })
}

fn named(function: &str, args: Vec<Expr>, value_name: &str) -> MetricColumn {
    MetricColumn {
        expr: Expr::function(function, args),
        value_name: Some(value_name.to_string()),
    }
}

fn single(function: &str, value: Expr) -> Vec<MetricColumn> {
    vec![MetricColumn {
        expr: Expr::function(function, vec![value]),
        value_name: None,
    }]
}

fn metric_value(
    ctx: &CompileContext<'_>,
    field: &MetricField,
    class: FieldClass,
    usage: &str,
    path: &Path,
) -> Result<Expr> {
    let (_, column) = ctx.column(&field.field, class, usage)?;
    with_missing(column, field.missing.as_ref(), path)
}

fn geo_columns(ctx: &CompileContext<'_>, field: &str, usage: &str) -> Result<(Expr, Expr)> {
    let (desc, _) = ctx.column(field, FieldClass::Geo, usage)?;
    Ok((
        Expr::column(desc.lat_column_name()),
        Expr::column(desc.lon_column_name()),
    ))
}

fn simple(
    ctx: &CompileContext<'_>,
    function: SimpleMetric,
    field: &MetricField,
    path: &Path,
) -> Result<Vec<MetricColumn>> {
    let usage = function.type_name();
    let class = match function {
        SimpleMetric::ValueCount | SimpleMetric::Cardinality => FieldClass::Any,
        SimpleMetric::Min | SimpleMetric::Max => FieldClass::NumericOrDate,
        _ => FieldClass::Numeric,
    };
    let value = metric_value(ctx, field, class, usage, path)?;

    Ok(match function {
        SimpleMetric::Avg => single("avgOrNull", value),
        SimpleMetric::Sum => single("sumOrNull", value),
        SimpleMetric::Min => single("minOrNull", value),
        SimpleMetric::Max => single("maxOrNull", value),
        SimpleMetric::ValueCount => single("count", value),
        SimpleMetric::Cardinality => single("uniq", value),
        SimpleMetric::Stats => stats_columns(&value),
        SimpleMetric::ExtendedStats => {
            let mut columns = stats_columns(&value);
            columns.extend([
                named(
                    "sumOrNull",
                    vec![Expr::infix(value.clone(), "*", value.clone())],
                    "sum_of_squares",
                ),
                named("varPopOrNull", vec![value.clone()], "variance"),
                named("varSampOrNull", vec![value.clone()], "variance_sampling"),
                named("stddevPopOrNull", vec![value.clone()], "std_deviation"),
                named("stddevSampOrNull", vec![value], "std_deviation_sampling"),
            ]);
            columns
        }
    })
}

fn stats_columns(value: &Expr) -> Vec<MetricColumn> {
    vec![
        named("count", vec![value.clone()], "count"),
        named("minOrNull", vec![value.clone()], "min"),
        named("maxOrNull", vec![value.clone()], "max"),
        named("avgOrNull", vec![value.clone()], "avg"),
        named("sumOrNull", vec![value.clone()], "sum"),
    ]
}
