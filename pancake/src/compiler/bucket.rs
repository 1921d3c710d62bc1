//! Bucket translators: one aggregation node to one [`BucketSlot`].

use super::layer::{
    BucketOrdering, BucketSlot, BucketSql, CombinatorGroup, CombinatorKind, GroupedBucket,
    OrderTarget, RangeEdge,
};
use super::metric::translate_metric;
use super::naming::{filter_group_prefix, range_group_prefix, Path};
use super::CompileContext;
use crate::aggregation::{
    choose_auto_interval, AggregationNode, AutoDateHistogram, BucketAggregation, BucketOrder,
    CalendarUnit, Composite, CompositeSourceKind, DateHistogram, DateInterval, DateRange,
    Filters, GeotileGrid, Histogram, IpPrefix, IpRange, IpRangeBucket, MultiTerms, OrderKey,
    Range, RangeBucket, Terms, TermsFilter,
};
use crate::schema::FieldClass;
use crate::sql::{literal_from_json, Direction, Expr};
use crate::{Error, Result};
use serde_json::Value;
use tracing::{debug, warn};

pub(crate) const MAX_GEOTILE_PRECISION: u32 = 29;

/// Largest bucket or hit count a request may ask for.
pub(crate) const MAX_SIZE: usize = i32::MAX as usize;

/// Validates a requested `size`; values past [`MAX_SIZE`] mean "all of them".
pub(crate) fn checked_size(size: usize, path: &Path) -> Result<usize> {
    if size == 0 {
        return Err(Error::invalid(path, "size must be greater than 0"));
    }
    if size > MAX_SIZE {
        debug!(%path, size, "size capped at {MAX_SIZE}");
    }
    Ok(size.min(MAX_SIZE))
}

pub(crate) fn translate_bucket(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    bucket: &BucketAggregation,
    path: &Path,
) -> Result<BucketSlot> {
    let sql = match bucket {
        BucketAggregation::DateHistogram(h) => BucketSql::Grouped(date_histogram(ctx, h, path)?),
        BucketAggregation::AutoDateHistogram(h) => auto_date_histogram(ctx, h)?,
        BucketAggregation::Histogram(h) => BucketSql::Grouped(histogram(ctx, node, h, path)?),
        BucketAggregation::Terms(t) => BucketSql::Grouped(terms(ctx, node, t, path)?),
        BucketAggregation::MultiTerms(t) => BucketSql::Grouped(multi_terms(ctx, node, t, path)?),
        BucketAggregation::Filter(predicate) => BucketSql::Combinator {
            kind: CombinatorKind::Filter,
            groups: vec![CombinatorGroup {
                prefix: String::new(),
                label: node.name.clone(),
                predicate: predicate.clone(),
                bounds: Vec::new(),
            }],
        },
        BucketAggregation::Filters(f) => filters(f),
        BucketAggregation::Range(r) => range(ctx, r, path)?,
        BucketAggregation::DateRange(r) => date_range(ctx, r, path)?,
        BucketAggregation::IpRange(r) => ip_range(ctx, r, path)?,
        BucketAggregation::IpPrefix(p) => ip_prefix(ctx, p, path)?,
        BucketAggregation::Sampler { shard_size } => {
            BucketSql::Sampler(shard_size.unwrap_or(ctx.config.default_sampler_shard_size))
        }
        BucketAggregation::RandomSampler { probability, .. } => {
            if !((*probability > 0.0 && *probability <= 0.5) || *probability == 1.0) {
                return Err(Error::invalid(
                    path,
                    format!("probability must be between 0.0 and 0.5 or exactly 1.0 (got {probability})"),
                ));
            }
            BucketSql::Ungrouped
        }
        BucketAggregation::GeotileGrid(g) => BucketSql::Grouped(geotile_grid(ctx, g, path)?),
        BucketAggregation::Composite(c) => BucketSql::Grouped(composite(ctx, c, path)?),
    };

    Ok(BucketSlot {
        path: path.clone(),
        base: ctx.names.base(path),
        type_name: bucket.type_name(),
        sql,
    })
}

// ============================================================================
// Key expressions
// ============================================================================

fn is_utc(time_zone: &str) -> bool {
    matches!(
        time_zone,
        "UTC" | "utc" | "Z" | "+00:00" | "-00:00" | "Etc/UTC" | "GMT"
    )
}

/// Bucket key of a date column.
///
/// Fixed intervals yield the interval index of the local timestamp;
/// calendar intervals yield the local period start in milliseconds.
pub(crate) fn date_key_expr(column: Expr, interval: DateInterval, time_zone: Option<&str>) -> Expr {
    let time_zone = time_zone.filter(|tz| !is_utc(tz));
    match interval {
        DateInterval::Fixed(ms) => {
            let millis = Expr::function("toUnixTimestamp64Milli", vec![column.clone()]);
            let local = match time_zone {
                Some(tz) => {
                    let offset = Expr::function(
                        "timeZoneOffset",
                        vec![Expr::function("toTimezone", vec![column, Expr::string(tz)])],
                    );
                    Expr::paren(Expr::infix(
                        millis,
                        "+",
                        Expr::infix(offset, "*", Expr::int(1000)),
                    ))
                }
                None => millis,
            };
            // floor, not truncation, so keys before 1970 stay in their interval
            Expr::function(
                "toInt64",
                vec![Expr::function("floor", vec![Expr::infix(local, "/", Expr::int(ms))])],
            )
        }
        DateInterval::Calendar(unit) => {
            let local = match time_zone {
                Some(tz) => Expr::function("toTimezone", vec![column, Expr::string(tz)]),
                None => column,
            };
            let mut args = vec![local];
            if unit == CalendarUnit::Week {
                // Monday-based weeks
                args.push(Expr::int(1));
            }
            let start = Expr::function(unit.start_of_function(), args);
            Expr::infix(
                Expr::function(
                    "toInt64",
                    vec![Expr::function("toUnixTimestamp", vec![start])],
                ),
                "*",
                Expr::int(1000),
            )
        }
    }
}

fn histogram_key_expr(value: Expr, interval: f64, offset: f64, raw_when_unit: bool) -> Expr {
    if interval == 1.0 && offset == 0.0 && raw_when_unit {
        return value;
    }
    let shifted = if offset != 0.0 {
        Expr::paren(Expr::infix(value, "-", Expr::number(offset)))
    } else {
        value
    };
    let floored = Expr::infix(
        Expr::function("floor", vec![Expr::infix(shifted, "/", Expr::number(interval))]),
        "*",
        Expr::number(interval),
    );
    if offset != 0.0 {
        Expr::infix(floored, "+", Expr::number(offset))
    } else {
        floored
    }
}

/// `(zoom, x, y)` Web-Mercator tile of a lat/lon pair.
pub(crate) fn geotile_key_exprs(lat: Expr, lon: Expr, precision: u32) -> Vec<Expr> {
    let tiles = || Expr::function("POWER", vec![Expr::int(2), Expr::int(i64::from(precision))]);
    let radians = || Expr::function("RADIANS", vec![lat.clone()]);

    let zoom = Expr::raw(format!("CAST({precision} AS Float32)"));
    let x = Expr::function(
        "FLOOR",
        vec![Expr::infix(
            Expr::paren(Expr::infix(
                Expr::paren(Expr::infix(
                    Expr::function("toFloat64", vec![lon]),
                    "+",
                    Expr::int(180),
                )),
                "/",
                Expr::int(360),
            )),
            "*",
            tiles(),
        )],
    );
    let log = Expr::function(
        "LOG",
        vec![Expr::infix(
            Expr::function("TAN", vec![radians()]),
            "+",
            Expr::paren(Expr::infix(
                Expr::int(1),
                "/",
                Expr::function("COS", vec![radians()]),
            )),
        )],
    );
    let y = Expr::function(
        "FLOOR",
        vec![Expr::infix(
            Expr::infix(
                Expr::paren(Expr::infix(
                    Expr::int(1),
                    "-",
                    Expr::infix(log, "/", Expr::function("PI", vec![])),
                )),
                "/",
                Expr::raw("2.0"),
            ),
            "*",
            tiles(),
        )],
    );
    vec![zoom, x, y]
}

pub(crate) fn with_missing(value: Expr, missing: Option<&Value>, path: &Path) -> Result<Expr> {
    match missing {
        None => Ok(value),
        Some(v) => {
            let literal = literal_from_json(v)
                .ok_or_else(|| Error::invalid(path, "missing must be a scalar value"))?;
            Ok(Expr::function("COALESCE", vec![value, literal]))
        }
    }
}

/// Formats a double the way Elasticsearch prints range and percent keys.
pub(crate) fn format_es_double(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

pub(crate) fn range_label(bucket: &RangeBucket) -> String {
    if let Some(key) = &bucket.key {
        return key.clone();
    }
    let bound = |b: Option<f64>| b.map(format_es_double).unwrap_or_else(|| "*".to_string());
    format!("{}-{}", bound(bucket.from), bound(bucket.to))
}

// ============================================================================
// Ordering
// ============================================================================

fn orderings(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    orders: &[BucketOrder],
    key_count: usize,
    path: &Path,
) -> Result<Vec<BucketOrdering>> {
    let mut out = Vec::new();
    for order in orders {
        match &order.key {
            OrderKey::Key => out.extend((0..key_count).map(|k| BucketOrdering {
                target: OrderTarget::Key(k),
                direction: order.direction,
            })),
            OrderKey::Count => out.push(BucketOrdering {
                target: OrderTarget::Count,
                direction: order.direction,
            }),
            OrderKey::Path(reference) => out.push(BucketOrdering {
                target: OrderTarget::Metric {
                    reference: reference.clone(),
                    fallback: order_fallback(ctx, node, reference, path)?,
                },
                direction: order.direction,
            }),
        }
    }
    Ok(out)
}

/// SQL of a direct child metric named by an order path, for pancakes that
/// do not carry the child's own column.
fn order_fallback(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    reference: &str,
    path: &Path,
) -> Result<Option<Expr>> {
    if reference.contains('>') {
        return Ok(None);
    }
    let (name, sub) = match node.children.iter().find(|c| c.name == reference) {
        Some(_) => (reference, None),
        None => match reference.split_once('.') {
            Some((name, sub)) => (name, Some(sub)),
            None => return Ok(None),
        },
    };
    let Some(child) = node.children.iter().find(|c| c.name == name) else {
        return Ok(None);
    };
    let Some(metric) = child.metric().filter(|m| !m.needs_auxiliary_query()) else {
        return Ok(None);
    };
    let slot = translate_metric(ctx, metric, &path.child(name))?;
    let column = match sub {
        None => slot.columns.first(),
        Some(sub) => slot
            .columns
            .iter()
            .find(|c| c.value_name.as_deref().is_some_and(|v| value_names_match(v, sub))),
    };
    Ok(column.map(|c| c.expr.clone()))
}

/// `50` and `50.0` name the same percentile.
pub(crate) fn value_names_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

// ============================================================================
// Translators
// ============================================================================

fn date_histogram(ctx: &CompileContext<'_>, h: &DateHistogram, path: &Path) -> Result<GroupedBucket> {
    let (_, column) = ctx.column(&h.field, FieldClass::Date, "date_histogram")?;
    if h.min_doc_count > 1 {
        warn!(%path, min_doc_count = h.min_doc_count, "min_doc_count > 1 is applied when reassembling rows");
    }
    Ok(GroupedBucket {
        keys: vec![date_key_expr(column, h.interval, h.time_zone.as_deref())],
        order: vec![BucketOrdering {
            target: OrderTarget::Key(0),
            direction: Direction::Asc,
        }],
        limit: None,
        parent_count: false,
        after: None,
    })
}

/// Interval an `auto_date_histogram` compiles to, when its range is known.
pub(crate) fn auto_interval(ctx: &CompileContext<'_>, h: &AutoDateHistogram) -> Option<DateInterval> {
    let buckets = h.buckets.unwrap_or(ctx.config.default_auto_buckets);
    h.range
        .map(|bounds| choose_auto_interval(bounds.min, bounds.max, buckets))
}

fn auto_date_histogram(ctx: &CompileContext<'_>, h: &AutoDateHistogram) -> Result<BucketSql> {
    let (_, column) = ctx.column(&h.field, FieldClass::Date, "auto_date_histogram")?;
    Ok(match auto_interval(ctx, h) {
        Some(interval) => BucketSql::Grouped(GroupedBucket {
            keys: vec![date_key_expr(column, interval, h.time_zone.as_deref())],
            order: vec![BucketOrdering {
                target: OrderTarget::Key(0),
                direction: Direction::Asc,
            }],
            limit: None,
            parent_count: false,
            after: None,
        }),
        None => BucketSql::Ungrouped,
    })
}

fn histogram(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    h: &Histogram,
    path: &Path,
) -> Result<GroupedBucket> {
    if !(h.interval > 0.0) {
        return Err(Error::invalid(path, "histogram interval must be > 0"));
    }
    let (field, column) = ctx.column(&h.field, FieldClass::NumericOrDate, "histogram")?;
    let value = if field.field_type.is_date() {
        Expr::function("toUnixTimestamp64Milli", vec![column])
    } else {
        column
    };
    let value = with_missing(value, h.missing.as_ref(), path)?;
    let key = histogram_key_expr(value, h.interval, h.offset, !field.field_type.is_float());

    let order = if h.order.is_empty() {
        vec![BucketOrdering {
            target: OrderTarget::Key(0),
            direction: Direction::Asc,
        }]
    } else {
        orderings(ctx, node, &h.order, 1, path)?
    };

    Ok(GroupedBucket {
        keys: vec![key],
        order,
        limit: None,
        parent_count: false,
        after: None,
    })
}

fn terms_filter_condition(key: &Expr, filter: &TermsFilter, path: &Path) -> Result<Expr> {
    match filter {
        TermsFilter::Regex(pattern) => {
            let anchored = format!("^(?:{pattern})$");
            regex::Regex::new(&anchored).map_err(|e| {
                Error::invalid(path, format!("invalid include/exclude pattern '{pattern}': {e}"))
            })?;
            Ok(Expr::function("match", vec![key.clone(), Expr::string(anchored)]))
        }
        TermsFilter::Values(values) => {
            let literals = values
                .iter()
                .map(|v| {
                    literal_from_json(v).ok_or_else(|| {
                        Error::invalid(path, "include/exclude values must be scalars")
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::infix(key.clone(), "IN", Expr::function("tuple", literals)))
        }
    }
}

fn terms(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    t: &Terms,
    path: &Path,
) -> Result<GroupedBucket> {
    let (_, column) = ctx.column(&t.field, FieldClass::Any, t_usage(t))?;
    let mut key = with_missing(column, t.missing.as_ref(), path)?;

    let include = t
        .include
        .as_ref()
        .map(|f| terms_filter_condition(&key, f, path))
        .transpose()?;
    let exclude = t
        .exclude
        .as_ref()
        .map(|f| terms_filter_condition(&key, f, path).map(Expr::not))
        .transpose()?;
    if let Some(condition) = Expr::and_opt(include, exclude) {
        key = Expr::function("if", vec![condition, key, Expr::null()]);
    }

    let size = checked_size(t.size.unwrap_or(ctx.config.default_terms_size), path)?;
    if t.min_doc_count > 1 {
        warn!(%path, min_doc_count = t.min_doc_count, "min_doc_count > 1 is applied when reassembling rows");
    }

    let order = if t.order.is_empty() {
        vec![BucketOrdering {
            target: OrderTarget::Count,
            direction: Direction::Desc,
        }]
    } else {
        orderings(ctx, node, &t.order, 1, path)?
    };

    Ok(GroupedBucket {
        keys: vec![key],
        order,
        limit: Some(size),
        parent_count: true,
        after: None,
    })
}

fn t_usage(t: &Terms) -> &'static str {
    if t.significant {
        "significant_terms"
    } else {
        "terms"
    }
}

fn multi_terms(
    ctx: &CompileContext<'_>,
    node: &AggregationNode,
    t: &MultiTerms,
    path: &Path,
) -> Result<GroupedBucket> {
    if t.terms.len() < 2 {
        return Err(Error::invalid(path, "multi_terms needs at least two terms sources"));
    }
    let keys = t
        .terms
        .iter()
        .map(|source| {
            let (_, column) = ctx.column(&source.field, FieldClass::Any, "multi_terms")?;
            with_missing(column, source.missing.as_ref(), path)
        })
        .collect::<Result<Vec<_>>>()?;

    let size = checked_size(t.size.unwrap_or(ctx.config.default_terms_size), path)?;

    let order = if t.order.is_empty() {
        vec![BucketOrdering {
            target: OrderTarget::Count,
            direction: Direction::Desc,
        }]
    } else {
        orderings(ctx, node, &t.order, keys.len(), path)?
    };

    Ok(GroupedBucket {
        keys,
        order,
        limit: Some(size),
        parent_count: true,
        after: None,
    })
}

fn filters(f: &Filters) -> BucketSql {
    let mut named = f.filters.clone();
    if f.keyed {
        named.sort_by(|a, b| a.label.cmp(&b.label));
    }
    let groups: Vec<CombinatorGroup> = if named.is_empty() {
        vec![CombinatorGroup {
            prefix: filter_group_prefix(0),
            label: "*".to_string(),
            predicate: Expr::bool(true),
            bounds: Vec::new(),
        }]
    } else {
        named
            .into_iter()
            .enumerate()
            .map(|(i, filter)| CombinatorGroup {
                prefix: filter_group_prefix(i),
                label: filter.label,
                predicate: filter.predicate,
                bounds: Vec::new(),
            })
            .collect()
    };
    BucketSql::Combinator {
        kind: CombinatorKind::Filters,
        groups,
    }
}

fn range(ctx: &CompileContext<'_>, r: &Range, path: &Path) -> Result<BucketSql> {
    if r.ranges.is_empty() {
        return Err(Error::invalid(path, "range needs at least one range"));
    }
    let (field, column) = ctx.column(&r.field, FieldClass::NumericOrDate, "range")?;
    let value = if field.field_type.is_date() {
        Expr::function("toUnixTimestamp64Milli", vec![column])
    } else {
        column
    };

    let groups = r
        .ranges
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            let from = bucket
                .from
                .map(|f| Expr::infix(value.clone(), ">=", Expr::number(f)));
            let to = bucket
                .to
                .map(|t| Expr::infix(value.clone(), "<", Expr::number(t)));
            let predicate = Expr::and_opt(from, to)
                .unwrap_or_else(|| Expr::is_not_null(value.clone()));
            CombinatorGroup {
                prefix: range_group_prefix(i),
                label: range_label(bucket),
                predicate,
                bounds: Vec::new(),
            }
        })
        .collect();

    Ok(BucketSql::Combinator {
        kind: CombinatorKind::Range,
        groups,
    })
}

fn date_range(ctx: &CompileContext<'_>, r: &DateRange, path: &Path) -> Result<BucketSql> {
    if r.ranges.is_empty() {
        return Err(Error::invalid(path, "date_range needs at least one range"));
    }
    let (_, column) = ctx.column(&r.field, FieldClass::Date, "date_range")?;

    let groups = r
        .ranges
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            let from = bucket.from.clone().map(|f| Expr::infix(column.clone(), ">=", f));
            let to = bucket.to.clone().map(|t| Expr::infix(column.clone(), "<", t));
            let predicate = Expr::and_opt(from, to).unwrap_or_else(|| Expr::is_not_null(column.clone()));
            let bounds = [(RangeEdge::From, &bucket.from), (RangeEdge::To, &bucket.to)]
                .into_iter()
                .filter_map(|(edge, b)| b.clone().map(|b| (edge, b)))
                .collect();
            CombinatorGroup {
                prefix: range_group_prefix(i),
                // keys of unnamed ranges come from the evaluated bounds
                label: bucket.key.clone().unwrap_or_else(|| format!("range_{i}")),
                predicate,
                bounds,
            }
        })
        .collect();

    Ok(BucketSql::Combinator {
        kind: CombinatorKind::Range,
        groups,
    })
}

/// Upper bound Elasticsearch reports for an open-ended IPv4 range.
const UNBOUNDED_IP: &str = "::1:0:0:0";

pub(crate) fn ip_range_label(bucket: &IpRangeBucket) -> String {
    if let Some(key) = &bucket.key {
        return key.clone();
    }
    let bound = |b: &Option<String>| b.clone().unwrap_or_else(|| "*".to_string());
    format!("{}-{}", bound(&bucket.from), bound(&bucket.to))
}

fn ip_range(ctx: &CompileContext<'_>, r: &IpRange, path: &Path) -> Result<BucketSql> {
    if r.ranges.is_empty() {
        return Err(Error::invalid(path, "ip_range needs at least one range"));
    }
    let (_, column) = ctx.column(&r.field, FieldClass::Any, "ip_range")?;

    let groups = r
        .ranges
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            let from = bucket
                .from
                .as_ref()
                .map(|f| Expr::infix(column.clone(), ">=", Expr::string(f.clone())));
            let to = bucket
                .to
                .as_ref()
                .filter(|t| t.as_str() != UNBOUNDED_IP)
                .map(|t| Expr::infix(column.clone(), "<", Expr::string(t.clone())));
            CombinatorGroup {
                prefix: range_group_prefix(i),
                label: ip_range_label(bucket),
                predicate: Expr::and_opt(from, to).unwrap_or_else(|| Expr::bool(true)),
                bounds: Vec::new(),
            }
        })
        .collect();

    Ok(BucketSql::Combinator {
        kind: CombinatorKind::Range,
        groups,
    })
}

fn ip_prefix(ctx: &CompileContext<'_>, p: &IpPrefix, path: &Path) -> Result<BucketSql> {
    let bits = if p.is_ipv6 { 128 } else { 32 };
    if p.prefix_length > bits {
        return Err(Error::invalid(
            path,
            format!("prefix_length must be between 0 and {bits} (got {})", p.prefix_length),
        ));
    }
    let (_, column) = ctx.column(&p.field, FieldClass::Any, "ip_prefix")?;
    if p.prefix_length == 0 {
        return Ok(BucketSql::Ungrouped);
    }

    let shift = bits - p.prefix_length;
    let key = if p.is_ipv6 {
        let divisor = 1u128 << shift;
        Expr::function(
            "intDiv",
            vec![
                Expr::function("toUInt128", vec![column]),
                Expr::function("toUInt128", vec![Expr::string(divisor.to_string())]),
            ],
        )
    } else {
        Expr::function(
            "intDiv",
            vec![Expr::function("toUInt32", vec![column]), Expr::int(1i64 << shift)],
        )
    };

    Ok(BucketSql::Grouped(GroupedBucket {
        keys: vec![key],
        order: vec![BucketOrdering {
            target: OrderTarget::Key(0),
            direction: Direction::Asc,
        }],
        limit: None,
        parent_count: false,
        after: None,
    }))
}

pub(crate) fn geotile_precision(ctx: &CompileContext<'_>, precision: Option<u32>, path: &Path) -> Result<u32> {
    let precision = precision.unwrap_or(ctx.config.default_geotile_precision);
    if precision > MAX_GEOTILE_PRECISION {
        return Err(Error::invalid(
            path,
            format!("precision must be between 0 and {MAX_GEOTILE_PRECISION} (got {precision})"),
        ));
    }
    Ok(precision)
}

fn geotile_grid(ctx: &CompileContext<'_>, g: &GeotileGrid, path: &Path) -> Result<GroupedBucket> {
    let (field, _) = ctx.column(&g.field, FieldClass::Geo, "geotile_grid")?;
    let precision = geotile_precision(ctx, g.precision, path)?;
    let lat = Expr::column(field.lat_column_name());
    let lon = Expr::column(field.lon_column_name());

    let mut keys = geotile_key_exprs(lat.clone(), lon.clone(), precision);
    if let Some(b) = g.bounds {
        let inside = Expr::and_all([
            Expr::infix(lat.clone(), "<=", Expr::number(b.top)),
            Expr::infix(lat, ">=", Expr::number(b.bottom)),
            Expr::infix(lon.clone(), ">=", Expr::number(b.left)),
            Expr::infix(lon, "<=", Expr::number(b.right)),
        ]);
        if let Some(inside) = inside {
            keys = keys
                .into_iter()
                .map(|k| Expr::function("if", vec![inside.clone(), k, Expr::null()]))
                .collect();
        }
    }

    Ok(GroupedBucket {
        keys,
        order: vec![BucketOrdering {
            target: OrderTarget::Count,
            direction: Direction::Desc,
        }],
        limit: Some(checked_size(g.size.unwrap_or(ctx.config.default_geotile_size), path)?),
        parent_count: false,
        after: None,
    })
}

fn composite(ctx: &CompileContext<'_>, c: &Composite, path: &Path) -> Result<GroupedBucket> {
    if c.sources.is_empty() {
        return Err(Error::invalid(path, "composite needs at least one source"));
    }

    let mut keys = Vec::new();
    let mut order = Vec::new();
    let mut after_values = Vec::new();

    for source in &c.sources {
        let start = keys.len();
        let after = c.after.iter().find(|(name, _)| name == &source.name).map(|(_, v)| v);
        match &source.kind {
            CompositeSourceKind::Terms { field } => {
                let (_, column) = ctx.column(field, FieldClass::Any, "composite terms")?;
                keys.push(column);
                if let Some(v) = after {
                    after_values.push(literal_from_json(v).ok_or_else(|| {
                        Error::invalid(path, format!("after value of '{}' must be a scalar", source.name))
                    })?);
                }
            }
            CompositeSourceKind::Histogram { field, interval } => {
                if !(*interval > 0.0) {
                    return Err(Error::invalid(path, "histogram interval must be > 0"));
                }
                let (desc, column) = ctx.column(field, FieldClass::Numeric, "composite histogram")?;
                keys.push(histogram_key_expr(column, *interval, 0.0, !desc.field_type.is_float()));
                if let Some(v) = after {
                    let n = v.as_f64().ok_or_else(|| {
                        Error::invalid(path, format!("after value of '{}' must be a number", source.name))
                    })?;
                    after_values.push(Expr::number(n));
                }
            }
            CompositeSourceKind::DateHistogram {
                field,
                interval,
                time_zone,
            } => {
                let (_, column) = ctx.column(field, FieldClass::Date, "composite date_histogram")?;
                keys.push(date_key_expr(column, *interval, time_zone.as_deref()));
                if let Some(v) = after {
                    let ms = v.as_i64().ok_or_else(|| {
                        Error::invalid(path, format!("after value of '{}' must be epoch millis", source.name))
                    })?;
                    // bucket the after timestamp exactly like the column
                    let ts = Expr::function("fromUnixTimestamp64Milli", vec![Expr::int(ms)]);
                    after_values.push(date_key_expr(ts, *interval, time_zone.as_deref()));
                }
            }
            CompositeSourceKind::GeotileGrid { field, precision } => {
                let (desc, _) = ctx.column(field, FieldClass::Geo, "composite geotile_grid")?;
                let precision = geotile_precision(ctx, *precision, path)?;
                keys.extend(geotile_key_exprs(
                    Expr::column(desc.lat_column_name()),
                    Expr::column(desc.lon_column_name()),
                    precision,
                ));
                if let Some(v) = after {
                    let tile = v
                        .as_str()
                        .map(|s| s.split('/').map(str::parse::<f64>).collect::<std::result::Result<Vec<_>, _>>());
                    match tile {
                        Some(Ok(parts)) if parts.len() == 3 => {
                            after_values.extend(parts.into_iter().map(Expr::number))
                        }
                        _ => {
                            return Err(Error::invalid(
                                path,
                                format!("after value of '{}' must be a zoom/x/y tile", source.name),
                            ))
                        }
                    }
                }
            }
        }
        for k in start..keys.len() {
            order.push(BucketOrdering {
                target: OrderTarget::Key(k),
                direction: source.direction.or_asc(),
            });
        }
    }

    let after = if c.after.is_empty() {
        None
    } else {
        if after_values.len() != keys.len() {
            return Err(Error::invalid(path, "after must name every composite source"));
        }
        let op = if order.iter().all(|o| o.direction == Direction::Asc) {
            ">"
        } else if order.iter().all(|o| o.direction == Direction::Desc) {
            "<"
        } else {
            return Err(Error::unsupported(
                path,
                "composite after key with mixed source orders",
            ));
        };
        Some(Expr::infix(
            Expr::function("tuple", keys.clone()),
            op,
            Expr::function("tuple", after_values),
        ))
    };

    let size = checked_size(c.size.unwrap_or(ctx.config.default_composite_size), path)?;

    Ok(GroupedBucket {
        keys,
        order,
        limit: Some(size),
        parent_count: false,
        after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationKind, DateRangeBucket};
    use crate::compiler::naming::NameTable;

    #[test]
    fn test_date_key_fixed_without_timezone() {
        let key = date_key_expr(Expr::column("@timestamp"), DateInterval::Fixed(30_000), None);
        assert_eq!(
            key.to_string(),
            r#"toInt64(floor(toUnixTimestamp64Milli("@timestamp")/30000))"#
        );
    }

    #[test]
    fn test_date_key_fixed_with_timezone() {
        let key = date_key_expr(
            Expr::column("order_date"),
            DateInterval::Fixed(43_200_000),
            Some("Europe/Warsaw"),
        );
        assert_eq!(
            key.to_string(),
            r#"toInt64(floor((toUnixTimestamp64Milli("order_date")+timeZoneOffset(toTimezone("order_date", 'Europe/Warsaw'))*1000)/43200000))"#
        );
    }

    #[test]
    fn test_date_key_utc_is_plain() {
        let key = date_key_expr(Expr::column("t"), DateInterval::Fixed(1000), Some("UTC"));
        assert_eq!(key.to_string(), r#"toInt64(floor(toUnixTimestamp64Milli("t")/1000))"#);
    }

    #[test]
    fn test_date_key_calendar() {
        let key = date_key_expr(
            Expr::column("t"),
            DateInterval::Calendar(CalendarUnit::Month),
            Some("Europe/Warsaw"),
        );
        assert_eq!(
            key.to_string(),
            r#"toInt64(toUnixTimestamp(toStartOfMonth(toTimezone("t", 'Europe/Warsaw'))))*1000"#
        );
        let week = date_key_expr(Expr::column("t"), DateInterval::Calendar(CalendarUnit::Week), None);
        assert_eq!(
            week.to_string(),
            r#"toInt64(toUnixTimestamp(toStartOfWeek("t", 1)))*1000"#
        );
    }

    #[test]
    fn test_histogram_key() {
        let key = histogram_key_expr(Expr::column("bytes"), 100.0, 0.0, true);
        assert_eq!(key.to_string(), r#"floor("bytes"/100)*100"#);
        let unit = histogram_key_expr(Expr::column("n"), 1.0, 0.0, true);
        assert_eq!(unit.to_string(), r#""n""#);
        let float_unit = histogram_key_expr(Expr::column("n"), 1.0, 0.0, false);
        assert_eq!(float_unit.to_string(), r#"floor("n"/1)*1"#);
        let offset = histogram_key_expr(Expr::column("n"), 10.0, 5.0, true);
        assert_eq!(offset.to_string(), r#"floor(("n"-5)/10)*10+5"#);
    }

    #[test]
    fn test_geotile_keys() {
        let keys = geotile_key_exprs(Expr::column("loc::lat"), Expr::column("loc::lon"), 7);
        assert_eq!(keys[0].to_string(), "CAST(7 AS Float32)");
        assert_eq!(
            keys[1].to_string(),
            r#"FLOOR(((toFloat64("loc::lon")+180)/360)*POWER(2, 7))"#
        );
        assert_eq!(
            keys[2].to_string(),
            r#"FLOOR((1-LOG(TAN(RADIANS("loc::lat"))+(1/COS(RADIANS("loc::lat"))))/PI())/2.0*POWER(2, 7))"#
        );
    }

    #[test]
    fn test_range_labels() {
        let bucket = |from, to| RangeBucket { from, to, key: None };
        assert_eq!(range_label(&bucket(Some(1.0), Some(2.0))), "1.0-2.0");
        assert_eq!(range_label(&bucket(None, Some(6.55))), "*-6.55");
        assert_eq!(range_label(&bucket(Some(1000.0), None)), "1000.0-*");
        let keyed = RangeBucket {
            from: None,
            to: None,
            key: Some("all".into()),
        };
        assert_eq!(range_label(&keyed), "all");
    }

    fn with_ctx<T>(f: impl FnOnce(&CompileContext<'_>) -> T) -> T {
        let schema = crate::schema::DynamicSchema::new("t");
        let config = crate::config::CompilerConfig::default();
        let ctx = CompileContext {
            schema: &schema,
            config: &config,
            names: NameTable::build(&[]),
        };
        f(&ctx)
    }

    #[test]
    fn test_ip_prefix_key() {
        let prefix = |prefix_length, is_ipv6| IpPrefix {
            field: "client_ip".into(),
            prefix_length,
            is_ipv6,
            append_prefix_length: false,
            keyed: false,
            min_doc_count: 1,
        };
        let path = Path::new(["p"]);
        with_ctx(|ctx| {
            let BucketSql::Grouped(g) = ip_prefix(ctx, &prefix(24, false), &path).unwrap() else {
                panic!("ipv4 prefix should group");
            };
            assert_eq!(g.keys[0].to_string(), r#"intDiv(toUInt32("client_ip"), 256)"#);
            assert!(g.limit.is_none());

            let BucketSql::Grouped(g) = ip_prefix(ctx, &prefix(64, true), &path).unwrap() else {
                panic!("ipv6 prefix should group");
            };
            assert_eq!(
                g.keys[0].to_string(),
                r#"intDiv(toUInt128("client_ip"), toUInt128('18446744073709551616'))"#
            );

            assert!(matches!(ip_prefix(ctx, &prefix(0, false), &path), Ok(BucketSql::Ungrouped)));
            assert!(matches!(
                ip_prefix(ctx, &prefix(33, false), &path),
                Err(Error::InvalidParameter { .. })
            ));
        });
    }

    #[test]
    fn test_ip_range_open_ends() {
        let r = IpRange {
            field: "ip".into(),
            ranges: vec![
                IpRangeBucket {
                    from: Some("10.0.0.5".into()),
                    to: Some(UNBOUNDED_IP.into()),
                    key: None,
                },
                IpRangeBucket {
                    from: None,
                    to: None,
                    key: Some("all".into()),
                },
            ],
            keyed: false,
        };
        let sql = with_ctx(|ctx| ip_range(ctx, &r, &Path::new(["r"]))).unwrap();
        let BucketSql::Combinator { groups, .. } = sql else {
            panic!("ip_range is a combinator");
        };
        assert_eq!(groups[0].predicate.to_string(), r#""ip">='10.0.0.5'"#);
        assert_eq!(groups[0].label, "10.0.0.5-::1:0:0:0");
        assert_eq!(groups[1].predicate.to_string(), "true");
        assert_eq!(groups[1].label, "all");
    }

    #[test]
    fn test_date_range_keeps_bounds() {
        let r = DateRange {
            field: "ts".into(),
            ranges: vec![DateRangeBucket {
                from: Some(Expr::raw("now()")),
                to: None,
                key: None,
            }],
            keyed: false,
            format: None,
        };
        let sql = with_ctx(|ctx| date_range(ctx, &r, &Path::new(["d"]))).unwrap();
        let BucketSql::Combinator { groups, .. } = sql else {
            panic!("date_range is a combinator");
        };
        assert_eq!(groups[0].predicate.to_string(), r#""ts">=now()"#);
        assert_eq!(groups[0].bounds.len(), 1);
        assert_eq!(groups[0].bounds[0].0, RangeEdge::From);
        assert_eq!(groups[0].prefix, "range_0__");
    }

    #[test]
    fn test_random_sampler_probability() {
        let path = Path::new(["s"]);
        let node = |probability| {
            AggregationNode::new("s", BucketAggregation::RandomSampler { probability, seed: 0 })
        };
        with_ctx(|ctx| {
            for ok in [0.1, 0.5, 1.0] {
                let n = node(ok);
                let AggregationKind::Bucket(b) = &n.kind else { unreachable!() };
                assert!(matches!(translate_bucket(ctx, &n, b, &path).unwrap().sql, BucketSql::Ungrouped));
            }
            for bad in [0.0, 0.7, 1.5] {
                let n = node(bad);
                let AggregationKind::Bucket(b) = &n.kind else { unreachable!() };
                assert!(matches!(
                    translate_bucket(ctx, &n, b, &path),
                    Err(Error::InvalidParameter { .. })
                ));
            }
        });
    }

    #[test]
    fn test_value_names_match() {
        assert!(value_names_match("50.0", "50"));
        assert!(value_names_match("avg", "avg"));
        assert!(!value_names_match("avg", "sum"));
    }

    #[test]
    fn test_checked_size() {
        let path = Path::new(["t"]);
        assert_eq!(checked_size(10, &path).unwrap(), 10);
        assert_eq!(checked_size(usize::MAX, &path).unwrap(), MAX_SIZE);
        assert!(matches!(
            checked_size(0, &path),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_with_missing() {
        let path = Path::new(["t"]);
        let e = with_missing(Expr::column("f"), Some(&serde_json::json!("N/A")), &path).unwrap();
        assert_eq!(e.to_string(), r#"COALESCE("f", 'N/A')"#);
        assert!(with_missing(Expr::column("f"), Some(&serde_json::json!({})), &path).is_err());
    }
}
