//! Aggregation JSON to the typed [`AggregationNode`] tree
//!
//! Each aggregation body is deserialized into a small params struct and then
//! mapped onto the compiler's model. Request order is preserved at every
//! level, and filter bodies go through the [`QueryTranslator`].

use super::translator::{date_value, parse_date_millis, QueryTranslator};
use super::types::EsQuery;
use crate::error::EsCompatError;
use pancake::aggregation::{
    AggregationKind, AggregationNode, AutoDateHistogram, BucketAggregation, BucketOrder, Composite,
    CompositeSource, CompositeSourceKind, DateBounds, DateHistogram, DateInterval, DateRange, DateRangeBucket,
    Filters, GeoBoundingBox, GeotileGrid, Histogram, HistogramBounds, IpPrefix, IpRange, IpRangeBucket,
    MetricAggregation, MetricField, MultiTerms, MultiTermsSource, NamedFilter, OrderKey, PipelineAggregation,
    PostProcessKind, Range, RangeBucket, SimpleMetric, SortField, Terms, TermsFilter, TopHits, TopMetrics,
    DEFAULT_PERCENTS,
};
use pancake::sql::{Direction, Expr};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

type Result<T> = std::result::Result<T, EsCompatError>;

/// Aggregation kinds recognized but deliberately not compiled.
const UNSUPPORTED: &[&str] = &["matrix_stats", "adjacency_matrix", "rare_terms"];

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct FieldParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    missing: Option<Value>,
    #[serde(default)]
    script: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BoundsParams {
    min: Value,
    max: Value,
}

#[derive(Debug, Deserialize)]
struct DateHistogramParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    fixed_interval: Option<String>,
    #[serde(default)]
    calendar_interval: Option<String>,
    #[serde(default)]
    interval: Option<Value>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    min_doc_count: Option<u64>,
    #[serde(default)]
    extended_bounds: Option<BoundsParams>,
    #[serde(default)]
    offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AutoDateHistogramParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    buckets: Option<usize>,
    #[serde(default)]
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistogramParams {
    #[serde(default)]
    field: Option<String>,
    interval: f64,
    #[serde(default)]
    offset: Option<f64>,
    #[serde(default)]
    missing: Option<Value>,
    #[serde(default)]
    min_doc_count: Option<u64>,
    #[serde(default)]
    extended_bounds: Option<BoundsParams>,
    #[serde(default)]
    order: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TermsParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    missing: Option<Value>,
    #[serde(default)]
    order: Option<Value>,
    #[serde(default)]
    min_doc_count: Option<u64>,
    #[serde(default)]
    include: Option<Value>,
    #[serde(default)]
    exclude: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MultiTermsParams {
    terms: Vec<FieldParams>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    order: Option<Value>,
    #[serde(default)]
    min_doc_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FiltersParams {
    filters: Value,
    #[serde(default)]
    other_bucket: Option<bool>,
    #[serde(default)]
    other_bucket_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeEntry {
    #[serde(default)]
    from: Option<f64>,
    #[serde(default)]
    to: Option<f64>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeAggParams {
    #[serde(default)]
    field: Option<String>,
    ranges: Vec<RangeEntry>,
    #[serde(default)]
    keyed: bool,
}

#[derive(Debug, Deserialize)]
struct DateRangeEntry {
    #[serde(default)]
    from: Option<Value>,
    #[serde(default)]
    to: Option<Value>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateRangeParams {
    #[serde(default)]
    field: Option<String>,
    ranges: Vec<DateRangeEntry>,
    #[serde(default)]
    keyed: bool,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRangeEntry {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    mask: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpRangeParams {
    #[serde(default)]
    field: Option<String>,
    ranges: Vec<IpRangeEntry>,
    #[serde(default)]
    keyed: bool,
}

#[derive(Debug, Deserialize)]
struct IpPrefixParams {
    #[serde(default)]
    field: Option<String>,
    prefix_length: u32,
    #[serde(default)]
    is_ipv6: bool,
    #[serde(default)]
    append_prefix_length: bool,
    #[serde(default)]
    keyed: bool,
    #[serde(default)]
    min_doc_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RandomSamplerParams {
    probability: f64,
    #[serde(default)]
    seed: i64,
}

#[derive(Debug, Deserialize)]
struct SamplerParams {
    #[serde(default)]
    shard_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct GeoBoundsParams {
    top_left: GeoPoint,
    bottom_right: GeoPoint,
}

#[derive(Debug, Deserialize)]
struct GeotileParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    precision: Option<u32>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    bounds: Option<GeoBoundsParams>,
}

#[derive(Debug, Deserialize)]
struct CompositeParams {
    sources: Vec<Map<String, Value>>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    after: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CompositeSourceParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    order: Option<String>,
    #[serde(default)]
    missing_bucket: bool,
    #[serde(default)]
    interval: Option<Value>,
    #[serde(default)]
    fixed_interval: Option<String>,
    #[serde(default)]
    calendar_interval: Option<String>,
    #[serde(default)]
    time_zone: Option<String>,
    #[serde(default)]
    precision: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PercentilesParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    missing: Option<Value>,
    #[serde(default)]
    percents: Option<Vec<f64>>,
    #[serde(default)]
    keyed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct PercentileRanksParams {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    missing: Option<Value>,
    values: Vec<f64>,
    #[serde(default)]
    keyed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TopHitsParams {
    #[serde(default, rename = "_source")]
    source: Option<Value>,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    sort: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TopMetricsParams {
    metrics: Value,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    sort: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BucketScriptParams {
    buckets_path: Value,
    script: Value,
}

#[derive(Debug, Deserialize)]
struct PostProcessParams {
    buckets_path: String,
    #[serde(default)]
    lag: Option<usize>,
}

fn params<T: DeserializeOwned>(kind: &str, name: &str, body: &Value) -> Result<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| EsCompatError::InvalidQuery(format!("[{kind}] aggregation '{name}': {e}")))
}

fn required_field(kind: &str, name: &str, field: Option<String>) -> Result<String> {
    field.ok_or_else(|| EsCompatError::MissingField(format!("[{kind}] aggregation '{name}' needs a field")))
}

// ============================================================================
// Parser
// ============================================================================

/// Builds aggregation trees; filter bodies are translated with the
/// request's translator so `auto_date_histogram` sees its date bounds.
pub struct AggregationParser<'t, 'a> {
    translator: &'t mut QueryTranslator<'a>,
}

impl<'t, 'a> AggregationParser<'t, 'a> {
    pub fn new(translator: &'t mut QueryTranslator<'a>) -> Self {
        Self { translator }
    }

    /// Parse an `aggs` object, keeping its key order.
    pub fn parse(&mut self, aggs: &Map<String, Value>) -> Result<Vec<AggregationNode>> {
        aggs.iter().map(|(name, body)| self.parse_node(name, body)).collect()
    }

    fn parse_node(&mut self, name: &str, body: &Value) -> Result<AggregationNode> {
        let object = body
            .as_object()
            .ok_or_else(|| EsCompatError::InvalidQuery(format!("aggregation '{name}' must be an object")))?;

        let mut kind = None;
        let mut children = Vec::new();
        let mut meta = None;
        for (key, value) in object {
            match key.as_str() {
                "aggs" | "aggregations" => {
                    let sub = value.as_object().ok_or_else(|| {
                        EsCompatError::InvalidQuery(format!("sub-aggregations of '{name}' must be an object"))
                    })?;
                    children = self.parse(sub)?;
                }
                "meta" => meta = Some(value.clone()),
                _ if kind.is_some() => {
                    return Err(EsCompatError::InvalidQuery(format!(
                        "aggregation '{name}' defines more than one type"
                    )))
                }
                _ => kind = Some((key.as_str(), value)),
            }
        }
        let (kind, body) =
            kind.ok_or_else(|| EsCompatError::InvalidQuery(format!("aggregation '{name}' has no type")))?;

        let mut node = AggregationNode::new(name, self.parse_kind(name, kind, body)?).with_children(children);
        if let Some(meta) = meta {
            node = node.with_meta(meta);
        }
        Ok(node)
    }

    fn parse_kind(&mut self, name: &str, kind: &str, body: &Value) -> Result<AggregationKind> {
        let simple = match kind {
            "avg" => Some(SimpleMetric::Avg),
            "sum" => Some(SimpleMetric::Sum),
            "min" => Some(SimpleMetric::Min),
            "max" => Some(SimpleMetric::Max),
            "value_count" => Some(SimpleMetric::ValueCount),
            "cardinality" => Some(SimpleMetric::Cardinality),
            "stats" => Some(SimpleMetric::Stats),
            "extended_stats" => Some(SimpleMetric::ExtendedStats),
            _ => None,
        };
        if let Some(function) = simple {
            let p: FieldParams = params(kind, name, body)?;
            if p.field.is_none() && p.script.is_some() {
                return Err(EsCompatError::UnsupportedAggregation(format!(
                    "script-based {kind} in '{name}'"
                )));
            }
            return Ok(MetricAggregation::Simple {
                function,
                field: MetricField {
                    field: required_field(kind, name, p.field)?,
                    missing: p.missing,
                },
            }
            .into());
        }

        if let Some(post) = post_process_kind(kind) {
            let p: PostProcessParams = params(kind, name, body)?;
            if p.lag.is_some() && post != PostProcessKind::SerialDiff {
                warn!(aggregation = name, kind, "lag is only used by serial_diff");
            }
            return Ok(PipelineAggregation::PostProcess {
                kind: post,
                buckets_path: p.buckets_path,
                lag: p.lag,
            }
            .into());
        }

        let parsed: AggregationKind = match kind {
            "date_histogram" => BucketAggregation::DateHistogram(date_histogram(name, body)?).into(),
            "auto_date_histogram" => {
                let p: AutoDateHistogramParams = params(kind, name, body)?;
                let field = required_field(kind, name, p.field)?;
                let range = self.translator.date_bounds(&field);
                BucketAggregation::AutoDateHistogram(AutoDateHistogram {
                    field,
                    buckets: p.buckets,
                    time_zone: p.time_zone,
                    range,
                })
                .into()
            }
            "histogram" => BucketAggregation::Histogram(histogram(name, body)?).into(),
            "terms" | "significant_terms" => {
                let mut terms = terms(kind, name, body)?;
                terms.significant = kind == "significant_terms";
                BucketAggregation::Terms(terms).into()
            }
            "multi_terms" => {
                let p: MultiTermsParams = params(kind, name, body)?;
                let terms = p
                    .terms
                    .into_iter()
                    .map(|t| {
                        Ok(MultiTermsSource {
                            field: required_field(kind, name, t.field)?,
                            missing: t.missing,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                BucketAggregation::MultiTerms(MultiTerms {
                    terms,
                    size: p.size,
                    order: bucket_order(name, p.order.as_ref())?,
                    min_doc_count: p.min_doc_count.unwrap_or(1),
                })
                .into()
            }
            "filter" => BucketAggregation::Filter(self.filter_predicate(body)?).into(),
            "filters" => BucketAggregation::Filters(self.filters(name, body)?).into(),
            "range" => {
                let p: RangeAggParams = params(kind, name, body)?;
                BucketAggregation::Range(Range {
                    field: required_field(kind, name, p.field)?,
                    ranges: p
                        .ranges
                        .into_iter()
                        .map(|r| RangeBucket {
                            from: r.from,
                            to: r.to,
                            key: r.key,
                        })
                        .collect(),
                    keyed: p.keyed,
                })
                .into()
            }
            "date_range" => BucketAggregation::DateRange(date_range(name, body)?).into(),
            "ip_range" => BucketAggregation::IpRange(ip_range(name, body)?).into(),
            "ip_prefix" => {
                let p: IpPrefixParams = params(kind, name, body)?;
                BucketAggregation::IpPrefix(IpPrefix {
                    field: required_field(kind, name, p.field)?,
                    prefix_length: p.prefix_length,
                    is_ipv6: p.is_ipv6,
                    append_prefix_length: p.append_prefix_length,
                    keyed: p.keyed,
                    min_doc_count: p.min_doc_count.unwrap_or(1),
                })
                .into()
            }
            "random_sampler" => {
                let p: RandomSamplerParams = params(kind, name, body)?;
                BucketAggregation::RandomSampler {
                    probability: p.probability,
                    seed: p.seed,
                }
                .into()
            }
            "sampler" => {
                let p: SamplerParams = params(kind, name, body)?;
                BucketAggregation::Sampler {
                    shard_size: p.shard_size,
                }
                .into()
            }
            "geotile_grid" => {
                let p: GeotileParams = params(kind, name, body)?;
                BucketAggregation::GeotileGrid(GeotileGrid {
                    field: required_field(kind, name, p.field)?,
                    precision: p.precision,
                    size: p.size,
                    bounds: p.bounds.map(|b| GeoBoundingBox {
                        top: b.top_left.lat,
                        left: b.top_left.lon,
                        bottom: b.bottom_right.lat,
                        right: b.bottom_right.lon,
                    }),
                })
                .into()
            }
            "composite" => BucketAggregation::Composite(composite(name, body)?).into(),

            "percentiles" => {
                let p: PercentilesParams = params(kind, name, body)?;
                MetricAggregation::Percentiles {
                    field: MetricField {
                        field: required_field(kind, name, p.field)?,
                        missing: p.missing,
                    },
                    percents: p.percents.unwrap_or_else(|| DEFAULT_PERCENTS.to_vec()),
                    keyed: p.keyed.unwrap_or(true),
                }
                .into()
            }
            "percentile_ranks" => {
                let p: PercentileRanksParams = params(kind, name, body)?;
                MetricAggregation::PercentileRanks {
                    field: MetricField {
                        field: required_field(kind, name, p.field)?,
                        missing: p.missing,
                    },
                    values: p.values,
                    keyed: p.keyed.unwrap_or(true),
                }
                .into()
            }
            "geo_centroid" | "geo_bounds" => {
                let p: FieldParams = params(kind, name, body)?;
                let field = required_field(kind, name, p.field)?;
                if kind == "geo_centroid" {
                    MetricAggregation::GeoCentroid { field }.into()
                } else {
                    MetricAggregation::GeoBounds { field }.into()
                }
            }
            "top_hits" => {
                let p: TopHitsParams = params(kind, name, body)?;
                MetricAggregation::TopHits(TopHits {
                    fields: source_includes(p.source.as_ref()),
                    size: p.size,
                    sort: sort_fields(name, p.sort.as_ref())?,
                })
                .into()
            }
            "top_metrics" => {
                let p: TopMetricsParams = params(kind, name, body)?;
                MetricAggregation::TopMetrics(TopMetrics {
                    metrics: top_metrics_fields(name, &p.metrics)?,
                    size: p.size,
                    sort: sort_fields(name, p.sort.as_ref())?,
                })
                .into()
            }

            "bucket_script" => {
                let p: BucketScriptParams = params(kind, name, body)?;
                PipelineAggregation::BucketScript {
                    buckets_path: script_paths(name, &p.buckets_path)?,
                    script: script_source(name, &p.script)?,
                }
                .into()
            }

            other if UNSUPPORTED.contains(&other) => {
                return Err(EsCompatError::UnsupportedAggregation(format!("{other} (aggregation '{name}')")))
            }
            other => {
                return Err(EsCompatError::UnsupportedAggregation(format!(
                    "unknown aggregation type '{other}' (aggregation '{name}')"
                )))
            }
        };
        Ok(parsed)
    }

    fn filter_predicate(&mut self, body: &Value) -> Result<Expr> {
        let query = EsQuery::parse(body)?;
        Ok(self.translator.translate_filter(&query)?.unwrap_or_else(|| Expr::bool(true)))
    }

    fn filters(&mut self, name: &str, body: &Value) -> Result<Filters> {
        let p: FiltersParams = params("filters", name, body)?;
        if p.other_bucket == Some(true) || p.other_bucket_key.is_some() {
            warn!(aggregation = name, "filters other_bucket is not supported and ignored");
        }
        let (keyed, entries): (bool, Vec<(String, &Value)>) = match &p.filters {
            Value::Object(map) => (true, map.iter().map(|(k, v)| (k.clone(), v)).collect()),
            Value::Array(list) => (false, list.iter().enumerate().map(|(i, v)| (i.to_string(), v)).collect()),
            _ => {
                return Err(EsCompatError::InvalidQuery(format!(
                    "filters of '{name}' must be an object or an array"
                )))
            }
        };
        let filters = entries
            .into_iter()
            .map(|(label, query)| {
                Ok(NamedFilter {
                    label,
                    predicate: self.filter_predicate(query)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Filters { filters, keyed })
    }
}

fn post_process_kind(kind: &str) -> Option<PostProcessKind> {
    Some(match kind {
        "cumulative_sum" => PostProcessKind::CumulativeSum,
        "derivative" => PostProcessKind::Derivative,
        "serial_diff" => PostProcessKind::SerialDiff,
        "avg_bucket" => PostProcessKind::AvgBucket,
        "min_bucket" => PostProcessKind::MinBucket,
        "max_bucket" => PostProcessKind::MaxBucket,
        "sum_bucket" => PostProcessKind::SumBucket,
        _ => return None,
    })
}

// ============================================================================
// Bucket helpers
// ============================================================================

fn date_histogram(name: &str, body: &Value) -> Result<DateHistogram> {
    let p: DateHistogramParams = params("date_histogram", name, body)?;
    let field = required_field("date_histogram", name, p.field)?;
    let interval = match (&p.fixed_interval, &p.calendar_interval, &p.interval) {
        (Some(fixed), _, _) => DateInterval::parse_fixed(fixed),
        (None, Some(calendar), _) => DateInterval::parse_calendar(calendar),
        (None, None, Some(legacy)) => legacy_interval(legacy),
        (None, None, None) => {
            return Err(EsCompatError::MissingField(format!(
                "[date_histogram] aggregation '{name}' needs fixed_interval or calendar_interval"
            )))
        }
    }
    .ok_or_else(|| EsCompatError::InvalidQuery(format!("[date_histogram] aggregation '{name}': invalid interval")))?;
    if p.offset.is_some() {
        warn!(aggregation = name, "date_histogram offset is ignored");
    }
    let extended_bounds = p
        .extended_bounds
        .map(|b| match (date_millis(&b.min), date_millis(&b.max)) {
            (Some(min), Some(max)) => Ok(DateBounds { min, max }),
            _ => Err(EsCompatError::InvalidQuery(format!(
                "[date_histogram] aggregation '{name}': extended_bounds must be absolute dates"
            ))),
        })
        .transpose()?;

    Ok(DateHistogram {
        field,
        interval,
        time_zone: p.time_zone,
        min_doc_count: p.min_doc_count.unwrap_or(0),
        extended_bounds,
    })
}

fn legacy_interval(value: &Value) -> Option<DateInterval> {
    match value {
        Value::String(s) => DateInterval::parse_legacy(s),
        Value::Number(n) => n.as_i64().filter(|ms| *ms > 0).map(DateInterval::Fixed),
        _ => None,
    }
}

fn date_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| parse_date_millis(s)),
        _ => None,
    }
}

fn date_range(name: &str, body: &Value) -> Result<DateRange> {
    let p: DateRangeParams = params("date_range", name, body)?;
    let bound = |value: Option<Value>| -> Result<Option<Expr>> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        date_value(&value, false).map(|(expr, _)| Some(expr)).ok_or_else(|| {
            EsCompatError::InvalidQuery(format!("[date_range] aggregation '{name}': cannot parse date {value}"))
        })
    };
    let ranges = p
        .ranges
        .into_iter()
        .map(|r| {
            Ok(DateRangeBucket {
                from: bound(r.from)?,
                to: bound(r.to)?,
                key: r.key,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(DateRange {
        field: required_field("date_range", name, p.field)?,
        ranges,
        keyed: p.keyed,
        format: p.format,
    })
}

fn ip_range(name: &str, body: &Value) -> Result<IpRange> {
    let p: IpRangeParams = params("ip_range", name, body)?;
    let ranges = p
        .ranges
        .into_iter()
        .map(|r| match r.mask {
            Some(mask) => {
                let (from, to) = cidr_bounds(&mask).ok_or_else(|| {
                    EsCompatError::InvalidQuery(format!("[ip_range] aggregation '{name}': invalid mask '{mask}'"))
                })?;
                Ok(IpRangeBucket {
                    from: Some(from),
                    to,
                    key: Some(r.key.unwrap_or(mask)),
                })
            }
            None => Ok(IpRangeBucket {
                from: r.from,
                to: r.to,
                key: r.key,
            }),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(IpRange {
        field: required_field("ip_range", name, p.field)?,
        ranges,
        keyed: p.keyed,
    })
}

/// First address of a CIDR block and the address just past it; `None`
/// when the block runs to the end of the address space.
fn cidr_bounds(mask: &str) -> Option<(String, Option<String>)> {
    let (addr, len) = mask.split_once('/')?;
    let len: u32 = len.parse().ok()?;
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => {
            let host_bits = 32u32.checked_sub(len)?;
            let size = 1u64 << host_bits;
            let start = u64::from(u32::from(v4)) & !(size - 1);
            let end = u32::try_from(start + size).ok().map(|e| Ipv4Addr::from(e).to_string());
            Some((Ipv4Addr::from(start as u32).to_string(), end))
        }
        IpAddr::V6(v6) => {
            let host_bits = 128u32.checked_sub(len)?;
            let size = 1u128.checked_shl(host_bits).unwrap_or(0);
            let start = if size == 0 { 0 } else { u128::from(v6) & !(size - 1) };
            let end = start.checked_add(size).filter(|_| size != 0).map(|e| Ipv6Addr::from(e).to_string());
            Some((Ipv6Addr::from(start).to_string(), end))
        }
    }
}

fn histogram(name: &str, body: &Value) -> Result<Histogram> {
    let p: HistogramParams = params("histogram", name, body)?;
    if p.interval <= 0.0 {
        return Err(EsCompatError::InvalidQuery(format!(
            "[histogram] aggregation '{name}': interval must be positive"
        )));
    }
    let extended_bounds = p
        .extended_bounds
        .map(|b| match (b.min.as_f64(), b.max.as_f64()) {
            (Some(min), Some(max)) => Ok(HistogramBounds { min, max }),
            _ => Err(EsCompatError::InvalidQuery(format!(
                "[histogram] aggregation '{name}': extended_bounds must be numbers"
            ))),
        })
        .transpose()?;
    Ok(Histogram {
        field: required_field("histogram", name, p.field)?,
        interval: p.interval,
        offset: p.offset.unwrap_or(0.0),
        missing: p.missing,
        min_doc_count: p.min_doc_count.unwrap_or(0),
        extended_bounds,
        order: bucket_order(name, p.order.as_ref())?,
    })
}

fn terms(kind: &str, name: &str, body: &Value) -> Result<Terms> {
    let p: TermsParams = params(kind, name, body)?;
    let mut terms = Terms::new(required_field(kind, name, p.field)?);
    terms.size = p.size;
    terms.missing = p.missing;
    terms.order = bucket_order(name, p.order.as_ref())?;
    terms.min_doc_count = p.min_doc_count.unwrap_or(1);
    terms.include = p.include.as_ref().map(|v| terms_filter(name, v)).transpose()?;
    terms.exclude = p.exclude.as_ref().map(|v| terms_filter(name, v)).transpose()?;
    Ok(terms)
}

fn terms_filter(name: &str, value: &Value) -> Result<TermsFilter> {
    match value {
        Value::String(pattern) => Ok(TermsFilter::Regex(pattern.clone())),
        Value::Array(values) => Ok(TermsFilter::Values(values.clone())),
        _ => Err(EsCompatError::UnsupportedAggregation(format!(
            "partitioned include/exclude in '{name}'"
        ))),
    }
}

/// `order` as one object or a list of single-key objects.
fn bucket_order(name: &str, order: Option<&Value>) -> Result<Vec<BucketOrder>> {
    let entries: Vec<&Map<String, Value>> = match order {
        None => return Ok(Vec::new()),
        Some(Value::Object(map)) => vec![map],
        Some(Value::Array(list)) => list
            .iter()
            .map(|v| {
                v.as_object()
                    .ok_or_else(|| EsCompatError::InvalidQuery(format!("order of '{name}' must hold objects")))
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(EsCompatError::InvalidQuery(format!(
                "order of '{name}' must be an object or an array, got {other}"
            )))
        }
    };

    let mut orders = Vec::new();
    for (key, direction) in entries.into_iter().flatten() {
        let direction = direction.as_str().and_then(Direction::parse).ok_or_else(|| {
            EsCompatError::InvalidQuery(format!("order of '{name}': invalid direction {direction}"))
        })?;
        let key = match key.as_str() {
            "_key" | "_term" => OrderKey::Key,
            "_count" => OrderKey::Count,
            path => OrderKey::Path(path.to_string()),
        };
        orders.push(BucketOrder::new(key, direction));
    }
    Ok(orders)
}

fn composite(name: &str, body: &Value) -> Result<Composite> {
    let p: CompositeParams = params("composite", name, body)?;
    let mut sources = Vec::with_capacity(p.sources.len());
    for source in &p.sources {
        let mut entries = source.iter();
        let (Some((source_name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(EsCompatError::InvalidQuery(format!(
                "composite sources of '{name}' must each have exactly one name"
            )));
        };
        let mut kinds = spec.as_object().into_iter().flatten();
        let (Some((kind, body)), None) = (kinds.next(), kinds.next()) else {
            return Err(EsCompatError::InvalidQuery(format!(
                "composite source '{source_name}' of '{name}' must have exactly one type"
            )));
        };
        let s: CompositeSourceParams = params(kind, source_name, body)?;
        let field = required_field(kind, source_name, s.field)?;
        let kind = match kind.as_str() {
            "terms" => CompositeSourceKind::Terms { field },
            "histogram" => CompositeSourceKind::Histogram {
                field,
                interval: s.interval.as_ref().and_then(Value::as_f64).filter(|i| *i > 0.0).ok_or_else(|| {
                    EsCompatError::InvalidQuery(format!("composite source '{source_name}' needs a positive interval"))
                })?,
            },
            "date_histogram" => {
                let interval = match (&s.fixed_interval, &s.calendar_interval, &s.interval) {
                    (Some(fixed), _, _) => DateInterval::parse_fixed(fixed),
                    (None, Some(calendar), _) => DateInterval::parse_calendar(calendar),
                    (None, None, Some(legacy)) => legacy_interval(legacy),
                    (None, None, None) => None,
                }
                .ok_or_else(|| {
                    EsCompatError::InvalidQuery(format!("composite source '{source_name}' has no valid interval"))
                })?;
                CompositeSourceKind::DateHistogram {
                    field,
                    interval,
                    time_zone: s.time_zone,
                }
            }
            "geotile_grid" => CompositeSourceKind::GeotileGrid {
                field,
                precision: s.precision,
            },
            other => {
                return Err(EsCompatError::UnsupportedAggregation(format!(
                    "composite source type '{other}' in '{name}'"
                )))
            }
        };
        let direction = match s.order.as_deref() {
            None => Direction::Asc,
            Some(order) => Direction::parse(order).ok_or_else(|| {
                EsCompatError::InvalidQuery(format!("composite source '{source_name}': invalid order '{order}'"))
            })?,
        };
        sources.push(CompositeSource {
            name: source_name.clone(),
            kind,
            direction,
            missing_bucket: s.missing_bucket,
        });
    }

    Ok(Composite {
        sources,
        size: p.size,
        after: p
            .after
            .map(|after| after.into_iter().collect())
            .unwrap_or_default(),
    })
}

// ============================================================================
// Metric and pipeline helpers
// ============================================================================

/// `_source` filtering; anything but an include list selects every field.
fn source_includes(source: Option<&Value>) -> Vec<String> {
    let strings = |list: &Vec<Value>| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
    match source {
        Some(Value::String(field)) => vec![field.clone()],
        Some(Value::Array(list)) => strings(list),
        Some(Value::Object(map)) => match map.get("includes").or_else(|| map.get("include")) {
            Some(Value::Array(list)) => strings(list),
            Some(Value::String(field)) => vec![field.clone()],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn sort_fields(name: &str, sort: Option<&Value>) -> Result<Vec<SortField>> {
    let entries: Vec<&Value> = match sort {
        None => return Ok(Vec::new()),
        Some(Value::Array(list)) => list.iter().collect(),
        Some(single) => vec![single],
    };

    let mut fields = Vec::new();
    for entry in entries {
        let (field, direction) = match entry {
            Value::String(field) => (field.clone(), Direction::Asc),
            Value::Object(map) if map.len() == 1 => {
                let Some((field, spec)) = map.iter().next() else {
                    continue;
                };
                let order = match spec {
                    Value::String(order) => Some(order.as_str()),
                    Value::Object(options) => options.get("order").and_then(Value::as_str),
                    _ => None,
                };
                let direction = match order {
                    None => Direction::Asc,
                    Some(order) => Direction::parse(order).ok_or_else(|| {
                        EsCompatError::InvalidQuery(format!("sort of '{name}': invalid order '{order}'"))
                    })?,
                };
                (field.clone(), direction)
            }
            other => {
                return Err(EsCompatError::InvalidQuery(format!(
                    "sort of '{name}' has an invalid entry {other}"
                )))
            }
        };
        if field == "_score" || field == "_doc" {
            warn!(aggregation = name, field = %field, "sort field ignored");
            continue;
        }
        fields.push(SortField { field, direction });
    }
    Ok(fields)
}

fn top_metrics_fields(name: &str, metrics: &Value) -> Result<Vec<String>> {
    let entries: Vec<&Value> = match metrics {
        Value::Array(list) => list.iter().collect(),
        single => vec![single],
    };
    entries
        .into_iter()
        .map(|m| {
            m.get("field")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EsCompatError::MissingField(format!("[top_metrics] aggregation '{name}' needs metrics.field")))
        })
        .collect()
}

/// `buckets_path` as a variable map, or a single path bound to `_value`.
fn script_paths(name: &str, buckets_path: &Value) -> Result<Vec<(String, String)>> {
    match buckets_path {
        Value::String(path) => Ok(vec![("_value".to_string(), path.clone())]),
        Value::Object(map) => map
            .iter()
            .map(|(var, path)| {
                path.as_str()
                    .map(|p| (var.clone(), p.to_string()))
                    .ok_or_else(|| EsCompatError::InvalidQuery(format!("buckets_path.{var} of '{name}' must be a string")))
            })
            .collect(),
        _ => Err(EsCompatError::InvalidQuery(format!(
            "buckets_path of '{name}' must be a string or an object"
        ))),
    }
}

fn script_source(name: &str, script: &Value) -> Result<String> {
    let source = match script {
        Value::String(source) => Some(source.as_str()),
        Value::Object(map) => map.get("source").or_else(|| map.get("inline")).and_then(Value::as_str),
        _ => None,
    };
    source
        .map(str::to_string)
        .ok_or_else(|| EsCompatError::MissingField(format!("[bucket_script] aggregation '{name}' needs script source")))
}
