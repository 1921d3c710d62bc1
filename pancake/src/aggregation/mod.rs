//! Typed aggregation tree.
//!
//! The tree is built once per request (usually by the Elasticsearch layer)
//! and is never mutated by the compiler. Filter predicates arrive already
//! translated to SQL expressions.

pub mod interval;

pub use interval::{choose_auto_interval, CalendarUnit, DateInterval};

use crate::sql::{Direction, Expr};
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;

/// Percents used by `percentiles` when the request lists none.
pub const DEFAULT_PERCENTS: &[f64] = &[1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationNode {
    pub name: String,
    pub kind: AggregationKind,
    /// Child aggregations in request order. Only bucket kinds have any.
    pub children: Vec<AggregationNode>,
    /// Opaque `meta` object echoed back in the response.
    pub meta: Option<Value>,
}

impl AggregationNode {
    pub fn new(name: impl Into<String>, kind: impl Into<AggregationKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            children: Vec::new(),
            meta: None,
        }
    }

    pub fn with_children(mut self, children: Vec<AggregationNode>) -> Self {
        self.children = children;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn bucket(&self) -> Option<&BucketAggregation> {
        match &self.kind {
            AggregationKind::Bucket(b) => Some(b),
            _ => None,
        }
    }

    pub fn metric(&self) -> Option<&MetricAggregation> {
        match &self.kind {
            AggregationKind::Metric(m) => Some(m),
            _ => None,
        }
    }

    pub fn pipeline(&self) -> Option<&PipelineAggregation> {
        match &self.kind {
            AggregationKind::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    /// Checks structural rules for this node and its whole subtree.
    pub fn validate(&self, parent: &[String]) -> Result<()> {
        let mut path = parent.to_vec();
        path.push(self.name.clone());
        let display = path.join(">");

        if self.name.is_empty() || self.name.contains('>') || self.name.contains('[') {
            return Err(Error::invalid(
                &display,
                format!("invalid aggregation name '{}'", self.name),
            ));
        }
        if self.bucket().is_none() && !self.children.is_empty() {
            return Err(Error::invalid(
                &display,
                format!("{} aggregations cannot have sub-aggregations", self.kind.type_name()),
            ));
        }
        for (i, child) in self.children.iter().enumerate() {
            if self.children[..i].iter().any(|c| c.name == child.name) {
                return Err(Error::invalid(
                    &display,
                    format!("duplicate sub-aggregation name '{}'", child.name),
                ));
            }
            child.validate(&path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationKind {
    Bucket(BucketAggregation),
    Metric(MetricAggregation),
    Pipeline(PipelineAggregation),
}

impl AggregationKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bucket(b) => b.type_name(),
            Self::Metric(m) => m.type_name(),
            Self::Pipeline(p) => p.type_name(),
        }
    }
}

impl From<BucketAggregation> for AggregationKind {
    fn from(b: BucketAggregation) -> Self {
        Self::Bucket(b)
    }
}

impl From<MetricAggregation> for AggregationKind {
    fn from(m: MetricAggregation) -> Self {
        Self::Metric(m)
    }
}

impl From<PipelineAggregation> for AggregationKind {
    fn from(p: PipelineAggregation) -> Self {
        Self::Pipeline(p)
    }
}

// ============================================================================
// Bucket aggregations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BucketAggregation {
    DateHistogram(DateHistogram),
    AutoDateHistogram(AutoDateHistogram),
    Histogram(Histogram),
    Terms(Terms),
    MultiTerms(MultiTerms),
    Filter(Expr),
    Filters(Filters),
    Range(Range),
    DateRange(DateRange),
    IpRange(IpRange),
    IpPrefix(IpPrefix),
    Sampler { shard_size: Option<usize> },
    /// Counts are computed over every row; the sampling parameters are
    /// only echoed back.
    RandomSampler { probability: f64, seed: i64 },
    GeotileGrid(GeotileGrid),
    Composite(Composite),
}

impl BucketAggregation {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::DateHistogram(_) => "date_histogram",
            Self::AutoDateHistogram(_) => "auto_date_histogram",
            Self::Histogram(_) => "histogram",
            Self::Terms(t) if t.significant => "significant_terms",
            Self::Terms(_) => "terms",
            Self::MultiTerms(_) => "multi_terms",
            Self::Filter(_) => "filter",
            Self::Filters(_) => "filters",
            Self::Range(_) => "range",
            Self::DateRange(_) => "date_range",
            Self::IpRange(_) => "ip_range",
            Self::IpPrefix(_) => "ip_prefix",
            Self::Sampler { .. } => "sampler",
            Self::RandomSampler { .. } => "random_sampler",
            Self::GeotileGrid(_) => "geotile_grid",
            Self::Composite(_) => "composite",
        }
    }
}

/// Inclusive date range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateBounds {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateHistogram {
    pub field: String,
    pub interval: DateInterval,
    pub time_zone: Option<String>,
    pub min_doc_count: u64,
    pub extended_bounds: Option<DateBounds>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoDateHistogram {
    pub field: String,
    pub buckets: Option<usize>,
    pub time_zone: Option<String>,
    /// Time range the request's query restricts `field` to, if any.
    pub range: Option<DateBounds>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub field: String,
    pub interval: f64,
    pub offset: f64,
    pub missing: Option<Value>,
    pub min_doc_count: u64,
    pub extended_bounds: Option<HistogramBounds>,
    /// Empty means ascending by key.
    pub order: Vec<BucketOrder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKey {
    Key,
    Count,
    /// Path to a sub-aggregation value, e.g. `1`, `stats.avg`, `f>_count`.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketOrder {
    pub key: OrderKey,
    pub direction: Direction,
}

impl BucketOrder {
    pub fn new(key: OrderKey, direction: Direction) -> Self {
        Self { key, direction }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TermsFilter {
    Regex(String),
    Values(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Terms {
    pub field: String,
    pub size: Option<usize>,
    pub missing: Option<Value>,
    /// Empty means descending by count.
    pub order: Vec<BucketOrder>,
    pub min_doc_count: u64,
    pub include: Option<TermsFilter>,
    pub exclude: Option<TermsFilter>,
    /// Compiled exactly like `terms`; kept for the response type name.
    pub significant: bool,
}

impl Terms {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            size: None,
            missing: None,
            order: Vec::new(),
            min_doc_count: 1,
            include: None,
            exclude: None,
            significant: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiTermsSource {
    pub field: String,
    pub missing: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiTerms {
    pub terms: Vec<MultiTermsSource>,
    pub size: Option<usize>,
    pub order: Vec<BucketOrder>,
    pub min_doc_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedFilter {
    pub label: String,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub filters: Vec<NamedFilter>,
    pub keyed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeBucket {
    pub from: Option<f64>,
    pub to: Option<f64>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub field: String,
    pub ranges: Vec<RangeBucket>,
    pub keyed: bool,
}

/// A `date_range` entry. Bounds are SQL date expressions, either absolute
/// or relative to `now()`, so the response reads their evaluated values
/// from the statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRangeBucket {
    pub from: Option<Expr>,
    pub to: Option<Expr>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub field: String,
    pub ranges: Vec<DateRangeBucket>,
    pub keyed: bool,
    /// Output format of the bucket keys, passed through.
    pub format: Option<String>,
}

/// An `ip_range` entry with textual addresses; `to` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct IpRangeBucket {
    pub from: Option<String>,
    pub to: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpRange {
    pub field: String,
    pub ranges: Vec<IpRangeBucket>,
    pub keyed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpPrefix {
    pub field: String,
    pub prefix_length: u32,
    pub is_ipv6: bool,
    pub append_prefix_length: bool,
    pub keyed: bool,
    pub min_doc_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBoundingBox {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeotileGrid {
    pub field: String,
    pub precision: Option<u32>,
    pub size: Option<usize>,
    pub bounds: Option<GeoBoundingBox>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositeSourceKind {
    Terms {
        field: String,
    },
    Histogram {
        field: String,
        interval: f64,
    },
    DateHistogram {
        field: String,
        interval: DateInterval,
        time_zone: Option<String>,
    },
    GeotileGrid {
        field: String,
        precision: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSource {
    pub name: String,
    pub kind: CompositeSourceKind,
    pub direction: Direction,
    pub missing_bucket: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composite {
    pub sources: Vec<CompositeSource>,
    pub size: Option<usize>,
    /// `after` key, one value per source name.
    pub after: Vec<(String, Value)>,
}

// ============================================================================
// Metric aggregations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleMetric {
    Avg,
    Sum,
    Min,
    Max,
    ValueCount,
    Cardinality,
    Stats,
    ExtendedStats,
}

impl SimpleMetric {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::ValueCount => "value_count",
            Self::Cardinality => "cardinality",
            Self::Stats => "stats",
            Self::ExtendedStats => "extended_stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricField {
    pub field: String,
    pub missing: Option<Value>,
}

impl MetricField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            missing: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopHits {
    /// `_source.includes`; empty selects every schema field.
    pub fields: Vec<String>,
    pub size: Option<usize>,
    pub sort: Vec<SortField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopMetrics {
    pub metrics: Vec<String>,
    pub size: Option<usize>,
    pub sort: Vec<SortField>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricAggregation {
    Simple {
        function: SimpleMetric,
        field: MetricField,
    },
    Percentiles {
        field: MetricField,
        percents: Vec<f64>,
        keyed: bool,
    },
    PercentileRanks {
        field: MetricField,
        values: Vec<f64>,
        keyed: bool,
    },
    GeoCentroid {
        field: String,
    },
    GeoBounds {
        field: String,
    },
    TopHits(TopHits),
    TopMetrics(TopMetrics),
}

impl MetricAggregation {
    pub fn simple(function: SimpleMetric, field: impl Into<String>) -> Self {
        Self::Simple {
            function,
            field: MetricField::new(field),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Simple { function, .. } => function.type_name(),
            Self::Percentiles { .. } => "percentiles",
            Self::PercentileRanks { .. } => "percentile_ranks",
            Self::GeoCentroid { .. } => "geo_centroid",
            Self::GeoBounds { .. } => "geo_bounds",
            Self::TopHits(_) => "top_hits",
            Self::TopMetrics(_) => "top_metrics",
        }
    }

    /// `top_hits` and `top_metrics` are answered by their own statement.
    pub fn needs_auxiliary_query(&self) -> bool {
        matches!(self, Self::TopHits(_) | Self::TopMetrics(_))
    }
}

// ============================================================================
// Pipeline aggregations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessKind {
    CumulativeSum,
    Derivative,
    SerialDiff,
    AvgBucket,
    MinBucket,
    MaxBucket,
    SumBucket,
}

impl PostProcessKind {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::CumulativeSum => "cumulative_sum",
            Self::Derivative => "derivative",
            Self::SerialDiff => "serial_diff",
            Self::AvgBucket => "avg_bucket",
            Self::MinBucket => "min_bucket",
            Self::MaxBucket => "max_bucket",
            Self::SumBucket => "sum_bucket",
        }
    }

    /// Sibling pipelines read a multi-bucket path; parent pipelines read a
    /// value of their own bucket.
    pub fn is_sibling(self) -> bool {
        matches!(
            self,
            Self::AvgBucket | Self::MinBucket | Self::MaxBucket | Self::SumBucket
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineAggregation {
    BucketScript {
        /// Script variable name to `buckets_path` reference.
        buckets_path: Vec<(String, String)>,
        script: String,
    },
    PostProcess {
        kind: PostProcessKind,
        buckets_path: String,
        lag: Option<usize>,
    },
}

impl PipelineAggregation {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BucketScript { .. } => "bucket_script",
            Self::PostProcess { kind, .. } => kind.type_name(),
        }
    }
}
