//! Compiler output: SQL statements plus the metadata a response builder
//! needs to fold result rows back into the aggregation tree.

use super::naming::Path;
use crate::aggregation::{DateBounds, HistogramBounds, PostProcessKind};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompiledAggregation {
    /// Main statement first (when the request has one), then auxiliary
    /// statements in request order.
    pub statements: Vec<Statement>,
    /// Every aggregation node, depth first in request order.
    pub nodes: Vec<NodeMeta>,
}

impl CompiledAggregation {
    pub fn main(&self) -> Option<&Statement> {
        self.statements
            .first()
            .filter(|s| s.kind == StatementKind::Main)
    }

    pub fn auxiliary(&self) -> impl Iterator<Item = &Statement> {
        self.statements
            .iter()
            .filter(|s| s.kind != StatementKind::Main)
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn node(&self, path: &Path) -> Option<&NodeMeta> {
        self.nodes.iter().find(|n| &n.path == path)
    }

    /// First column with `alias` across all statements.
    pub fn column(&self, alias: &str) -> Option<&ColumnMeta> {
        self.statements
            .iter()
            .flat_map(|s| &s.columns)
            .find(|c| c.alias == alias)
    }

    /// All SQL text, one statement per line.
    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub sql: String,
    pub kind: StatementKind,
    /// Output columns in select order.
    pub columns: Vec<ColumnMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatementKind {
    Main,
    /// A bucket that could not share the main statement's grouping.
    Sibling,
    TopHits {
        metric_path: Path,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub alias: String,
    /// Node that owns the column.
    pub path: Path,
    pub role: ColumnRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_name: Option<String>,
    /// Combinator group labels, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "index", rename_all = "snake_case")]
pub enum ColumnRole {
    Key(usize),
    Count,
    ParentCount,
    Metric(usize),
    Rank,
    OrderBy(usize),
    TopHits(usize),
    TopHitsRank,
    Pipeline,
    TotalCount,
    /// Evaluated lower bound of the indexed `date_range` entry.
    RangeFrom(usize),
    RangeTo(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMeta {
    pub path: Path,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub keyed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<NodeDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeLabel {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRangeLabel {
    /// Requested key; otherwise built from the evaluated bounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpRangeLabel {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Per-type facts the response builder needs besides the SQL rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDetail {
    DateHistogram {
        interval: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_zone: Option<String>,
        min_doc_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        extended_bounds: Option<DateBounds>,
    },
    AutoDateHistogram {
        /// Unset when the range was unknown and one bucket is returned.
        #[serde(skip_serializing_if = "Option::is_none")]
        interval: Option<String>,
        buckets: usize,
    },
    Histogram {
        interval: f64,
        offset: f64,
        min_doc_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        extended_bounds: Option<HistogramBounds>,
    },
    Terms {
        size: usize,
        min_doc_count: u64,
        /// Null keys are dropped unless a `missing` value was given.
        drop_null_key: bool,
    },
    Filters {
        labels: Vec<String>,
    },
    Range {
        ranges: Vec<RangeLabel>,
    },
    DateRange {
        ranges: Vec<DateRangeLabel>,
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    IpRange {
        ranges: Vec<IpRangeLabel>,
    },
    IpPrefix {
        prefix_length: u32,
        is_ipv6: bool,
        append_prefix_length: bool,
        min_doc_count: u64,
    },
    GeotileGrid {
        precision: u32,
        drop_null_key: bool,
    },
    Composite {
        sources: Vec<String>,
        size: usize,
    },
    Sampler {
        shard_size: usize,
    },
    RandomSampler {
        probability: f64,
        seed: i64,
    },
    /// Sub-value names of a multi-value metric.
    Values {
        names: Vec<String>,
    },
    TopHits {
        fields: Vec<String>,
        size: usize,
    },
    BucketScript {
        variables: Vec<String>,
    },
    PostProcess {
        pipeline: PostProcessKind,
        buckets_path: String,
        /// Column the pipeline reads, once resolved.
        #[serde(skip_serializing_if = "Option::is_none")]
        source_alias: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lag: Option<usize>,
    },
}
