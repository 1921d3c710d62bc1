//! Flattened representation of one pancake.
//!
//! A pancake is a list of layers. Layer `i` holds the metrics and pipelines
//! that live directly under the bucket of layer `i - 1` (layer 0 is the
//! request root) and, optionally, the bucket aggregation that opens layer
//! `i + 1`. The last layer never has a bucket.

use super::naming::Path;
use super::top_hits::AuxiliaryQuerySpec;
use crate::aggregation::PipelineAggregation;
use crate::sql::{Direction, Expr};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PancakeKind {
    Main,
    Sibling,
    TopHits,
}

#[derive(Debug, Clone)]
pub struct PancakeModel {
    pub kind: PancakeKind,
    pub layers: Vec<PancakeLayer>,
    pub where_clause: Option<Expr>,
    pub sample_limit: Option<usize>,
    /// Set for `PancakeKind::TopHits`; the hit metric sits in the last layer.
    pub top: Option<TopHitsSlot>,
}

#[derive(Debug, Clone, Default)]
pub struct PancakeLayer {
    pub metrics: Vec<MetricSlot>,
    pub pipelines: Vec<PipelineSlot>,
    pub bucket: Option<BucketSlot>,
}

impl PancakeLayer {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.pipelines.is_empty() && self.bucket.is_none()
    }

    /// Copy used by sibling pancakes: buckets only.
    pub fn without_metrics(&self) -> Self {
        Self {
            metrics: Vec::new(),
            pipelines: Vec::new(),
            bucket: self.bucket.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BucketSlot {
    pub path: Path,
    pub base: String,
    pub type_name: &'static str,
    pub sql: BucketSql,
}

impl BucketSlot {
    pub fn grouped(&self) -> Option<&GroupedBucket> {
        match &self.sql {
            BucketSql::Grouped(g) => Some(g),
            _ => None,
        }
    }

    pub fn has_group_by(&self) -> bool {
        self.grouped().is_some()
    }

    pub fn combinator(&self) -> Option<(CombinatorKind, &[CombinatorGroup])> {
        match &self.sql {
            BucketSql::Combinator { kind, groups } => Some((*kind, groups)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BucketSql {
    /// Contributes `GROUP BY` keys.
    Grouped(GroupedBucket),
    /// Splits every column beneath it into one conditional copy per group.
    Combinator {
        kind: CombinatorKind,
        groups: Vec<CombinatorGroup>,
    },
    /// Caps the scanned rows with a derived table.
    Sampler(usize),
    /// A single bucket over the parent's rows.
    Ungrouped,
}

#[derive(Debug, Clone)]
pub struct GroupedBucket {
    pub keys: Vec<Expr>,
    pub order: Vec<BucketOrdering>,
    /// Requested bucket count; `None` keeps every bucket.
    pub limit: Option<usize>,
    /// Terms-like buckets expose the parent's total for `sum_other_doc_count`.
    pub parent_count: bool,
    /// Composite `after` predicate over the key expressions.
    pub after: Option<Expr>,
}

impl GroupedBucket {
    fn ordered_by_keys(&self) -> bool {
        self.order.iter().all(|o| matches!(o.target, OrderTarget::Key(_)))
    }

    /// Rows outside a `filter` still form groups with a zero count; those
    /// must sort after every real group when the bucket count is capped.
    fn zero_counts_rank_last(&self) -> bool {
        self.limit.is_none()
            || matches!(
                self.order.first(),
                Some(BucketOrdering {
                    target: OrderTarget::Count,
                    direction: Direction::Desc,
                })
            )
    }
}

#[derive(Debug, Clone)]
pub enum OrderTarget {
    Key(usize),
    Count,
    /// A sub-aggregation value. `fallback` is the value's own SQL for
    /// pancakes that do not carry the sub-aggregation column.
    Metric {
        reference: String,
        fallback: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct BucketOrdering {
    pub target: OrderTarget,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinatorKind {
    Filter,
    Filters,
    Range,
}

#[derive(Debug, Clone)]
pub struct CombinatorGroup {
    /// Alias prefix, empty for a single `filter`.
    pub prefix: String,
    pub label: String,
    pub predicate: Expr,
    /// Date bounds reported back as epoch millis; `date_range` only.
    pub bounds: Vec<(RangeEdge, Expr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeEdge {
    From,
    To,
}

#[derive(Debug, Clone)]
pub struct MetricColumn {
    pub expr: Expr,
    /// Sub-value name for multi-value metrics (`avg`, `50.0`, ...).
    pub value_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricSlot {
    pub path: Path,
    pub base: String,
    pub type_name: &'static str,
    pub columns: Vec<MetricColumn>,
}

#[derive(Debug, Clone)]
pub struct PipelineSlot {
    pub path: Path,
    pub base: String,
    pub pipeline: PipelineAggregation,
}

#[derive(Debug, Clone)]
pub struct TopHitsSlot {
    pub path: Path,
    pub base: String,
    pub spec: AuxiliaryQuerySpec,
}

impl PancakeModel {
    /// No bucket, metric, pipeline or hits to compute.
    pub fn is_empty(&self) -> bool {
        self.top.is_none() && self.layers.iter().all(PancakeLayer::is_empty)
    }

    /// True when the first layer is a lone `filter` whose predicate can be
    /// moved into `WHERE` instead of acting as a combinator.
    pub fn filter_moves_to_where(&self) -> bool {
        let Some(first) = self.layers.first() else {
            return false;
        };
        self.layers.len() > 1
            && first.metrics.is_empty()
            && first.pipelines.is_empty()
            && matches!(
                first.bucket.as_ref().and_then(BucketSlot::combinator),
                Some((CombinatorKind::Filter, _))
            )
    }

    /// Rejects shapes the single-statement flattening cannot express.
    pub fn validate(&self) -> Result<()> {
        let moved = self.filter_moves_to_where();
        // innermost combinator, and outermost one that prefixes aliases
        let mut combinator: Option<&BucketSlot> = None;
        let mut prefixing: Option<&BucketSlot> = None;
        let mut under_filters = false;

        for (i, layer) in self.layers.iter().enumerate() {
            if let (Some(outer), Some(pipeline)) = (prefixing, layer.pipelines.first()) {
                return Err(Error::unsupported(
                    &pipeline.path,
                    format!("pipeline aggregation under {} '{}'", outer.type_name, outer.path),
                ));
            }
            let Some(bucket) = &layer.bucket else {
                continue;
            };
            if i == 0 && moved {
                continue;
            }
            if let Some(outer) = combinator {
                match &bucket.sql {
                    BucketSql::Grouped(g) => Self::check_nested_grouping(bucket, g, outer, prefixing)?,
                    BucketSql::Combinator {
                        kind: CombinatorKind::Filters,
                        ..
                    } if under_filters => {
                        return Err(Error::unsupported(
                            &bucket.path,
                            format!("filters nested under filters '{}'", outer.path),
                        ));
                    }
                    _ => {}
                }
            }
            if let Some((kind, _)) = bucket.combinator() {
                combinator = Some(bucket);
                if kind != CombinatorKind::Filter && prefixing.is_none() {
                    prefixing = Some(bucket);
                }
                under_filters |= kind == CombinatorKind::Filters;
            }
        }

        if let (Some(top), Some(outer)) = (&self.top, combinator) {
            return Err(Error::unsupported(
                &top.path,
                format!("top hits under {} '{}'", outer.type_name, outer.path),
            ));
        }
        Ok(())
    }

    /// Group keys are shared by every combinator group while counts and
    /// metrics are split per group. A nested grouping therefore works only
    /// when its ranking does not depend on the split columns.
    fn check_nested_grouping(
        bucket: &BucketSlot,
        grouped: &GroupedBucket,
        outer: &BucketSlot,
        prefixing: Option<&BucketSlot>,
    ) -> Result<()> {
        let nested = |what: &str, under: &BucketSlot| {
            Err(Error::unsupported(
                &bucket.path,
                format!("{} {what} cannot be nested under {} '{}'", bucket.type_name, under.type_name, under.path),
            ))
        };
        if grouped.after.is_some() {
            return nested("with an after key", outer);
        }
        if let Some(split) = prefixing {
            if grouped.limit.is_some() {
                return nested("with a size", split);
            }
            if !grouped.ordered_by_keys() {
                return nested("ordered by count or a sub-aggregation", split);
            }
        }
        if !grouped.zero_counts_rank_last() {
            return nested("with a size and an order other than descending count", outer);
        }
        Ok(())
    }
}
