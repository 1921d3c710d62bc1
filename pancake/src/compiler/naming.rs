//! Node paths and the SQL aliases derived from them.
//!
//! Every alias is a pure function of a node's base name, and base names are
//! assigned once per request by [`NameTable`], so the main statement and
//! every auxiliary statement agree on column names.

use crate::aggregation::AggregationNode;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const TOTAL_COUNT_ALIAS: &str = "metric____quesma_total_count_col_0";
pub const TOP_HITS_RANK_ALIAS: &str = "top_hits_rank";
pub const TOP_HITS_GROUP_TABLE: &str = "quesma_top_hits_group_table";
pub const TOP_HITS_JOIN: &str = "quesma_top_hits_join";

/// A node's position: aggregation names from the request root down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(">"))
    }
}

/// Request-scoped table of collision-free base names.
#[derive(Debug, Default)]
pub struct NameTable {
    bases: HashMap<Path, String>,
}

impl NameTable {
    /// Assigns a base name to every node, depth first in request order.
    pub fn build(roots: &[AggregationNode]) -> Self {
        let mut table = Self::default();
        let mut used = HashSet::new();
        table.assign(roots, &Path::root(), &mut used);
        table
    }

    fn assign(&mut self, nodes: &[AggregationNode], parent: &Path, used: &mut HashSet<String>) {
        for node in nodes {
            let path = parent.child(&node.name);
            let joined = path.segments().join("__");
            let mut base = joined.clone();
            let mut suffix = 2;
            while !used.insert(base.clone()) {
                base = format!("{joined}{suffix}");
                suffix += 1;
            }
            self.bases.insert(path.clone(), base);
            self.assign(&node.children, &path, used);
        }
    }

    pub fn base(&self, path: &Path) -> String {
        self.bases
            .get(path)
            .cloned()
            .unwrap_or_else(|| path.segments().join("__"))
    }
}

pub fn bucket_prefix(base: &str) -> String {
    format!("aggr__{base}__")
}

pub fn key_alias(base: &str, i: usize) -> String {
    format!("aggr__{base}__key_{i}")
}

pub fn count_alias(base: &str) -> String {
    format!("aggr__{base}__count")
}

pub fn parent_count_alias(base: &str) -> String {
    format!("aggr__{base}__parent_count")
}

pub fn order_alias(base: &str, i: usize) -> String {
    format!("aggr__{base}__order_{i}")
}

pub fn rank_alias(base: &str) -> String {
    format!("aggr__{base}__order_1_rank")
}

pub fn metric_alias(base: &str, i: usize) -> String {
    format!("metric__{base}_col_{i}")
}

pub fn top_hits_alias(base: &str, i: usize) -> String {
    format!("top_hits__{base}_col_{i}")
}

pub fn top_metrics_alias(base: &str, i: usize) -> String {
    format!("top_metrics__{base}_col_{i}")
}

pub fn filter_group_prefix(i: usize) -> String {
    format!("filter_{i}__")
}

pub fn range_group_prefix(i: usize) -> String {
    format!("range_{i}__")
}

pub fn range_from_alias(base: &str, i: usize) -> String {
    format!("aggr__{base}__range_{i}_from")
}

pub fn range_to_alias(base: &str, i: usize) -> String {
    format!("aggr__{base}__range_{i}_to")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BucketAggregation, MetricAggregation, SimpleMetric, Terms};

    fn terms(name: &str, children: Vec<AggregationNode>) -> AggregationNode {
        AggregationNode::new(name, BucketAggregation::Terms(Terms::new("f"))).with_children(children)
    }

    fn sum(name: &str) -> AggregationNode {
        AggregationNode::new(name, MetricAggregation::simple(SimpleMetric::Sum, "x"))
    }

    #[test]
    fn test_alias_formats() {
        assert_eq!(key_alias("0", 0), "aggr__0__key_0");
        assert_eq!(count_alias("2__8"), "aggr__2__8__count");
        assert_eq!(parent_count_alias("0"), "aggr__0__parent_count");
        assert_eq!(rank_alias("2"), "aggr__2__order_1_rank");
        assert_eq!(metric_alias("0__1", 0), "metric__0__1_col_0");
        assert_eq!(top_metrics_alias("1__2__4", 0), "top_metrics__1__2__4_col_0");
        assert_eq!(range_from_alias("3", 1), "aggr__3__range_1_from");
        assert_eq!(range_to_alias("3", 1), "aggr__3__range_1_to");
        assert_eq!(
            format!("{}{}", filter_group_prefix(0), count_alias("time_offset_split")),
            "filter_0__aggr__time_offset_split__count"
        );
    }

    #[test]
    fn test_bases_follow_paths() {
        let roots = vec![terms("0", vec![sum("1")]), sum("2")];
        let table = NameTable::build(&roots);
        assert_eq!(table.base(&Path::new(["0"])), "0");
        assert_eq!(table.base(&Path::new(["0", "1"])), "0__1");
        assert_eq!(table.base(&Path::new(["2"])), "2");
    }

    #[test]
    fn test_collisions_get_numeric_suffix() {
        // "a__b" at the root collides with b under a
        let roots = vec![terms("a", vec![sum("b")]), sum("a__b")];
        let table = NameTable::build(&roots);
        assert_eq!(table.base(&Path::new(["a", "b"])), "a__b");
        assert_eq!(table.base(&Path::new(["a__b"])), "a__b2");
    }

    #[test]
    fn test_same_request_same_names() {
        let roots = vec![terms("x", vec![terms("y", vec![sum("z")])])];
        let a = NameTable::build(&roots);
        let b = NameTable::build(&roots);
        let p = Path::new(["x", "y", "z"]);
        assert_eq!(a.base(&p), b.base(&p));
    }

    #[test]
    fn test_path_display() {
        assert_eq!(Path::new(["a", "b"]).to_string(), "a>b");
        assert_eq!(Path::new(["a", "b"]).name(), "b");
        assert!(Path::root().is_root());
    }
}
