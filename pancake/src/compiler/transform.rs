//! Aggregation tree to pancakes.
//!
//! Children are visited in name order. At each level the metrics and
//! pipelines stay on the current layer and the first bucket child extends
//! the chain. Every other bucket child starts a sibling pancake that
//! repeats the enclosing buckets without their metrics, and every
//! `top_hits`/`top_metrics` child gets a pancake of its own.

use super::bucket::translate_bucket;
use super::layer::{
    BucketSql, CombinatorKind, MetricColumn, MetricSlot, PancakeKind, PancakeLayer, PancakeModel,
    PipelineSlot, TopHitsSlot,
};
use super::metric::translate_metric;
use super::naming::Path;
use super::top_hits::translate_top;
use super::CompileContext;
use crate::aggregation::{AggregationKind, AggregationNode, BucketAggregation};
use crate::sql::Expr;
use crate::{Error, Result};
use tracing::debug;

pub(crate) struct PancakeTransformer<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    where_clause: Option<Expr>,
    total_count: bool,
    pancakes: Vec<PancakeModel>,
}

impl<'c, 'a> PancakeTransformer<'c, 'a> {
    pub(crate) fn new(ctx: &'c CompileContext<'a>, where_clause: Option<Expr>, total_count: bool) -> Self {
        Self {
            ctx,
            where_clause,
            total_count,
            pancakes: Vec::new(),
        }
    }

    /// Flattens the request into pancakes; the main pancake comes first.
    pub(crate) fn transform(mut self, roots: &[AggregationNode]) -> Result<Vec<PancakeModel>> {
        self.expand(&[], roots, &Path::root(), PancakeKind::Main)?;
        Ok(self.pancakes)
    }

    fn expand(
        &mut self,
        prefix: &[PancakeLayer],
        children: &[AggregationNode],
        parent: &Path,
        kind: PancakeKind,
    ) -> Result<()> {
        let mut sorted: Vec<&AggregationNode> = children.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut layer = PancakeLayer::default();
        let mut tops = Vec::new();
        let mut next: Option<(&AggregationNode, &BucketAggregation)> = None;
        let mut siblings = Vec::new();

        for node in sorted {
            let path = parent.child(&node.name);
            match &node.kind {
                AggregationKind::Metric(metric) if metric.needs_auxiliary_query() => {
                    tops.push(TopHitsSlot {
                        base: self.ctx.names.base(&path),
                        spec: translate_top(self.ctx, metric, &path)?,
                        path,
                    });
                }
                AggregationKind::Metric(metric) => {
                    layer.metrics.push(translate_metric(self.ctx, metric, &path)?);
                }
                AggregationKind::Pipeline(pipeline) => layer.pipelines.push(PipelineSlot {
                    base: self.ctx.names.base(&path),
                    path,
                    pipeline: pipeline.clone(),
                }),
                AggregationKind::Bucket(bucket) => match (next, bucket) {
                    (None, _) => next = Some((node, bucket)),
                    (Some(_), BucketAggregation::Filter(predicate)) if node.children.is_empty() => {
                        layer.metrics.push(self.filter_as_metric(&path, predicate));
                    }
                    _ => siblings.push((node, bucket)),
                },
            }
        }

        if kind == PancakeKind::Main && parent.is_root() && self.total_count {
            layer.metrics.insert(0, total_count_slot());
        }

        let stripped: Vec<PancakeLayer> = prefix.iter().map(PancakeLayer::without_metrics).collect();

        let mut layers = prefix.to_vec();
        match next {
            Some((node, bucket)) => {
                let path = parent.child(&node.name);
                layer.bucket = Some(translate_bucket(self.ctx, node, bucket, &path)?);
                layers.push(layer);
                self.expand(&layers, &node.children, &path, kind)?;
            }
            None => {
                layers.push(layer);
                self.finish(layers, kind, None)?;
            }
        }

        for top in tops {
            let mut layers = stripped.clone();
            layers.push(PancakeLayer::default());
            self.finish(layers, PancakeKind::TopHits, Some(top))?;
        }

        for (node, bucket) in siblings {
            let path = parent.child(&node.name);
            let mut layers = stripped.clone();
            layers.push(PancakeLayer {
                bucket: Some(translate_bucket(self.ctx, node, bucket, &path)?),
                ..Default::default()
            });
            self.expand(&layers, &node.children, &path, PancakeKind::Sibling)?;
        }
        Ok(())
    }

    /// A childless `filter` next to another bucket only needs its count.
    fn filter_as_metric(&self, path: &Path, predicate: &Expr) -> MetricSlot {
        MetricSlot {
            path: path.clone(),
            base: self.ctx.names.base(path),
            type_name: "filter",
            columns: vec![MetricColumn {
                expr: Expr::function("countIf", vec![predicate.clone()]),
                value_name: None,
            }],
        }
    }

    fn finish(&mut self, mut layers: Vec<PancakeLayer>, mut kind: PancakeKind, top: Option<TopHitsSlot>) -> Result<()> {
        let sample_limit = match layers.first().and_then(|l| l.bucket.as_ref()).map(|b| &b.sql) {
            Some(BucketSql::Sampler(limit)) => Some(*limit),
            _ => None,
        };
        // the row cap wraps the whole statement, so it only fits the first level
        for layer in layers.iter().skip(1) {
            if let Some(bucket) = &layer.bucket {
                if matches!(bucket.sql, BucketSql::Sampler(_)) {
                    return Err(Error::unsupported(&bucket.path, "sampler below the first layer"));
                }
            }
        }

        // root metrics and the total count are not sampler descendants
        if sample_limit.is_some() && !layers[0].metrics.is_empty() {
            let unsampled = PancakeLayer {
                metrics: std::mem::take(&mut layers[0].metrics),
                ..Default::default()
            };
            self.push(PancakeModel {
                kind: kind.clone(),
                layers: vec![unsampled],
                where_clause: self.where_clause.clone(),
                sample_limit: None,
                top: None,
            })?;
            if kind == PancakeKind::Main {
                kind = PancakeKind::Sibling;
            }
        }

        self.push(PancakeModel {
            kind,
            layers,
            where_clause: self.where_clause.clone(),
            sample_limit,
            top,
        })
    }

    fn push(&mut self, mut model: PancakeModel) -> Result<()> {
        if model.is_empty() {
            return Ok(());
        }

        let first = &model.layers[0];
        let moved = match first.bucket.as_ref().and_then(|b| b.combinator()) {
            Some((CombinatorKind::Filter, groups)) if model.filter_moves_to_where() => {
                Expr::and_all(groups.iter().map(|g| g.predicate.clone()))
            }
            // rows outside every filters group cannot contribute to any column
            Some((CombinatorKind::Filters, groups)) if first.metrics.is_empty() && first.pipelines.is_empty() => {
                Expr::or_all(groups.iter().map(|g| g.predicate.clone()))
            }
            _ => None,
        };
        model.where_clause = Expr::and_opt(model.where_clause.take(), moved);

        model.validate()?;
        debug!(
            kind = ?model.kind,
            layers = model.layers.len(),
            sampled = model.sample_limit.is_some(),
            "built pancake"
        );
        self.pancakes.push(model);
        Ok(())
    }
}

fn total_count_slot() -> MetricSlot {
    MetricSlot {
        path: Path::root(),
        base: String::new(),
        type_name: "value_count",
        columns: vec![MetricColumn {
            expr: Expr::count_star(),
            value_name: None,
        }],
    }
}
