//! Per-node facts for the response builder, collected depth first.

use super::bucket::{auto_interval, geotile_precision, ip_range_label, range_label, MAX_SIZE};
use super::metric::translate_metric;
use super::naming::{range_from_alias, range_to_alias, Path};
use super::output::{DateRangeLabel, IpRangeLabel, NodeDetail, NodeMeta, RangeLabel};
use super::top_hits::translate_top;
use super::CompileContext;
use crate::aggregation::{
    AggregationKind, AggregationNode, BucketAggregation, MetricAggregation, PipelineAggregation,
};
use crate::Result;

pub(crate) fn collect_nodes(ctx: &CompileContext<'_>, roots: &[AggregationNode]) -> Result<Vec<NodeMeta>> {
    let mut nodes = Vec::new();
    for root in roots {
        visit(ctx, root, &Path::root(), &mut nodes)?;
    }
    Ok(nodes)
}

fn visit(ctx: &CompileContext<'_>, node: &AggregationNode, parent: &Path, out: &mut Vec<NodeMeta>) -> Result<()> {
    let path = parent.child(&node.name);
    let (keyed, detail) = match &node.kind {
        AggregationKind::Bucket(bucket) => bucket_detail(ctx, bucket, &path)?,
        AggregationKind::Metric(metric) => (keyed_metric(metric), metric_detail(ctx, metric, &path)?),
        AggregationKind::Pipeline(pipeline) => (false, Some(pipeline_detail(pipeline))),
    };
    out.push(NodeMeta {
        path: path.clone(),
        name: node.name.clone(),
        type_name: node.kind.type_name(),
        keyed,
        meta: node.meta.clone(),
        detail,
    });
    for child in &node.children {
        visit(ctx, child, &path, out)?;
    }
    Ok(())
}

fn keyed_metric(metric: &MetricAggregation) -> bool {
    match metric {
        MetricAggregation::Percentiles { keyed, .. } | MetricAggregation::PercentileRanks { keyed, .. } => *keyed,
        _ => false,
    }
}

fn bucket_detail(
    ctx: &CompileContext<'_>,
    bucket: &BucketAggregation,
    path: &Path,
) -> Result<(bool, Option<NodeDetail>)> {
    let detail = match bucket {
        BucketAggregation::DateHistogram(h) => NodeDetail::DateHistogram {
            interval: h.interval.to_string(),
            time_zone: h.time_zone.clone(),
            min_doc_count: h.min_doc_count,
            extended_bounds: h.extended_bounds,
        },
        BucketAggregation::AutoDateHistogram(h) => NodeDetail::AutoDateHistogram {
            interval: auto_interval(ctx, h).map(|i| i.to_string()),
            buckets: h.buckets.unwrap_or(ctx.config.default_auto_buckets),
        },
        BucketAggregation::Histogram(h) => NodeDetail::Histogram {
            interval: h.interval,
            offset: h.offset,
            min_doc_count: h.min_doc_count,
            extended_bounds: h.extended_bounds,
        },
        BucketAggregation::Terms(t) => NodeDetail::Terms {
            size: t.size.unwrap_or(ctx.config.default_terms_size).min(MAX_SIZE),
            min_doc_count: t.min_doc_count,
            drop_null_key: t.missing.is_none(),
        },
        BucketAggregation::MultiTerms(t) => NodeDetail::Terms {
            size: t.size.unwrap_or(ctx.config.default_terms_size).min(MAX_SIZE),
            min_doc_count: t.min_doc_count,
            drop_null_key: t.terms.iter().all(|s| s.missing.is_none()),
        },
        BucketAggregation::Filter(_) => return Ok((false, None)),
        BucketAggregation::Filters(f) => {
            // same group order as the generated columns
            let mut labels: Vec<String> = f.filters.iter().map(|n| n.label.clone()).collect();
            if f.keyed {
                labels.sort();
            }
            if labels.is_empty() {
                labels.push("*".to_string());
            }
            return Ok((f.keyed, Some(NodeDetail::Filters { labels })));
        }
        BucketAggregation::Range(r) => {
            let ranges = r
                .ranges
                .iter()
                .map(|b| RangeLabel {
                    key: range_label(b),
                    from: b.from,
                    to: b.to,
                })
                .collect();
            return Ok((r.keyed, Some(NodeDetail::Range { ranges })));
        }
        BucketAggregation::DateRange(r) => {
            let base = ctx.names.base(path);
            let ranges = r
                .ranges
                .iter()
                .enumerate()
                .map(|(i, b)| DateRangeLabel {
                    key: b.key.clone(),
                    from_alias: b.from.as_ref().map(|_| range_from_alias(&base, i)),
                    to_alias: b.to.as_ref().map(|_| range_to_alias(&base, i)),
                })
                .collect();
            return Ok((
                r.keyed,
                Some(NodeDetail::DateRange {
                    ranges,
                    format: r.format.clone(),
                }),
            ));
        }
        BucketAggregation::IpRange(r) => {
            let ranges = r
                .ranges
                .iter()
                .map(|b| IpRangeLabel {
                    key: ip_range_label(b),
                    from: b.from.clone(),
                    to: b.to.clone(),
                })
                .collect();
            return Ok((r.keyed, Some(NodeDetail::IpRange { ranges })));
        }
        BucketAggregation::IpPrefix(p) => {
            return Ok((
                p.keyed,
                Some(NodeDetail::IpPrefix {
                    prefix_length: p.prefix_length,
                    is_ipv6: p.is_ipv6,
                    append_prefix_length: p.append_prefix_length,
                    min_doc_count: p.min_doc_count,
                }),
            ));
        }
        BucketAggregation::RandomSampler { probability, seed } => NodeDetail::RandomSampler {
            probability: *probability,
            seed: *seed,
        },
        BucketAggregation::Sampler { shard_size } => NodeDetail::Sampler {
            shard_size: shard_size.unwrap_or(ctx.config.default_sampler_shard_size),
        },
        BucketAggregation::GeotileGrid(g) => NodeDetail::GeotileGrid {
            precision: geotile_precision(ctx, g.precision, path)?,
            drop_null_key: true,
        },
        BucketAggregation::Composite(c) => NodeDetail::Composite {
            sources: c.sources.iter().map(|s| s.name.clone()).collect(),
            size: c.size.unwrap_or(ctx.config.default_composite_size).min(MAX_SIZE),
        },
    };
    Ok((false, Some(detail)))
}

fn metric_detail(ctx: &CompileContext<'_>, metric: &MetricAggregation, path: &Path) -> Result<Option<NodeDetail>> {
    if metric.needs_auxiliary_query() {
        let spec = translate_top(ctx, metric, path)?;
        return Ok(Some(NodeDetail::TopHits {
            fields: spec.fields,
            size: spec.size,
        }));
    }
    let slot = translate_metric(ctx, metric, path)?;
    let names: Vec<String> = slot.columns.into_iter().filter_map(|c| c.value_name).collect();
    Ok((!names.is_empty()).then_some(NodeDetail::Values { names }))
}

fn pipeline_detail(pipeline: &PipelineAggregation) -> NodeDetail {
    match pipeline {
        PipelineAggregation::BucketScript { buckets_path, .. } => NodeDetail::BucketScript {
            variables: buckets_path.iter().map(|(name, _)| name.clone()).collect(),
        },
        PipelineAggregation::PostProcess {
            kind,
            buckets_path,
            lag,
        } => NodeDetail::PostProcess {
            pipeline: *kind,
            buckets_path: buckets_path.clone(),
            source_alias: None,
            lag: *lag,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{DateRange, DateRangeBucket, Filters, SimpleMetric, Terms};
    use crate::sql::Expr;
    use crate::compiler::naming::NameTable;
    use crate::config::CompilerConfig;
    use crate::schema::DynamicSchema;

    fn collect(roots: &[AggregationNode]) -> Vec<NodeMeta> {
        let schema = DynamicSchema::new("t");
        let config = CompilerConfig::default();
        let ctx = CompileContext {
            schema: &schema,
            config: &config,
            names: NameTable::build(roots),
        };
        collect_nodes(&ctx, roots).unwrap()
    }

    #[test]
    fn test_depth_first_order() {
        let roots = vec![
            AggregationNode::new("a", BucketAggregation::Terms(Terms::new("f"))).with_children(vec![
                AggregationNode::new("m", MetricAggregation::simple(SimpleMetric::Stats, "x")),
            ]),
            AggregationNode::new("b", MetricAggregation::simple(SimpleMetric::Avg, "x")),
        ];
        let nodes = collect(&roots);
        let paths: Vec<String> = nodes.iter().map(|n| n.path.to_string()).collect();
        assert_eq!(paths, vec!["a", "a>m", "b"]);
        assert_eq!(
            nodes[0].detail,
            Some(NodeDetail::Terms {
                size: 10,
                min_doc_count: 1,
                drop_null_key: true
            })
        );
        let Some(NodeDetail::Values { names }) = &nodes[1].detail else {
            panic!("stats should list its values");
        };
        assert_eq!(names, &["count", "min", "max", "avg", "sum"]);
        assert!(nodes[2].detail.is_none());
    }

    #[test]
    fn test_empty_filters_has_match_all_label() {
        let roots = vec![AggregationNode::new(
            "f",
            BucketAggregation::Filters(Filters {
                filters: vec![],
                keyed: true,
            }),
        )];
        let nodes = collect(&roots);
        assert!(nodes[0].keyed);
        assert_eq!(
            nodes[0].detail,
            Some(NodeDetail::Filters {
                labels: vec!["*".to_string()]
            })
        );
    }

    #[test]
    fn test_date_range_labels_point_at_bound_columns() {
        let roots = vec![AggregationNode::new(
            "d",
            BucketAggregation::DateRange(DateRange {
                field: "ts".into(),
                ranges: vec![
                    DateRangeBucket {
                        from: None,
                        to: Some(Expr::raw("now()")),
                        key: None,
                    },
                    DateRangeBucket {
                        from: Some(Expr::raw("now()")),
                        to: None,
                        key: Some("future".into()),
                    },
                ],
                keyed: true,
                format: None,
            }),
        )];
        let nodes = collect(&roots);
        assert!(nodes[0].keyed);
        let Some(NodeDetail::DateRange { ranges, .. }) = &nodes[0].detail else {
            panic!("date_range should describe its ranges");
        };
        assert_eq!(ranges[0].from_alias, None);
        assert_eq!(ranges[0].to_alias.as_deref(), Some("aggr__d__range_0_to"));
        assert_eq!(ranges[1].from_alias.as_deref(), Some("aggr__d__range_1_from"));
        assert_eq!(ranges[1].key.as_deref(), Some("future"));
    }
}
