//! `buckets_path` resolution.
//!
//! Same-row references (`bucket_script`, ordering by a sub-aggregation) are
//! resolved against one pancake's layers. Post-processing pipelines are
//! resolved after generation against every statement's column metadata,
//! since their source may live in a sibling statement.

use super::bucket::value_names_match;
use super::layer::{BucketSlot, BucketSql, CombinatorKind, MetricSlot, PancakeModel, PipelineSlot};
use super::naming::{count_alias, metric_alias, Path, TOTAL_COUNT_ALIAS};
use super::output::{ColumnRole, NodeDetail, NodeMeta, Statement};
use super::script::parse_script;
use crate::aggregation::PipelineAggregation;
use crate::sql::Expr;
use crate::{Error, Result};
use std::collections::HashMap;

/// Last segment of a `buckets_path`.
#[derive(Debug, PartialEq)]
enum Target<'a> {
    Count,
    Metric { name: &'a str, sub: Option<&'a str> },
}

/// Splits `a>b>metric.sub` into bucket segments and the final target.
fn split_reference(reference: &str) -> (Vec<&str>, Target<'_>) {
    let mut segments: Vec<&str> = reference.split('>').collect();
    let last = segments.pop().unwrap_or_default();
    let target = if last == "_count" || last == "_doc_count" {
        Target::Count
    } else if let Some(open) = last.find('[').filter(|_| last.ends_with(']')) {
        Target::Metric {
            name: &last[..open],
            sub: Some(&last[open + 1..last.len() - 1]),
        }
    } else {
        Target::Metric {
            name: last,
            sub: None,
        }
    };
    (segments, target)
}

fn metric_column(slot: &MetricSlot, sub: Option<&str>) -> Option<usize> {
    match sub {
        None => (!slot.columns.is_empty()).then_some(0),
        Some(sub) => slot
            .columns
            .iter()
            .position(|c| c.value_name.as_deref().is_some_and(|v| value_names_match(v, sub))),
    }
}

/// Finds `name` (or `name.sub` when `name` itself is not a metric) among
/// a layer's metrics.
fn find_metric<'a>(metrics: &'a [MetricSlot], name: &str, sub: Option<&str>) -> Option<(&'a MetricSlot, usize)> {
    if let Some(slot) = metrics.iter().find(|m| m.path.name() == name) {
        return metric_column(slot, sub).map(|i| (slot, i));
    }
    let (name, sub) = name.split_once('.')?;
    let slot = metrics.iter().find(|m| m.path.name() == name)?;
    metric_column(slot, Some(sub)).map(|i| (slot, i))
}

fn column_alias(slot: &MetricSlot, index: usize) -> String {
    if slot.path.is_root() {
        TOTAL_COUNT_ALIAS.to_string()
    } else {
        metric_alias(&slot.base, index)
    }
}

/// Resolves a same-row reference made from layer `layer` of `model`.
///
/// Walking through a grouped bucket would make the value multi-valued per
/// row, which a single column cannot express.
pub(crate) fn resolve_in_model(
    model: &PancakeModel,
    layer: usize,
    reference: &str,
    owner: &Path,
) -> Result<String> {
    let unresolvable = || Error::UnresolvableBucketsPath {
        path: owner.to_string(),
        reference: reference.to_string(),
    };
    let (segments, target) = split_reference(reference);

    let mut current = layer;
    let mut bucket: Option<&BucketSlot> = layer
        .checked_sub(1)
        .and_then(|i| model.layers.get(i))
        .and_then(|l| l.bucket.as_ref());

    for (i, segment) in segments.iter().enumerate() {
        let here = model.layers.get(current).ok_or_else(unresolvable)?;
        match here.bucket.as_ref().filter(|b| b.path.name() == *segment) {
            Some(b) => {
                match &b.sql {
                    BucketSql::Grouped(_) => {
                        return Err(Error::unsupported(
                            owner,
                            format!("buckets_path '{reference}' crosses multi-bucket aggregation '{}'", b.path),
                        ))
                    }
                    BucketSql::Combinator { kind, .. } if *kind != CombinatorKind::Filter => {
                        return Err(Error::unsupported(
                            owner,
                            format!("buckets_path '{reference}' crosses {} '{}'", b.type_name, b.path),
                        ))
                    }
                    _ => {}
                }
                bucket = Some(b);
                current += 1;
            }
            None => {
                // a childless filter sibling compiled to a countIf metric
                let is_last = i + 1 == segments.len();
                if is_last && target == Target::Count {
                    if let Some(slot) = here.metrics.iter().find(|m| m.path.name() == *segment && m.type_name == "filter") {
                        return Ok(column_alias(slot, 0));
                    }
                }
                return Err(unresolvable());
            }
        }
    }

    match target {
        Target::Count => bucket
            .map(|b| count_alias(&b.base))
            .ok_or_else(unresolvable),
        Target::Metric { name, sub } => {
            let here = model.layers.get(current).ok_or_else(unresolvable)?;
            find_metric(&here.metrics, name, sub)
                .map(|(slot, i)| column_alias(slot, i))
                .ok_or_else(unresolvable)
        }
    }
}

/// SQL column of a `bucket_script` living in `layer`.
pub(crate) fn bucket_script_column(
    model: &PancakeModel,
    layer: usize,
    slot: &PipelineSlot,
) -> Result<Option<Expr>> {
    let PipelineAggregation::BucketScript {
        buckets_path,
        script,
    } = &slot.pipeline
    else {
        return Ok(None);
    };
    if layer == 0 {
        return Err(Error::unsupported(
            &slot.path,
            "bucket_script must be nested in a multi-bucket aggregation",
        ));
    }

    let mut variables = HashMap::new();
    for (name, reference) in buckets_path {
        let alias = resolve_in_model(model, layer, reference, &slot.path)?;
        variables.insert(name.clone(), alias);
    }
    let expr = parse_script(script)
        .and_then(|s| s.to_sql(&variables))
        .map_err(|e| Error::unsupported(&slot.path, e.to_string()))?;
    Ok(Some(expr))
}

/// Resolves a post-processing reference made from `parent` against the
/// output columns of every statement.
fn resolve_in_columns(parent: &Path, reference: &str, statements: &[Statement]) -> Option<String> {
    let (segments, target) = split_reference(reference);
    let mut path = parent.clone();
    for segment in segments {
        path = path.child(segment);
    }
    let columns = || statements.iter().flat_map(|s| &s.columns);
    let by_role = |path: &Path, role: ColumnRole| {
        columns().find(|c| &c.path == path && c.role == role && c.groups.is_empty())
    };

    match target {
        Target::Count => by_role(&path, ColumnRole::Count)
            .or_else(|| by_role(&path, ColumnRole::Metric(0)))
            .map(|c| c.alias.clone()),
        Target::Metric { name, sub } => {
            let lookup = |name: &str, sub: Option<&str>| {
                let metric = path.child(name);
                columns()
                    .filter(|c| c.path == metric && matches!(c.role, ColumnRole::Metric(_)) && c.groups.is_empty())
                    .find(|c| match sub {
                        None => c.role == ColumnRole::Metric(0),
                        Some(sub) => c.value_name.as_deref().is_some_and(|v| value_names_match(v, sub)),
                    })
                    .map(|c| c.alias.clone())
            };
            lookup(name, sub).or_else(|| {
                let (name, sub) = name.split_once('.')?;
                lookup(name, Some(sub))
            })
        }
    }
}

/// Fills in the source column of every post-processing pipeline node.
pub(crate) fn resolve_post_processing(nodes: &mut [NodeMeta], statements: &[Statement]) -> Result<()> {
    for node in nodes.iter_mut() {
        let Some(NodeDetail::PostProcess {
            pipeline,
            buckets_path,
            source_alias,
            ..
        }) = &mut node.detail
        else {
            continue;
        };
        let parent = Path::new(node.path.segments()[..node.path.len() - 1].iter().cloned());
        let alias = resolve_in_columns(&parent, buckets_path, statements).ok_or_else(|| {
            Error::UnresolvableBucketsPath {
                path: node.path.to_string(),
                reference: buckets_path.clone(),
            }
        })?;
        tracing::debug!(path = %node.path, pipeline = pipeline.type_name(), %alias, "resolved pipeline source");
        *source_alias = Some(alias);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::layer::{GroupedBucket, MetricColumn, PancakeKind, PancakeLayer};
    use crate::compiler::output::{ColumnMeta, StatementKind};

    fn metric(path: &[&str], value_names: &[&str]) -> MetricSlot {
        let path = Path::new(path.iter().copied());
        MetricSlot {
            base: path.segments().join("__"),
            path,
            type_name: "stats",
            columns: value_names
                .iter()
                .map(|v| MetricColumn {
                    expr: Expr::count_star(),
                    value_name: (!v.is_empty()).then(|| v.to_string()),
                })
                .collect(),
        }
    }

    fn grouped(path: &[&str]) -> BucketSlot {
        let path = Path::new(path.iter().copied());
        BucketSlot {
            base: path.segments().join("__"),
            path,
            type_name: "terms",
            sql: BucketSql::Grouped(GroupedBucket {
                keys: vec![Expr::column("k")],
                order: vec![],
                limit: Some(10),
                parent_count: true,
                after: None,
            }),
        }
    }

    fn model() -> PancakeModel {
        PancakeModel {
            kind: PancakeKind::Main,
            layers: vec![
                PancakeLayer {
                    bucket: Some(grouped(&["2"])),
                    ..Default::default()
                },
                PancakeLayer {
                    metrics: vec![metric(&["2", "1"], &[""]), metric(&["2", "s"], &["min", "max"])],
                    ..Default::default()
                },
            ],
            where_clause: None,
            sample_limit: None,
            top: None,
        }
    }

    #[test]
    fn test_split_reference() {
        assert_eq!(split_reference("_count"), (vec![], Target::Count));
        assert_eq!(
            split_reference("a>b[99.0]"),
            (vec!["a"], Target::Metric { name: "b", sub: Some("99.0") })
        );
    }

    #[test]
    fn test_resolve_count_and_metrics() {
        let m = model();
        let owner = Path::new(["2", "p"]);
        assert_eq!(resolve_in_model(&m, 1, "_count", &owner).unwrap(), "aggr__2__count");
        assert_eq!(resolve_in_model(&m, 1, "1", &owner).unwrap(), "metric__2__1_col_0");
        assert_eq!(resolve_in_model(&m, 1, "s.max", &owner).unwrap(), "metric__2__s_col_1");
        assert_eq!(resolve_in_model(&m, 1, "s[min]", &owner).unwrap(), "metric__2__s_col_0");
    }

    #[test]
    fn test_unknown_reference() {
        let err = resolve_in_model(&model(), 1, "nope", &Path::new(["2", "p"])).unwrap_err();
        assert!(matches!(err, Error::UnresolvableBucketsPath { .. }));
    }

    #[test]
    fn test_crossing_grouped_bucket_is_unsupported() {
        let err = resolve_in_model(&model(), 0, "2>1", &Path::new(["p"])).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAggregation { .. }));
    }

    #[test]
    fn test_resolve_in_columns() {
        let statements = vec![Statement {
            sql: String::new(),
            kind: StatementKind::Sibling,
            columns: vec![
                ColumnMeta {
                    alias: "aggr__h__count".into(),
                    path: Path::new(["h"]),
                    role: ColumnRole::Count,
                    value_name: None,
                    groups: vec![],
                },
                ColumnMeta {
                    alias: "metric__h__avg_col_0".into(),
                    path: Path::new(["h", "avg"]),
                    role: ColumnRole::Metric(0),
                    value_name: None,
                    groups: vec![],
                },
            ],
        }];
        assert_eq!(
            resolve_in_columns(&Path::root(), "h>avg", &statements).as_deref(),
            Some("metric__h__avg_col_0")
        );
        assert_eq!(
            resolve_in_columns(&Path::new(["h"]), "_count", &statements).as_deref(),
            Some("aggr__h__count")
        );
        assert!(resolve_in_columns(&Path::root(), "h>missing", &statements).is_none());
    }
}
