//! Aggregation compiler
//!
//! [`compile`] runs in three passes:
//!
//! 1. the request tree is flattened into pancakes ([`layer::PancakeModel`]),
//!    one per statement;
//! 2. each pancake is rendered to SQL, top-hits pancakes through a join
//!    against their grouping query;
//! 3. node metadata is collected and post-processing pipelines are bound
//!    to the columns they read.

pub mod bucket;
pub mod combinator;
pub mod generate;
pub mod layer;
pub mod metadata;
pub mod metric;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod script;
pub mod top_hits;
pub mod transform;

pub use naming::Path;
pub use output::{
    ColumnMeta, ColumnRole, CompiledAggregation, DateRangeLabel, IpRangeLabel, NodeDetail, NodeMeta,
    RangeLabel, Statement, StatementKind,
};

use crate::aggregation::AggregationNode;
use crate::config::CompilerConfig;
use crate::schema::{FieldClass, FieldDescriptor, SchemaLookup};
use crate::sql::Expr;
use crate::{Error, Result};
use layer::PancakeKind;
use naming::NameTable;
use std::time::Instant;
use tracing::{debug, info};

/// Input of one compilation.
#[derive(Debug, Clone, Default)]
pub struct AggregationRequest {
    /// Top-level aggregations.
    pub aggregations: Vec<AggregationNode>,
    /// The request's query, already translated.
    pub where_clause: Option<Expr>,
    /// Adds the total hit count to the main statement.
    pub track_total_hits: bool,
}

impl AggregationRequest {
    pub fn new(aggregations: Vec<AggregationNode>) -> Self {
        Self {
            aggregations,
            ..Default::default()
        }
    }

    pub fn with_where(mut self, where_clause: Expr) -> Self {
        self.where_clause = Some(where_clause);
        self
    }

    pub fn with_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = track;
        self
    }
}

/// Request-scoped state shared by the translators.
pub(crate) struct CompileContext<'a> {
    pub(crate) schema: &'a dyn SchemaLookup,
    pub(crate) config: &'a CompilerConfig,
    pub(crate) names: NameTable,
}

impl CompileContext<'_> {
    /// Resolves `field` and checks that it can serve `usage`.
    pub(crate) fn column(&self, field: &str, class: FieldClass, usage: &str) -> Result<(FieldDescriptor, Expr)> {
        let descriptor = self.schema.resolve(field)?;
        descriptor.require(class, usage)?;
        let column = Expr::column(descriptor.column_name());
        Ok((descriptor, column))
    }
}

/// Compiles `request` into SQL statements plus reassembly metadata.
#[tracing::instrument(skip_all, fields(table = schema.table_name(), aggregations = request.aggregations.len()))]
pub fn compile(
    request: &AggregationRequest,
    schema: &dyn SchemaLookup,
    config: &CompilerConfig,
) -> Result<CompiledAggregation> {
    let start = Instant::now();
    match compile_inner(request, schema, config) {
        Ok(compiled) => {
            crate::metrics::record_compilation(start.elapsed(), compiled.statements.len());
            info!(
                statements = compiled.statements.len(),
                nodes = compiled.nodes.len(),
                "compiled aggregations"
            );
            Ok(compiled)
        }
        Err(e) => {
            crate::metrics::record_compilation_error(e.kind());
            Err(e)
        }
    }
}

fn compile_inner(
    request: &AggregationRequest,
    schema: &dyn SchemaLookup,
    config: &CompilerConfig,
) -> Result<CompiledAggregation> {
    let roots = &request.aggregations;
    for (i, root) in roots.iter().enumerate() {
        if roots[..i].iter().any(|r| r.name == root.name) {
            return Err(Error::invalid(
                &root.name,
                format!("duplicate aggregation name '{}'", root.name),
            ));
        }
        root.validate(&[])?;
    }

    let ctx = CompileContext {
        schema,
        config,
        names: NameTable::build(roots),
    };
    let total_count = request.track_total_hits || config.add_total_count;
    let pancakes = transform::PancakeTransformer::new(&ctx, request.where_clause.clone(), total_count)
        .transform(roots)?;

    let table = schema.table_name();
    let mut statements = Vec::with_capacity(pancakes.len());
    for model in &pancakes {
        let (select, columns, kind) = match (&model.kind, &model.top) {
            (PancakeKind::TopHits, Some(top)) => {
                let (select, columns) = top_hits::top_hits_statement(model, top, table)?;
                let kind = StatementKind::TopHits {
                    metric_path: top.path.clone(),
                };
                (select, columns, kind)
            }
            (kind, _) => {
                let generated = generate::generate(model, table, false)?;
                let kind = if *kind == PancakeKind::Main {
                    StatementKind::Main
                } else {
                    StatementKind::Sibling
                };
                (generated.select, generated.columns, kind)
            }
        };
        let sql = select.to_string();
        debug!(kind = ?kind, columns = columns.len(), %sql, "generated statement");
        statements.push(Statement { sql, kind, columns });
    }

    let mut nodes = metadata::collect_nodes(&ctx, roots)?;
    pipeline::resolve_post_processing(&mut nodes, &statements)?;

    Ok(CompiledAggregation { statements, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{BucketAggregation, MetricAggregation, SimpleMetric, Terms};
    use crate::schema::{DynamicSchema, FieldType, TableSchema};

    // ========================================================================
    // Context
    // ========================================================================

    #[test]
    fn test_context_column_checks_class() {
        let schema = TableSchema {
            table: "logs".into(),
            description: None,
            fields: vec![
                FieldDescriptor::new("message", FieldType::Text),
                FieldDescriptor::new("bytes", FieldType::Long),
            ],
        };
        let config = CompilerConfig::default();
        let ctx = CompileContext {
            schema: &schema,
            config: &config,
            names: NameTable::default(),
        };
        let (_, column) = ctx.column("bytes", FieldClass::Numeric, "avg").unwrap();
        assert_eq!(column.to_string(), r#""bytes""#);
        let err = ctx.column("message", FieldClass::Numeric, "avg").unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    // ========================================================================
    // compile
    // ========================================================================

    #[test]
    fn test_duplicate_root_names_rejected() {
        let avg = AggregationNode::new("a", MetricAggregation::simple(SimpleMetric::Avg, "x"));
        let request = AggregationRequest::new(vec![avg.clone(), avg]);
        let err = compile(&request, &DynamicSchema::new("t"), &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_empty_request_compiles_to_nothing() {
        let compiled = compile(
            &AggregationRequest::default(),
            &DynamicSchema::new("t"),
            &CompilerConfig::default(),
        )
        .unwrap();
        assert!(compiled.is_empty());
        assert!(compiled.nodes.is_empty());
    }

    #[test]
    fn test_sibling_statement_kind() {
        let request = AggregationRequest::new(vec![
            AggregationNode::new("a", BucketAggregation::Terms(Terms::new("x"))),
            AggregationNode::new("b", BucketAggregation::Terms(Terms::new("y"))),
        ]);
        let compiled = compile(&request, &DynamicSchema::new("t"), &CompilerConfig::default()).unwrap();
        assert_eq!(compiled.statements.len(), 2);
        assert!(compiled.main().is_some());
        assert_eq!(compiled.auxiliary().count(), 1);
        assert_eq!(compiled.statements[1].kind, StatementKind::Sibling);
    }
}
