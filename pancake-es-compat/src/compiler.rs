//! Request-level entry point: search body in, compiled SQL out

use crate::query::{AggregationParser, EsSearchRequest, QueryTranslator};
use crate::Result;
use pancake::{compile, AggregationRequest, CompiledAggregation, CompilerConfig, SchemaLookup};
use serde_json::Value;
use tracing::debug;

/// Compiles Elasticsearch search bodies against one table.
pub struct AggregationCompiler<'a> {
    schema: &'a dyn SchemaLookup,
    config: &'a CompilerConfig,
}

impl<'a> AggregationCompiler<'a> {
    pub fn new(schema: &'a dyn SchemaLookup, config: &'a CompilerConfig) -> Self {
        Self { schema, config }
    }

    /// The query becomes the `WHERE` clause of every statement. Requests
    /// without aggregations compile to no statements.
    pub fn compile(&self, request: &EsSearchRequest) -> Result<CompiledAggregation> {
        let Some(aggs) = request.aggs.as_ref().filter(|a| !a.is_empty()) else {
            debug!("request has no aggregations");
            return Ok(CompiledAggregation::default());
        };

        // the query goes first so auto_date_histogram can see its bounds
        let mut translator = QueryTranslator::new(self.schema);
        let where_clause = match &request.query {
            Some(query) => translator.translate(query)?,
            None => None,
        };
        let aggregations = AggregationParser::new(&mut translator).parse(aggs)?;

        let mut compile_request =
            AggregationRequest::new(aggregations).with_total_hits(request.tracks_total_hits());
        if let Some(where_clause) = where_clause {
            compile_request = compile_request.with_where(where_clause);
        }
        Ok(compile(&compile_request, self.schema, self.config)?)
    }

    pub fn compile_value(&self, body: Value) -> Result<CompiledAggregation> {
        self.compile(&EsSearchRequest::from_value(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EsCompatError;
    use pancake::DynamicSchema;
    use serde_json::json;

    #[test]
    fn test_no_aggregations() {
        let schema = DynamicSchema::new("logs");
        let config = CompilerConfig::default();
        let compiler = AggregationCompiler::new(&schema, &config);
        let compiled = compiler
            .compile_value(json!({"query": {"match_all": {}}, "size": 10}))
            .unwrap();
        assert!(compiled.is_empty());
    }

    #[test]
    fn test_query_becomes_where() {
        let schema = DynamicSchema::new("logs");
        let config = CompilerConfig::default();
        let compiler = AggregationCompiler::new(&schema, &config);
        let compiled = compiler
            .compile_value(json!({
                "query": {"bool": {"filter": [{"term": {"level": "error"}}]}},
                "aggs": {"hosts": {"terms": {"field": "host"}}}
            }))
            .unwrap();
        assert!(compiled.main().unwrap().sql.contains(r#"FROM logs WHERE "level"='error' GROUP BY"#));
    }

    #[test]
    fn test_errors_are_typed() {
        let schema = DynamicSchema::new("logs");
        let config = CompilerConfig::default();
        let compiler = AggregationCompiler::new(&schema, &config);
        let err = compiler
            .compile_value(json!({"aggs": {"r": {"random_sampler": {"probability": 0.1}}}}))
            .unwrap_err();
        assert!(matches!(err, EsCompatError::UnsupportedAggregation(_)));

        let err = compiler
            .compile_value(json!({"query": {"geo_shape": {}}, "aggs": {"a": {"avg": {"field": "x"}}}}))
            .unwrap_err();
        assert_eq!(err.to_es_response()["status"], json!(400));
    }
}
