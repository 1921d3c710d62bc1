//! Search bodies as Kibana sends them, compiled end to end

use pancake::compiler::{ColumnRole, NodeDetail};
use pancake::schema::{FieldDescriptor, FieldType};
use pancake::{CompiledAggregation, CompilerConfig, DynamicSchema, Path, StatementKind, TableSchema};
use pancake_es_compat::{AggregationCompiler, EsCompatError};
use serde_json::{json, Value};

fn compile(body: Value) -> Result<CompiledAggregation, EsCompatError> {
    let schema = DynamicSchema::new("flights");
    let config = CompilerConfig::default();
    AggregationCompiler::new(&schema, &config).compile_value(body)
}

// ============================================================================
// Buckets
// ============================================================================

#[test]
fn test_fixed_interval_histogram() {
    let compiled = compile(json!({
        "size": 0,
        "aggs": {"2": {"date_histogram": {"field": "@timestamp", "fixed_interval": "2000ms"}}}
    }))
    .unwrap();
    let main = compiled.main().unwrap();
    assert!(main
        .sql
        .contains(r#"toInt64(floor(toUnixTimestamp64Milli("@timestamp")/2000)) AS "aggr__2__key_0""#));
    assert!(main.sql.contains(r#"count(*) AS "aggr__2__count""#));
}

#[test]
fn test_terms_size_with_parent_count() {
    let compiled = compile(json!({
        "aggs": {"0": {"terms": {"field": "DestWeather", "size": 2}}}
    }))
    .unwrap();
    assert_eq!(
        compiled.main().unwrap().sql,
        concat!(
            r#"SELECT sum(count(*)) OVER () AS "aggr__0__parent_count", "DestWeather" AS "aggr__0__key_0", "#,
            r#"count(*) AS "aggr__0__count" FROM flights GROUP BY "DestWeather" AS "aggr__0__key_0" "#,
            r#"ORDER BY "aggr__0__count" DESC, "aggr__0__key_0" ASC LIMIT 3"#
        )
    );
    assert_eq!(
        compiled.column("aggr__0__parent_count").unwrap().role,
        ColumnRole::ParentCount
    );
}

#[test]
fn test_dashboard_query_and_total_hits() {
    let compiled = compile(json!({
        "track_total_hits": true,
        "query": {"bool": {
            "filter": [{"range": {"@timestamp": {
                "gte": "2024-01-01T00:00:00.000Z",
                "lte": "2024-01-02T00:00:00.000Z",
                "format": "strict_date_optional_time"
            }}}],
            "must_not": [{"match_phrase": {"Cancelled": "true"}}]
        }},
        "aggs": {"carriers": {"terms": {"field": "Carrier", "size": 5}}}
    }))
    .unwrap();
    let sql = &compiled.main().unwrap().sql;
    assert!(sql.contains(r#"WHERE (("@timestamp">=fromUnixTimestamp64Milli(1704067200000) AND "#));
    assert!(sql.contains(r#"NOT ("Cancelled" __quesma_match 'true')"#));
    assert!(compiled.column("metric____quesma_total_count_col_0").is_some());
}

#[test]
fn test_auto_date_histogram_reads_query_range() {
    let compiled = compile(json!({
        "query": {"range": {"timestamp": {"gte": "2024-01-01T00:00:00Z", "lte": "2024-01-01T01:00:00Z"}}},
        "aggs": {"a": {"auto_date_histogram": {"field": "timestamp", "buckets": 10}}}
    }))
    .unwrap();
    assert!(matches!(
        compiled.node(&Path::new(["a"])).unwrap().detail,
        Some(NodeDetail::AutoDateHistogram { interval: Some(_), .. })
    ));
}

#[test]
fn test_date_range_selects_evaluated_bounds() {
    let compiled = compile(json!({
        "aggs": {"d": {"date_range": {"field": "ts", "ranges": [{"to": "now-1d"}, {"from": "now-1d"}]}}}
    }))
    .unwrap();
    let sql = &compiled.main().unwrap().sql;
    assert!(sql.contains(r#"toUnixTimestamp64Milli(toDateTime64(subDate(now(), INTERVAL 1 day), 3)) AS "aggr__d__range_0_to""#));
    assert!(sql.contains(r#"countIf("ts"<subDate(now(), INTERVAL 1 day)) AS "range_0__aggr__d__count""#));
    assert!(sql.contains(r#"countIf("ts">=subDate(now(), INTERVAL 1 day)) AS "range_1__aggr__d__count""#));
    assert_eq!(compiled.column("aggr__d__range_1_from").unwrap().role, ColumnRole::RangeFrom(1));
}

#[test]
fn test_ip_prefix_groups_by_network() {
    let compiled = compile(json!({
        "aggs": {"p": {"ip_prefix": {"field": "client_ip", "prefix_length": 16}}}
    }))
    .unwrap();
    let sql = &compiled.main().unwrap().sql;
    assert!(sql.contains(r#"intDiv(toUInt32("client_ip"), 65536) AS "aggr__p__key_0""#));
    assert!(sql.ends_with(r#"ORDER BY "aggr__p__key_0" ASC"#));
}

#[test]
fn test_random_sampler_counts_every_row() {
    let compiled = compile(json!({
        "aggs": {"s": {
            "random_sampler": {"probability": 0.1, "seed": 42},
            "aggs": {"a": {"avg": {"field": "x"}}}
        }}
    }))
    .unwrap();
    assert_eq!(
        compiled.main().unwrap().sql,
        r#"SELECT count(*) AS "aggr__s__count", avgOrNull("x") AS "metric__s__a_col_0" FROM flights"#
    );
    assert_eq!(
        compiled.node(&Path::new(["s"])).unwrap().detail,
        Some(NodeDetail::RandomSampler {
            probability: 0.1,
            seed: 42
        })
    );
}

// ============================================================================
// Metrics and pipelines
// ============================================================================

#[test]
fn test_top_metrics_statement() {
    let compiled = compile(json!({
        "aggs": {"2": {
            "date_histogram": {"field": "order_date", "fixed_interval": "1d"},
            "aggs": {"tm": {"top_metrics": {
                "metrics": {"field": "taxful_total_price"},
                "size": 10,
                "sort": {"order_date": "asc"}
            }}}
        }}
    }))
    .unwrap();
    let aux = compiled.auxiliary().next().unwrap();
    assert_eq!(
        aux.kind,
        StatementKind::TopHits {
            metric_path: Path::new(["2", "tm"])
        }
    );
    assert!(aux.sql.contains(r#"WHERE "top_hits_rank"<=10"#));
    assert!(aux.sql.ends_with(r#"ORDER BY "aggr__2__key_0" ASC, "top_hits_rank" ASC"#));
}

#[test]
fn test_bucket_script_over_count() {
    let compiled = compile(json!({
        "aggs": {"2": {
            "terms": {"field": "Carrier"},
            "aggs": {"p": {"bucket_script": {
                "buckets_path": {"count": "_count"},
                "script": "count * 1"
            }}}
        }}
    }))
    .unwrap();
    assert!(compiled
        .main()
        .unwrap()
        .sql
        .contains(r#""aggr__2__count"*1 AS "metric__2__p_col_0""#));
}

#[test]
fn test_filters_in_first_layer_narrow_where() {
    let compiled = compile(json!({
        "aggs": {"f": {
            "filters": {"filters": {
                "delayed": {"term": {"FlightDelay": true}},
                "cancelled": {"term": {"Cancelled": true}}
            }},
            "aggs": {"price": {"avg": {"field": "AvgTicketPrice"}}}
        }}
    }))
    .unwrap();
    let sql = &compiled.main().unwrap().sql;
    assert!(sql.contains(r#""FlightDelay"=true"#));
    assert!(sql.contains(r#""Cancelled"=true"#));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_schema_mismatch_is_illegal_argument() {
    let schema = TableSchema {
        table: "logs".to_string(),
        description: None,
        fields: vec![FieldDescriptor::new("host", FieldType::Keyword)],
    };
    let config = CompilerConfig::default();
    let err = AggregationCompiler::new(&schema, &config)
        .compile_value(json!({"aggs": {"a": {"avg": {"field": "host"}}}}))
        .unwrap_err();
    assert_eq!(err.error_type(), "illegal_argument_exception");
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_unsupported_aggregation_body() {
    let err = compile(json!({"aggs": {"m": {"matrix_stats": {"fields": ["a", "b"]}}}})).unwrap_err();
    let body = err.to_es_response();
    assert_eq!(body["error"]["type"], json!("parsing_exception"));
    assert_eq!(body["status"], json!(400));
}

#[test]
fn test_empty_date_range_is_illegal_argument() {
    let err = compile(json!({"aggs": {"d": {"date_range": {"field": "ts", "ranges": []}}}})).unwrap_err();
    assert_eq!(err.error_type(), "illegal_argument_exception");
}

#[test]
fn test_overflowing_fixed_interval_is_rejected() {
    let err = compile(json!({"aggs": {"h": {"date_histogram": {
        "field": "ts",
        "fixed_interval": "9999999999999999d"
    }}}}))
    .unwrap_err();
    assert!(matches!(err, EsCompatError::InvalidQuery(_)));
}

#[test]
fn test_huge_terms_size_is_capped() {
    let compiled = compile(json!({"aggs": {"t": {"terms": {"field": "host", "size": u64::MAX}}}})).unwrap();
    assert!(compiled.main().unwrap().sql.ends_with("LIMIT 2147483648"));
}

#[test]
fn test_overflowing_epoch_seconds_bound_is_rejected() {
    let schema = TableSchema {
        table: "logs".to_string(),
        description: None,
        fields: vec![FieldDescriptor::new("ts", FieldType::Date)],
    };
    let config = CompilerConfig::default();
    let err = AggregationCompiler::new(&schema, &config)
        .compile_value(json!({
            "query": {"range": {"ts": {"gte": i64::MAX, "format": "epoch_second"}}},
            "aggs": {"c": {"value_count": {"field": "ts"}}}
        }))
        .unwrap_err();
    assert!(matches!(err, EsCompatError::InvalidQuery(_)));
}
