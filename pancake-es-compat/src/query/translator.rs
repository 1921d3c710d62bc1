//! Query DSL translator from Elasticsearch format to a SQL `WHERE` predicate
//!
//! `None` stands for "matches everything" throughout, so `match_all` and
//! empty `bool` queries add no predicate at all.

use super::lucene;
use super::types::*;
use crate::error::EsCompatError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use pancake::aggregation::DateBounds;
use pancake::schema::{FieldDescriptor, SchemaLookup};
use pancake::sql::{literal_from_json, Expr, FULLTEXT_FIELD, MATCH_OPERATOR};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

type Result<T> = std::result::Result<T, EsCompatError>;

/// Maximum length for query strings, to keep the recursive parser bounded
const MAX_QUERY_STRING_LENGTH: usize = 10_000;

/// Translates Elasticsearch Query DSL to SQL predicates
pub struct QueryTranslator<'a> {
    schema: &'a dyn SchemaLookup,
    /// Absolute time ranges every matching document must fall into.
    date_bounds: HashMap<String, DateBounds>,
}

impl<'a> QueryTranslator<'a> {
    pub fn new(schema: &'a dyn SchemaLookup) -> Self {
        Self {
            schema,
            date_bounds: HashMap::new(),
        }
    }

    /// Translate the request's top-level query
    pub fn translate(&mut self, query: &EsQuery) -> Result<Option<Expr>> {
        self.translate_query(query, true)
    }

    /// Translate a query that selects only some buckets' documents, such as
    /// a `filter` aggregation body. Its ranges bound nothing globally.
    pub fn translate_filter(&mut self, query: &EsQuery) -> Result<Option<Expr>> {
        self.translate_query(query, false)
    }

    /// Range of `field` implied by the translated queries, if bounded on
    /// both sides.
    pub fn date_bounds(&self, field: &str) -> Option<DateBounds> {
        self.date_bounds.get(field).copied()
    }

    /// `required` is false under `should`/`must_not`, where a range does
    /// not bound the matching documents.
    fn translate_query(&mut self, query: &EsQuery, required: bool) -> Result<Option<Expr>> {
        match query {
            EsQuery::MatchAll(_) => Ok(None),

            EsQuery::MatchNone(_) => Ok(Some(Expr::bool(false))),

            EsQuery::Match(fields) => {
                let mut parts = vec![];
                for (field, m) in fields {
                    let and = matches!(m, MatchQuery::Object { operator: Some(op), .. } if op.eq_ignore_ascii_case("and"));
                    parts.extend(self.match_field(field, m.query(), false, and)?);
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::MatchPhrase(fields) => {
                let mut parts = vec![];
                for (field, m) in fields {
                    parts.extend(self.match_field(field, m.query(), true, false)?);
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::MultiMatch(mm) => self.multi_match(mm),

            EsQuery::Term(fields) => {
                let mut parts = vec![];
                for (field, term) in fields {
                    if field == "_index" {
                        warn!(value = %term.value(), "term on _index ignored; the table is chosen by the caller");
                        continue;
                    }
                    let (descriptor, column) = self.column(field)?;
                    parts.push(Expr::infix(column, "=", scalar(&descriptor, term.value())?));
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::Terms(fields) => {
                let mut parts = vec![];
                for (field, values) in fields {
                    if field.starts_with('_') {
                        // internal fields such as _tier
                        continue;
                    }
                    let Value::Array(values) = values else {
                        return Err(EsCompatError::InvalidQuery(format!(
                            "terms on '{field}' expects an array of values"
                        )));
                    };
                    let (descriptor, column) = self.column(field)?;
                    let literals = values
                        .iter()
                        .map(|v| scalar(&descriptor, v))
                        .collect::<Result<Vec<_>>>()?;
                    parts.push(match literals.len() {
                        0 => Expr::bool(false),
                        1 => Expr::infix(column, "=", literals.into_iter().next().unwrap_or_else(Expr::null)),
                        _ => Expr::infix(column, "IN", Expr::function("tuple", literals)),
                    });
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::Range(fields) => {
                let mut parts = vec![];
                for (field, params) in fields {
                    parts.extend(self.translate_range(field, params, required)?);
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::Bool(bool_query) => self.translate_bool(bool_query, required),

            EsQuery::Exists(exists) => {
                let descriptor = self.schema.resolve(&exists.field)?;
                let column = if descriptor.field_type.is_geo() {
                    Expr::column(descriptor.lat_column_name())
                } else {
                    Expr::column(descriptor.column_name())
                };
                Ok(Some(Expr::is_not_null(column)))
            }

            EsQuery::QueryString(qs) | EsQuery::SimpleQueryString(qs) => {
                if qs.query.len() > MAX_QUERY_STRING_LENGTH {
                    return Err(EsCompatError::InvalidQuery(format!(
                        "query string exceeds {MAX_QUERY_STRING_LENGTH} characters"
                    )));
                }
                let fields = match (&qs.fields, &qs.default_field) {
                    (Some(fields), _) if !fields.is_empty() => fields.clone(),
                    (_, Some(field)) if field != "*" => vec![field.clone()],
                    _ => vec![FULLTEXT_FIELD.to_string()],
                };
                let and = qs
                    .default_operator
                    .as_deref()
                    .is_some_and(|op| op.eq_ignore_ascii_case("and"));
                let parsed = lucene::parse(&qs.query, and)?;
                lucene::to_sql(&parsed, &fields, self.schema)
            }

            EsQuery::Wildcard(fields) => {
                let mut parts = vec![];
                for (field, params) in fields {
                    let (_, column) = self.column(field)?;
                    parts.push(Expr::infix(column, "ILIKE", Expr::string(wildcard_to_like(params.value()))));
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::Prefix(fields) => {
                let mut parts = vec![];
                for (field, params) in fields {
                    let (_, column) = self.column(field)?;
                    let pattern = format!("{}%", escape_like(params.value()));
                    parts.push(Expr::infix(column, "ILIKE", Expr::string(pattern)));
                }
                Ok(Expr::and_all(parts))
            }

            EsQuery::Ids(ids) => {
                if ids.values.is_empty() {
                    return Ok(Some(Expr::bool(false)));
                }
                let values = ids.values.iter().map(|v| Expr::string(v.clone())).collect();
                Ok(Some(Expr::infix(Expr::column("_id"), "IN", Expr::function("tuple", values))))
            }
        }
    }

    fn column(&self, field: &str) -> Result<(FieldDescriptor, Expr)> {
        let descriptor = self.schema.resolve(field)?;
        let column = Expr::column(descriptor.column_name());
        Ok((descriptor, column))
    }

    fn match_field(&self, field: &str, query: &Value, phrase: bool, and: bool) -> Result<Option<Expr>> {
        let (descriptor, column) = self.column(field)?;
        let Value::String(text) = query else {
            return Ok(Some(Expr::infix(column, "=", scalar(&descriptor, query)?)));
        };
        let tokens: Vec<&str> = if phrase {
            vec![text.as_str()]
        } else {
            text.split_whitespace().collect()
        };
        let matches = tokens
            .into_iter()
            .map(|t| Expr::infix(column.clone(), MATCH_OPERATOR, Expr::string(t)));
        Ok(if and {
            Expr::and_all(matches)
        } else {
            Expr::or_all(matches)
        })
    }

    fn multi_match(&self, mm: &MultiMatchQuery) -> Result<Option<Expr>> {
        let fields = match &mm.fields {
            Some(fields) => fields.clone(),
            None => vec![FULLTEXT_FIELD.to_string()],
        };
        if fields.is_empty() {
            return Ok(Some(Expr::bool(false)));
        }
        let tokens: Vec<&str> = if mm.match_type.as_deref() == Some("phrase") {
            vec![mm.query.as_str()]
        } else {
            mm.query.split_whitespace().collect()
        };
        let mut parts = vec![];
        for field in &fields {
            let column = if field == FULLTEXT_FIELD {
                Expr::column(FULLTEXT_FIELD)
            } else {
                self.column(field)?.1
            };
            for token in &tokens {
                let pattern = format!("%{}%", escape_like(token));
                parts.push(Expr::infix(column.clone(), "ILIKE", Expr::string(pattern)));
            }
        }
        Ok(Expr::or_all(parts))
    }

    fn translate_range(&mut self, field: &str, params: &RangeParams, required: bool) -> Result<Option<Expr>> {
        let (descriptor, column) = self.column(field)?;
        let epoch_seconds = params.format.as_deref() == Some("epoch_second");

        let mut parts = vec![];
        let (mut lower, mut upper) = (None, None);
        for (op, value) in [(">", &params.gt), (">=", &params.gte), ("<", &params.lt), ("<=", &params.lte)] {
            let Some(value) = value else {
                continue;
            };
            let (literal, millis) = range_value(&descriptor, value, epoch_seconds)?;
            if let Some(ms) = millis {
                if op.starts_with('>') {
                    lower = Some(ms);
                } else {
                    upper = Some(ms);
                }
            }
            parts.push(Expr::infix(column.clone(), op, literal));
        }
        if parts.is_empty() {
            return Err(EsCompatError::InvalidQuery(format!(
                "range on '{field}' needs at least one of gt, gte, lt, lte"
            )));
        }
        if let (true, Some(min), Some(max)) = (required, lower, upper) {
            self.date_bounds.insert(field.to_string(), DateBounds { min, max });
        }
        Ok(Expr::and_all(parts))
    }

    fn translate_bool(&mut self, b: &BoolQuery, required: bool) -> Result<Option<Expr>> {
        let clauses = |list: &Option<QueryList>| list.as_ref().map(QueryList::as_slice).unwrap_or_default().to_vec();

        let mut parts = vec![];
        for q in clauses(&b.must).iter().chain(clauses(&b.filter).iter()) {
            parts.extend(self.translate_query(q, required)?);
        }

        let should = clauses(&b.should);
        let minimum = match &b.minimum_should_match {
            Some(MinimumShouldMatch::Number(n)) => *n,
            Some(MinimumShouldMatch::Percentage(p)) => {
                let p = p.trim_end_matches('%').parse::<i64>().unwrap_or(0);
                i64::from(p > 0)
            }
            // should clauses are optional next to must/filter
            None => i64::from(parts.is_empty()),
        };
        if minimum > 1 {
            warn!(minimum, "minimum_should_match above 1 is treated as 1");
        }
        if !should.is_empty() && minimum > 0 {
            let mut alternatives = vec![];
            for q in &should {
                match self.translate_query(q, false)? {
                    Some(e) => alternatives.push(e),
                    // one alternative matches everything
                    None => {
                        alternatives.clear();
                        break;
                    }
                }
            }
            parts.extend(Expr::or_all(alternatives));
        }

        for q in &clauses(&b.must_not) {
            match self.translate_query(q, false)? {
                Some(e) => parts.push(Expr::not(e)),
                None => parts.push(Expr::bool(false)),
            }
        }
        Ok(Expr::and_all(parts))
    }
}

/// Literal for `value` compared against `field`.
fn scalar(field: &FieldDescriptor, value: &Value) -> Result<Expr> {
    if field.field_type.is_date() {
        if let Some((expr, _)) = date_value(value, false) {
            return Ok(expr);
        }
    }
    if field.field_type.is_numeric() {
        if let Some(n) = value.as_str().and_then(|s| s.parse::<f64>().ok()) {
            return Ok(Expr::number(n));
        }
    }
    literal_from_json(value)
        .ok_or_else(|| EsCompatError::InvalidQuery(format!("expected a scalar value for '{}', got {value}", field.name)))
}

/// Range bound literal plus its absolute millisecond value for date fields.
fn range_value(field: &FieldDescriptor, value: &Value, epoch_seconds: bool) -> Result<(Expr, Option<i64>)> {
    let dated = field.field_type.is_date()
        || (field.field_type == pancake::schema::FieldType::Unknown && value.as_str().is_some_and(looks_like_date));
    if dated {
        if let Some(parsed) = date_value(value, epoch_seconds) {
            return Ok(parsed);
        }
        return Err(EsCompatError::InvalidQuery(format!(
            "cannot parse date '{value}' for field '{}'",
            field.name
        )));
    }
    Ok((scalar(field, value)?, None))
}

fn looks_like_date(s: &str) -> bool {
    s.starts_with("now") || parse_date_millis(s).is_some()
}

/// Date expression for a JSON date: epoch millis, a formatted date or
/// date math relative to `now`.
pub(crate) fn date_value(value: &Value, epoch_seconds: bool) -> Option<(Expr, Option<i64>)> {
    let scale = |v: i64| if epoch_seconds { v.checked_mul(1000) } else { Some(v) };
    let millis = match value {
        Value::Number(n) => n.as_i64().and_then(scale),
        Value::String(s) => {
            if let Some(expr) = date_math(s) {
                return Some((expr, None));
            }
            match s.parse::<i64>() {
                Ok(v) => scale(v),
                Err(_) => parse_date_millis(s),
            }
        }
        _ => None,
    }?;
    let expr = Expr::function("fromUnixTimestamp64Milli", vec![Expr::int(millis)]);
    Some((expr, Some(millis)))
}

pub(crate) fn parse_date_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn date_math_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^now(?:([+-])(\d+)([smhdwMy]))?(?:/([smhdwMy]))?$").expect("date math pattern is valid")
    })
}

/// `now`, `now-15m`, `now+1d/d`. Rounding is dropped.
fn date_math(s: &str) -> Option<Expr> {
    let caps = date_math_regex().captures(s.trim())?;
    let now = Expr::function("now", vec![]);
    if caps.get(4).is_some() {
        warn!(expression = s, "date math rounding ignored");
    }
    let (Some(sign), Some(amount), Some(unit)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        return Some(now);
    };
    let unit = match unit.as_str() {
        "s" => "second",
        "m" => "minute",
        "h" => "hour",
        "d" => "day",
        "w" => "week",
        "M" => "month",
        _ => "year",
    };
    let function = if sign.as_str() == "-" { "subDate" } else { "addDate" };
    Some(Expr::function(
        function,
        vec![now, Expr::raw(format!("INTERVAL {} {unit}", amount.as_str()))],
    ))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Lucene wildcards (`*`, `?`) to a `LIKE` pattern.
pub(crate) fn wildcard_to_like(s: &str) -> String {
    escape_like(s).replace('*', "%").replace('?', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pancake::schema::{DynamicSchema, FieldType, TableSchema};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema {
            table: "logs".into(),
            description: None,
            fields: vec![
                FieldDescriptor::new("@timestamp", FieldType::Date),
                FieldDescriptor::new("message", FieldType::Text),
                FieldDescriptor::new("status", FieldType::Keyword),
                FieldDescriptor::new("bytes", FieldType::Long),
                FieldDescriptor::new("location", FieldType::GeoPoint),
            ],
        }
    }

    fn sql(query: serde_json::Value) -> Option<String> {
        let schema = schema();
        let mut translator = QueryTranslator::new(&schema);
        translator
            .translate(&EsQuery::parse(&query).unwrap())
            .unwrap()
            .map(|e| e.to_string())
    }

    // ========================================================================
    // Leaf queries
    // ========================================================================

    #[test]
    fn test_match_all() {
        assert_eq!(sql(json!({"match_all": {}})), None);
        assert_eq!(sql(json!({"match_none": {}})).as_deref(), Some("false"));
    }

    #[test]
    fn test_term_query() {
        assert_eq!(sql(json!({"term": {"status": "ok"}})).as_deref(), Some(r#""status"='ok'"#));
        assert_eq!(sql(json!({"term": {"bytes": 12}})).as_deref(), Some(r#""bytes"=12"#));
        assert_eq!(sql(json!({"term": {"_index": "logs"}})), None);
    }

    #[test]
    fn test_terms_query() {
        assert_eq!(
            sql(json!({"terms": {"status": ["a", "b"]}})).as_deref(),
            Some(r#""status" IN tuple('a', 'b')"#)
        );
        assert_eq!(sql(json!({"terms": {"status": ["a"]}})).as_deref(), Some(r#""status"='a'"#));
    }

    #[test]
    fn test_match_splits_words() {
        assert_eq!(
            sql(json!({"match": {"message": "disk full"}})).as_deref(),
            Some(r#"("message" __quesma_match 'disk' OR "message" __quesma_match 'full')"#)
        );
        assert_eq!(
            sql(json!({"match_phrase": {"message": "disk full"}})).as_deref(),
            Some(r#""message" __quesma_match 'disk full'"#)
        );
    }

    #[test]
    fn test_range_on_date_field() {
        assert_eq!(
            sql(json!({"range": {"@timestamp": {"gte": "2024-01-01T00:00:00Z", "lt": 1704153600000i64}}})).as_deref(),
            Some(concat!(
                r#"("@timestamp">=fromUnixTimestamp64Milli(1704067200000) AND "#,
                r#""@timestamp"<fromUnixTimestamp64Milli(1704153600000))"#
            ))
        );
    }

    #[test]
    fn test_range_date_math() {
        assert_eq!(
            sql(json!({"range": {"@timestamp": {"gte": "now-15m"}}})).as_deref(),
            Some(r#""@timestamp">=subDate(now(), INTERVAL 15 minute)"#)
        );
    }

    #[test]
    fn test_range_without_bounds_is_invalid() {
        let schema = schema();
        let mut translator = QueryTranslator::new(&schema);
        let query = EsQuery::parse(&json!({"range": {"bytes": {"format": "x"}}})).unwrap();
        assert!(matches!(translator.translate(&query), Err(EsCompatError::InvalidQuery(_))));
    }

    #[test]
    fn test_exists_and_patterns() {
        assert_eq!(sql(json!({"exists": {"field": "status"}})).as_deref(), Some(r#""status" IS NOT NULL"#));
        assert_eq!(
            sql(json!({"exists": {"field": "location"}})).as_deref(),
            Some(r#""location::lat" IS NOT NULL"#)
        );
        assert_eq!(
            sql(json!({"wildcard": {"status": {"value": "er*r_?"}}})).as_deref(),
            Some(r#""status" ILIKE 'er%r\\__'"#)
        );
        assert_eq!(sql(json!({"prefix": {"status": "err"}})).as_deref(), Some(r#""status" ILIKE 'err%'"#));
    }

    // ========================================================================
    // Bool
    // ========================================================================

    #[test]
    fn test_bool_combines_clauses() {
        let q = json!({"bool": {
            "filter": [{"term": {"status": "ok"}}],
            "must_not": [{"term": {"bytes": 0}}],
            "should": [{"term": {"status": "x"}}]
        }});
        // should is optional next to filter
        assert_eq!(sql(q).as_deref(), Some(r#"("status"='ok' AND NOT ("bytes"=0))"#));
    }

    #[test]
    fn test_bool_should_only() {
        let q = json!({"bool": {"should": [{"term": {"status": "a"}}, {"term": {"status": "b"}}]}});
        assert_eq!(sql(q).as_deref(), Some(r#"("status"='a' OR "status"='b')"#));
    }

    #[test]
    fn test_bool_should_with_minimum() {
        let q = json!({"bool": {
            "must": {"term": {"status": "a"}},
            "should": [{"term": {"bytes": 1}}],
            "minimum_should_match": 1
        }});
        assert_eq!(sql(q).as_deref(), Some(r#"("status"='a' AND "bytes"=1)"#));
    }

    #[test]
    fn test_empty_bool_matches_all() {
        assert_eq!(sql(json!({"bool": {}})), None);
    }

    // ========================================================================
    // Date bounds
    // ========================================================================

    #[test]
    fn test_required_range_records_bounds() {
        let schema = DynamicSchema::new("t");
        let mut translator = QueryTranslator::new(&schema);
        let query = EsQuery::parse(&json!({"bool": {"filter": [{"range": {"ts": {
            "gte": "2024-01-01T00:00:00Z", "lte": "2024-01-02T00:00:00Z"
        }}}]}}))
        .unwrap();
        translator.translate(&query).unwrap();
        assert_eq!(
            translator.date_bounds("ts"),
            Some(DateBounds {
                min: 1_704_067_200_000,
                max: 1_704_153_600_000
            })
        );
    }

    #[test]
    fn test_optional_range_records_nothing() {
        let schema = DynamicSchema::new("t");
        let mut translator = QueryTranslator::new(&schema);
        let query = EsQuery::parse(&json!({"bool": {"should": [{"range": {"ts": {
            "gte": "2024-01-01T00:00:00Z", "lte": "2024-01-02T00:00:00Z"
        }}}]}}))
        .unwrap();
        translator.translate(&query).unwrap();
        assert!(translator.date_bounds("ts").is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date_millis("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_date_millis("1970-01-01T00:00:01.5"), Some(1_500));
        assert_eq!(parse_date_millis("yesterday"), None);
    }
}
