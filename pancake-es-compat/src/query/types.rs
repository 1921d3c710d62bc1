//! Elasticsearch search request types
//!
//! Only the parts of the search body that shape aggregations are modeled:
//! the query (it becomes the `WHERE` clause), the aggregation tree and
//! `track_total_hits`. Aggregation bodies stay raw JSON so their order and
//! unknown keys survive until [`super::aggregations`] looks at them.

use crate::error::EsCompatError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Root ES search request body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EsSearchRequest {
    #[serde(default)]
    pub query: Option<EsQuery>,

    /// Maximum number of hits; aggregations ignore it
    #[serde(default)]
    pub size: Option<usize>,

    #[serde(default, alias = "aggregations")]
    pub aggs: Option<Map<String, Value>>,

    #[serde(default)]
    pub track_total_hits: Option<TrackTotalHits>,
}

impl EsSearchRequest {
    pub fn from_value(value: Value) -> Result<Self, EsCompatError> {
        if let Some(query) = value.get("query") {
            EsQuery::check_type(query)?;
        }
        Ok(serde_json::from_value(value)?)
    }

    /// True when the response must carry an exact hit count.
    pub fn tracks_total_hits(&self) -> bool {
        match self.track_total_hits {
            Some(TrackTotalHits::Bool(b)) => b,
            Some(TrackTotalHits::Count(n)) => n > 0,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TrackTotalHits {
    Bool(bool),
    Count(usize),
}

/// ES Query types
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EsQuery {
    MatchAll(MatchAllQuery),

    MatchNone(MatchAllQuery),

    /// Match query (analyzed full-text)
    Match(BTreeMap<String, MatchQuery>),

    MatchPhrase(BTreeMap<String, MatchQuery>),

    MultiMatch(MultiMatchQuery),

    /// Term query (exact match, not analyzed)
    Term(BTreeMap<String, TermValue>),

    /// Terms query (any of several exact values)
    Terms(BTreeMap<String, Value>),

    Range(BTreeMap<String, RangeParams>),

    Bool(BoolQuery),

    Exists(ExistsQuery),

    /// Query string (Lucene syntax)
    QueryString(QueryStringQuery),

    SimpleQueryString(QueryStringQuery),

    Wildcard(BTreeMap<String, PatternParams>),

    Prefix(BTreeMap<String, PatternParams>),

    Ids(IdsQuery),
}

const QUERY_TYPES: &[&str] = &[
    "match_all",
    "match_none",
    "match",
    "match_phrase",
    "multi_match",
    "term",
    "terms",
    "range",
    "bool",
    "exists",
    "query_string",
    "simple_query_string",
    "wildcard",
    "prefix",
    "ids",
];

impl EsQuery {
    /// Rejects query types outside the supported set with a typed error
    /// instead of a serde message, recursing into `bool` clauses.
    pub fn check_type(value: &Value) -> Result<(), EsCompatError> {
        let object = value
            .as_object()
            .ok_or_else(|| EsCompatError::InvalidQuery("query must be an object".to_string()))?;
        let mut keys = object.keys();
        let (Some(kind), None) = (keys.next(), keys.next()) else {
            return Err(EsCompatError::InvalidQuery(
                "query must have exactly one type".to_string(),
            ));
        };
        if !QUERY_TYPES.contains(&kind.as_str()) {
            return Err(EsCompatError::UnsupportedQueryType(kind.clone()));
        }
        if kind == "bool" {
            for clause in ["must", "should", "must_not", "filter"] {
                match object[kind].get(clause) {
                    Some(Value::Array(items)) => {
                        for item in items {
                            Self::check_type(item)?;
                        }
                    }
                    Some(item @ Value::Object(_)) => Self::check_type(item)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    pub fn parse(value: &Value) -> Result<Self, EsCompatError> {
        Self::check_type(value)?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchAllQuery {
    #[serde(default)]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MatchQuery {
    Simple(Value),
    Object {
        query: Value,
        #[serde(default)]
        operator: Option<String>,
        #[serde(default)]
        boost: Option<f32>,
    },
}

impl MatchQuery {
    pub fn query(&self) -> &Value {
        match self {
            Self::Simple(v) => v,
            Self::Object { query, .. } => query,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MultiMatchQuery {
    pub query: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub match_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TermValue {
    Object {
        value: Value,
        #[serde(default)]
        boost: Option<f32>,
    },
    Simple(Value),
}

impl TermValue {
    pub fn value(&self) -> &Value {
        match self {
            Self::Simple(v) => v,
            Self::Object { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RangeParams {
    #[serde(default)]
    pub gte: Option<Value>,
    #[serde(default)]
    pub gt: Option<Value>,
    #[serde(default)]
    pub lte: Option<Value>,
    #[serde(default)]
    pub lt: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BoolQuery {
    #[serde(default)]
    pub must: Option<QueryList>,
    #[serde(default)]
    pub should: Option<QueryList>,
    #[serde(default)]
    pub must_not: Option<QueryList>,
    #[serde(default)]
    pub filter: Option<QueryList>,
    #[serde(default)]
    pub minimum_should_match: Option<MinimumShouldMatch>,
    #[serde(default)]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum QueryList {
    Single(Box<EsQuery>),
    Multiple(Vec<EsQuery>),
}

impl QueryList {
    pub fn as_slice(&self) -> &[EsQuery] {
        match self {
            QueryList::Single(q) => std::slice::from_ref(q.as_ref()),
            QueryList::Multiple(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MinimumShouldMatch {
    Number(i64),
    Percentage(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExistsQuery {
    pub field: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryStringQuery {
    pub query: String,
    #[serde(default)]
    pub default_field: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub default_operator: Option<String>,
    #[serde(default)]
    pub analyze_wildcard: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PatternParams {
    Simple(String),
    Object {
        value: String,
        #[serde(default)]
        boost: Option<f32>,
        #[serde(default)]
        case_insensitive: Option<bool>,
    },
}

impl PatternParams {
    pub fn value(&self) -> &str {
        match self {
            Self::Simple(v) => v,
            Self::Object { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdsQuery {
    pub values: Vec<String>,
}
