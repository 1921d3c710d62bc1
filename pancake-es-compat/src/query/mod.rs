//! Elasticsearch request parsing: query DSL, query strings and aggregations

pub mod aggregations;
pub mod lucene;
pub mod translator;
pub mod types;

pub use aggregations::AggregationParser;
pub use translator::QueryTranslator;
pub use types::{EsQuery, EsSearchRequest};
