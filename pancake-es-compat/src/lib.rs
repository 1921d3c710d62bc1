//! Elasticsearch request layer for the pancake compiler
//!
//! Kibana and other Elasticsearch clients send search bodies with a query
//! and an aggregation tree. This crate turns such a body into the inputs
//! [`pancake::compile`] expects and compiles it:
//!
//! - the query DSL becomes a SQL `WHERE` predicate ([`query::QueryTranslator`]),
//!   including Lucene `query_string` syntax ([`query::lucene`]);
//! - `aggs` become a typed aggregation tree ([`query::AggregationParser`]);
//! - failures map to Elasticsearch-shaped error bodies ([`EsCompatError`]).
//!
//! # Query DSL Support
//!
//! `match_all`, `match_none`, `match`, `match_phrase`, `multi_match`, `term`,
//! `terms`, `range`, `bool`, `exists`, `query_string`, `simple_query_string`,
//! `wildcard`, `prefix` and `ids`.

pub mod compiler;
pub mod error;
pub mod query;

pub use compiler::AggregationCompiler;
pub use error::EsCompatError;

/// Result type for ES compat operations
pub type Result<T> = std::result::Result<T, EsCompatError>;
