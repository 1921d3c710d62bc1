//! Elasticsearch aggregation compiler
//!
//! Turns a nested aggregation tree into flat ClickHouse `SELECT` statements
//! ("pancakes") whose rows can be folded back into Elasticsearch-shaped
//! bucket JSON in a single pass.
//!
//! The entry point is [`compile`]: it takes an [`AggregationRequest`], a
//! [`schema::SchemaLookup`] and a [`config::CompilerConfig`], and returns a
//! [`CompiledAggregation`] holding the SQL text of every statement plus the
//! alias metadata a result reassembler needs.

pub mod aggregation;
pub mod compiler;
pub mod config;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod sql;

pub use aggregation::AggregationNode;
pub use compiler::{compile, AggregationRequest, CompiledAggregation, Path, Statement, StatementKind};
pub use config::{CompilerConfig, Config};
pub use schema::{DynamicSchema, SchemaLookup, TableSchema};
pub use error::{Error, Result};
