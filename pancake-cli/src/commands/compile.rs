//! Compile command implementation.

use super::schema::load_schemas;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use pancake::config::Config;
use pancake::schema::SchemaLookup;
use pancake::{CompiledAggregation, DynamicSchema, StatementKind, TableSchema};
use pancake_es_compat::AggregationCompiler;
use serde_json::Value;
use std::fmt::Write;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// SQL statements with a header comment each
    Text,
    /// Statements and column/node metadata as JSON
    Json,
}

/// Run the compile command.
pub fn run_compile(
    config: &Config,
    request: &Path,
    schema: Option<&Path>,
    table: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let body = read_request(request)?;
    let schema = resolve_schema(config, schema, table)?;
    tracing::info!("Compiling {} against table '{}'", request.display(), schema.table_name());

    let compiled = AggregationCompiler::new(schema.as_ref(), &config.compiler)
        .compile_value(body)
        .map_err(|e| {
            let body = serde_json::to_string_pretty(&e.to_es_response()).unwrap_or_default();
            anyhow!("compilation failed ({}):\n{body}", e.error_type())
        })?;

    match format {
        OutputFormat::Text => print!("{}", render_text(&compiled)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&compiled)?),
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<Value> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading request {}", path.display()))?
    };
    serde_json::from_str(&content).with_context(|| format!("parsing request {}", path.display()))
}

/// Picks the schema for the compile: an explicit file or directory first,
/// then the configured schema directory, then an untyped table.
fn resolve_schema(config: &Config, schema: Option<&Path>, table: Option<&str>) -> Result<Box<dyn SchemaLookup>> {
    let source = schema.or(config.schema.dir.as_deref());
    let Some(source) = source else {
        let table = table.unwrap_or(&config.compiler.table_name);
        return Ok(Box::new(DynamicSchema::new(table)));
    };

    let mut schemas = load_schemas(source)?;
    let chosen: TableSchema = match table {
        Some(table) => {
            let Some(i) = schemas.iter().position(|s| s.table == table) else {
                bail!("no schema for table '{table}' in {}", source.display());
            };
            schemas.swap_remove(i)
        }
        None if schemas.len() == 1 => schemas.remove(0),
        None => bail!(
            "{} holds {} schemas; pick one with --table",
            source.display(),
            schemas.len()
        ),
    };
    Ok(Box::new(chosen))
}

fn render_text(compiled: &CompiledAggregation) -> String {
    let mut out = String::new();
    if compiled.is_empty() {
        out.push_str("-- no statements\n");
        return out;
    }
    for (i, statement) in compiled.statements.iter().enumerate() {
        let label = match &statement.kind {
            StatementKind::Main => "main".to_string(),
            StatementKind::Sibling => "sibling".to_string(),
            StatementKind::TopHits { metric_path } => format!("top hits for {metric_path}"),
        };
        let _ = writeln!(out, "-- [{}] {label}", i + 1);
        let _ = writeln!(out, "{};", statement.sql);
        out.push('\n');
    }
    out
}
