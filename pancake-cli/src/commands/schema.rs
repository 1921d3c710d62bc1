//! Check-schema command implementation.

use anyhow::{bail, Result};
use pancake::schema::{SchemaLoader, TableSchema};
use std::path::Path;

/// Load every schema at `path` (a file or a directory) and lint it.
pub fn run_check_schema(path: &Path) -> Result<()> {
    let schemas = load_schemas(path)?;
    let mut failed = 0;
    for schema in &schemas {
        let issues = SchemaLoader::lint_schema(schema);
        if issues.is_empty() {
            println!("ok    {} ({} fields)", schema.table, schema.fields.len());
        } else {
            failed += 1;
            println!("FAIL  {}", schema.table);
            for issue in issues {
                println!("      - {issue}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} schemas have issues", schemas.len());
    }
    Ok(())
}

pub fn load_schemas(path: &Path) -> Result<Vec<TableSchema>> {
    if path.is_dir() {
        let mut schemas: Vec<TableSchema> = SchemaLoader::new(path).load_all()?.into_values().collect();
        schemas.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(schemas)
    } else {
        Ok(vec![SchemaLoader::load_schema(path)?])
    }
}
