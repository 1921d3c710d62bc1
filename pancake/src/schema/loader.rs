use crate::schema::TableSchema;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SchemaLoader {
    schemas_dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(schemas_dir: impl AsRef<Path>) -> Self {
        Self {
            schemas_dir: schemas_dir.as_ref().to_path_buf(),
        }
    }

    /// Loads every `*.yaml` / `*.yml` file in the directory, keyed by table.
    pub fn load_all(&self) -> Result<HashMap<String, TableSchema>> {
        let mut schemas = HashMap::new();

        if !self.schemas_dir.exists() {
            return Err(Error::Schema(format!(
                "Schemas directory does not exist: {}",
                self.schemas_dir.display()
            )));
        }

        for entry in fs::read_dir(&self.schemas_dir)? {
            let path = entry?.path();

            if !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            ) {
                continue;
            }

            let schema = Self::load_schema(&path)?;
            schemas.insert(schema.table.clone(), schema);
        }

        Ok(schemas)
    }

    pub fn load_schema(path: &Path) -> Result<TableSchema> {
        let content = fs::read_to_string(path)?;
        let schema: TableSchema = serde_yaml::from_str(&content)?;
        Ok(schema)
    }

    /// Lint a single schema and return a list of human-readable issues (empty = ok)
    pub fn lint_schema(schema: &TableSchema) -> Vec<String> {
        let mut issues = Vec::new();
        if schema.table.trim().is_empty() {
            issues.push("table must be set".to_string());
        }
        if schema.fields.is_empty() {
            issues.push("fields should have at least one field defined".to_string());
        }
        let mut seen = HashSet::new();
        for field in &schema.fields {
            if !seen.insert(field.name.as_str()) {
                issues.push(format!("field '{}' is declared more than once", field.name));
            }
            if field.field_type.is_geo() && (field.lat_column.is_some() != field.lon_column.is_some())
            {
                issues.push(format!(
                    "geo field '{}' must override both lat_column and lon_column or neither",
                    field.name
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, SchemaLookup};
    use tempfile::TempDir;

    const FLIGHTS: &str = r#"
table: flights
fields:
  - name: DestWeather
    type: keyword
  - name: timestamp
    type: date
  - name: AvgTicketPrice
    type: double
    column: avg_ticket_price
"#;

    #[test]
    fn test_load_schemas_from_directory() -> Result<()> {
        let temp = TempDir::new()?;
        fs::write(temp.path().join("flights.yaml"), FLIGHTS)?;
        fs::write(temp.path().join("notes.txt"), "ignored")?;

        let schemas = SchemaLoader::new(temp.path()).load_all()?;

        assert_eq!(schemas.len(), 1);
        let flights = &schemas["flights"];
        let price = flights.resolve("AvgTicketPrice")?;
        assert_eq!(price.field_type, FieldType::Double);
        assert_eq!(price.column_name(), "avg_ticket_price");
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let result = SchemaLoader::new("/definitely/not/here").load_all();
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_lint_duplicate_fields() {
        let schema: TableSchema = serde_yaml::from_str(
            r#"
table: t
fields:
  - name: a
    type: long
  - name: a
    type: keyword
"#,
        )
        .unwrap();
        let issues = SchemaLoader::lint_schema(&schema);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("more than once"));
    }

    #[test]
    fn test_lint_clean_schema() {
        let schema: TableSchema = serde_yaml::from_str(FLIGHTS).unwrap();
        assert!(SchemaLoader::lint_schema(&schema).is_empty());
    }
}
