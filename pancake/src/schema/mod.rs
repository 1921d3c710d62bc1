//! Field lookup used by the translators.
//!
//! The compiler never discovers types itself. Callers hand it a
//! [`SchemaLookup`], either a [`TableSchema`] loaded from YAML or the
//! permissive [`DynamicSchema`].

pub mod loader;
pub mod types;

pub use loader::SchemaLoader;
pub use types::{FieldClass, FieldDescriptor, FieldType, TableSchema};

use crate::{Error, Result};

pub trait SchemaLookup {
    fn table_name(&self) -> &str;

    fn field(&self, name: &str) -> Option<FieldDescriptor>;

    /// Every declared field, in declaration order. Empty when unknown.
    fn field_names(&self) -> Vec<String>;

    /// Resolves `name`, falling back to the base field for `.keyword`
    /// multi-field references.
    fn resolve(&self, name: &str) -> Result<FieldDescriptor> {
        if let Some(field) = self.field(name) {
            return Ok(field);
        }
        if let Some(base) = name.strip_suffix(".keyword") {
            if let Some(field) = self.field(base) {
                return Ok(field);
            }
        }
        Err(Error::mismatch(
            name,
            format!("field does not exist in table '{}'", self.table_name()),
        ))
    }
}

impl SchemaLookup for TableSchema {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn field(&self, name: &str) -> Option<FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name).cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }
}

/// Accepts every field name as an untyped column of the same name.
#[derive(Debug, Clone)]
pub struct DynamicSchema {
    table: String,
}

impl DynamicSchema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }
}

impl SchemaLookup for DynamicSchema {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn field(&self, name: &str) -> Option<FieldDescriptor> {
        Some(FieldDescriptor::new(name, FieldType::Unknown))
    }

    fn field_names(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flights() -> TableSchema {
        TableSchema {
            table: "flights".into(),
            description: None,
            fields: vec![
                FieldDescriptor::new("DestWeather", FieldType::Keyword),
                FieldDescriptor::new("timestamp", FieldType::Date),
                FieldDescriptor {
                    column: Some("origin_location".into()),
                    ..FieldDescriptor::new("OriginLocation", FieldType::GeoPoint)
                },
            ],
        }
    }

    #[test]
    fn test_resolve_keyword_suffix() {
        let schema = flights();
        let field = schema.resolve("DestWeather.keyword").unwrap();
        assert_eq!(field.name, "DestWeather");
    }

    #[test]
    fn test_resolve_missing_field_is_schema_mismatch() {
        let err = flights().resolve("nope").unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn test_geo_columns_follow_physical_name() {
        let field = flights().resolve("OriginLocation").unwrap();
        assert_eq!(field.lat_column_name(), "origin_location::lat");
        assert_eq!(field.lon_column_name(), "origin_location::lon");
    }

    #[test]
    fn test_require_rejects_wrong_class() {
        let field = flights().resolve("DestWeather").unwrap();
        assert!(field.require(FieldClass::Date, "date_histogram").is_err());
        assert!(field.require(FieldClass::Any, "terms").is_ok());
    }

    #[test]
    fn test_dynamic_schema_accepts_anything() {
        let schema = DynamicSchema::new("t");
        let field = schema.resolve("whatever").unwrap();
        assert!(field.require(FieldClass::Geo, "geotile_grid").is_ok());
        assert!(schema.field_names().is_empty());
    }
}
