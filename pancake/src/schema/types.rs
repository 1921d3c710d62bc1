use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Keyword,
    Text,
    Long,
    Integer,
    Double,
    Float,
    Boolean,
    Date,
    DateNanos,
    GeoPoint,
    Ip,
    /// Type not known; every usage is accepted.
    Unknown,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Long | Self::Integer | Self::Double | Self::Float)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Double | Self::Float)
    }

    pub fn is_date(self) -> bool {
        matches!(self, Self::Date | Self::DateNanos)
    }

    pub fn is_geo(self) -> bool {
        matches!(self, Self::GeoPoint)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Text => "text",
            Self::Long => "long",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateNanos => "date_nanos",
            Self::GeoPoint => "geo_point",
            Self::Ip => "ip",
            Self::Unknown => "unknown",
        }
    }
}

/// What an aggregation needs from the field it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Any,
    Numeric,
    Date,
    NumericOrDate,
    Geo,
}

impl FieldClass {
    pub fn accepts(self, ty: FieldType) -> bool {
        if ty == FieldType::Unknown {
            return true;
        }
        match self {
            Self::Any => !ty.is_geo(),
            Self::Numeric => ty.is_numeric(),
            Self::Date => ty.is_date(),
            Self::NumericOrDate => ty.is_numeric() || ty.is_date(),
            Self::Geo => ty.is_geo(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Any => "a scalar field",
            Self::Numeric => "a numeric field",
            Self::Date => "a date field",
            Self::NumericOrDate => "a numeric or date field",
            Self::Geo => "a geo_point field",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Physical column name when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon_column: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            column: None,
            lat_column: None,
            lon_column: None,
        }
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    pub fn lat_column_name(&self) -> String {
        self.lat_column
            .clone()
            .unwrap_or_else(|| format!("{}::lat", self.column_name()))
    }

    pub fn lon_column_name(&self) -> String {
        self.lon_column
            .clone()
            .unwrap_or_else(|| format!("{}::lon", self.column_name()))
    }

    /// Fails with `SchemaMismatch` unless the field fits `class`.
    pub fn require(&self, class: FieldClass, usage: &str) -> crate::Result<()> {
        if class.accepts(self.field_type) {
            Ok(())
        } else {
            Err(crate::Error::mismatch(
                &self.name,
                format!(
                    "{usage} needs {} but the field is {}",
                    class.describe(),
                    self.field_type.as_str()
                ),
            ))
        }
    }
}

/// A table and the fields it exposes, as loaded from a YAML schema file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}
