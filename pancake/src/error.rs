use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported aggregation at '{path}': {reason}")]
    UnsupportedAggregation { path: String, reason: String },

    #[error("Unresolvable buckets_path '{reference}' in '{path}'")]
    UnresolvableBucketsPath { path: String, reference: String },

    #[error("Schema mismatch for field '{field}': {reason}")]
    SchemaMismatch { field: String, reason: String },

    #[error("Invalid parameter at '{path}': {reason}")]
    InvalidParameter { path: String, reason: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn unsupported(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::UnsupportedAggregation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(path: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn mismatch(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedAggregation { .. } => "unsupported_aggregation",
            Self::UnresolvableBucketsPath { .. } => "unresolvable_buckets_path",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::Script(_) => "script",
            Self::Schema(_) => "schema",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Yaml(_) => "yaml",
            Self::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
