//! Error types for the Elasticsearch request layer

use serde::Serialize;
use serde_json::Value;

/// Elasticsearch request errors
#[derive(Debug, thiserror::Error)]
pub enum EsCompatError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unsupported query type: {0}")]
    UnsupportedQueryType(String),

    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    Compile(#[from] pancake::Error),
}

impl From<serde_json::Error> for EsCompatError {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(e.to_string())
    }
}

/// Elasticsearch-style error response
#[derive(Debug, Serialize)]
struct EsErrorResponse {
    error: EsErrorDetail,
    status: u16,
}

#[derive(Debug, Serialize)]
struct EsErrorDetail {
    root_cause: Vec<RootCause>,
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RootCause {
    #[serde(rename = "type")]
    error_type: String,
    reason: String,
}

impl EsCompatError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidQuery(_) => "query_shard_exception",
            Self::UnsupportedQueryType(_) => "parsing_exception",
            Self::UnsupportedAggregation(_) => "parsing_exception",
            Self::MissingField(_) => "parsing_exception",
            Self::ParseError(_) => "parse_exception",
            Self::Compile(e) => match e {
                pancake::Error::UnsupportedAggregation { .. } => "parsing_exception",
                pancake::Error::UnresolvableBucketsPath { .. } => "action_request_validation_exception",
                pancake::Error::SchemaMismatch { .. } => "illegal_argument_exception",
                pancake::Error::InvalidParameter { .. } => "illegal_argument_exception",
                pancake::Error::Script(_) => "script_exception",
                _ => "search_phase_execution_exception",
            },
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Compile(
                pancake::Error::Io(_) | pancake::Error::Config(_) | pancake::Error::Schema(_),
            ) => 500,
            _ => 400,
        }
    }

    /// Error body in the shape Elasticsearch clients expect.
    pub fn to_es_response(&self) -> Value {
        let error_type = self.error_type().to_string();
        let reason = self.to_string();
        let body = EsErrorResponse {
            error: EsErrorDetail {
                root_cause: vec![RootCause {
                    error_type: error_type.clone(),
                    reason: reason.clone(),
                }],
                error_type,
                reason,
            },
            status: self.status_code(),
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_es_response_shape() {
        let err = EsCompatError::UnsupportedQueryType("geo_shape".to_string());
        assert_eq!(
            err.to_es_response(),
            json!({
                "error": {
                    "root_cause": [{"type": "parsing_exception", "reason": "Unsupported query type: geo_shape"}],
                    "type": "parsing_exception",
                    "reason": "Unsupported query type: geo_shape"
                },
                "status": 400
            })
        );
    }

    #[test]
    fn test_compile_errors_keep_their_class() {
        let err = EsCompatError::from(pancake::Error::unsupported("a>b", "filters nested under filters"));
        assert_eq!(err.error_type(), "parsing_exception");
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("a>b"));

        let err = EsCompatError::from(pancake::Error::Config("bad".into()));
        assert_eq!(err.status_code(), 500);
    }
}
