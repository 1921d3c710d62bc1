//! Property tests for query-string parsing and LIKE escaping

use pancake::schema::DynamicSchema;
use pancake_es_compat::query::lucene::{self, LuceneQuery, TermText};
use pancake_es_compat::query::{EsQuery, QueryTranslator};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn query_string_never_panics(query in "\\PC{0,40}") {
        let schema = DynamicSchema::new("logs");
        if let Ok(parsed) = lucene::parse(&query, false) {
            let _ = lucene::to_sql(&parsed, &["message".to_string()], &schema);
        }
    }

    #[test]
    fn field_value_pair_is_one_term(field in "[a-z][a-z_]{0,8}", value in "[a-z0-9]{1,8}") {
        let parsed = lucene::parse(&format!("{field}:{value}"), false).unwrap();
        prop_assert_eq!(
            parsed,
            LuceneQuery::Term {
                field: Some(field),
                value: TermText::Word(value),
            }
        );
    }

    #[test]
    fn wildcard_value_is_escaped(value in "[a-z%_]{1,8}") {
        let schema = DynamicSchema::new("logs");
        let query = EsQuery::parse(&json!({"wildcard": {"host": format!("{value}*")}})).unwrap();
        let sql = QueryTranslator::new(&schema).translate(&query).unwrap().unwrap().to_string();
        let escaped = value.replace('%', "\\\\%").replace('_', "\\\\_");
        prop_assert!(sql.contains(&format!("{escaped}%")), "{}", sql);
    }
}
