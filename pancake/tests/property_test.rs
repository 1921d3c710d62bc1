//! Property tests for bucket keys and alias naming

use pancake::aggregation::{
    AggregationNode, BucketAggregation, DateHistogram, DateInterval, MetricAggregation, SimpleMetric, Terms,
};
use pancake::compiler::naming::NameTable;
use pancake::compiler::Path;
use pancake::{compile, AggregationRequest, CompilerConfig, DynamicSchema};
use proptest::prelude::*;
use std::collections::HashSet;

const DAY_MS: i64 = 86_400_000;

fn histogram_sql(interval: DateInterval) -> String {
    let node = AggregationNode::new(
        "h",
        BucketAggregation::DateHistogram(DateHistogram {
            field: "ts".to_string(),
            interval,
            time_zone: None,
            min_doc_count: 1,
            extended_bounds: None,
        }),
    );
    let compiled = compile(
        &AggregationRequest::new(vec![node]),
        &DynamicSchema::new("t"),
        &CompilerConfig::default(),
    )
    .unwrap();
    compiled.main().unwrap().sql.clone()
}

proptest! {
    #[test]
    fn fixed_interval_key_is_floored(interval in 1i64..(30 * DAY_MS)) {
        // floor keeps pre-1970 rows in the interval that contains them
        let sql = histogram_sql(DateInterval::Fixed(interval));
        let key = format!(r#"toInt64(floor(toUnixTimestamp64Milli("ts")/{interval})) AS "aggr__h__key_0""#);
        prop_assert!(sql.contains(&key), "{}", sql);
    }

    #[test]
    fn overflowing_fixed_interval_is_rejected(days in (i64::MAX / DAY_MS + 1)..i64::MAX) {
        prop_assert_eq!(DateInterval::parse_fixed(&format!("{days}d")), None);
    }

    #[test]
    fn base_names_are_unique(names in prop::collection::vec("[a-c_]{1,3}", 1..6)) {
        // two levels: every name under every other, which provokes joined-path collisions
        let mut roots: Vec<AggregationNode> = Vec::new();
        let unique: Vec<String> = names.iter().cloned().collect::<HashSet<_>>().into_iter().collect();
        for outer in &unique {
            let children = unique
                .iter()
                .map(|inner| AggregationNode::new(inner.clone(), MetricAggregation::simple(SimpleMetric::Avg, "x")))
                .collect();
            roots.push(
                AggregationNode::new(outer.clone(), BucketAggregation::Terms(Terms::new("f"))).with_children(children),
            );
        }

        let table = NameTable::build(&roots);
        let again = NameTable::build(&roots);
        let mut seen = HashSet::new();
        for outer in &unique {
            let path = Path::new([outer.clone()]);
            prop_assert!(seen.insert(table.base(&path)));
            for inner in &unique {
                let path = path.child(inner);
                let base = table.base(&path);
                prop_assert_eq!(&base, &again.base(&path));
                prop_assert!(seen.insert(base));
            }
        }
    }
}
