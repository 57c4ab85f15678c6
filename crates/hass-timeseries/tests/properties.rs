use chrono::{Duration, TimeZone, Utc};
use hass_timeseries::optimizer::fields::coerce_string;
use hass_timeseries::{
    encode_point, parse_line, FieldValue, PolicyDefinition, RetentionPolicyManager,
    RetentionSettings, RetentionTier, TagOptimizer, TelemetryPoint,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn tag_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,15}", "[a-zA-Z0-9._:-]{1,40}", 0..8)
}

fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        (-1.0e12f64..1.0e12).prop_map(FieldValue::Float),
        "[a-zA-Z0-9 ,=\"\\\\]{0,30}".prop_map(FieldValue::Str),
    ]
}

proptest! {
    #[test]
    fn tags_below_limits_pass_through(tags in tag_map()) {
        let mut optimizer = TagOptimizer::new(10_000, 1_000, 100);
        let (optimized, stats) = optimizer.optimize_tags(&tags);

        prop_assert_eq!(&optimized, &tags);
        prop_assert!(!stats.changed());
    }

    #[test]
    fn digit_strings_become_integers(n in 0i64..=i64::MAX) {
        prop_assert_eq!(coerce_string(&n.to_string()), Some(FieldValue::Int(n)));
    }

    #[test]
    fn negative_integers_take_float_path(n in i64::MIN / 2..0i64) {
        prop_assert_eq!(coerce_string(&n.to_string()), Some(FieldValue::Float(n as f64)));
    }

    #[test]
    fn line_protocol_preserves_points(
        measurement in "[a-z][a-z_]{0,11}",
        tags in prop::collection::btree_map("[a-z][a-z0-9_]{0,10}", "[a-zA-Z0-9 ,=._-]{1,20}", 0..5),
        fields in prop::collection::btree_map("[a-z][a-z0-9_]{0,10}", field_value(), 1..5),
        secs in 0i64..4_000_000_000,
        nanos in 0u32..1_000_000_000,
    ) {
        let timestamp = Utc.timestamp_opt(secs, nanos).unwrap();
        let point = TelemetryPoint::new(measurement, timestamp, tags, fields).unwrap();

        let line = encode_point(&point).unwrap();
        let parsed = parse_line(&line).unwrap();

        prop_assert_eq!(parsed, point);
    }

    #[test]
    fn policy_lookup_is_deterministic(measurement in "ha_[a-z]{1,12}") {
        let manager = RetentionPolicyManager::new(RetentionSettings::default()).unwrap();

        let first = manager.get_policy_for_measurement(&measurement).name.clone();
        let second = manager.get_policy_for_measurement(&measurement).name.clone();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn archive_points_never_violate(age_days in 0i64..20_000) {
        let mut manager = RetentionPolicyManager::new(RetentionSettings::default()).unwrap();
        let now = Utc::now();
        let point = TelemetryPoint::builder("ha_system")
            .timestamp(now - Duration::days(age_days))
            .field("state", "started")
            .build()
            .unwrap();

        prop_assert!(manager.check_violations_at(&[point], now).is_empty());
    }

    #[test]
    fn real_time_points_older_than_a_day_violate(extra_minutes in 1i64..100_000) {
        let settings = RetentionSettings {
            custom_policies: vec![PolicyDefinition {
                name: "live".to_string(),
                tier: RetentionTier::RealTime,
                measurements: vec!["ha_live".to_string()],
                compression_threshold: None,
                aggregate_interval_secs: None,
            }],
            ..RetentionSettings::default()
        };
        let mut manager = RetentionPolicyManager::new(settings).unwrap();
        let now = Utc::now();
        let point = TelemetryPoint::builder("ha_live")
            .timestamp(now - Duration::days(1) - Duration::minutes(extra_minutes))
            .field("value", 1.0)
            .build()
            .unwrap();

        let violations = manager.check_violations_at(&[point], now);
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(violations[0].policy.as_str(), "live");
    }
}
