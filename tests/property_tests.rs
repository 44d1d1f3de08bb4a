/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use phone_intel::aggregator::{get_confidence_level, AggregatorConfig, IntelligenceAggregator};
use phone_intel::models::{DataSource, FieldMap, IntelligenceResult, SourceError, SourceErrorKind};
use phone_intel::pattern_analysis::PatternAnalysisEngine;
use phone_intel::phone::NumberFormatter;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn any_source() -> impl Strategy<Value = DataSource> {
    prop::sample::select(DataSource::ALL.to_vec())
}

/// A result that either succeeds with a small carrier/validity payload or fails.
fn any_result() -> impl Strategy<Value = IntelligenceResult> {
    (
        any_source(),
        any::<bool>(),
        0.0f64..=100.0,
        prop::sample::select(vec!["Jio", "Airtel", "Vodafone"]),
        any::<bool>(),
    )
        .prop_map(|(source, ok, confidence, carrier, valid)| {
            if ok {
                let mut data = FieldMap::new();
                data.insert("carrier".into(), json!(carrier));
                data.insert("is_valid".into(), json!(valid));
                IntelligenceResult::success(source, data, confidence, Duration::from_millis(1))
                    .unwrap()
            } else {
                IntelligenceResult::failure(
                    source,
                    SourceError::new(SourceErrorKind::Http, "down"),
                    Duration::from_millis(1),
                )
            }
        })
}

fn aggregator() -> IntelligenceAggregator {
    IntelligenceAggregator::new(AggregatorConfig::default(), Vec::new()).unwrap()
}

// Property: confidence levels are a monotone step function
proptest! {
    #[test]
    fn confidence_level_is_monotone(a in -50.0f64..150.0, b in -50.0f64..150.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(get_confidence_level(lo) <= get_confidence_level(hi));
    }

    #[test]
    fn success_rejects_out_of_range_confidence(confidence in prop_oneof![-1000.0f64..-0.001, 100.001f64..1000.0]) {
        let result = IntelligenceResult::success(
            DataSource::Telnyx,
            FieldMap::new(),
            confidence,
            Duration::ZERO,
        );
        prop_assert!(result.is_err());
    }
}

// Property: merge and overall confidence are order independent and bounded
proptest! {
    #[test]
    fn overall_confidence_stays_in_range(results in prop::collection::vec(any_result(), 0..8)) {
        let score = aggregator().calculate_overall_confidence(&results);
        prop_assert!((0.0..=100.0).contains(&score));
        if results.iter().all(|r| !r.is_success()) {
            prop_assert_eq!(score, 0.0);
        }
    }

    #[test]
    fn merge_ignores_input_order(results in prop::collection::vec(any_result(), 1..8)) {
        let aggregator = aggregator();
        let forward = aggregator.merge_intelligence_data(&results);
        let mut reversed = results.clone();
        reversed.reverse();
        prop_assert_eq!(forward, aggregator.merge_intelligence_data(&reversed));
    }
}

// Property: pattern analysis never panics and keeps its scores bounded
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pattern_analysis_never_panics(input in "[0-9+() .-]{0,20}") {
        let engine = PatternAnalysisEngine::default();
        let analysis = engine.analyze(&input, "IN");
        let bulk = &analysis.bulk_registration;
        prop_assert!((0.0..=1.0).contains(&bulk.confidence_score));
        prop_assert!((0.0..=100.0).contains(&analysis.source_confidence()));
    }

    #[test]
    fn related_numbers_stay_within_window(national in 6_000_000_000u64..=9_999_999_999u64) {
        let engine = PatternAnalysisEngine::default();
        let window = engine.config().related_window as i64;
        let number = national.to_string();
        let related = engine.find_related_numbers(&number, "IN");

        prop_assert!(related.len() <= engine.config().max_related);
        for candidate in &related {
            let value: i64 = candidate.number().trim_start_matches("+91").parse().unwrap();
            prop_assert!((value - national as i64).abs() <= window);
            prop_assert!((0.0..=1.0).contains(&candidate.confidence_score()));
        }
    }

    #[test]
    fn relationship_confidence_is_bounded(a in 6_000_000_000u64..=9_999_999_999u64, b in 1_000_000_000u64..=9_999_999_999u64) {
        let engine = PatternAnalysisEngine::default();
        let score = engine.calculate_relationship_confidence(&a.to_string(), &b.to_string(), "IN");
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn formatter_never_panics(input in "[0-9a-z+() .-]{0,24}", region in "[A-Z]{0,3}") {
        let _ = NumberFormatter::new().parse(&input, &region);
    }
}
