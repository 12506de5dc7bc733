//! Scoring Integration Tests
//!
//! Table-driven checks of the confidence / false-positive model.

use chrono::{TimeZone, Utc};
use serde_json::json;

use soc_triage::config::ScoringConfig;
use soc_triage::core::{Scorer, ScoringInput};
use soc_triage::domain::{Alert, Summary};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_outputs_are_clamped() {
    let scorer = Scorer::default();
    let now = Utc.with_ymd_and_hms(2024, 6, 4, 11, 0, 0).unwrap();

    let alerts = [
        json!({}),
        json!({ "severity": "critical", "sourceIp": "8.8.8.8", "count": 1 }),
        json!({ "severity": "low", "sourceIp": "10.1.1.1", "count": 500 }),
        json!({ "severity": "bogus", "sourceIp": "not-an-ip", "count": "x" }),
        json!({ "severity": "medium", "sourceIp": "fe80::1", "timestamp": "2024-06-01T02:00:00Z" }),
    ];
    let contexts = [
        None,
        Some(json!({})),
        Some(json!({ "asset": {"id": 1}, "user": "a", "threatIntel": [1], "network": {"x": 1}, "history": [1] })),
    ];
    let confidences = [None, Some(-3.0), Some(0.0), Some(0.45), Some(1.0), Some(7.5), Some(f64::NAN)];

    for alert in &alerts {
        let alert = Alert::from_value(alert);
        for context in &contexts {
            for confidence in confidences {
                let summary = confidence.map(|c| Summary::new("s").with_confidence(c));
                let score = scorer.score(
                    &ScoringInput::new(&alert, now)
                        .context(context.as_ref())
                        .summary(summary.as_ref()),
                );
                for value in [
                    score.overall_confidence,
                    score.false_positive_probability,
                    score.automation_confidence,
                ] {
                    assert!((0.0..=1.0).contains(&value), "{} out of range", value);
                }
                for weight in score.factors.values() {
                    assert!((0.0..=1.0).contains(weight));
                }
            }
        }
    }
}

#[test]
fn test_benign_off_hours_alert() {
    let scorer = Scorer::default();
    let alert = Alert::from_value(&json!({
        "severity": "low",
        "sourceIp": "192.168.1.100",
        "description": "backup process",
        "alertType": "file_activity",
        "timestamp": "2024-06-02T03:00:00Z",
        "count": 12
    }));
    let summary = Summary::new("routine backup").with_confidence(0.9);

    let score = scorer.score(&ScoringInput::new(&alert, Utc::now()).summary(Some(&summary)));

    // severity 0.7, private 0.6, repetition 0.7, off-hours 0.3, no context 1.0, ai 0.2
    assert!(approx(score.false_positive_probability, 3.5 / 6.0));
    assert!(approx(score.overall_confidence, 0.9 * (1.0 - 3.5 / 6.0 * 0.3)));
    // (required 1.0 + context 0.0 + upstream 0.9 + precedent 0.7) / 4
    assert!(approx(score.automation_confidence, 0.65));
    assert_eq!(score.defaulted_inputs, vec!["context".to_string()]);
    assert_eq!(score.factors["source_locality"], 0.6);
    assert!(score.reasoning.starts_with("High model confidence (0.90)"));
    assert!(score.reasoning.contains("limited enrichment context (0/5 categories)"));
    assert!(score.reasoning.contains("context_gap (1.00)"));
}

#[test]
fn test_severe_external_alert_scores_low_fp() {
    let scorer = Scorer::default();
    let alert = Alert::from_value(&json!({
        "severity": "high",
        "sourceIp": "203.0.113.1",
        "description": "malware detected",
        "timestamp": "2024-06-04T10:00:00Z",
        "count": 2
    }));
    let context = json!({
        "asset": { "criticality": "high" },
        "user": { "name": "svc" },
        "threatIntel": { "matches": 3 },
        "network": { "flows": 10 },
        "history": [{ "seen": 1 }]
    });
    let summary = Summary::new("active malware").with_confidence(0.2);

    let score = scorer.score(
        &ScoringInput::new(&alert, Utc::now())
            .context(Some(&context))
            .summary(Some(&summary)),
    );

    // high 0.1, external 0.2, repetition 0.2, business hours 0.4, full context 0.0, ai 0.8
    assert!(approx(score.false_positive_probability, 1.7 / 6.0));
    assert_eq!(score.factors["context_gap"], 0.0);
    assert!(score.defaulted_inputs.is_empty());
    assert!(score.reasoning.contains("complete enrichment context"));
}

#[test]
fn test_allow_listed_source_weight() {
    let scorer = Scorer::new(ScoringConfig {
        allow_list: vec!["203.0.113.0/24".to_string()],
        ..ScoringConfig::default()
    });
    let alert = Alert::from_value(&json!({ "sourceIp": "203.0.113.50" }));
    let score = scorer.score(&ScoringInput::new(&alert, Utc::now()));
    assert_eq!(score.factors["source_locality"], 0.7);
}

#[test]
fn test_missing_inputs_use_neutral_defaults() {
    let scorer = Scorer::default();
    let alert = Alert::from_value(&json!({}));
    let now = Utc.with_ymd_and_hms(2024, 6, 4, 11, 0, 0).unwrap();
    let score = scorer.score(&ScoringInput::new(&alert, now));

    for input in ["severity", "sourceIp", "timestamp", "context", "summaryConfidence"] {
        assert!(score.defaulted_inputs.iter().any(|d| d == input), "{}", input);
    }
    // severity 0.8, business hours 0.4, context gap 1.0
    assert!(approx(score.false_positive_probability, 2.2 / 3.0));
    assert!(approx(score.overall_confidence, 0.5 * (1.0 - 2.2 / 3.0 * 0.3)));
    assert!(score.reasoning.starts_with("No model confidence reported; assuming 0.50"));
}
