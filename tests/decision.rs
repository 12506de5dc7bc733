//! Escalation Decision Integration Tests
//!
//! Rule ordering, the confidence gate and the documented scenarios.

use std::collections::BTreeMap;

use serde_json::json;

use soc_triage::core::DecisionEngine;
use soc_triage::domain::{Alert, AutomationAction, ConfidenceScore, RiskLevel};

fn score(fp: f64, overall: f64, automation: f64) -> ConfidenceScore {
    ConfidenceScore {
        overall_confidence: overall,
        false_positive_probability: fp,
        automation_confidence: automation,
        reasoning: String::new(),
        factors: BTreeMap::new(),
        defaulted_inputs: Vec::new(),
    }
}

#[test]
fn test_high_severity_malware_escalates() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({
        "severity": "high",
        "sourceIp": "203.0.113.1",
        "description": "malware detected"
    }));

    let decision = engine.decide(&alert, &score(0.15, 0.9, 0.9));

    assert_eq!(decision.automation_action, AutomationAction::Escalate);
    assert!(decision.should_escalate);
    assert_eq!(decision.risk_factors["matched_rule"], "severe_external_source");
    assert_eq!(decision.risk_level, RiskLevel::High);
}

#[test]
fn test_benign_backup_auto_closes() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({
        "severity": "low",
        "sourceIp": "192.168.1.100",
        "description": "backup process"
    }));

    let decision = engine.decide(&alert, &score(0.85, 0.8, 0.7));

    assert_eq!(decision.automation_action, AutomationAction::AutoClose);
    assert!(!decision.should_escalate);
    assert!(decision.confidence_threshold_met);
    assert_eq!(decision.risk_level, RiskLevel::Low);
}

#[test]
fn test_low_overall_confidence_never_auto_closes() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({
        "severity": "low",
        "sourceIp": "192.168.1.100",
        "description": "backup process"
    }));

    let decision = engine.decide(&alert, &score(0.85, 0.5, 0.9));

    assert_eq!(decision.automation_action, AutomationAction::Monitor);
    assert!(!decision.should_escalate);
    assert!(!decision.confidence_threshold_met);
}

#[test]
fn test_gate_downgrades_low_automation_confidence() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({ "severity": "low", "sourceIp": "10.0.0.8" }));

    let decision = engine.decide(&alert, &score(0.85, 0.8, 0.59));

    assert_eq!(decision.automation_action, AutomationAction::Monitor);
    assert_eq!(decision.risk_factors["confidence_gate_downgrade"], true);
    assert_eq!(decision.risk_level, RiskLevel::Medium);
}

#[test]
fn test_auto_close_implies_both_floors() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({ "severity": "low", "sourceIp": "10.0.0.8" }));
    let grid = [0.0, 0.2, 0.29, 0.3, 0.45, 0.5, 0.59, 0.6, 0.61, 0.8, 1.0];

    for fp in grid {
        for overall in grid {
            for automation in grid {
                let decision = engine.decide(&alert, &score(fp, overall, automation));
                if decision.automation_action == AutomationAction::AutoClose {
                    assert!(overall >= 0.6 && automation >= 0.6);
                }
                assert_eq!(
                    decision.should_escalate,
                    decision.automation_action == AutomationAction::Escalate
                );
            }
        }
    }
}

#[test]
fn test_rule_order() {
    let engine = DecisionEngine::default();
    let quiet = Alert::from_value(&json!({ "severity": "medium", "sourceIp": "10.0.0.8" }));

    let cases = [
        // (fp, overall, expected rule, expected action)
        (0.2, 0.3, "low_false_positive", AutomationAction::Escalate),
        (0.6, 0.3, "low_confidence", AutomationAction::Monitor),
        (0.4, 0.9, "moderate_false_positive", AutomationAction::Monitor),
        (0.7, 0.9, "default", AutomationAction::AutoClose),
    ];

    for (fp, overall, rule, action) in cases {
        let decision = engine.decide(&quiet, &score(fp, overall, 0.9));
        assert_eq!(decision.risk_factors["matched_rule"], rule);
        assert_eq!(decision.automation_action, action);
    }
}

#[test]
fn test_medium_severity_external_is_not_rule_one() {
    let engine = DecisionEngine::default();
    let alert = Alert::from_value(&json!({ "severity": "medium", "sourceIp": "198.51.100.4" }));

    let decision = engine.decide(&alert, &score(0.7, 0.9, 0.9));

    assert_eq!(decision.risk_factors["external_source"], true);
    assert_eq!(decision.automation_action, AutomationAction::AutoClose);
}
