//! Escalation decision engine.
//!
//! Two passes: an ordered rule list picks a headline action (first match
//! wins), then a confidence gate downgrades any `auto_close` that does not
//! clear both confidence floors to `monitor`.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::scorer::AllowList;
use crate::config::DecisionConfig;
use crate::domain::{
    Alert, AutomationAction, ConfidenceScore, EscalationDecision, RiskLevel, Severity,
};

/// The rule that produced the headline action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionRule {
    SevereExternalSource,
    ThreatKeyword,
    LowFalsePositive,
    LowConfidence,
    ModerateFalsePositive,
    Default,
}

impl DecisionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionRule::SevereExternalSource => "severe_external_source",
            DecisionRule::ThreatKeyword => "threat_keyword",
            DecisionRule::LowFalsePositive => "low_false_positive",
            DecisionRule::LowConfidence => "low_confidence",
            DecisionRule::ModerateFalsePositive => "moderate_false_positive",
            DecisionRule::Default => "default",
        }
    }
}

impl fmt::Display for DecisionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: DecisionConfig,
    allow_list: AllowList,
    keywords: Option<Regex>,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(DecisionConfig::default(), AllowList::default())
    }
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig, allow_list: AllowList) -> Self {
        let keywords = keyword_pattern(&config.threat_keywords);
        Self {
            config,
            allow_list,
            keywords,
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// First threat keyword found in the alert description
    pub fn matched_keyword(&self, alert: &Alert) -> Option<String> {
        let description = alert.description.as_deref()?;
        let pattern = self.keywords.as_ref()?;
        pattern
            .find(description)
            .map(|m| m.as_str().to_lowercase())
    }

    /// Decide what to do with one scored alert
    pub fn decide(&self, alert: &Alert, score: &ConfidenceScore) -> EscalationDecision {
        let cfg = &self.config;
        let severity = alert.severity_level();
        let high_severity = severity.is_some_and(|s| s.is_severe());
        let external_source = alert
            .source_addr()
            .is_some_and(|addr| self.allow_list.locality(addr).is_external());
        let keyword = self.matched_keyword(alert);
        let fp = score.false_positive_probability;
        let overall = score.overall_confidence;
        let automation = score.automation_confidence;

        let (rule, action) = if high_severity && external_source {
            (DecisionRule::SevereExternalSource, AutomationAction::Escalate)
        } else if keyword.is_some() {
            (DecisionRule::ThreatKeyword, AutomationAction::Escalate)
        } else if fp < cfg.escalation_threshold {
            (DecisionRule::LowFalsePositive, AutomationAction::Escalate)
        } else if overall < cfg.confidence_threshold {
            (DecisionRule::LowConfidence, AutomationAction::Monitor)
        } else if fp < cfg.monitor_fp_threshold {
            (DecisionRule::ModerateFalsePositive, AutomationAction::Monitor)
        } else {
            (DecisionRule::Default, AutomationAction::AutoClose)
        };

        let threshold_met =
            overall >= cfg.confidence_threshold && automation >= cfg.automation_threshold;

        let gated = action == AutomationAction::AutoClose && !threshold_met;
        let final_action = if gated {
            AutomationAction::Monitor
        } else {
            action
        };

        let mut reasoning = rule_reasoning(rule, alert, keyword.as_deref(), score, cfg);
        if gated {
            reasoning.push_str(&format!(
                "; downgraded to monitor: confidence {:.2} / automation confidence {:.2} below floors {:.2} / {:.2}",
                overall, automation, cfg.confidence_threshold, cfg.automation_threshold
            ));
        }

        let mut risk_factors: BTreeMap<String, Value> = BTreeMap::new();
        risk_factors.insert("high_severity".to_string(), json!(high_severity));
        risk_factors.insert("external_source".to_string(), json!(external_source));
        risk_factors.insert("threat_keyword".to_string(), json!(keyword.is_some()));
        if let Some(ref keyword) = keyword {
            risk_factors.insert("matched_keyword".to_string(), json!(keyword));
        }
        risk_factors.insert(
            "low_false_positive".to_string(),
            json!(fp < cfg.escalation_threshold),
        );
        risk_factors.insert("confidence_threshold_met".to_string(), json!(threshold_met));
        risk_factors.insert("confidence_gate_downgrade".to_string(), json!(gated));
        risk_factors.insert("matched_rule".to_string(), json!(rule.as_str()));

        let risk_level = risk_level(final_action, severity);

        debug!(
            rule = %rule,
            action = %final_action,
            gated,
            fp,
            overall,
            automation,
            "Escalation decision"
        );

        EscalationDecision {
            should_escalate: final_action == AutomationAction::Escalate,
            automation_action: final_action,
            confidence_threshold_met: threshold_met,
            reasoning,
            risk_factors,
            risk_level,
        }
    }
}

/// Case-insensitive whole-word match; spaces, hyphens and underscores in a
/// keyword match each other
fn keyword_pattern(keywords: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            k.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
                .filter(|part| !part.is_empty())
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s_-]+")
        })
        .collect();

    if alternatives.is_empty() {
        return None;
    }

    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "Invalid threat keyword pattern; keyword rule disabled");
            None
        }
    }
}

fn risk_level(action: AutomationAction, severity: Option<Severity>) -> RiskLevel {
    match action {
        AutomationAction::Escalate if severity == Some(Severity::Critical) => RiskLevel::Critical,
        AutomationAction::Escalate => RiskLevel::High,
        AutomationAction::Monitor => RiskLevel::Medium,
        AutomationAction::AutoClose => RiskLevel::Low,
    }
}

fn rule_reasoning(
    rule: DecisionRule,
    alert: &Alert,
    keyword: Option<&str>,
    score: &ConfidenceScore,
    cfg: &DecisionConfig,
) -> String {
    match rule {
        DecisionRule::SevereExternalSource => format!(
            "Escalated: {} severity alert from external source {}",
            alert.severity.as_deref().unwrap_or("high"),
            alert.source_ip.as_deref().unwrap_or("unknown")
        ),
        DecisionRule::ThreatKeyword => format!(
            "Escalated: description matches threat keyword '{}'",
            keyword.unwrap_or_default()
        ),
        DecisionRule::LowFalsePositive => format!(
            "Escalated: false-positive probability {:.2} below {:.2}",
            score.false_positive_probability, cfg.escalation_threshold
        ),
        DecisionRule::LowConfidence => format!(
            "Monitoring: overall confidence {:.2} below {:.2}",
            score.overall_confidence, cfg.confidence_threshold
        ),
        DecisionRule::ModerateFalsePositive => format!(
            "Monitoring: false-positive probability {:.2} below {:.2}",
            score.false_positive_probability, cfg.monitor_fp_threshold
        ),
        DecisionRule::Default => format!(
            "Auto-closing: likely false positive ({:.2}) with confidence {:.2}",
            score.false_positive_probability, score.overall_confidence
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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
    fn test_keyword_variants() {
        let engine = DecisionEngine::default();
        for description in [
            "Possible Privilege-Escalation attempt",
            "privilege  escalation via sudo",
            "MALWARE beacon",
            "data exfiltration to cloud storage",
        ] {
            let alert = Alert::from_value(&json!({ "description": description }));
            assert!(engine.matched_keyword(&alert).is_some(), "{}", description);
        }

        let benign = Alert::from_value(&json!({ "description": "malwarebytes update" }));
        assert_eq!(engine.matched_keyword(&benign), None);
    }

    #[test]
    fn test_rule_order_keyword_beats_fp() {
        let engine = DecisionEngine::default();
        let alert = Alert::from_value(&json!({
            "severity": "low",
            "sourceIp": "10.0.0.1",
            "description": "malware quarantined"
        }));
        let decision = engine.decide(&alert, &score(0.9, 0.9, 0.9));

        assert_eq!(decision.automation_action, AutomationAction::Escalate);
        assert_eq!(decision.risk_factors["matched_rule"], "threat_keyword");
        assert_eq!(decision.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_allow_listed_source_is_not_external() {
        let engine = DecisionEngine::new(
            DecisionConfig::default(),
            AllowList::parse(&["203.0.113.0/24"]),
        );
        let alert = Alert::from_value(&json!({
            "severity": "critical",
            "sourceIp": "203.0.113.9",
            "description": "port scan"
        }));
        let decision = engine.decide(&alert, &score(0.7, 0.8, 0.8));

        assert_eq!(decision.risk_factors["external_source"], false);
        assert_eq!(decision.automation_action, AutomationAction::AutoClose);
    }

    #[test]
    fn test_critical_escalation_risk_level() {
        let engine = DecisionEngine::default();
        let alert = Alert::from_value(&json!({
            "severity": "critical",
            "sourceIp": "198.51.100.20"
        }));
        let decision = engine.decide(&alert, &score(0.6, 0.9, 0.9));

        assert!(decision.should_escalate);
        assert_eq!(decision.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_gate_records_downgrade() {
        let engine = DecisionEngine::default();
        let alert = Alert::from_value(&json!({ "severity": "low" }));
        let decision = engine.decide(&alert, &score(0.8, 0.7, 0.55));

        assert_eq!(decision.automation_action, AutomationAction::Monitor);
        assert!(!decision.confidence_threshold_met);
        assert_eq!(decision.risk_factors["confidence_gate_downgrade"], true);
        assert_eq!(decision.risk_factors["matched_rule"], "default");
        assert!(decision.reasoning.contains("downgraded to monitor"));
    }
}
