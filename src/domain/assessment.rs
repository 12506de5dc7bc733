//! Value objects produced by the analyze and respond stages.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upstream model summary of an alert and its context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub text: String,

    /// Model-reported confidence in its own summary, if it gave one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Summary {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            model: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Genuineness assessment of one alert.
///
/// Every number is explainable from the named `factors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScore {
    pub overall_confidence: f64,

    pub false_positive_probability: f64,

    pub automation_confidence: f64,

    pub reasoning: String,

    /// Named false-positive indicator -> weight in [0, 1]
    pub factors: BTreeMap<String, f64>,

    /// Inputs that were absent and replaced by neutral defaults
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defaulted_inputs: Vec<String>,
}

/// Tri-state outcome of the escalation decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationAction {
    AutoClose,
    Monitor,
    Escalate,
}

impl AutomationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationAction::AutoClose => "auto_close",
            AutomationAction::Monitor => "monitor",
            AutomationAction::Escalate => "escalate",
        }
    }

    /// Resolved without a human (auto-closed or left under monitoring)
    pub fn is_automated(&self) -> bool {
        !matches!(self, AutomationAction::Escalate)
    }
}

impl fmt::Display for AutomationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutomationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_close" => Ok(AutomationAction::AutoClose),
            "monitor" => Ok(AutomationAction::Monitor),
            "escalate" => Ok(AutomationAction::Escalate),
            other => Err(format!("unknown automation action: {}", other)),
        }
    }
}

/// Coarse risk classification shown to progress observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automation decision for one investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationDecision {
    pub should_escalate: bool,

    pub automation_action: AutomationAction,

    pub confidence_threshold_met: bool,

    pub reasoning: String,

    /// Named risk signal -> bool or derived value
    pub risk_factors: BTreeMap<String, Value>,

    pub risk_level: RiskLevel,
}
