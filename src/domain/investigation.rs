//! Investigations, stages and the alert payload they carry.
//!
//! An investigation is created on ingestion and mutated once per stage by
//! the agent owning that stage. It is never deleted, only marked closed.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::assessment::{ConfidenceScore, EscalationDecision, Summary};

/// One of the six fixed pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Execute,
    Analyze,
    Respond,
    Adapt,
    Report,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 6] = [
        Stage::Plan,
        Stage::Execute,
        Stage::Analyze,
        Stage::Respond,
        Stage::Adapt,
        Stage::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::Analyze => "analyze",
            Stage::Respond => "respond",
            Stage::Adapt => "adapt",
            Stage::Report => "report",
        }
    }

    /// Position in the pipeline (0-based)
    pub fn index(&self) -> usize {
        match self {
            Stage::Plan => 0,
            Stage::Execute => 1,
            Stage::Analyze => 2,
            Stage::Respond => 3,
            Stage::Adapt => 4,
            Stage::Report => 5,
        }
    }

    /// Share of overall progress owned by this stage, in whole percent.
    ///
    /// The six shares sum to exactly 100.
    pub fn weight_percent(&self) -> u32 {
        match self {
            Stage::Plan => 15,
            Stage::Execute => 20,
            Stage::Analyze => 25,
            Stage::Respond => 20,
            Stage::Adapt => 10,
            Stage::Report => 10,
        }
    }

    /// Share of overall progress as a ratio
    pub fn weight(&self) -> f64 {
        self.weight_percent() as f64 / 100.0
    }

    /// Name of the agent bound to this stage by default
    pub fn default_agent_name(&self) -> &'static str {
        match self {
            Stage::Plan => "planner",
            Stage::Execute => "executor",
            Stage::Analyze => "analyzer",
            Stage::Respond => "responder",
            Stage::Adapt => "adapter",
            Stage::Report => "reporter",
        }
    }

    /// The stage that follows this one, if any
    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// Whether completing this stage completes the investigation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Report)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage name that does not match any of the six pipeline phases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown stage: '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Stage::Plan),
            "execute" => Ok(Stage::Execute),
            "analyze" => Ok(Stage::Analyze),
            "respond" => Ok(Stage::Respond),
            "adapt" => Ok(Stage::Adapt),
            "report" => Ok(Stage::Report),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

/// Lifecycle status of the investigation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Received,
    Contextualized,
    Summarized,
    Completed,
    Closed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestigationStatus::Received => "received",
            InvestigationStatus::Contextualized => "contextualized",
            InvestigationStatus::Summarized => "summarized",
            InvestigationStatus::Completed => "completed",
            InvestigationStatus::Closed => "closed",
        }
    }
}

impl FromStr for InvestigationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(InvestigationStatus::Received),
            "contextualized" => Ok(InvestigationStatus::Contextualized),
            "summarized" => Ok(InvestigationStatus::Summarized),
            "completed" => Ok(InvestigationStatus::Completed),
            "closed" => Ok(InvestigationStatus::Closed),
            other => Err(format!("unknown investigation status: {}", other)),
        }
    }
}

impl Default for InvestigationStatus {
    fn default() -> Self {
        Self::Received
    }
}

/// Normalized alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse the loose severity labels found in vendor alerts
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informational" => Some(Severity::Informational),
            "low" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Informational => "informational",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// High or critical
    pub fn is_severe(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// The source event payload of an investigation.
///
/// Only the fields the engine reasons about are typed; everything else the
/// source product sent is kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,

    /// When the source product observed the activity (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// How many times the source product saw this alert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_count: Option<u64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Alert {
    /// Build an alert from an arbitrary JSON payload.
    ///
    /// Accepts both camelCase and snake_case keys and tolerates numbers sent
    /// as strings; unrecognised keys land in `extra`.
    pub fn from_value(value: &Value) -> Self {
        let mut alert = Alert::default();
        let Some(obj) = value.as_object() else {
            return alert;
        };

        for (key, val) in obj {
            match key.as_str() {
                "severity" => alert.severity = as_text(val),
                "sourceIp" | "source_ip" | "srcIp" | "src_ip" => alert.source_ip = as_text(val),
                "description" | "message" => {
                    if alert.description.is_none() || key == "description" {
                        alert.description = as_text(val);
                    }
                }
                "alertType" | "alert_type" | "type" => alert.alert_type = as_text(val),
                "timestamp" | "eventTime" | "event_time" => alert.timestamp = as_text(val),
                "repetitionCount" | "repetition_count" | "count" => {
                    alert.repetition_count = as_count(val)
                }
                _ => {
                    alert.extra.insert(key.clone(), val.clone());
                }
            }
        }

        alert
    }

    pub fn severity_level(&self) -> Option<Severity> {
        self.severity.as_deref().and_then(Severity::parse)
    }

    pub fn source_addr(&self) -> Option<IpAddr> {
        self.source_ip.as_deref().and_then(|ip| ip.trim().parse().ok())
    }

    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// One-line description used in summaries and timeline entries
    pub fn headline(&self) -> String {
        let kind = self.alert_type.as_deref().unwrap_or("alert");
        let severity = self.severity.as_deref().unwrap_or("unknown");
        match (&self.description, &self.source_ip) {
            (Some(desc), Some(ip)) => format!("{} [{}] from {}: {}", kind, severity, ip, desc),
            (Some(desc), None) => format!("{} [{}]: {}", kind, severity, desc),
            (None, Some(ip)) => format!("{} [{}] from {}", kind, severity, ip),
            (None, None) => format!("{} [{}]", kind, severity),
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The durable unit of work for one alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investigation {
    pub investigation_id: String,

    pub tenant_id: String,

    pub alert: Alert,

    pub current_stage: Stage,

    pub status: InvestigationStatus,

    pub received_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Enrichment gathered from security-product connectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceScore>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<EscalationDecision>,
}

impl Investigation {
    /// Create a freshly ingested investigation
    pub fn new(
        tenant_id: impl Into<String>,
        investigation_id: impl Into<String>,
        alert: Alert,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            investigation_id: investigation_id.into(),
            tenant_id: tenant_id.into(),
            alert,
            current_stage: Stage::Plan,
            status: InvestigationStatus::Received,
            received_at,
            updated_at: received_at,
            context: None,
            summary: None,
            confidence: None,
            decision: None,
        }
    }

    /// Apply a partial update; attributes absent from the update are untouched
    pub fn apply(&mut self, update: &RecordUpdate) {
        if let Some(stage) = update.stage {
            self.current_stage = stage;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(ref context) = update.context {
            self.context = Some(context.clone());
        }
        if let Some(ref summary) = update.summary {
            self.summary = Some(summary.clone());
        }
        if let Some(ref confidence) = update.confidence {
            self.confidence = Some(confidence.clone());
        }
        if let Some(ref decision) = update.decision {
            self.decision = Some(decision.clone());
        }
        self.updated_at = update.updated_at;
    }

    /// Whether the record has reached a final status
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            InvestigationStatus::Completed | InvestigationStatus::Closed
        )
    }
}

/// Partial-attribute update against a stored investigation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub stage: Option<Stage>,
    pub status: Option<InvestigationStatus>,
    pub context: Option<Value>,
    pub summary: Option<Summary>,
    pub confidence: Option<ConfidenceScore>,
    pub decision: Option<EscalationDecision>,
    pub updated_at: DateTime<Utc>,
}

impl RecordUpdate {
    /// An update that only bumps `updated_at`
    pub fn at(updated_at: DateTime<Utc>) -> Self {
        Self {
            stage: None,
            status: None,
            context: None,
            summary: None,
            confidence: None,
            decision: None,
            updated_at,
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn status(mut self, status: InvestigationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn summary(mut self, summary: Summary) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn confidence(mut self, confidence: ConfidenceScore) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn decision(mut self, decision: EscalationDecision) -> Self {
        self.decision = Some(decision);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_weights_sum_to_one_hundred() {
        let total: u32 = Stage::ALL.iter().map(|s| s.weight_percent()).sum();
        assert_eq!(total, 100);

        let ratio: f64 = Stage::ALL.iter().map(|s| s.weight()).sum();
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!("plan".parse::<Stage>(), Ok(Stage::Plan));
        assert_eq!(" Analyze ".parse::<Stage>(), Ok(Stage::Analyze));
        assert_eq!(
            "triage".parse::<Stage>(),
            Err(UnknownStage("triage".to_string()))
        );
    }

    #[test]
    fn test_stage_ordering() {
        assert_eq!(Stage::Plan.next(), Some(Stage::Execute));
        assert_eq!(Stage::Adapt.next(), Some(Stage::Report));
        assert_eq!(Stage::Report.next(), None);
        assert!(Stage::Report.is_terminal());
        assert!(!Stage::Respond.is_terminal());
    }

    #[test]
    fn test_alert_from_loose_payload() {
        let alert = Alert::from_value(&json!({
            "severity": "High",
            "source_ip": "203.0.113.1",
            "description": "malware detected",
            "count": "12",
            "hostname": "ws-042"
        }));

        assert_eq!(alert.severity_level(), Some(Severity::High));
        assert_eq!(alert.source_addr(), Some("203.0.113.1".parse().unwrap()));
        assert_eq!(alert.repetition_count, Some(12));
        assert_eq!(alert.extra.get("hostname"), Some(&json!("ws-042")));
    }

    #[test]
    fn test_alert_serialization_keeps_extra_fields() {
        let alert = Alert::from_value(&json!({
            "severity": "low",
            "sourceIp": "10.0.0.5",
            "ruleId": "R-100"
        }));

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["sourceIp"], "10.0.0.5");
        assert_eq!(json["ruleId"], "R-100");

        let parsed: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, alert);
    }

    #[test]
    fn test_partial_update_leaves_other_attributes() {
        let received = Utc::now();
        let mut investigation =
            Investigation::new("tenant-a", "inv-1", Alert::default(), received);
        investigation.context = Some(json!({"asset": {"owner": "it"}}));

        let later = received + chrono::Duration::seconds(5);
        investigation.apply(
            &RecordUpdate::at(later)
                .stage(Stage::Execute)
                .status(InvestigationStatus::Summarized),
        );

        assert_eq!(investigation.current_stage, Stage::Execute);
        assert_eq!(investigation.status, InvestigationStatus::Summarized);
        assert!(investigation.context.is_some());
        assert_eq!(investigation.updated_at, later);
        assert_eq!(investigation.received_at, received);
    }
}
