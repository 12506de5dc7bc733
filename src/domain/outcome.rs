//! Completed-investigation outcomes consumed by the metrics collector.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::assessment::AutomationAction;

/// The result of one finished investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub tenant_id: String,

    pub investigation_id: String,

    pub action: AutomationAction,

    /// A human analyst had to take over
    pub human_escalation: bool,

    /// Wall-clock time from ingestion to decision
    pub processing_time_secs: f64,

    pub confidence: f64,

    pub false_positive_probability: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// The UTC day whose rolling counters this outcome lands in
    pub fn day(&self) -> NaiveDate {
        self.recorded_at.date_naive()
    }
}
