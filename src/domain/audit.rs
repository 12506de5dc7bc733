//! Tamper-evident audit journal entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::investigation::Stage;

/// One write-once stage-transition record.
///
/// `checksum_sha256` covers the canonical JSON of every other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub tenant_id: String,
    pub investigation_id: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub checksum_sha256: String,
}

impl AuditEntry {
    /// The checksummed portion of the entry
    pub fn unsigned(&self) -> Value {
        serde_json::json!({
            "tenantId": self.tenant_id,
            "investigationId": self.investigation_id,
            "stage": self.stage,
            "timestamp": self.timestamp,
            "payload": self.payload,
        })
    }
}
