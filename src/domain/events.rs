//! The event object passed from stage to stage, and the notification each
//! stage publishes after handling it.
//!
//! Stage handlers receive an open JSON object and must echo it forward:
//! unknown fields are never dropped, and each stage's output is merged in
//! under the stage's name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::investigation::{Alert, Stage};

pub const INVESTIGATION_ID: &str = "investigationId";
pub const TENANT_ID: &str = "tenantId";

/// Malformed inbound event
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("event is not a JSON object")]
    NotAnObject,

    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),
}

/// Inbound/outbound stage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct InvestigationEvent {
    fields: Map<String, Value>,
}

impl InvestigationEvent {
    /// Validate and wrap an inbound JSON object
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let Value::Object(fields) = value else {
            return Err(EventError::NotAnObject);
        };

        for field in [INVESTIGATION_ID, TENANT_ID] {
            match fields.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                _ => return Err(EventError::MissingField(field)),
            }
        }

        Ok(Self { fields })
    }

    /// Build a new ingestion event for an alert
    pub fn new(tenant_id: &str, investigation_id: &str, alert: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(INVESTIGATION_ID.to_string(), Value::String(investigation_id.to_string()));
        fields.insert(TENANT_ID.to_string(), Value::String(tenant_id.to_string()));
        fields.insert("alert".to_string(), alert);
        Self { fields }
    }

    pub fn investigation_id(&self) -> &str {
        self.str_field(INVESTIGATION_ID)
    }

    pub fn tenant_id(&self) -> &str {
        self.str_field(TENANT_ID)
    }

    fn str_field(&self, name: &str) -> &str {
        self.fields.get(name).and_then(Value::as_str).unwrap_or_default()
    }

    /// The alert payload, or the event itself when the alert was sent inline
    pub fn alert(&self) -> Alert {
        match self.fields.get("alert") {
            Some(alert) => Alert::from_value(alert),
            None => Alert::from_value(&Value::Object(self.fields.clone())),
        }
    }

    pub fn alert_value(&self) -> Value {
        self.fields
            .get("alert")
            .cloned()
            .unwrap_or_else(|| Value::Object(self.fields.clone()))
    }

    /// Enrichment context merged in by upstream connectors
    pub fn context(&self) -> Option<&Value> {
        self.fields.get("context").filter(|v| !v.is_null())
    }

    /// When the alert entered the pipeline, if a prior stage recorded it
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("receivedAt")
            .and_then(Value::as_str)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Output of a stage, merged under the stage's own name
    pub fn stage_output(&self, stage: Stage) -> Option<&Value> {
        self.fields.get(stage.as_str())
    }

    pub fn set_stage_output(&mut self, stage: Stage, output: Value) {
        self.fields.insert(stage.as_str().to_string(), output);
    }

    /// Append a non-fatal problem encountered while handling a stage
    pub fn push_warning(&mut self, stage: Stage, message: impl Into<String>) {
        let entry = serde_json::json!({ "stage": stage.as_str(), "message": message.into() });
        match self.fields.get_mut("warnings") {
            Some(Value::Array(warnings)) => warnings.push(entry),
            _ => {
                self.fields.insert("warnings".to_string(), Value::Array(vec![entry]));
            }
        }
    }

    pub fn warnings(&self) -> Vec<Value> {
        match self.fields.get("warnings") {
            Some(Value::Array(w)) => w.clone(),
            _ => Vec::new(),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for InvestigationEvent {
    type Error = EventError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<InvestigationEvent> for Value {
    fn from(event: InvestigationEvent) -> Self {
        event.into_value()
    }
}

/// Published on the event bus after each stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNotification {
    pub agent: String,
    pub stage: Stage,
    pub tenant_id: String,
    pub investigation_id: String,
    pub detail: Value,
    pub published_at: DateTime<Utc>,
}
