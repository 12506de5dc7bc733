//! Adapter interfaces for external collaborators.
//!
//! The engine never talks to storage, the event bus or a language model
//! directly. Each collaborator sits behind one of these traits, with an
//! in-memory implementation for tests and embedding and a local durable
//! implementation for the CLI.

pub mod bus;
pub mod fs;
pub mod memory;
pub mod sqlite;
pub mod summarizer;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::core::metrics::DailyCounters;
use crate::domain::{
    Investigation, InvestigationProgress, OutcomeRecord, ProgressKey, RecordUpdate,
    StageNotification, Summary,
};

pub use bus::BroadcastBus;
pub use fs::FsBlobStore;
pub use memory::{MemoryBlobStore, MemoryMetricsStore, MemoryProgressStore, MemoryRecordStore};
pub use sqlite::SqliteStore;
pub use summarizer::TemplateSummarizer;

/// Errors raised by storage and messaging adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Persistence unavailable: {0}")]
    Unavailable(String),

    #[error("Key already exists: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Durable store for investigation records keyed by (tenant, investigation)
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &str,
        investigation_id: &str,
    ) -> Result<Option<Investigation>, StoreError>;

    /// Create or overwrite the record under its key
    async fn put(&self, record: &Investigation) -> Result<(), StoreError>;

    /// Apply a partial update; `Ok(None)` when the record does not exist
    async fn update(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        update: &RecordUpdate,
    ) -> Result<Option<Investigation>, StoreError>;
}

/// Durable tier behind the progress tracker's in-process cache
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self, key: &ProgressKey) -> Result<Option<InvestigationProgress>, StoreError>;

    async fn save(&self, progress: &InvestigationProgress) -> Result<(), StoreError>;
}

/// One outcome's contribution to its day's rolling counters
#[derive(Debug, Clone, PartialEq)]
pub struct DailyDelta {
    pub auto_closed: u64,
    pub escalated: u64,
    pub monitored: u64,
    pub human_escalations: u64,
    pub processing_time_secs: f64,
    pub confidence: f64,
}

impl DailyDelta {
    pub fn from_outcome(outcome: &OutcomeRecord) -> Self {
        use crate::domain::AutomationAction;

        Self {
            auto_closed: u64::from(outcome.action == AutomationAction::AutoClose),
            escalated: u64::from(outcome.action == AutomationAction::Escalate),
            monitored: u64::from(outcome.action == AutomationAction::Monitor),
            human_escalations: u64::from(outcome.human_escalation),
            processing_time_secs: outcome.processing_time_secs,
            confidence: outcome.confidence,
        }
    }
}

/// Raw outcome records plus per-day rolling counters
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Store the outcome once per (tenant, investigation); `Ok(false)` when
    /// that investigation already has one
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<bool, StoreError>;

    /// Atomically add one outcome to the day's counters and fold its
    /// processing time and confidence into the running averages.
    async fn apply_daily(
        &self,
        tenant_id: &str,
        day: NaiveDate,
        delta: &DailyDelta,
    ) -> Result<(), StoreError>;

    /// Counters for every day in `[start, end)` that has any
    async fn daily_counters(
        &self,
        tenant_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, DailyCounters)>, StoreError>;

    /// Outcome records with `recorded_at` in `[start, end)`
    async fn outcomes(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>, StoreError>;
}

/// Object storage for audit and compliance artifacts
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object only if the key is free; `Ok(false)` when taken
    async fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Publish/subscribe bus for stage-transition notifications
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, notification: &StageNotification) -> Result<(), StoreError>;
}

/// Upstream summarization client
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, alert: &Value, context: Option<&Value>) -> anyhow::Result<Summary>;
}
