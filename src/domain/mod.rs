//! Domain types for the triage engine.
//!
//! This module contains the core data structures:
//! - Investigation: the durable unit of work and its alert
//! - Events: the stage-to-stage event object and bus notifications
//! - Assessment: confidence scores and escalation decisions
//! - Progress: real-time per-stage progress
//! - Outcome / Audit: records consumed by metrics and the audit journal

pub mod assessment;
pub mod audit;
pub mod events;
pub mod investigation;
pub mod outcome;
pub mod progress;

// Re-export commonly used types
pub use assessment::{AutomationAction, ConfidenceScore, EscalationDecision, RiskLevel, Summary};
pub use audit::AuditEntry;
pub use events::{EventError, InvestigationEvent, StageNotification};
pub use investigation::{
    Alert, Investigation, InvestigationStatus, RecordUpdate, Severity, Stage, UnknownStage,
};
pub use outcome::OutcomeRecord;
pub use progress::{
    AgentProgress, ApplyOutcome, InvestigationProgress, ProgressKey, ProgressStatus, StageUpdate,
    TimelineEvent,
};
