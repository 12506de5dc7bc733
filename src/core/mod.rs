//! Core triage engine.
//!
//! This module contains:
//! - Scorer: confidence and false-positive scoring
//! - Decision: escalation rules and the confidence gate
//! - Progress: two-tier real-time progress tracking
//! - Metrics / ROI / Dashboard: windowed automation statistics
//! - Journal: tamper-evident audit log
//! - Orchestrator: stage dispatch over the agent table

pub mod agents;
pub mod cache;
pub mod dashboard;
pub mod decision;
pub mod journal;
pub mod metrics;
pub mod orchestrator;
pub mod progress;
pub mod roi;
pub mod scorer;

// Re-export commonly used types
pub use agents::{AgentBinding, AgentKind, AgentRegistry, StageOutput};
pub use cache::{CacheStats, TtlCache};
pub use dashboard::{DashboardAggregator, DashboardSummary, DashboardView};
pub use decision::{DecisionEngine, DecisionRule};
pub use journal::{AuditJournal, JournalError, JournalReceipt};
pub use metrics::{
    AutomationMetrics, ConfidenceDistribution, DailyCounters, EfficiencyMetrics, MetricsCollector,
    MetricsSnapshot, TrendPoint,
};
pub use orchestrator::{Collaborators, DispatchError, Orchestrator, TriageServices};
pub use progress::{MirrorStatus, ProgressTracker, TrackerUpdate};
pub use roi::{compute_roi, RoiInput, RoiMetrics};
pub use scorer::{AllowList, Scorer, ScoringInput, SourceLocality};
