//! soc-triage - staged security-alert investigation engine
//!
//! Runs each alert through a fixed six-stage pipeline (plan, execute,
//! analyze, respond, adapt, report), scores it for genuineness, decides
//! whether it can be closed without a human, and tracks the outcome.
//!
//! # Architecture
//!
//! - Every stage is dispatched to one agent through a closed table
//! - Scoring and decisions are pure functions over explicit inputs
//! - Progress lives in an in-process cache mirrored to a durable store
//! - Every stage transition is written once to a checksummed audit journal
//!
//! # Modules
//!
//! - `adapters`: External collaborator seams (stores, bus, summarizer)
//! - `core`: Engine services (Scorer, DecisionEngine, ProgressTracker, ...)
//! - `domain`: Data structures (Investigation, ConfidenceScore, ...)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Triage an alert end to end
//! soc-triage triage alert.json --tenant acme
//!
//! # Check automation metrics
//! soc-triage metrics acme --window 30
//!
//! # Verify an investigation's audit trail
//! soc-triage verify acme <investigation-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    DecisionEngine, DispatchError, MetricsCollector, Orchestrator, ProgressTracker, Scorer,
    TriageServices,
};
pub use domain::{
    AutomationAction, ConfidenceScore, EscalationDecision, InvestigationEvent,
    InvestigationProgress, Stage,
};
