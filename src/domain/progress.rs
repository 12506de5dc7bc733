//! Per-investigation progress state and its per-stage state machine.
//!
//! Each stage moves `queued -> running -> {completed, failed}`. A stage may
//! also jump straight from `queued` to a final status when its agent reports
//! start and finish in one call. Final statuses are terminal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::assessment::{AutomationAction, ConfidenceScore, EscalationDecision, RiskLevel};
use super::investigation::{Investigation, Stage};

/// Status of one stage, and of the investigation as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Queued => "queued",
            ProgressStatus::Running => "running",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Failed => "failed",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Failed)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache and storage key for a progress record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgressKey {
    pub tenant_id: String,
    pub investigation_id: String,
}

impl ProgressKey {
    pub fn new(tenant_id: impl Into<String>, investigation_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            investigation_id: investigation_id.into(),
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.investigation_id)
    }
}

/// Progress of the agent owning one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProgress {
    pub agent_name: String,

    pub status: ProgressStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,

    /// 0-100, never decreases within a stage
    pub progress_percentage: f64,

    #[serde(default)]
    pub artifacts_generated: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentProgress {
    pub fn queued(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: ProgressStatus::Queued,
            started_at: None,
            completed_at: None,
            current_task: None,
            progress_percentage: 0.0,
            artifacts_generated: Vec::new(),
            error_message: None,
        }
    }
}

/// One human-readable line in the investigation timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub agent: String,
    pub status: ProgressStatus,
    pub message: String,
}

/// A progress report from the agent owning `stage`
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpdate {
    pub stage: Stage,
    pub status: ProgressStatus,
    pub agent_name: Option<String>,
    pub current_task: Option<String>,
    pub progress: Option<f64>,
    pub artifacts: Vec<String>,
    pub error: Option<String>,
    /// Deduplicates redelivered updates; derived from the content when absent
    pub idempotency_key: Option<String>,
}

impl StageUpdate {
    pub fn new(stage: Stage, status: ProgressStatus) -> Self {
        Self {
            stage,
            status,
            agent_name: None,
            current_task: None,
            progress: None,
            artifacts: Vec::new(),
            error: None,
            idempotency_key: None,
        }
    }

    pub fn running(stage: Stage, task: impl Into<String>) -> Self {
        Self::new(stage, ProgressStatus::Running).task(task)
    }

    pub fn completed(stage: Stage) -> Self {
        Self::new(stage, ProgressStatus::Completed).progress(100.0)
    }

    pub fn failed(stage: Stage, error: impl Into<String>) -> Self {
        let mut update = Self::new(stage, ProgressStatus::Failed);
        update.error = Some(error.into());
        update
    }

    pub fn agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.current_task = Some(task.into());
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// The explicit key, or a content hash of the update
    pub fn effective_key(&self) -> String {
        if let Some(ref key) = self.idempotency_key {
            return key.clone();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.stage.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.status.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", self.progress).as_bytes());
        hasher.update(b"|");
        hasher.update(self.current_task.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.artifacts.join(",").as_bytes());
        hasher.update(b"|");
        hasher.update(self.error.as_deref().unwrap_or("").as_bytes());
        let digest = hasher.finalize();

        format!("{}:{}", self.stage, hex::encode(&digest[..8]))
    }
}

/// What happened when an update was applied
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    /// Same idempotency key seen before; nothing changed
    Duplicate,
    /// The stage is already in a final status, or the investigation failed
    Rejected {
        from: ProgressStatus,
        to: ProgressStatus,
    },
}

/// Real-time progress of one investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationProgress {
    pub tenant_id: String,

    pub investigation_id: String,

    pub overall_status: ProgressStatus,

    pub current_stage: Stage,

    pub current_agent: String,

    /// Weighted completion, 0-100
    pub overall_progress: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_positive_probability: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_decision: Option<AutomationAction>,

    pub stages: BTreeMap<Stage, AgentProgress>,

    /// Append-only, in call order
    pub timeline_events: Vec<TimelineEvent>,

    /// Idempotency keys of updates already applied
    #[serde(default)]
    pub applied_updates: BTreeSet<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl InvestigationProgress {
    /// A fresh record with every stage queued
    pub fn new(
        tenant_id: impl Into<String>,
        investigation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let stages = Stage::ALL
            .iter()
            .map(|stage| (*stage, AgentProgress::queued(stage.default_agent_name())))
            .collect();

        let mut progress = Self {
            tenant_id: tenant_id.into(),
            investigation_id: investigation_id.into(),
            overall_status: ProgressStatus::Queued,
            current_stage: Stage::Plan,
            current_agent: Stage::Plan.default_agent_name().to_string(),
            overall_progress: 0.0,
            confidence_score: None,
            false_positive_probability: None,
            risk_level: None,
            automation_decision: None,
            stages,
            timeline_events: Vec::new(),
            applied_updates: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        };

        progress.push_event(
            now,
            Stage::Plan,
            ProgressStatus::Queued,
            "Investigation received; tracking started".to_string(),
        );
        progress
    }

    /// Best-effort snapshot derived from the raw investigation record.
    ///
    /// Stages up to and including the record's current stage are taken as
    /// completed; the rest are queued.
    pub fn from_record(record: &Investigation, now: DateTime<Utc>) -> Self {
        let mut progress = Self::new(&record.tenant_id, &record.investigation_id, record.received_at);
        progress.timeline_events.clear();

        let done_through = if record.is_finished() {
            Stage::Report.index()
        } else {
            record.current_stage.index()
        };

        for stage in Stage::ALL {
            if stage.index() <= done_through {
                if let Some(agent) = progress.stages.get_mut(&stage) {
                    agent.status = ProgressStatus::Completed;
                    agent.progress_percentage = 100.0;
                }
            }
        }

        progress.current_stage = record.current_stage;
        progress.current_agent = record.current_stage.default_agent_name().to_string();
        if let Some(ref score) = record.confidence {
            progress.confidence_score = Some(score.overall_confidence);
            progress.false_positive_probability = Some(score.false_positive_probability);
        }
        if let Some(ref decision) = record.decision {
            progress.automation_decision = Some(decision.automation_action);
            progress.risk_level = Some(decision.risk_level);
        }

        progress.recompute();
        progress.push_event(
            now,
            record.current_stage,
            progress.overall_status,
            format!(
                "Progress reconstructed from investigation record (status {})",
                record.status.as_str()
            ),
        );
        progress.updated_at = record.updated_at;
        progress
    }

    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(&self.tenant_id, &self.investigation_id)
    }

    pub fn stage(&self, stage: Stage) -> Option<&AgentProgress> {
        self.stages.get(&stage)
    }

    pub fn is_finished(&self) -> bool {
        self.overall_status.is_final()
    }

    /// Apply one stage update, appending exactly one timeline event when it
    /// changes anything.
    pub fn apply(&mut self, update: &StageUpdate, now: DateTime<Utc>) -> ApplyOutcome {
        let key = update.effective_key();
        if self.applied_updates.contains(&key) {
            return ApplyOutcome::Duplicate;
        }

        // A failed investigation is abandoned; no stage moves afterwards
        if self.overall_status == ProgressStatus::Failed {
            return ApplyOutcome::Rejected {
                from: ProgressStatus::Failed,
                to: update.status,
            };
        }

        let agent = self
            .stages
            .entry(update.stage)
            .or_insert_with(|| AgentProgress::queued(update.stage.default_agent_name()));

        if agent.status.is_final() {
            return ApplyOutcome::Rejected {
                from: agent.status,
                to: update.status,
            };
        }

        if let Some(ref name) = update.agent_name {
            agent.agent_name = name.clone();
        }

        match update.status {
            ProgressStatus::Queued => {}
            ProgressStatus::Running => {
                if agent.started_at.is_none() {
                    agent.started_at = Some(now);
                }
            }
            ProgressStatus::Completed => {
                if agent.started_at.is_none() {
                    agent.started_at = Some(now);
                }
                agent.completed_at = Some(now);
                agent.progress_percentage = 100.0;
            }
            ProgressStatus::Failed => {
                if agent.started_at.is_none() {
                    agent.started_at = Some(now);
                }
                agent.completed_at = Some(now);
            }
        }
        agent.status = update.status;

        if let Some(ref task) = update.current_task {
            agent.current_task = Some(task.clone());
        }
        if let Some(pct) = update.progress {
            let pct = if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 };
            agent.progress_percentage = agent.progress_percentage.max(pct);
        }
        agent.artifacts_generated.extend(update.artifacts.iter().cloned());
        if let Some(ref error) = update.error {
            agent.error_message = Some(error.clone());
        }

        let message = timeline_message(update, agent);
        let agent_name = agent.agent_name.clone();

        self.current_stage = update.stage;
        self.current_agent = agent_name;
        self.applied_updates.insert(key);
        self.recompute();
        self.push_event(now, update.stage, update.status, message);
        self.updated_at = now;

        ApplyOutcome::Applied
    }

    /// Record the analyze-stage assessment
    pub fn apply_assessment(&mut self, score: &ConfidenceScore, now: DateTime<Utc>) {
        self.confidence_score = Some(score.overall_confidence);
        self.false_positive_probability = Some(score.false_positive_probability);

        let status = self.stage_status(Stage::Analyze);
        self.push_event(
            now,
            Stage::Analyze,
            status,
            format!(
                "Confidence {:.2}, false-positive probability {:.2}, automation confidence {:.2}",
                score.overall_confidence,
                score.false_positive_probability,
                score.automation_confidence
            ),
        );
        self.updated_at = now;
    }

    /// Record the respond-stage decision
    pub fn apply_decision(&mut self, decision: &EscalationDecision, now: DateTime<Utc>) {
        self.automation_decision = Some(decision.automation_action);
        self.risk_level = Some(decision.risk_level);

        let status = self.stage_status(Stage::Respond);
        self.push_event(
            now,
            Stage::Respond,
            status,
            format!(
                "Decision: {} (risk {})",
                decision.automation_action, decision.risk_level
            ),
        );
        self.updated_at = now;
    }

    fn stage_status(&self, stage: Stage) -> ProgressStatus {
        self.stages
            .get(&stage)
            .map(|a| a.status)
            .unwrap_or(ProgressStatus::Queued)
    }

    /// Re-derive overall status and weighted progress from the stages
    fn recompute(&mut self) {
        let weighted: f64 = self
            .stages
            .iter()
            .map(|(stage, agent)| stage.weight_percent() as f64 * agent.progress_percentage / 100.0)
            .sum();
        self.overall_progress = weighted.clamp(0.0, 100.0);

        let statuses: Vec<ProgressStatus> = self.stages.values().map(|a| a.status).collect();
        self.overall_status = if statuses.contains(&ProgressStatus::Failed) {
            ProgressStatus::Failed
        } else if self.stage_status(Stage::Report) == ProgressStatus::Completed {
            ProgressStatus::Completed
        } else if statuses.contains(&ProgressStatus::Running) {
            ProgressStatus::Running
        } else {
            ProgressStatus::Queued
        };
    }

    fn push_event(
        &mut self,
        timestamp: DateTime<Utc>,
        stage: Stage,
        status: ProgressStatus,
        message: String,
    ) {
        let agent = self
            .stages
            .get(&stage)
            .map(|a| a.agent_name.clone())
            .unwrap_or_else(|| stage.default_agent_name().to_string());

        self.timeline_events.push(TimelineEvent {
            timestamp,
            stage,
            agent,
            status,
            message,
        });
    }
}

fn timeline_message(update: &StageUpdate, agent: &AgentProgress) -> String {
    let task = update
        .current_task
        .as_deref()
        .or(agent.current_task.as_deref());

    match update.status {
        ProgressStatus::Queued => format!("{} stage queued for {}", update.stage, agent.agent_name),
        ProgressStatus::Running => match task {
            Some(task) => format!(
                "{} running {} stage: {} ({:.0}%)",
                agent.agent_name, update.stage, task, agent.progress_percentage
            ),
            None => format!(
                "{} running {} stage ({:.0}%)",
                agent.agent_name, update.stage, agent.progress_percentage
            ),
        },
        ProgressStatus::Completed => match task {
            Some(task) => format!("{} completed {} stage: {}", agent.agent_name, update.stage, task),
            None => format!("{} completed {} stage", agent.agent_name, update.stage),
        },
        ProgressStatus::Failed => format!(
            "{} failed {} stage: {}",
            agent.agent_name,
            update.stage,
            update.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
