//! Stage agents and their registry.
//!
//! There is exactly one agent implementation per stage, so dispatch is a
//! closed `match` over `AgentKind`. The registry only carries the agent name
//! bound to each stage, seeded idempotently at boot.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::journal::key_segment;
use super::orchestrator::TriageServices;
use super::scorer::{context_categories_present, ScoringInput, CONTEXT_CATEGORIES};
use crate::domain::{
    ConfidenceScore, EscalationDecision, Investigation, InvestigationEvent, InvestigationStatus,
    OutcomeRecord, ProgressKey, RecordUpdate, Stage, Summary,
};

/// The implementation behind a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Executor,
    Analyzer,
    Responder,
    Adapter,
    Reporter,
}

impl AgentKind {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Plan => AgentKind::Planner,
            Stage::Execute => AgentKind::Executor,
            Stage::Analyze => AgentKind::Analyzer,
            Stage::Respond => AgentKind::Responder,
            Stage::Adapt => AgentKind::Adapter,
            Stage::Report => AgentKind::Reporter,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            AgentKind::Planner => Stage::Plan,
            AgentKind::Executor => Stage::Execute,
            AgentKind::Analyzer => Stage::Analyze,
            AgentKind::Responder => Stage::Respond,
            AgentKind::Adapter => Stage::Adapt,
            AgentKind::Reporter => Stage::Report,
        }
    }

    /// First task reported to the tracker when the stage starts
    pub fn task(&self) -> &'static str {
        match self {
            AgentKind::Planner => "Creating investigation plan",
            AgentKind::Executor => "Gathering context and summarizing",
            AgentKind::Analyzer => "Scoring confidence and false-positive likelihood",
            AgentKind::Responder => "Deciding automation action",
            AgentKind::Adapter => "Recording outcome metrics",
            AgentKind::Reporter => "Writing investigation report",
        }
    }

    /// Run this agent against one event
    pub async fn handle(
        &self,
        services: &TriageServices,
        event: InvestigationEvent,
    ) -> Result<StageOutput> {
        let now = Utc::now();
        match self {
            AgentKind::Planner => plan(services, event, now).await,
            AgentKind::Executor => execute(services, event, now).await,
            AgentKind::Analyzer => analyze(services, event, now).await,
            AgentKind::Responder => respond(services, event, now).await,
            AgentKind::Adapter => adapt(services, event, now).await,
            AgentKind::Reporter => report(services, event, now).await,
        }
    }
}

/// The agent name and implementation bound to a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBinding {
    pub stage: Stage,
    pub agent_name: String,
    pub kind: AgentKind,
}

impl AgentBinding {
    pub fn default_for(stage: Stage) -> Self {
        Self {
            stage,
            agent_name: stage.default_agent_name().to_string(),
            kind: AgentKind::for_stage(stage),
        }
    }
}

/// Stage -> agent bindings
#[derive(Debug, Default)]
pub struct AgentRegistry {
    bindings: RwLock<BTreeMap<Stage, AgentBinding>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `agent_name` to `stage` unless the stage already has a binding.
    ///
    /// Returns true when a binding was created.
    pub fn bind_if_absent(&self, stage: Stage, agent_name: impl Into<String>) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        if bindings.contains_key(&stage) {
            return false;
        }
        bindings.insert(
            stage,
            AgentBinding {
                stage,
                agent_name: agent_name.into(),
                kind: AgentKind::for_stage(stage),
            },
        );
        true
    }

    /// Seed the default binding for every stage; returns how many were created
    pub fn seed_defaults(&self) -> usize {
        let created = Stage::ALL
            .iter()
            .filter(|stage| self.bind_if_absent(**stage, stage.default_agent_name()))
            .count();
        if created > 0 {
            debug!(created, "Seeded default agent bindings");
        }
        created
    }

    pub fn resolve(&self, stage: Stage) -> Option<AgentBinding> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&stage)
            .cloned()
    }

    /// Every binding in stage order
    pub fn bindings(&self) -> Vec<AgentBinding> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

/// What an agent hands back to the orchestrator
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// The event to forward, with this stage's additions merged in
    pub event: InvestigationEvent,
    /// Stage output; merged under the stage name, journaled and published
    pub detail: Value,
    /// Last task the agent worked on
    pub task: String,
    pub artifacts: Vec<String>,
}

impl StageOutput {
    fn new(event: InvestigationEvent, detail: Value, task: impl Into<String>) -> Self {
        Self {
            event,
            detail,
            task: task.into(),
            artifacts: Vec::new(),
        }
    }
}

/// Apply a partial record update; failures and missing records are logged
async fn update_record(services: &TriageServices, event: &InvestigationEvent, update: RecordUpdate) {
    match services
        .records
        .update(event.tenant_id(), event.investigation_id(), &update)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => debug!(
            investigation = %event.investigation_id(),
            "Investigation record not found; skipping update"
        ),
        Err(e) => warn!(
            investigation = %event.investigation_id(),
            error = %e,
            "Investigation record update failed"
        ),
    }
}

fn typed_field<T: serde::de::DeserializeOwned>(event: &InvestigationEvent, key: &str) -> Option<T> {
    event
        .get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

async fn plan(
    services: &TriageServices,
    mut event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let received_at = event.received_at().unwrap_or(now);
    let mut record = Investigation::new(
        event.tenant_id(),
        event.investigation_id(),
        event.alert(),
        received_at,
    );
    record.context = event.context().cloned();

    services
        .records
        .put(&record)
        .await
        .with_context(|| format!("Failed to store investigation {}", record.investigation_id))?;

    services
        .tracker
        .start_tracking(event.tenant_id(), event.investigation_id(), now)
        .await;

    let present = context_categories_present(event.context());
    let detail = json!({
        "status": InvestigationStatus::Received,
        "stages": Stage::ALL,
        "expectedContext": CONTEXT_CATEGORIES,
        "contextPresent": present,
        "headline": record.alert.headline(),
    });
    event.set("receivedAt", Value::String(received_at.to_rfc3339()));

    Ok(StageOutput::new(event, detail, "Investigation plan created"))
}

async fn execute(
    services: &TriageServices,
    mut event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let context = event.context().cloned();
    let mut update = RecordUpdate::at(now)
        .stage(Stage::Execute)
        .status(InvestigationStatus::Contextualized);
    if let Some(ref context) = context {
        update = update.context(context.clone());
    }
    update_record(services, &event, update).await;

    let summarizer = services.summarizer.name().to_string();
    let status = match services
        .summarizer
        .summarize(&event.alert_value(), context.as_ref())
        .await
    {
        Ok(summary) => {
            event.set("summary", serde_json::to_value(&summary)?);
            update_record(
                services,
                &event,
                RecordUpdate::at(now)
                    .status(InvestigationStatus::Summarized)
                    .summary(summary),
            )
            .await;
            InvestigationStatus::Summarized
        }
        Err(e) => {
            warn!(
                investigation = %event.investigation_id(),
                summarizer = %summarizer,
                error = %e,
                "Summarizer failed; continuing without a summary"
            );
            event.push_warning(Stage::Execute, format!("summarizer '{}' failed: {}", summarizer, e));
            InvestigationStatus::Contextualized
        }
    };

    let detail = json!({
        "status": status,
        "summarizer": summarizer,
        "contextCategories": context_categories_present(context.as_ref()),
    });
    Ok(StageOutput::new(event, detail, "Context gathered"))
}

fn score_event(services: &TriageServices, event: &InvestigationEvent, now: DateTime<Utc>) -> ConfidenceScore {
    let alert = event.alert();
    let summary: Option<Summary> = typed_field(event, "summary");
    let input = ScoringInput::new(&alert, now)
        .context(event.context())
        .summary(summary.as_ref());
    services.scorer.score(&input)
}

async fn analyze(
    services: &TriageServices,
    mut event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let score = score_event(services, &event, now);
    let key = ProgressKey::new(event.tenant_id(), event.investigation_id());
    services.tracker.record_assessment(&key, &score, now).await;
    update_record(
        services,
        &event,
        RecordUpdate::at(now)
            .stage(Stage::Analyze)
            .confidence(score.clone()),
    )
    .await;

    let detail = json!({
        "overallConfidence": score.overall_confidence,
        "falsePositiveProbability": score.false_positive_probability,
        "automationConfidence": score.automation_confidence,
        "defaultedInputs": score.defaulted_inputs,
    });
    event.set("confidence", serde_json::to_value(&score)?);
    Ok(StageOutput::new(event, detail, "Confidence scored"))
}

async fn respond(
    services: &TriageServices,
    mut event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let score = match typed_field::<ConfidenceScore>(&event, "confidence") {
        Some(score) => score,
        None => {
            debug!(investigation = %event.investigation_id(), "No upstream score; rescoring");
            let score = score_event(services, &event, now);
            event.set("confidence", serde_json::to_value(&score)?);
            score
        }
    };

    let decision = services.decisions.decide(&event.alert(), &score);
    let key = ProgressKey::new(event.tenant_id(), event.investigation_id());
    services.tracker.record_decision(&key, &decision, now).await;
    update_record(
        services,
        &event,
        RecordUpdate::at(now)
            .stage(Stage::Respond)
            .decision(decision.clone()),
    )
    .await;

    let detail = json!({
        "automationAction": decision.automation_action,
        "shouldEscalate": decision.should_escalate,
        "riskLevel": decision.risk_level,
        "reasoning": decision.reasoning,
    });
    event.set("decision", serde_json::to_value(&decision)?);
    Ok(StageOutput::new(event, detail, "Automation action decided"))
}

async fn adapt(
    services: &TriageServices,
    event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let score: ConfidenceScore =
        typed_field(&event, "confidence").context("Event carries no confidence score")?;
    let decision: EscalationDecision =
        typed_field(&event, "decision").context("Event carries no escalation decision")?;

    let processing_time_secs = event
        .received_at()
        .map(|received| ((now - received).num_milliseconds() as f64 / 1000.0).max(0.0))
        .unwrap_or(0.0);

    let outcome = OutcomeRecord {
        tenant_id: event.tenant_id().to_string(),
        investigation_id: event.investigation_id().to_string(),
        action: decision.automation_action,
        human_escalation: decision.should_escalate,
        processing_time_secs,
        confidence: score.overall_confidence,
        false_positive_probability: score.false_positive_probability,
        severity: event.alert().severity,
        recorded_at: now,
    };

    let recorded = services
        .metrics
        .record_outcome(&outcome)
        .await
        .context("Failed to record investigation outcome")?;
    if !recorded {
        debug!(investigation = %outcome.investigation_id, "Outcome already recorded; counters unchanged");
    }
    update_record(services, &event, RecordUpdate::at(now).stage(Stage::Adapt)).await;

    let detail = json!({
        "action": outcome.action,
        "humanEscalation": outcome.human_escalation,
        "processingTimeSecs": outcome.processing_time_secs,
        "recorded": recorded,
    });
    Ok(StageOutput::new(event, detail, "Outcome recorded"))
}

/// Blob key of an investigation's report
pub fn report_key(tenant_id: &str, investigation_id: &str) -> String {
    format!(
        "reports/{}/{}.json",
        key_segment(tenant_id),
        key_segment(investigation_id)
    )
}

async fn report(
    services: &TriageServices,
    event: InvestigationEvent,
    now: DateTime<Utc>,
) -> Result<StageOutput> {
    let decision: Option<EscalationDecision> = typed_field(&event, "decision");
    let status = match decision {
        Some(ref d) if d.automation_action == crate::domain::AutomationAction::AutoClose => {
            InvestigationStatus::Closed
        }
        _ => InvestigationStatus::Completed,
    };

    let report = json!({
        "investigationId": event.investigation_id(),
        "tenantId": event.tenant_id(),
        "status": status,
        "alert": event.alert_value(),
        "summary": event.get("summary"),
        "confidence": event.get("confidence"),
        "decision": decision,
        "warnings": event.warnings(),
        "generatedAt": now,
    });
    let body = serde_json::to_vec_pretty(&report)?;

    let key = report_key(event.tenant_id(), event.investigation_id());
    let metadata = BTreeMap::from([
        ("tenant-id".to_string(), event.tenant_id().to_string()),
        ("investigation-id".to_string(), event.investigation_id().to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ]);
    let written = services
        .blobs
        .put_if_absent(&key, &body, &metadata)
        .await
        .with_context(|| format!("Failed to write report {}", key))?;
    if !written {
        debug!(key = %key, "Report already written");
    }

    update_record(
        services,
        &event,
        RecordUpdate::at(now).stage(Stage::Report).status(status),
    )
    .await;

    let detail = json!({ "status": status, "report": key });
    let mut output = StageOutput::new(event, detail, "Report written");
    output.artifacts.push(key);
    Ok(output)
}
