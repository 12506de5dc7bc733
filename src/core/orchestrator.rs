//! Stage orchestrator.
//!
//! Dispatches one inbound event to the agent bound to a stage, journals the
//! result, publishes a notification and keeps the progress tracker current.
//! A failing stage is marked failed in the tracker before the error is
//! returned.

use std::sync::{Arc, OnceLock};

use anyhow::Context;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::agents::{AgentBinding, AgentRegistry};
use super::decision::DecisionEngine;
use super::journal::{AuditJournal, JournalError};
use super::metrics::MetricsCollector;
use super::progress::ProgressTracker;
use super::scorer::Scorer;
use crate::adapters::{
    BlobStore, BroadcastBus, EventPublisher, FsBlobStore, MemoryBlobStore, MemoryMetricsStore,
    MemoryProgressStore, MemoryRecordStore, MetricsStore, ProgressStore, RecordStore, SqliteStore,
    Summarizer, TemplateSummarizer,
};
use crate::config::{EngineSettings, ResolvedConfig};
use crate::domain::{
    EventError, InvestigationEvent, ProgressKey, Stage, StageNotification, StageUpdate,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Unknown stage: '{0}'")]
    UnknownStage(String),

    #[error("Event is not a JSON object")]
    NotAnObject,

    #[error("Event is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Stage {stage} failed for investigation {investigation_id} (tenant {tenant_id}): {message}")]
    StageFailed {
        stage: Stage,
        tenant_id: String,
        investigation_id: String,
        message: String,
    },

    #[error(transparent)]
    Audit(#[from] JournalError),
}

impl From<EventError> for DispatchError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::NotAnObject => DispatchError::NotAnObject,
            EventError::MissingField(field) => DispatchError::MissingField(field),
        }
    }
}

/// External collaborators the engine is wired to
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub progress: Option<Arc<dyn ProgressStore>>,
    pub metrics: Arc<dyn MetricsStore>,
    /// Audit journal entries and reports
    pub blobs: Arc<dyn BlobStore>,
    pub bus: Arc<dyn EventPublisher>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(MemoryRecordStore::new()),
            progress: Some(Arc::new(MemoryProgressStore::new())),
            metrics: Arc::new(MemoryMetricsStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            bus: Arc::new(BroadcastBus::new()),
            summarizer: Arc::new(TemplateSummarizer::new()),
        }
    }

    /// SQLite for records, progress and metrics; files for the journal
    pub fn local(config: &ResolvedConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.home)
            .with_context(|| format!("Failed to create state directory: {}", config.home.display()))?;
        let db_path = config.database_path();
        let store = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database: {}", db_path.display()))?,
        );

        Ok(Self {
            records: store.clone(),
            progress: Some(store.clone()),
            metrics: store,
            blobs: Arc::new(FsBlobStore::new(config.journal_dir())),
            bus: Arc::new(BroadcastBus::new()),
            summarizer: Arc::new(TemplateSummarizer::new()),
        })
    }
}

/// Everything a stage agent needs, built once per process
pub struct TriageServices {
    pub records: Arc<dyn RecordStore>,
    pub tracker: Arc<ProgressTracker>,
    pub scorer: Scorer,
    pub decisions: DecisionEngine,
    pub journal: AuditJournal,
    pub metrics: Arc<MetricsCollector>,
    pub bus: Arc<dyn EventPublisher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub blobs: Arc<dyn BlobStore>,
}

impl TriageServices {
    pub fn new(settings: &EngineSettings, collaborators: Collaborators) -> Self {
        let mut tracker = ProgressTracker::new()
            .with_records(collaborators.records.clone())
            .with_retention(settings.progress.retention());
        if let Some(durable) = collaborators.progress {
            tracker = tracker.with_durable(durable);
        }

        let scorer = Scorer::new(settings.scoring.clone());
        let decisions = DecisionEngine::new(settings.decision.clone(), scorer.allow_list().clone());

        Self {
            records: collaborators.records,
            tracker: Arc::new(tracker),
            scorer,
            decisions,
            journal: AuditJournal::new(collaborators.blobs.clone()),
            metrics: Arc::new(MetricsCollector::new(
                collaborators.metrics,
                settings.metrics.clone(),
                settings.roi.clone(),
            )),
            bus: collaborators.bus,
            summarizer: collaborators.summarizer,
            blobs: collaborators.blobs,
        }
    }

    pub fn in_memory(settings: &EngineSettings) -> Self {
        Self::new(settings, Collaborators::in_memory())
    }
}

/// Stage dispatcher
pub struct Orchestrator {
    services: Arc<TriageServices>,
    registry: Arc<AgentRegistry>,
    /// Bindings resolved from the registry, one slot per stage
    resolved: [OnceLock<AgentBinding>; 6],
}

impl Orchestrator {
    /// Orchestrator over a registry seeded with the default bindings
    pub fn new(services: Arc<TriageServices>) -> Self {
        let registry = Arc::new(AgentRegistry::new());
        registry.seed_defaults();
        Self::with_registry(services, registry)
    }

    pub fn with_registry(services: Arc<TriageServices>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            services,
            registry,
            resolved: Default::default(),
        }
    }

    pub fn services(&self) -> &TriageServices {
        &self.services
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// The binding for a stage, resolved once per process
    pub fn binding(&self, stage: Stage) -> &AgentBinding {
        self.resolved[stage.index()].get_or_init(|| {
            self.registry.resolve(stage).unwrap_or_else(|| {
                warn!(stage = %stage, "No agent bound to stage; using default");
                AgentBinding::default_for(stage)
            })
        })
    }

    /// Dispatch a raw event to the agent for a named stage
    pub async fn dispatch(&self, stage: &str, event: Value) -> Result<Value, DispatchError> {
        let stage: Stage = stage
            .parse()
            .map_err(|e: crate::domain::UnknownStage| DispatchError::UnknownStage(e.0))?;
        let event = InvestigationEvent::from_value(event)?;
        let event = self.dispatch_stage(stage, event).await?;
        Ok(event.into_value())
    }

    #[instrument(skip(self, event), fields(stage = %stage, tenant = %event.tenant_id(), investigation = %event.investigation_id()))]
    pub async fn dispatch_stage(
        &self,
        stage: Stage,
        event: InvestigationEvent,
    ) -> Result<InvestigationEvent, DispatchError> {
        let services = &self.services;
        let binding = self.binding(stage);
        let tenant_id = event.tenant_id().to_string();
        let investigation_id = event.investigation_id().to_string();
        let key = ProgressKey::new(&tenant_id, &investigation_id);

        // The plan agent starts tracking itself
        if stage != Stage::Plan {
            services
                .tracker
                .update_stage(
                    &key,
                    &StageUpdate::running(stage, binding.kind.task())
                        .agent(&binding.agent_name)
                        .progress(0.0),
                    Utc::now(),
                )
                .await;
        }

        let output = match binding.kind.handle(services, event).await {
            Ok(output) => output,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(agent = %binding.agent_name, error = %message, "Stage failed");
                self.mark_failed(&key, stage, binding, &message).await;
                return Err(DispatchError::StageFailed {
                    stage,
                    tenant_id,
                    investigation_id,
                    message,
                });
            }
        };

        if stage == Stage::Plan {
            services
                .tracker
                .update_stage(
                    &key,
                    &StageUpdate::running(stage, binding.kind.task()).agent(&binding.agent_name),
                    Utc::now(),
                )
                .await;
        }

        let mut event = output.event;
        event.set_stage_output(stage, output.detail.clone());

        let payload = json!({
            "agent": binding.agent_name,
            "task": output.task,
            "detail": output.detail,
            "artifacts": output.artifacts,
            "warnings": event.warnings(),
        });
        if let Err(e) = services
            .journal
            .log_stage_event(&tenant_id, &investigation_id, stage, payload)
            .await
        {
            self.mark_failed(&key, stage, binding, &e.to_string()).await;
            return Err(DispatchError::Audit(e));
        }

        let notification = StageNotification {
            agent: binding.agent_name.clone(),
            stage,
            tenant_id: tenant_id.clone(),
            investigation_id: investigation_id.clone(),
            detail: output.detail,
            published_at: Utc::now(),
        };
        if let Err(e) = services.bus.publish(&notification).await {
            warn!(error = %e, "Stage notification not published");
        }

        let mut done = StageUpdate::completed(stage)
            .agent(&binding.agent_name)
            .task(output.task);
        for artifact in output.artifacts {
            done = done.artifact(artifact);
        }
        services.tracker.update_stage(&key, &done, Utc::now()).await;

        info!(agent = %binding.agent_name, "Stage completed");
        Ok(event)
    }

    async fn mark_failed(&self, key: &ProgressKey, stage: Stage, binding: &AgentBinding, message: &str) {
        self.services
            .tracker
            .update_stage(
                key,
                &StageUpdate::failed(stage, message).agent(&binding.agent_name),
                Utc::now(),
            )
            .await;
    }

    /// Run every stage in order, stopping at the first failure
    #[instrument(skip(self, event))]
    pub async fn run_investigation(&self, event: Value) -> Result<Value, DispatchError> {
        let mut event = InvestigationEvent::from_value(event)?;
        for stage in Stage::ALL {
            event = self.dispatch_stage(stage, event).await?;
        }
        info!(
            tenant = %event.tenant_id(),
            investigation = %event.investigation_id(),
            "Investigation finished"
        );
        Ok(event.into_value())
    }
}
