//! Pipeline Integration Tests
//!
//! End-to-end dispatch through all six stages with in-memory collaborators.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};

use soc_triage::adapters::{
    BlobStore, BroadcastBus, MemoryBlobStore, MemoryRecordStore, RecordStore, Summarizer,
    TemplateSummarizer,
};
use soc_triage::config::EngineSettings;
use soc_triage::core::agents::report_key;
use soc_triage::core::{Collaborators, DispatchError, Orchestrator, TriageServices};
use soc_triage::domain::{
    AutomationAction, InvestigationEvent, InvestigationStatus, ProgressStatus, Stage, Summary,
};

struct Harness {
    orchestrator: Orchestrator,
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    bus: Arc<BroadcastBus>,
}

fn harness(summarizer: Arc<dyn Summarizer>) -> Harness {
    let records = Arc::new(MemoryRecordStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let bus = Arc::new(BroadcastBus::new());

    let collaborators = Collaborators {
        records: records.clone(),
        blobs: blobs.clone(),
        bus: bus.clone(),
        summarizer,
        ..Collaborators::in_memory()
    };

    let services = Arc::new(TriageServices::new(&EngineSettings::default(), collaborators));
    Harness {
        orchestrator: Orchestrator::new(services),
        records,
        blobs,
        bus,
    }
}

fn benign_event(id: &str) -> Value {
    InvestigationEvent::new(
        "acme",
        id,
        json!({
            "severity": "low",
            "sourceIp": "192.168.1.100",
            "description": "backup process",
            "alertType": "file_activity",
            "timestamp": "2024-06-02T03:00:00Z",
            "count": 12
        }),
    )
    .into_value()
}

struct FailingSummarizer;

#[async_trait]
impl Summarizer for FailingSummarizer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn summarize(&self, _alert: &Value, _context: Option<&Value>) -> anyhow::Result<Summary> {
        Err(anyhow!("model endpoint unavailable"))
    }
}

#[tokio::test]
async fn test_benign_alert_is_auto_closed() {
    let h = harness(Arc::new(TemplateSummarizer::with_confidence(0.9)));

    let result = h.orchestrator.run_investigation(benign_event("inv-1")).await.unwrap();

    assert_eq!(result["decision"]["automationAction"], "auto_close");
    assert_eq!(result["report"]["status"], "closed");
    assert_eq!(result["tenantId"], "acme");
    for stage in Stage::ALL {
        assert!(result[stage.as_str()].is_object(), "missing {} output", stage);
    }

    let record = h.records.get("acme", "inv-1").await.unwrap().unwrap();
    assert_eq!(record.status, InvestigationStatus::Closed);
    assert_eq!(record.current_stage, Stage::Report);
    assert!(record.summary.is_some());
    assert!(record.confidence.is_some());

    let services = h.orchestrator.services();
    let progress = services.tracker.get_progress("acme", "inv-1").await.unwrap();
    assert_eq!(progress.overall_status, ProgressStatus::Completed);
    assert!((progress.overall_progress - 100.0).abs() < 1e-9);
    assert_eq!(progress.automation_decision, Some(AutomationAction::AutoClose));
    assert_eq!(
        progress.stage(Stage::Report).unwrap().artifacts_generated,
        vec![report_key("acme", "inv-1")]
    );

    assert_eq!(services.journal.verify("acme", "inv-1").await.unwrap(), 6);
    assert!(h.blobs.get(&report_key("acme", "inv-1")).await.unwrap().is_some());

    let published: Vec<Stage> = h.bus.history().await.iter().map(|n| n.stage).collect();
    assert_eq!(published, Stage::ALL.to_vec());

    let metrics = services.metrics.automation_rate("acme", 1).await.unwrap();
    assert_eq!(metrics.total_investigations, 1);
    assert_eq!(metrics.automation_rate, 1.0);
}

#[tokio::test]
async fn test_malware_alert_is_escalated() {
    let h = harness(Arc::new(TemplateSummarizer::with_confidence(0.9)));
    let event = InvestigationEvent::new(
        "acme",
        "inv-2",
        json!({
            "severity": "high",
            "sourceIp": "203.0.113.1",
            "description": "malware detected"
        }),
    );

    let result = h.orchestrator.run_investigation(event.into_value()).await.unwrap();

    assert_eq!(result["decision"]["automationAction"], "escalate");
    assert_eq!(result["decision"]["shouldEscalate"], true);
    assert_eq!(result["report"]["status"], "completed");

    let record = h.records.get("acme", "inv-2").await.unwrap().unwrap();
    assert_eq!(record.status, InvestigationStatus::Completed);

    let metrics = h.orchestrator.services().metrics.automation_rate("acme", 1).await.unwrap();
    assert_eq!(metrics.human_escalation_rate, 1.0);
    assert!(!metrics.target_met);
}

#[tokio::test]
async fn test_summarizer_failure_is_a_warning() {
    let h = harness(Arc::new(FailingSummarizer));

    let result = h.orchestrator.run_investigation(benign_event("inv-3")).await.unwrap();

    assert_eq!(result["execute"]["status"], "contextualized");
    let warnings = result["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["stage"], "execute");

    // Without a model confidence the benign alert cannot clear the gate
    assert_ne!(result["decision"]["automationAction"], "auto_close");
}

#[tokio::test]
async fn test_audit_failure_fails_the_stage() {
    let h = harness(Arc::new(TemplateSummarizer::new()));
    h.blobs.set_unavailable(true);

    let err = h
        .orchestrator
        .dispatch("plan", benign_event("inv-4"))
        .await
        .unwrap_err();
    match err {
        DispatchError::Audit(e) => assert!(e.to_string().contains("logs/acme/inv-4/")),
        other => panic!("expected audit failure, got {}", other),
    }

    let progress = h
        .orchestrator
        .services()
        .tracker
        .get_progress("acme", "inv-4")
        .await
        .unwrap();
    assert_eq!(progress.overall_status, ProgressStatus::Failed);
    assert!(h.bus.history().await.is_empty());
}

#[tokio::test]
async fn test_stage_failure_carries_ids_and_marks_tracker() {
    let h = harness(Arc::new(TemplateSummarizer::new()));

    // adapt needs the respond stage's decision
    let err = h
        .orchestrator
        .dispatch("adapt", json!({ "tenantId": "acme", "investigationId": "inv-5" }))
        .await
        .unwrap_err();
    match err {
        DispatchError::StageFailed {
            stage,
            tenant_id,
            investigation_id,
            ..
        } => {
            assert_eq!(stage, Stage::Adapt);
            assert_eq!(tenant_id, "acme");
            assert_eq!(investigation_id, "inv-5");
        }
        other => panic!("expected stage failure, got {}", other),
    }

    let progress = h
        .orchestrator
        .services()
        .tracker
        .get_progress("acme", "inv-5")
        .await
        .unwrap();
    let adapt = progress.stage(Stage::Adapt).unwrap();
    assert_eq!(adapt.status, ProgressStatus::Failed);
    assert!(adapt.error_message.is_some());
}

#[tokio::test]
async fn test_stages_can_be_dispatched_one_at_a_time() {
    let h = harness(Arc::new(TemplateSummarizer::with_confidence(0.9)));

    let mut event = benign_event("inv-6");
    for stage in ["plan", "execute", "analyze", "respond", "adapt", "report"] {
        event = h.orchestrator.dispatch(stage, event).await.unwrap();
    }

    assert_eq!(event["investigationId"], "inv-6");
    assert_eq!(event["report"]["status"], "closed");
    assert_eq!(h.records.len().await, 1);
}

#[tokio::test]
async fn test_replayed_adapt_counts_the_outcome_once() {
    let h = harness(Arc::new(TemplateSummarizer::with_confidence(0.9)));

    let result = h.orchestrator.run_investigation(benign_event("inv-7")).await.unwrap();
    assert_eq!(result["adapt"]["recorded"], true);

    let replayed = h.orchestrator.dispatch("adapt", result).await.unwrap();
    assert_eq!(replayed["adapt"]["recorded"], false);

    let metrics = h.orchestrator.services().metrics.automation_rate("acme", 1).await.unwrap();
    assert_eq!(metrics.total_investigations, 1);
    let snapshot = h.orchestrator.services().metrics.snapshot("acme", 1).await.unwrap();
    assert_eq!(snapshot.confidence.sample_size, 1);
}
