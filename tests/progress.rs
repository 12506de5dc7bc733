//! Progress Tracker Integration Tests
//!
//! Weighted progress, status derivation, duplicate delivery and the
//! cache / durable / record fallback chain.

use std::sync::Arc;

use chrono::{Duration, Utc};

use soc_triage::adapters::{MemoryProgressStore, ProgressStore};
use soc_triage::core::{MirrorStatus, ProgressTracker};
use soc_triage::domain::{ApplyOutcome, ProgressKey, ProgressStatus, Stage, StageUpdate};

#[tokio::test]
async fn test_all_stages_complete_to_one_hundred() {
    let tracker = ProgressTracker::new();
    let now = Utc::now();
    tracker.start_tracking("t1", "i1", now).await;
    let key = ProgressKey::new("t1", "i1");

    let mut last = None;
    for stage in Stage::ALL {
        tracker
            .update_stage(&key, &StageUpdate::running(stage, "working").progress(40.0), now)
            .await;
        last = Some(tracker.update_stage(&key, &StageUpdate::completed(stage), now).await);
    }

    let progress = last.unwrap().progress;
    assert!((progress.overall_progress - 100.0).abs() < 1e-9);
    assert_eq!(progress.overall_status, ProgressStatus::Completed);
    assert_eq!(Stage::ALL.iter().map(|s| s.weight_percent()).sum::<u32>(), 100);
}

#[tokio::test]
async fn test_partial_progress_is_weighted() {
    let tracker = ProgressTracker::new();
    let now = Utc::now();
    let key = ProgressKey::new("t1", "i1");
    tracker.start_tracking("t1", "i1", now).await;

    tracker.update_stage(&key, &StageUpdate::completed(Stage::Plan), now).await;
    let update = tracker
        .update_stage(&key, &StageUpdate::running(Stage::Execute, "summarizing").progress(50.0), now)
        .await;

    // plan 15 + execute 20 * 0.5
    assert!((update.progress.overall_progress - 25.0).abs() < 1e-9);
    assert_eq!(update.progress.overall_status, ProgressStatus::Running);
    assert_eq!(update.progress.current_stage, Stage::Execute);
}

#[tokio::test]
async fn test_stage_progress_never_decreases() {
    let tracker = ProgressTracker::new();
    let now = Utc::now();
    let key = ProgressKey::new("t1", "i1");

    tracker
        .update_stage(&key, &StageUpdate::running(Stage::Analyze, "scoring").progress(60.0), now)
        .await;
    let update = tracker
        .update_stage(&key, &StageUpdate::running(Stage::Analyze, "rescoring").progress(20.0), now)
        .await;

    let analyze = update.progress.stage(Stage::Analyze).unwrap();
    assert_eq!(analyze.progress_percentage, 60.0);
    assert_eq!(analyze.current_task.as_deref(), Some("rescoring"));
}

#[tokio::test]
async fn test_failure_is_terminal_and_visible() {
    let tracker = ProgressTracker::new();
    let now = Utc::now();
    let key = ProgressKey::new("t1", "i1");

    tracker
        .update_stage(&key, &StageUpdate::running(Stage::Respond, "deciding"), now)
        .await;
    let failed = tracker
        .update_stage(&key, &StageUpdate::failed(Stage::Respond, "store offline"), now)
        .await;
    assert_eq!(failed.progress.overall_status, ProgressStatus::Failed);
    assert_eq!(
        failed.progress.stage(Stage::Respond).unwrap().error_message.as_deref(),
        Some("store offline")
    );

    let late = tracker
        .update_stage(&key, &StageUpdate::completed(Stage::Respond), now)
        .await;
    assert!(matches!(late.outcome, ApplyOutcome::Rejected { .. }));
    assert_eq!(late.progress.overall_status, ProgressStatus::Failed);

    let before = late.progress.overall_progress;
    let other = tracker
        .update_stage(&key, &StageUpdate::running(Stage::Adapt, "recording").progress(50.0), now)
        .await;
    assert!(matches!(other.outcome, ApplyOutcome::Rejected { .. }));
    assert_eq!(other.progress.overall_progress, before);
    assert_eq!(
        other.progress.stage(Stage::Adapt).unwrap().status,
        ProgressStatus::Queued
    );
}

#[tokio::test]
async fn test_duplicate_delivery_appends_nothing() {
    let tracker = ProgressTracker::new();
    let now = Utc::now();
    let key = ProgressKey::new("t1", "i1");
    let update = StageUpdate::running(Stage::Plan, "planning").idempotency_key("evt-1");

    let first = tracker.update_stage(&key, &update, now).await;
    let second = tracker.update_stage(&key, &update, now).await;

    assert_eq!(first.outcome, ApplyOutcome::Applied);
    assert_eq!(second.outcome, ApplyOutcome::Duplicate);
    assert_eq!(
        first.progress.timeline_events.len(),
        second.progress.timeline_events.len()
    );
}

#[tokio::test]
async fn test_durable_failure_keeps_cache_authoritative() {
    let durable = Arc::new(MemoryProgressStore::new());
    durable.set_unavailable(true);
    let tracker = ProgressTracker::new().with_durable(durable.clone());
    let now = Utc::now();

    let started = tracker.start_tracking("t1", "i1", now).await;
    assert!(started.mirror.is_failed());

    let key = ProgressKey::new("t1", "i1");
    let update = tracker
        .update_stage(&key, &StageUpdate::completed(Stage::Plan), now)
        .await;
    assert!(matches!(update.mirror, MirrorStatus::Failed(_)));

    let progress = tracker.get_progress("t1", "i1").await.unwrap();
    assert!((progress.overall_progress - 15.0).abs() < 1e-9);

    durable.set_unavailable(false);
    let update = tracker
        .update_stage(&key, &StageUpdate::running(Stage::Execute, "summarizing"), now)
        .await;
    assert_eq!(update.mirror, MirrorStatus::Mirrored);
    assert!(durable.load(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn test_prune_respects_retention() {
    let tracker = ProgressTracker::new();
    let old = Utc::now() - Duration::days(40);
    let key = ProgressKey::new("t1", "done");

    tracker.start_tracking("t1", "done", old).await;
    for stage in Stage::ALL {
        tracker.update_stage(&key, &StageUpdate::completed(stage), old).await;
    }
    tracker.start_tracking("t1", "active", old).await;

    let removed = tracker.prune_finished(Duration::days(30), Utc::now()).await;
    assert_eq!(removed, 1);
    assert_eq!(tracker.cached_len().await, 1);
    assert_eq!(tracker.list_active("t1").await.len(), 1);
}

#[tokio::test]
async fn test_new_investigation_sweeps_expired_records() {
    let tracker = ProgressTracker::new().with_retention(Duration::days(30));
    let old = Utc::now() - Duration::days(40);
    let key = ProgressKey::new("t1", "done");

    tracker.start_tracking("t1", "done", old).await;
    for stage in Stage::ALL {
        tracker.update_stage(&key, &StageUpdate::completed(stage), old).await;
    }
    tracker.start_tracking("t1", "stalled", old).await;
    assert_eq!(tracker.cached_len().await, 2);

    tracker.start_tracking("t1", "fresh", Utc::now()).await;
    assert_eq!(tracker.cached_len().await, 2);
    assert_eq!(tracker.list_active("t1").await.len(), 2);
}

#[tokio::test]
async fn test_unbounded_retention_prunes_nothing() {
    let tracker = ProgressTracker::new();
    let key = ProgressKey::new("t1", "done");
    let old = Utc::now() - Duration::days(400);
    for stage in Stage::ALL {
        tracker.update_stage(&key, &StageUpdate::completed(stage), old).await;
    }

    assert_eq!(tracker.prune_finished(Duration::MAX, Utc::now()).await, 0);
    assert_eq!(tracker.prune_expired(Utc::now()).await, 0);
    assert_eq!(tracker.cached_len().await, 1);
}
