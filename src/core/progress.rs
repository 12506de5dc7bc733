//! Real-time progress tracking.
//!
//! Two tiers: an in-process cache that every write lands in first, and an
//! optional durable store that writes are mirrored to afterwards. A failed
//! mirror is logged and reported as `MirrorStatus::Failed`; it never fails
//! the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::adapters::{ProgressStore, RecordStore};
use crate::domain::{
    ApplyOutcome, ConfidenceScore, EscalationDecision, InvestigationProgress, ProgressKey,
    StageUpdate,
};

/// What happened to the durable copy of a write
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorStatus {
    Mirrored,
    /// No durable tier configured, or nothing changed
    Skipped,
    Failed(String),
}

impl MirrorStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, MirrorStatus::Failed(_))
    }
}

/// Result of one tracker write
#[derive(Debug, Clone)]
pub struct TrackerUpdate {
    pub outcome: ApplyOutcome,
    pub mirror: MirrorStatus,
    pub progress: InvestigationProgress,
}

#[derive(Default)]
pub struct ProgressTracker {
    cache: RwLock<HashMap<ProgressKey, InvestigationProgress>>,
    durable: Option<Arc<dyn ProgressStore>>,
    records: Option<Arc<dyn RecordStore>>,
    /// Finished records older than this are swept when tracking starts
    retention: Option<Duration>,
}

impl ProgressTracker {
    /// Cache-only tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror writes to `store` and fall back to it on cache misses
    pub fn with_durable(mut self, store: Arc<dyn ProgressStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Derive snapshots from investigation records when nothing else has one
    pub fn with_records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// Sweep finished records older than `retention` whenever a new
    /// investigation starts tracking
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Begin tracking an investigation; an existing record is kept as is
    #[instrument(skip(self), fields(tenant = %tenant_id, investigation = %investigation_id))]
    pub async fn start_tracking(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        now: DateTime<Utc>,
    ) -> TrackerUpdate {
        let key = ProgressKey::new(tenant_id, investigation_id);

        let (progress, created) = {
            let mut cache = self.cache.write().await;
            match cache.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let fresh = InvestigationProgress::new(tenant_id, investigation_id, now);
                    cache.insert(key.clone(), fresh.clone());
                    (fresh, true)
                }
            }
        };

        let mirror = if created {
            debug!("Started progress tracking");
            self.prune_expired(now).await;
            self.mirror(&progress).await
        } else {
            MirrorStatus::Skipped
        };

        TrackerUpdate {
            outcome: if created {
                ApplyOutcome::Applied
            } else {
                ApplyOutcome::Duplicate
            },
            mirror,
            progress,
        }
    }

    /// Apply a stage update reported by the agent owning that stage
    #[instrument(skip(self, update), fields(tenant = %key.tenant_id, investigation = %key.investigation_id, stage = %update.stage, status = %update.status))]
    pub async fn update_stage(
        &self,
        key: &ProgressKey,
        update: &StageUpdate,
        now: DateTime<Utc>,
    ) -> TrackerUpdate {
        self.ensure_cached(key, now).await;

        let (outcome, progress) = {
            let mut cache = self.cache.write().await;
            let progress = cache
                .entry(key.clone())
                .or_insert_with(|| InvestigationProgress::new(&key.tenant_id, &key.investigation_id, now));
            let outcome = progress.apply(update, now);
            (outcome, progress.clone())
        };

        let mirror = match outcome {
            ApplyOutcome::Applied => self.mirror(&progress).await,
            ApplyOutcome::Duplicate => {
                debug!("Duplicate stage update ignored");
                MirrorStatus::Skipped
            }
            ApplyOutcome::Rejected { from, to } => {
                warn!(%from, %to, "Stage already final; update rejected");
                MirrorStatus::Skipped
            }
        };

        TrackerUpdate {
            outcome,
            mirror,
            progress,
        }
    }

    /// Record the analyze-stage confidence numbers
    pub async fn record_assessment(
        &self,
        key: &ProgressKey,
        score: &ConfidenceScore,
        now: DateTime<Utc>,
    ) -> MirrorStatus {
        self.ensure_cached(key, now).await;
        let progress = {
            let mut cache = self.cache.write().await;
            let progress = cache
                .entry(key.clone())
                .or_insert_with(|| InvestigationProgress::new(&key.tenant_id, &key.investigation_id, now));
            progress.apply_assessment(score, now);
            progress.clone()
        };
        self.mirror(&progress).await
    }

    /// Record the respond-stage decision and risk level
    pub async fn record_decision(
        &self,
        key: &ProgressKey,
        decision: &EscalationDecision,
        now: DateTime<Utc>,
    ) -> MirrorStatus {
        self.ensure_cached(key, now).await;
        let progress = {
            let mut cache = self.cache.write().await;
            let progress = cache
                .entry(key.clone())
                .or_insert_with(|| InvestigationProgress::new(&key.tenant_id, &key.investigation_id, now));
            progress.apply_decision(decision, now);
            progress.clone()
        };
        self.mirror(&progress).await
    }

    /// Current progress: cache, then durable store, then a snapshot derived
    /// from the investigation record
    pub async fn get_progress(
        &self,
        tenant_id: &str,
        investigation_id: &str,
    ) -> Option<InvestigationProgress> {
        let key = ProgressKey::new(tenant_id, investigation_id);
        if let Some(progress) = self.cache.read().await.get(&key) {
            return Some(progress.clone());
        }

        let loaded = self.load_fallback(&key, Utc::now()).await?;
        let mut cache = self.cache.write().await;
        Some(cache.entry(key).or_insert(loaded).clone())
    }

    /// Unfinished investigations for one tenant, oldest first
    pub async fn list_active(&self, tenant_id: &str) -> Vec<InvestigationProgress> {
        let cache = self.cache.read().await;
        let mut active: Vec<InvestigationProgress> = cache
            .values()
            .filter(|p| p.tenant_id == tenant_id && !p.is_finished())
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.investigation_id.cmp(&b.investigation_id))
        });
        active
    }

    /// Evict finished records last updated before `now - retention`.
    ///
    /// Only the cache is swept; the durable tier keeps its copy.
    pub async fn prune_finished(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(retention) else {
            return 0;
        };
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, p| !(p.is_finished() && p.updated_at < cutoff));
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Pruned finished progress records");
        }
        removed
    }

    /// `prune_finished` with the configured retention; no-op without one
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> usize {
        match self.retention {
            Some(retention) => self.prune_finished(retention, now).await,
            None => 0,
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Pull a record into the cache from the fallback tiers if missing
    async fn ensure_cached(&self, key: &ProgressKey, now: DateTime<Utc>) {
        if self.cache.read().await.contains_key(key) {
            return;
        }
        if let Some(loaded) = self.load_fallback(key, now).await {
            self.cache.write().await.entry(key.clone()).or_insert(loaded);
        }
    }

    async fn load_fallback(&self, key: &ProgressKey, now: DateTime<Utc>) -> Option<InvestigationProgress> {
        if let Some(ref durable) = self.durable {
            match durable.load(key).await {
                Ok(Some(progress)) => return Some(progress),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Durable progress read failed"),
            }
        }

        if let Some(ref records) = self.records {
            match records.get(&key.tenant_id, &key.investigation_id).await {
                Ok(Some(record)) => return Some(InvestigationProgress::from_record(&record, now)),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Investigation record read failed"),
            }
        }

        None
    }

    async fn mirror(&self, progress: &InvestigationProgress) -> MirrorStatus {
        let Some(ref durable) = self.durable else {
            return MirrorStatus::Skipped;
        };

        match durable.save(progress).await {
            Ok(()) => MirrorStatus::Mirrored,
            Err(e) => {
                warn!(
                    tenant = %progress.tenant_id,
                    investigation = %progress.investigation_id,
                    error = %e,
                    "Progress mirror write failed; cache remains authoritative"
                );
                MirrorStatus::Failed(e.to_string())
            }
        }
    }
}
