//! In-memory adapter implementations.
//!
//! Used by tests and when the engine is embedded without durable storage.
//! Each store can be switched into an unavailable mode to exercise the
//! engine's failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use super::{
    BlobStore, DailyDelta, MetricsStore, ProgressStore, RecordStore, StoreError,
};
use crate::core::metrics::DailyCounters;
use crate::domain::{Investigation, InvestigationProgress, OutcomeRecord, ProgressKey, RecordUpdate};

type RecordKey = (String, String);

fn record_key(tenant_id: &str, investigation_id: &str) -> RecordKey {
    (tenant_id.to_string(), investigation_id.to_string())
}

/// Investigation records in a HashMap
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordKey, Investigation>>,
    unavailable: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("record store offline".to_string()));
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        tenant_id: &str,
        investigation_id: &str,
    ) -> Result<Option<Investigation>, StoreError> {
        self.check()?;
        let records = self.records.read().await;
        Ok(records.get(&record_key(tenant_id, investigation_id)).cloned())
    }

    async fn put(&self, record: &Investigation) -> Result<(), StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        records.insert(
            record_key(&record.tenant_id, &record.investigation_id),
            record.clone(),
        );
        Ok(())
    }

    async fn update(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        update: &RecordUpdate,
    ) -> Result<Option<Investigation>, StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        match records.get_mut(&record_key(tenant_id, investigation_id)) {
            Some(record) => {
                record.apply(update);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Progress records in a HashMap
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: RwLock<HashMap<ProgressKey, InvestigationProgress>>,
    unavailable: AtomicBool,
    saves: AtomicU64,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, key: &ProgressKey) -> Result<Option<InvestigationProgress>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("progress store offline".to_string()));
        }
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn save(&self, progress: &InvestigationProgress) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("progress store offline".to_string()));
        }
        self.records
            .write()
            .await
            .insert(progress.key(), progress.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Running averages folded one sample at a time
#[derive(Debug, Default)]
struct RunningAverages {
    samples: u64,
    processing_time_secs: f64,
    confidence: f64,
}

/// Counters for one (tenant, day); every counter is a lock-free add
#[derive(Debug, Default)]
struct DayCell {
    total: AtomicU64,
    auto_closed: AtomicU64,
    escalated: AtomicU64,
    monitored: AtomicU64,
    human_escalations: AtomicU64,
    averages: Mutex<RunningAverages>,
}

impl DayCell {
    fn add(&self, delta: &DailyDelta) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.auto_closed.fetch_add(delta.auto_closed, Ordering::SeqCst);
        self.escalated.fetch_add(delta.escalated, Ordering::SeqCst);
        self.monitored.fetch_add(delta.monitored, Ordering::SeqCst);
        self.human_escalations
            .fetch_add(delta.human_escalations, Ordering::SeqCst);

        let mut averages = self.averages.lock().unwrap_or_else(|e| e.into_inner());
        let n = averages.samples as f64;
        averages.processing_time_secs =
            (averages.processing_time_secs * n + delta.processing_time_secs) / (n + 1.0);
        averages.confidence = (averages.confidence * n + delta.confidence) / (n + 1.0);
        averages.samples += 1;
    }

    fn snapshot(&self) -> DailyCounters {
        let averages = self.averages.lock().unwrap_or_else(|e| e.into_inner());
        DailyCounters {
            total: self.total.load(Ordering::SeqCst),
            auto_closed: self.auto_closed.load(Ordering::SeqCst),
            escalated: self.escalated.load(Ordering::SeqCst),
            monitored: self.monitored.load(Ordering::SeqCst),
            human_escalations: self.human_escalations.load(Ordering::SeqCst),
            avg_processing_time_secs: averages.processing_time_secs,
            avg_confidence: averages.confidence,
        }
    }
}

#[derive(Debug, Default)]
struct OutcomeLog {
    records: Vec<OutcomeRecord>,
    keys: HashSet<(String, String)>,
}

/// Outcome log and rolling counters in memory
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    outcomes: RwLock<OutcomeLog>,
    days: RwLock<HashMap<(String, NaiveDate), Arc<DayCell>>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, tenant_id: &str, day: NaiveDate) -> Arc<DayCell> {
        let key = (tenant_id.to_string(), day);
        if let Some(cell) = self.days.read().await.get(&key) {
            return cell.clone();
        }
        let mut days = self.days.write().await;
        days.entry(key).or_default().clone()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<bool, StoreError> {
        let mut log = self.outcomes.write().await;
        let key = (outcome.tenant_id.clone(), outcome.investigation_id.clone());
        if !log.keys.insert(key) {
            return Ok(false);
        }
        log.records.push(outcome.clone());
        Ok(true)
    }

    async fn apply_daily(
        &self,
        tenant_id: &str,
        day: NaiveDate,
        delta: &DailyDelta,
    ) -> Result<(), StoreError> {
        self.cell(tenant_id, day).await.add(delta);
        Ok(())
    }

    async fn daily_counters(
        &self,
        tenant_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, DailyCounters)>, StoreError> {
        let days = self.days.read().await;
        let mut counters: Vec<(NaiveDate, DailyCounters)> = days
            .iter()
            .filter(|((tenant, day), _)| tenant == tenant_id && *day >= start && *day < end)
            .map(|((_, day), cell)| (*day, cell.snapshot()))
            .collect();
        counters.sort_by_key(|(day, _)| *day);
        Ok(counters)
    }

    async fn outcomes(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let log = self.outcomes.read().await;
        Ok(log
            .records
            .iter()
            .filter(|o| o.tenant_id == tenant_id && o.recorded_at >= start && o.recorded_at < end)
            .cloned()
            .collect())
    }
}

/// Objects in a sorted map
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, BTreeMap<String, String>)>>,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn metadata(&self, key: &str) -> Option<BTreeMap<String, String>> {
        self.objects.read().await.get(key).map(|(_, m)| m.clone())
    }

    /// Overwrite an object in place, bypassing write-once semantics
    pub async fn tamper(&self, key: &str, body: Vec<u8>) {
        if let Some(entry) = self.objects.write().await.get_mut(key) {
            entry.0 = body;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blob store offline".to_string()));
        }
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), (body.to_vec(), metadata.clone()));
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.objects.read().await.get(key).map(|(body, _)| body.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Alert, AutomationAction, InvestigationStatus, Stage};

    fn outcome(action: AutomationAction, secs: f64, confidence: f64) -> OutcomeRecord {
        OutcomeRecord {
            tenant_id: "t1".to_string(),
            investigation_id: uuid::Uuid::new_v4().to_string(),
            action,
            human_escalation: action == AutomationAction::Escalate,
            processing_time_secs: secs,
            confidence,
            false_positive_probability: 0.5,
            severity: None,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_update_missing_is_none() {
        let store = MemoryRecordStore::new();
        let result = store
            .update("t1", "nope", &RecordUpdate::at(Utc::now()).stage(Stage::Execute))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_record_partial_update() {
        let store = MemoryRecordStore::new();
        let record = Investigation::new("t1", "i1", Alert::default(), Utc::now());
        store.put(&record).await.unwrap();

        let updated = store
            .update(
                "t1",
                "i1",
                &RecordUpdate::at(Utc::now()).status(InvestigationStatus::Summarized),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, InvestigationStatus::Summarized);
        assert_eq!(updated.current_stage, Stage::Plan);
    }

    #[tokio::test]
    async fn test_daily_running_averages() {
        let store = MemoryMetricsStore::new();
        let day = Utc::now().date_naive();

        for (secs, conf) in [(10.0, 0.6), (20.0, 0.8), (30.0, 1.0)] {
            let o = outcome(AutomationAction::AutoClose, secs, conf);
            store.apply_daily("t1", day, &DailyDelta::from_outcome(&o)).await.unwrap();
        }

        let counters = store
            .daily_counters("t1", day, day.succ_opt().unwrap())
            .await
            .unwrap();
        assert_eq!(counters.len(), 1);
        let c = &counters[0].1;
        assert_eq!(c.total, 3);
        assert_eq!(c.auto_closed, 3);
        assert!((c.avg_processing_time_secs - 20.0).abs() < 1e-9);
        assert!((c.avg_confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryMetricsStore::new());
        let day = Utc::now().date_naive();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let o = outcome(AutomationAction::Monitor, 5.0, 0.7);
                store.apply_daily("t1", day, &DailyDelta::from_outcome(&o)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let counters = store
            .daily_counters("t1", day, day.succ_opt().unwrap())
            .await
            .unwrap();
        assert_eq!(counters[0].1.total, 50);
        assert_eq!(counters[0].1.monitored, 50);
    }

    #[tokio::test]
    async fn test_blob_write_once() {
        let store = MemoryBlobStore::new();
        let meta = BTreeMap::new();

        assert!(store.put_if_absent("a/1", b"one", &meta).await.unwrap());
        assert!(!store.put_if_absent("a/1", b"two", &meta).await.unwrap());
        assert_eq!(store.get("a/1").await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1".to_string()]);
    }
}
