//! SQLite-backed durable stores.
//!
//! One database file holds investigation records, progress snapshots, raw
//! outcomes and per-day rolling counters. Calls run on the blocking pool
//! against a single shared connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{DailyDelta, MetricsStore, ProgressStore, RecordStore, StoreError};
use crate::core::metrics::DailyCounters;
use crate::domain::{Investigation, InvestigationProgress, OutcomeRecord, ProgressKey, RecordUpdate};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS investigations (
    tenant_id TEXT NOT NULL,
    investigation_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    status TEXT NOT NULL,
    record_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, investigation_id)
);

CREATE TABLE IF NOT EXISTS progress (
    tenant_id TEXT NOT NULL,
    investigation_id TEXT NOT NULL,
    overall_status TEXT NOT NULL,
    progress_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, investigation_id)
);

CREATE TABLE IF NOT EXISTS outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    investigation_id TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    outcome_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outcomes_tenant_time ON outcomes(tenant_id, recorded_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_outcomes_investigation ON outcomes(tenant_id, investigation_id);

CREATE TABLE IF NOT EXISTS daily_metrics (
    tenant_id TEXT NOT NULL,
    day TEXT NOT NULL,
    total INTEGER NOT NULL DEFAULT 0,
    auto_closed INTEGER NOT NULL DEFAULT 0,
    escalated INTEGER NOT NULL DEFAULT 0,
    monitored INTEGER NOT NULL DEFAULT 0,
    human_escalations INTEGER NOT NULL DEFAULT 0,
    avg_processing_time REAL NOT NULL DEFAULT 0,
    avg_confidence REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_id, day)
);
"#;

/// Fold one outcome into a day row without a read-modify-write round trip.
///
/// Every SET expression sees the pre-update row, so the running averages use
/// the old `total` as n.
const APPLY_DAILY_SQL: &str = r#"
INSERT INTO daily_metrics (
    tenant_id, day, total, auto_closed, escalated, monitored,
    human_escalations, avg_processing_time, avg_confidence
) VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT (tenant_id, day) DO UPDATE SET
    total = total + 1,
    auto_closed = auto_closed + excluded.auto_closed,
    escalated = escalated + excluded.escalated,
    monitored = monitored + excluded.monitored,
    human_escalations = human_escalations + excluded.human_escalations,
    avg_processing_time = (avg_processing_time * total + excluded.avg_processing_time) / (total + 1),
    avg_confidence = (avg_confidence * total + excluded.avg_confidence) / (total + 1)
"#;

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Durable record, progress and metrics storage in one SQLite file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {}", e)))?
    }
}

fn read_record(
    conn: &Connection,
    tenant_id: &str,
    investigation_id: &str,
) -> Result<Option<Investigation>, StoreError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record_json FROM investigations WHERE tenant_id = ?1 AND investigation_id = ?2",
            params![tenant_id, investigation_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write_record(conn: &Connection, record: &Investigation) -> Result<(), StoreError> {
    let json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT INTO investigations (tenant_id, investigation_id, stage, status, record_json, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (tenant_id, investigation_id) DO UPDATE SET
            stage = excluded.stage,
            status = excluded.status,
            record_json = excluded.record_json,
            updated_at = excluded.updated_at",
        params![
            record.tenant_id,
            record.investigation_id,
            record.current_stage.as_str(),
            record.status.as_str(),
            json,
            timestamp(&record.updated_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(
        &self,
        tenant_id: &str,
        investigation_id: &str,
    ) -> Result<Option<Investigation>, StoreError> {
        let (tenant, id) = (tenant_id.to_string(), investigation_id.to_string());
        self.with_conn(move |conn| read_record(conn, &tenant, &id)).await
    }

    async fn put(&self, record: &Investigation) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| write_record(conn, &record)).await
    }

    async fn update(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        update: &RecordUpdate,
    ) -> Result<Option<Investigation>, StoreError> {
        let (tenant, id) = (tenant_id.to_string(), investigation_id.to_string());
        let update = update.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut record) = read_record(&tx, &tenant, &id)? else {
                return Ok(None);
            };
            record.apply(&update);
            write_record(&tx, &record)?;
            tx.commit()?;
            Ok(Some(record))
        })
        .await
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn load(&self, key: &ProgressKey) -> Result<Option<InvestigationProgress>, StoreError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT progress_json FROM progress WHERE tenant_id = ?1 AND investigation_id = ?2",
                    params![key.tenant_id, key.investigation_id],
                    |row| row.get(0),
                )
                .optional()?;

            match json {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn save(&self, progress: &InvestigationProgress) -> Result<(), StoreError> {
        let json = serde_json::to_string(progress)?;
        let tenant = progress.tenant_id.clone();
        let id = progress.investigation_id.clone();
        let status = progress.overall_status.as_str();
        let updated = timestamp(&progress.updated_at);

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO progress (tenant_id, investigation_id, overall_status, progress_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (tenant_id, investigation_id) DO UPDATE SET
                    overall_status = excluded.overall_status,
                    progress_json = excluded.progress_json,
                    updated_at = excluded.updated_at",
                params![tenant, id, status, json, updated],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MetricsStore for SqliteStore {
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<bool, StoreError> {
        let json = serde_json::to_string(outcome)?;
        let tenant = outcome.tenant_id.clone();
        let id = outcome.investigation_id.clone();
        let recorded = timestamp(&outcome.recorded_at);

        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO outcomes (tenant_id, investigation_id, recorded_at, outcome_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tenant, id, recorded, json],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn apply_daily(
        &self,
        tenant_id: &str,
        day: NaiveDate,
        delta: &DailyDelta,
    ) -> Result<(), StoreError> {
        let tenant = tenant_id.to_string();
        let delta = delta.clone();

        self.with_conn(move |conn| {
            conn.execute(
                APPLY_DAILY_SQL,
                params![
                    tenant,
                    day_key(day),
                    delta.auto_closed as i64,
                    delta.escalated as i64,
                    delta.monitored as i64,
                    delta.human_escalations as i64,
                    delta.processing_time_secs,
                    delta.confidence,
                ],
            )?;
            debug!(tenant = %tenant, %day, "Applied daily metrics delta");
            Ok(())
        })
        .await
    }

    async fn daily_counters(
        &self,
        tenant_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, DailyCounters)>, StoreError> {
        let tenant = tenant_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT day, total, auto_closed, escalated, monitored, human_escalations,
                        avg_processing_time, avg_confidence
                 FROM daily_metrics
                 WHERE tenant_id = ?1 AND day >= ?2 AND day < ?3
                 ORDER BY day",
            )?;

            let rows = stmt.query_map(params![tenant, day_key(start), day_key(end)], |row| {
                let day: String = row.get(0)?;
                let counters = DailyCounters {
                    total: row.get::<_, i64>(1)?.max(0) as u64,
                    auto_closed: row.get::<_, i64>(2)?.max(0) as u64,
                    escalated: row.get::<_, i64>(3)?.max(0) as u64,
                    monitored: row.get::<_, i64>(4)?.max(0) as u64,
                    human_escalations: row.get::<_, i64>(5)?.max(0) as u64,
                    avg_processing_time_secs: row.get(6)?,
                    avg_confidence: row.get(7)?,
                };
                Ok((day, counters))
            })?;

            let mut result = Vec::new();
            for row in rows {
                let (day, counters) = row?;
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|e| StoreError::Unavailable(format!("bad day key '{}': {}", day, e)))?;
                result.push((day, counters));
            }
            Ok(result)
        })
        .await
    }

    async fn outcomes(
        &self,
        tenant_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let tenant = tenant_id.to_string();
        let (start, end) = (timestamp(&start), timestamp(&end));

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT outcome_json FROM outcomes
                 WHERE tenant_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![tenant, start, end], |row| row.get::<_, String>(0))?;

            let mut outcomes = Vec::new();
            for json in rows {
                outcomes.push(serde_json::from_str(&json?)?);
            }
            Ok(outcomes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Alert, AutomationAction, InvestigationStatus, Stage, StageUpdate};
    use tempfile::TempDir;

    fn outcome(action: AutomationAction, secs: f64, confidence: f64) -> OutcomeRecord {
        OutcomeRecord {
            tenant_id: "t1".to_string(),
            investigation_id: uuid::Uuid::new_v4().to_string(),
            action,
            human_escalation: action == AutomationAction::Escalate,
            processing_time_secs: secs,
            confidence,
            false_positive_probability: 0.4,
            severity: Some("low".to_string()),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_round_trip_and_partial_update() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(&temp.path().join("triage.db")).unwrap();

        let record = Investigation::new("t1", "i1", Alert::default(), Utc::now());
        store.put(&record).await.unwrap();
        store.put(&record).await.unwrap();

        let updated = store
            .update(
                "t1",
                "i1",
                &RecordUpdate::at(Utc::now())
                    .stage(Stage::Analyze)
                    .status(InvestigationStatus::Summarized),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.current_stage, Stage::Analyze);

        let loaded = store.get("t1", "i1").await.unwrap().unwrap();
        assert_eq!(loaded.status, InvestigationStatus::Summarized);
        assert!(store.get("t1", "missing").await.unwrap().is_none());
        assert!(store
            .update("t1", "missing", &RecordUpdate::at(Utc::now()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_progress_save_and_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut progress = InvestigationProgress::new("t1", "i1", Utc::now());
        progress.apply(&StageUpdate::completed(Stage::Plan), Utc::now());

        store.save(&progress).await.unwrap();
        let loaded = store.load(&progress.key()).await.unwrap().unwrap();
        assert_eq!(loaded, progress);
    }

    #[tokio::test]
    async fn test_daily_upsert_folds_averages() {
        let store = SqliteStore::open_in_memory().unwrap();
        let day = Utc::now().date_naive();

        for (action, secs, conf) in [
            (AutomationAction::AutoClose, 10.0, 0.9),
            (AutomationAction::Escalate, 30.0, 0.5),
        ] {
            let o = outcome(action, secs, conf);
            store.append_outcome(&o).await.unwrap();
            store.apply_daily("t1", day, &DailyDelta::from_outcome(&o)).await.unwrap();
        }

        let counters = store
            .daily_counters("t1", day, day.succ_opt().unwrap())
            .await
            .unwrap();
        assert_eq!(counters.len(), 1);
        let c = &counters[0].1;
        assert_eq!(c.total, 2);
        assert_eq!(c.auto_closed, 1);
        assert_eq!(c.escalated, 1);
        assert_eq!(c.human_escalations, 1);
        assert!((c.avg_processing_time_secs - 20.0).abs() < 1e-9);
        assert!((c.avg_confidence - 0.7).abs() < 1e-9);

        let start = Utc::now() - chrono::Duration::hours(1);
        let outcomes = store
            .outcomes("t1", start, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_outcome_is_stored_once_per_investigation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let o = outcome(AutomationAction::Monitor, 5.0, 0.7);

        assert!(store.append_outcome(&o).await.unwrap());
        assert!(!store.append_outcome(&o).await.unwrap());

        let start = Utc::now() - chrono::Duration::hours(1);
        let outcomes = store
            .outcomes("t1", start, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
    }
}
