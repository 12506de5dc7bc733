//! Tamper-evident audit journal.
//!
//! Every stage transition becomes one write-once object holding a single
//! canonical JSON line. The line embeds the SHA-256 of the canonical form of
//! every other field, so an entry can be re-verified at any time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::adapters::{BlobStore, StoreError};
use crate::domain::{AuditEntry, Stage};

/// Attempts at finding a free key before giving up
const MAX_KEY_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Audit write failed for {key}: {source}")]
    WriteFailure {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("Checksum mismatch for {key}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Malformed journal entry {key}: {message}")]
    Malformed { key: String, message: String },

    #[error("Journal read failed for {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Where an entry landed and what it hashed to
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalReceipt {
    pub locator: String,
    pub checksum: String,
}

/// Deterministic, key-ordered JSON serialization
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 (hex) of the canonical form
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Make an id safe to use as one key segment
pub(crate) fn key_segment(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

/// Prefix under which one investigation's entries live
pub fn investigation_prefix(tenant_id: &str, investigation_id: &str) -> String {
    format!("logs/{}/{}/", key_segment(tenant_id), key_segment(investigation_id))
}

pub fn entry_key(tenant_id: &str, investigation_id: &str, at: DateTime<Utc>, stage: Stage) -> String {
    format!(
        "{}{}-{}.jsonl",
        investigation_prefix(tenant_id, investigation_id),
        at.format("%Y%m%dT%H%M%S%6fZ"),
        stage
    )
}

pub struct AuditJournal {
    store: Arc<dyn BlobStore>,
    /// Last timestamp handed out; keys are strictly increasing per process
    last: Mutex<Option<DateTime<Utc>>>,
}

impl AuditJournal {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            last: Mutex::new(None),
        }
    }

    /// Microsecond timestamp strictly after every one issued before
    fn next_timestamp(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let at = at.trunc_subsecs(6);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            Some(prev) if at <= prev => prev + chrono::Duration::microseconds(1),
            _ => at,
        };
        *last = Some(next);
        next
    }

    pub async fn log_stage_event(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        stage: Stage,
        payload: Value,
    ) -> Result<JournalReceipt, JournalError> {
        self.log_stage_event_at(tenant_id, investigation_id, stage, payload, Utc::now())
            .await
    }

    /// Append one entry stamped no earlier than `at`
    #[instrument(skip(self, payload), fields(tenant = %tenant_id, investigation = %investigation_id, stage = %stage))]
    pub async fn log_stage_event_at(
        &self,
        tenant_id: &str,
        investigation_id: &str,
        stage: Stage,
        payload: Value,
        at: DateTime<Utc>,
    ) -> Result<JournalReceipt, JournalError> {
        let mut timestamp = self.next_timestamp(at);

        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = entry_key(tenant_id, investigation_id, timestamp, stage);
            let mut entry = AuditEntry {
                tenant_id: tenant_id.to_string(),
                investigation_id: investigation_id.to_string(),
                stage,
                timestamp,
                payload: payload.clone(),
                checksum_sha256: String::new(),
            };
            entry.checksum_sha256 = checksum(&entry.unsigned());

            let line = serde_json::to_value(&entry)
                .map(|v| format!("{}\n", canonical_json(&v)))
                .map_err(|e| JournalError::WriteFailure {
                    key: key.clone(),
                    source: StoreError::Serialization(e),
                })?;

            let metadata = BTreeMap::from([
                ("checksum-sha256".to_string(), entry.checksum_sha256.clone()),
                ("tenant-id".to_string(), tenant_id.to_string()),
                ("investigation-id".to_string(), investigation_id.to_string()),
                ("stage".to_string(), stage.to_string()),
            ]);

            match self.store.put_if_absent(&key, line.as_bytes(), &metadata).await {
                Ok(true) => {
                    debug!(key = %key, "Journal entry written");
                    return Ok(JournalReceipt {
                        locator: key,
                        checksum: entry.checksum_sha256,
                    });
                }
                Ok(false) => {
                    debug!(key = %key, "Journal key taken; retrying with a later timestamp");
                    timestamp = self.next_timestamp(timestamp);
                }
                Err(source) => {
                    error!(key = %key, error = %source, "Audit journal write failed");
                    return Err(JournalError::WriteFailure { key, source });
                }
            }
        }

        let key = entry_key(tenant_id, investigation_id, timestamp, stage);
        Err(JournalError::WriteFailure {
            key: key.clone(),
            source: StoreError::Conflict(key),
        })
    }

    /// All entries for an investigation, in key (time) order
    pub async fn entries(
        &self,
        tenant_id: &str,
        investigation_id: &str,
    ) -> Result<Vec<(String, AuditEntry)>, JournalError> {
        let prefix = investigation_prefix(tenant_id, investigation_id);
        let keys = self
            .store
            .list(&prefix)
            .await
            .map_err(|source| JournalError::Read {
                key: prefix.clone(),
                source,
            })?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let body = self
                .store
                .get(&key)
                .await
                .map_err(|source| JournalError::Read {
                    key: key.clone(),
                    source,
                })?
                .ok_or_else(|| JournalError::Malformed {
                    key: key.clone(),
                    message: "listed object is missing".to_string(),
                })?;

            let text = String::from_utf8(body).map_err(|e| JournalError::Malformed {
                key: key.clone(),
                message: e.to_string(),
            })?;
            let entry: AuditEntry =
                serde_json::from_str(text.trim_end()).map_err(|e| JournalError::Malformed {
                    key: key.clone(),
                    message: e.to_string(),
                })?;
            entries.push((key, entry));
        }

        Ok(entries)
    }

    /// Recompute every checksum; returns the number of entries verified
    pub async fn verify(&self, tenant_id: &str, investigation_id: &str) -> Result<usize, JournalError> {
        let entries = self.entries(tenant_id, investigation_id).await?;
        for (key, entry) in &entries {
            let actual = checksum(&entry.unsigned());
            if actual != entry.checksum_sha256 {
                return Err(JournalError::ChecksumMismatch {
                    key: key.clone(),
                    expected: entry.checksum_sha256.clone(),
                    actual,
                });
            }
        }
        Ok(entries.len())
    }
}
