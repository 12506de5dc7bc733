//! Dashboard aggregation.
//!
//! Composes metrics snapshots, trend series and live progress into one
//! view per tenant. Composed views use the shorter dashboard TTL; active
//! investigations are always read fresh from the tracker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::cache::{CacheStats, TtlCache};
use super::metrics::{MetricsCollector, MetricsSnapshot, TrendPoint};
use super::progress::ProgressTracker;
use crate::adapters::StoreError;
use crate::domain::InvestigationProgress;

/// Cached part of the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub snapshot: MetricsSnapshot,
    pub trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub tenant_id: String,
    #[serde(flatten)]
    pub summary: DashboardSummary,
    pub active_investigations: Vec<InvestigationProgress>,
    pub cache: CacheStats,
    pub generated_at: DateTime<Utc>,
}

pub struct DashboardAggregator {
    metrics: Arc<MetricsCollector>,
    tracker: Arc<ProgressTracker>,
}

impl DashboardAggregator {
    pub fn new(metrics: Arc<MetricsCollector>, tracker: Arc<ProgressTracker>) -> Self {
        Self { metrics, tracker }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.metrics.config().dashboard_ttl_seconds)
    }

    /// Snapshot plus trend for the last `days` days, cached per tenant
    pub async fn summary(&self, tenant_id: &str, days: u32) -> Result<DashboardSummary, StoreError> {
        let view = TtlCache::view_key("dashboard", days);
        self.metrics
            .cache()
            .get_or_compute(tenant_id, &view, self.ttl(), || async {
                let now = Utc::now();
                Ok::<_, StoreError>(DashboardSummary {
                    snapshot: self.metrics.snapshot_as_of(tenant_id, days, now).await?,
                    trend: self.metrics.daily_trend(tenant_id, days, now).await?,
                })
            })
            .await
    }

    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub async fn view(&self, tenant_id: &str, days: u32) -> Result<DashboardView, StoreError> {
        let summary = self.summary(tenant_id, days).await?;
        let active_investigations = self.tracker.list_active(tenant_id).await;
        debug!(active = active_investigations.len(), "Dashboard composed");

        Ok(DashboardView {
            tenant_id: tenant_id.to_string(),
            summary,
            active_investigations,
            cache: self.metrics.cache_stats().await,
            generated_at: Utc::now(),
        })
    }
}
