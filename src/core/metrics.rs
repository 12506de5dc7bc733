//! Automation metrics over rolling time windows.
//!
//! Raw outcome records and per-day counters live in a `MetricsStore`; every
//! view here is recomputed from them and cached briefly per tenant. Any
//! write for a tenant drops that tenant's cached views.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::cache::{CacheStats, TtlCache};
use super::roi::{compute_roi, RoiInput, RoiMetrics};
use crate::adapters::{DailyDelta, MetricsStore, StoreError};
use crate::config::{MetricsConfig, RoiConfig};
use crate::domain::OutcomeRecord;

/// Rolling counters for one tenant and day (or a merged window)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCounters {
    pub total: u64,
    pub auto_closed: u64,
    pub escalated: u64,
    pub monitored: u64,
    pub human_escalations: u64,
    pub avg_processing_time_secs: f64,
    pub avg_confidence: f64,
}

impl DailyCounters {
    /// Fold another period in; averages are weighted by each side's total
    pub fn merge(&mut self, other: &DailyCounters) {
        let total = self.total + other.total;
        if total > 0 {
            let (a, b) = (self.total as f64, other.total as f64);
            self.avg_processing_time_secs = (self.avg_processing_time_secs * a
                + other.avg_processing_time_secs * b)
                / total as f64;
            self.avg_confidence = (self.avg_confidence * a + other.avg_confidence * b) / total as f64;
        }
        self.total = total;
        self.auto_closed += other.auto_closed;
        self.escalated += other.escalated;
        self.monitored += other.monitored;
        self.human_escalations += other.human_escalations;
    }

    pub fn merged<'a>(days: impl IntoIterator<Item = &'a DailyCounters>) -> DailyCounters {
        let mut sum = DailyCounters::default();
        for day in days {
            sum.merge(day);
        }
        sum
    }

    /// Resolved without human escalation
    pub fn automated(&self) -> u64 {
        self.auto_closed + self.monitored
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationMetrics {
    pub window_days: u32,
    pub automation_rate: f64,
    pub auto_close_rate: f64,
    pub escalation_rate: f64,
    pub monitoring_rate: f64,
    pub human_escalation_rate: f64,
    pub total_investigations: u64,
    pub target_met: bool,
}

impl AutomationMetrics {
    pub fn from_counters(counters: &DailyCounters, target: f64, window_days: u32) -> Self {
        let total = counters.total;
        let automation_rate = ratio(counters.automated(), total);
        Self {
            window_days,
            automation_rate,
            auto_close_rate: ratio(counters.auto_closed, total),
            escalation_rate: ratio(counters.escalated, total),
            monitoring_rate: ratio(counters.monitored, total),
            human_escalation_rate: ratio(counters.human_escalations, total),
            total_investigations: total,
            target_met: total > 0 && automation_rate >= target,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBuckets {
    /// confidence < 0.6
    pub low: u64,
    /// 0.6 <= confidence < 0.8
    pub medium: u64,
    /// confidence >= 0.8
    pub high: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceDistribution {
    pub window_days: u32,
    pub avg_confidence: f64,
    pub avg_fp_probability: f64,
    pub buckets: ConfidenceBuckets,
    pub sample_size: u64,
}

impl ConfidenceDistribution {
    pub fn from_outcomes(outcomes: &[OutcomeRecord], window_days: u32) -> Self {
        let mut buckets = ConfidenceBuckets::default();
        for outcome in outcomes {
            if outcome.confidence >= 0.8 {
                buckets.high += 1;
            } else if outcome.confidence >= 0.6 {
                buckets.medium += 1;
            } else {
                buckets.low += 1;
            }
        }

        let n = outcomes.len();
        let mean = |f: fn(&OutcomeRecord) -> f64| {
            if n == 0 {
                0.0
            } else {
                outcomes.iter().map(f).sum::<f64>() / n as f64
            }
        };

        Self {
            window_days,
            avg_confidence: mean(|o| o.confidence),
            avg_fp_probability: mean(|o| o.false_positive_probability),
            buckets,
            sample_size: n as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyMetrics {
    pub window_days: u32,
    pub total_investigations: u64,
    pub avg_processing_time_secs: f64,
    pub throughput_per_day: f64,
    /// Analyst minutes saved per automated investigation
    pub time_saved_per_investigation_minutes: f64,
}

/// One day in a trend series; empty days are present with zeros
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub day: NaiveDate,
    pub total: u64,
    pub automation_rate: f64,
    pub avg_confidence: f64,
    pub avg_processing_time_secs: f64,
}

/// Every metric view for one tenant and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tenant_id: String,
    pub window_days: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub automation: AutomationMetrics,
    pub confidence: ConfidenceDistribution,
    pub efficiency: EfficiencyMetrics,
    pub roi: RoiMetrics,
    pub generated_at: DateTime<Utc>,
}

/// Longest window any metrics view covers
pub const MAX_WINDOW_DAYS: u32 = 3650;

/// `[start, end)` covering the last `days` UTC days including today
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub days: u32,
    pub start_day: NaiveDate,
    pub end_day: NaiveDate,
}

impl Window {
    /// `days` is clamped to `1..=MAX_WINDOW_DAYS`
    pub fn ending_at(days: u32, now: DateTime<Utc>) -> Self {
        let days = days.clamp(1, MAX_WINDOW_DAYS);
        let today = now.date_naive();
        Self {
            days,
            start_day: today
                .checked_sub_days(Days::new(u64::from(days) - 1))
                .unwrap_or(NaiveDate::MIN),
            end_day: today.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start_day.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end_day.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

pub struct MetricsCollector {
    store: Arc<dyn MetricsStore>,
    cache: TtlCache,
    config: MetricsConfig,
    roi: RoiConfig,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn MetricsStore>, config: MetricsConfig, roi: RoiConfig) -> Self {
        Self {
            store,
            cache: TtlCache::new(),
            config,
            roi,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn metrics_ttl(&self) -> Duration {
        Duration::from_secs(self.config.metrics_ttl_seconds)
    }

    /// Append the outcome and fold it into its day's counters. An
    /// investigation counts once; `Ok(false)` when it was already recorded.
    #[instrument(skip(self, outcome), fields(tenant = %outcome.tenant_id, investigation = %outcome.investigation_id, action = %outcome.action))]
    pub async fn record_outcome(&self, outcome: &OutcomeRecord) -> Result<bool, StoreError> {
        if !self.store.append_outcome(outcome).await? {
            debug!("Outcome already recorded");
            return Ok(false);
        }
        self.store
            .apply_daily(&outcome.tenant_id, outcome.day(), &DailyDelta::from_outcome(outcome))
            .await?;
        self.cache.invalidate_tenant(&outcome.tenant_id).await;
        debug!("Outcome recorded");
        Ok(true)
    }

    async fn window_counters(&self, tenant_id: &str, window: &Window) -> Result<Vec<(NaiveDate, DailyCounters)>, StoreError> {
        self.store
            .daily_counters(tenant_id, window.start_day, window.end_day)
            .await
    }

    pub async fn automation_rate(&self, tenant_id: &str, window_days: u32) -> Result<AutomationMetrics, StoreError> {
        let view = TtlCache::view_key("automation", window_days);
        self.cache
            .get_or_compute(tenant_id, &view, self.metrics_ttl(), || {
                self.automation_rate_as_of(tenant_id, window_days, Utc::now())
            })
            .await
    }

    /// Uncached computation for a window ending at `now`
    pub async fn automation_rate_as_of(
        &self,
        tenant_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<AutomationMetrics, StoreError> {
        let window = Window::ending_at(window_days, now);
        let days = self.window_counters(tenant_id, &window).await?;
        let merged = DailyCounters::merged(days.iter().map(|(_, c)| c));
        Ok(AutomationMetrics::from_counters(
            &merged,
            self.config.target_automation_rate,
            window.days,
        ))
    }

    pub async fn confidence_distribution(
        &self,
        tenant_id: &str,
        window_days: u32,
    ) -> Result<ConfidenceDistribution, StoreError> {
        let view = TtlCache::view_key("confidence", window_days);
        self.cache
            .get_or_compute(tenant_id, &view, self.metrics_ttl(), || async {
                let window = Window::ending_at(window_days, Utc::now());
                let outcomes = self
                    .store
                    .outcomes(tenant_id, window.start(), window.end())
                    .await?;
                Ok::<_, StoreError>(ConfidenceDistribution::from_outcomes(&outcomes, window.days))
            })
            .await
    }

    /// Every view for a window ending at `now`, uncached
    pub async fn snapshot_as_of(
        &self,
        tenant_id: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, StoreError> {
        let window = Window::ending_at(window_days, now);
        let days = self.window_counters(tenant_id, &window).await?;
        let counters = DailyCounters::merged(days.iter().map(|(_, c)| c));
        let outcomes = self
            .store
            .outcomes(tenant_id, window.start(), window.end())
            .await?;

        let automation =
            AutomationMetrics::from_counters(&counters, self.config.target_automation_rate, window.days);
        let confidence = ConfidenceDistribution::from_outcomes(&outcomes, window.days);

        let automated: Vec<&OutcomeRecord> =
            outcomes.iter().filter(|o| o.action.is_automated()).collect();
        let avg_automated_minutes = if automated.is_empty() {
            counters.avg_processing_time_secs / 60.0
        } else {
            automated.iter().map(|o| o.processing_time_secs).sum::<f64>()
                / automated.len() as f64
                / 60.0
        };

        let roi = compute_roi(
            &RoiInput {
                automated_count: counters.automated(),
                avg_automated_minutes,
                automation_rate: automation.automation_rate,
                period_days: window.days,
            },
            &self.roi,
        );

        let efficiency = EfficiencyMetrics {
            window_days: window.days,
            total_investigations: counters.total,
            avg_processing_time_secs: counters.avg_processing_time_secs,
            throughput_per_day: counters.total as f64 / window.days as f64,
            time_saved_per_investigation_minutes: (self.roi.baseline_manual_minutes
                - avg_automated_minutes)
                .max(0.0),
        };

        Ok(MetricsSnapshot {
            tenant_id: tenant_id.to_string(),
            window_days: window.days,
            window_start: window.start(),
            window_end: window.end(),
            automation,
            confidence,
            efficiency,
            roi,
            generated_at: now,
        })
    }

    pub async fn snapshot(&self, tenant_id: &str, window_days: u32) -> Result<MetricsSnapshot, StoreError> {
        let view = TtlCache::view_key("snapshot", window_days);
        self.cache
            .get_or_compute(tenant_id, &view, self.metrics_ttl(), || {
                self.snapshot_as_of(tenant_id, window_days, Utc::now())
            })
            .await
    }

    /// One point per day for the last `days` days, oldest first
    pub async fn daily_trend(
        &self,
        tenant_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendPoint>, StoreError> {
        let window = Window::ending_at(days, now);
        let stored = self.window_counters(tenant_id, &window).await?;

        let mut points = Vec::with_capacity(window.days as usize);
        let mut day = window.start_day;
        while day < window.end_day {
            let counters = stored
                .iter()
                .find(|(d, _)| *d == day)
                .map(|(_, c)| c.clone())
                .unwrap_or_default();
            points.push(TrendPoint {
                day,
                total: counters.total,
                automation_rate: ratio(counters.automated(), counters.total),
                avg_confidence: counters.avg_confidence,
                avg_processing_time_secs: counters.avg_processing_time_secs,
            });
            day += ChronoDuration::days(1);
        }
        Ok(points)
    }

    pub(crate) fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}
