//! ROI derivation from automation counters.
//!
//! Every figure is a linear function of its inputs and the configured
//! baselines.

use serde::{Deserialize, Serialize};

use crate::config::RoiConfig;

/// Floor on the manual share of work when deriving capacity
const MIN_MANUAL_SHARE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiMetrics {
    pub period_days: u32,
    pub automated_count: u64,
    pub avg_automated_minutes: f64,
    pub time_saved_hours: f64,
    pub cost_savings: f64,
    pub annual_projection: f64,
    pub automated_capacity_per_day: f64,
    pub productivity_multiplier: f64,
}

/// Inputs for one ROI computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiInput {
    /// Auto-closed plus monitored investigations in the period
    pub automated_count: u64,
    pub avg_automated_minutes: f64,
    pub automation_rate: f64,
    pub period_days: u32,
}

pub fn compute_roi(input: &RoiInput, config: &RoiConfig) -> RoiMetrics {
    let saved_minutes_each = (config.baseline_manual_minutes - input.avg_automated_minutes).max(0.0);
    let time_saved_minutes = input.automated_count as f64 * saved_minutes_each;
    let time_saved_hours = time_saved_minutes / 60.0;
    let cost_savings = time_saved_hours * config.hourly_rate;

    let period_days = input.period_days.max(1);
    let annual_projection =
        cost_savings / period_days as f64 * config.working_days_per_year as f64;

    let baseline = config.baseline_capacity_per_day;
    let (automated_capacity, multiplier) = if baseline > 0.0 {
        let rate = input.automation_rate.clamp(0.0, 1.0);
        let manual_share = (1.0 - rate).max(MIN_MANUAL_SHARE);
        let capacity = baseline / manual_share;
        (capacity, capacity / baseline)
    } else {
        (0.0, 1.0)
    };

    RoiMetrics {
        period_days,
        automated_count: input.automated_count,
        avg_automated_minutes: input.avg_automated_minutes,
        time_saved_hours,
        cost_savings,
        annual_projection,
        automated_capacity_per_day: automated_capacity,
        productivity_multiplier: multiplier,
    }
}
