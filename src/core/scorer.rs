//! Confidence and false-positive scoring.
//!
//! A transparent linear model: each heuristic contributes one named
//! indicator weight in [0, 1] and every output is derived from those
//! weights plus the upstream model confidence. Missing inputs are replaced
//! with neutral defaults and listed in `defaulted_inputs`.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde_json::Value;
use tracing::warn;

use crate::config::ScoringConfig;
use crate::domain::{Alert, ConfidenceScore, Severity, Summary};

/// Enrichment categories a fully contextualized alert carries
pub const CONTEXT_CATEGORIES: [&str; 5] = ["asset", "user", "threatIntel", "network", "history"];

/// Alert fields needed before anything can be automated
pub const REQUIRED_FIELDS: [&str; 5] = [
    "severity",
    "sourceIp",
    "description",
    "alertType",
    "timestamp",
];

/// Upstream confidence assumed when the model reported none
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Share of the false-positive probability taken off the base confidence
const FP_PENALTY: f64 = 0.3;

/// Indicators at or below this weight are not called out in the reasoning
const STRONG_INDICATOR: f64 = 0.6;

pub const FACTOR_SEVERITY: &str = "severity";
pub const FACTOR_SOURCE: &str = "source_locality";
pub const FACTOR_REPETITION: &str = "repetition";
pub const FACTOR_TIME: &str = "time_of_day";
pub const FACTOR_CONTEXT: &str = "context_gap";
pub const FACTOR_AI: &str = "ai_confidence";

/// Where an alert's source address sits relative to the tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLocality {
    /// Explicitly known-safe
    AllowListed,
    /// RFC 1918 address space
    Private,
    /// Loopback, link-local or unique-local
    Internal,
    External,
}

impl SourceLocality {
    pub fn is_external(&self) -> bool {
        matches!(self, SourceLocality::External)
    }

    fn fp_weight(&self) -> f64 {
        match self {
            SourceLocality::AllowListed => 0.7,
            SourceLocality::Private => 0.6,
            SourceLocality::Internal => 0.5,
            SourceLocality::External => 0.2,
        }
    }
}

/// Parsed allow-list of single addresses and CIDR blocks
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    networks: Vec<(IpAddr, u8)>,
}

impl AllowList {
    /// Parse entries like `198.51.100.7` or `10.20.0.0/16`; bad entries are
    /// logged and skipped
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut networks = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            match parse_network(entry) {
                Some(net) => networks.push(net),
                None => warn!(entry, "Ignoring invalid allow-list entry"),
            }
        }
        Self { networks }
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.networks
            .iter()
            .any(|(net, prefix)| network_contains(*net, *prefix, addr))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Classify a source address
    pub fn locality(&self, addr: IpAddr) -> SourceLocality {
        if self.contains(addr) {
            return SourceLocality::AllowListed;
        }
        match addr {
            IpAddr::V4(v4) if v4.is_private() => SourceLocality::Private,
            IpAddr::V4(v4) if v4.is_loopback() || v4.is_link_local() => SourceLocality::Internal,
            IpAddr::V6(v6) => {
                let first = v6.segments()[0];
                let unique_local = first & 0xfe00 == 0xfc00;
                let link_local = first & 0xffc0 == 0xfe80;
                if v6.is_loopback() || unique_local || link_local {
                    SourceLocality::Internal
                } else {
                    SourceLocality::External
                }
            }
            IpAddr::V4(_) => SourceLocality::External,
        }
    }
}

fn parse_network(entry: &str) -> Option<(IpAddr, u8)> {
    match entry.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr.trim().parse().ok()?;
            let prefix: u8 = prefix.trim().parse().ok()?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            (prefix <= max).then_some((addr, prefix))
        }
        None => {
            let addr: IpAddr = entry.parse().ok()?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            Some((addr, prefix))
        }
    }
}

fn network_contains(net: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (net, addr) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) };
            u32::from(net) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix as u32) };
            u128::from(net) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

/// Everything the scorer looks at for one alert
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub alert: &'a Alert,
    pub context: Option<&'a Value>,
    pub summary: Option<&'a Summary>,
    /// Fallback clock for the time-of-day bucket when the alert has no timestamp
    pub observed_at: DateTime<Utc>,
}

impl<'a> ScoringInput<'a> {
    pub fn new(alert: &'a Alert, observed_at: DateTime<Utc>) -> Self {
        Self {
            alert,
            context: None,
            summary: None,
            observed_at,
        }
    }

    pub fn context(mut self, context: Option<&'a Value>) -> Self {
        self.context = context;
        self
    }

    pub fn summary(mut self, summary: Option<&'a Summary>) -> Self {
        self.summary = summary;
        self
    }
}

/// Stateless scorer over a fixed configuration
#[derive(Debug, Clone)]
pub struct Scorer {
    config: ScoringConfig,
    allow_list: AllowList,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl Scorer {
    pub fn new(config: ScoringConfig) -> Self {
        let allow_list = AllowList::parse(config.allow_list.as_slice());
        Self { config, allow_list }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Score one alert
    pub fn score(&self, input: &ScoringInput<'_>) -> ConfidenceScore {
        let alert = input.alert;
        let mut factors = BTreeMap::new();
        let mut defaulted = Vec::new();

        // Severity: unknown severity is treated as the most benign bucket
        let severity_weight = match alert.severity_level() {
            Some(Severity::Informational) => 0.8,
            Some(Severity::Low) => 0.7,
            Some(Severity::Medium) => 0.4,
            Some(Severity::High) | Some(Severity::Critical) => 0.1,
            None => {
                defaulted.push("severity".to_string());
                0.8
            }
        };
        factors.insert(FACTOR_SEVERITY.to_string(), severity_weight);

        match alert.source_addr() {
            Some(addr) => {
                factors.insert(
                    FACTOR_SOURCE.to_string(),
                    self.allow_list.locality(addr).fp_weight(),
                );
            }
            None => defaulted.push("sourceIp".to_string()),
        }

        if let Some(count) = alert.repetition_count {
            let weight = if count > 10 {
                0.7
            } else if count > 5 {
                0.5
            } else {
                0.2
            };
            factors.insert(FACTOR_REPETITION.to_string(), weight);
        }

        let seen_at = match alert.observed_at() {
            Some(ts) => ts,
            None => {
                defaulted.push("timestamp".to_string());
                input.observed_at
            }
        };
        let time_weight = if self.is_business_hours(seen_at) { 0.4 } else { 0.3 };
        factors.insert(FACTOR_TIME.to_string(), time_weight);

        let present = context_categories_present(input.context);
        if input.context.is_none() {
            defaulted.push("context".to_string());
        }
        let context_ratio = present as f64 / CONTEXT_CATEGORIES.len() as f64;
        factors.insert(FACTOR_CONTEXT.to_string(), 1.0 - context_ratio);

        let upstream = match input
            .summary
            .and_then(|s| s.confidence)
            .filter(|c| c.is_finite())
        {
            Some(c) => {
                let c = c.clamp(0.0, 1.0);
                let weight = if c < 0.3 {
                    0.8
                } else if c < 0.6 {
                    0.5
                } else {
                    0.2
                };
                factors.insert(FACTOR_AI.to_string(), weight);
                Some(c)
            }
            None => {
                defaulted.push("summaryConfidence".to_string());
                None
            }
        };
        let base_confidence = upstream.unwrap_or(NEUTRAL_CONFIDENCE);

        let false_positive_probability = if factors.is_empty() {
            0.5
        } else {
            factors.values().sum::<f64>() / factors.len() as f64
        };

        let required_ratio = required_field_ratio(alert);
        let automation_confidence = (required_ratio
            + context_ratio
            + base_confidence
            + self.config.historical_precedent)
            / 4.0;

        let overall_confidence = base_confidence * (1.0 - false_positive_probability * FP_PENALTY);

        let reasoning = build_reasoning(upstream, present, &factors);

        ConfidenceScore {
            overall_confidence: clamp_unit(overall_confidence),
            false_positive_probability: clamp_unit(false_positive_probability),
            automation_confidence: clamp_unit(automation_confidence),
            reasoning,
            factors,
            defaulted_inputs: defaulted,
        }
    }

    /// Weekday within the configured UTC business hours
    pub fn is_business_hours(&self, at: DateTime<Utc>) -> bool {
        let weekday = !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
        let hour = at.hour();
        weekday && hour >= self.config.business_hours_start && hour < self.config.business_hours_end
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Number of expected enrichment categories that carry data
pub fn context_categories_present(context: Option<&Value>) -> usize {
    context_categories(context).len()
}

/// Expected enrichment categories that carry data, accepting either the
/// camelCase or the snake_case key
pub fn context_categories(context: Option<&Value>) -> Vec<&'static str> {
    let Some(obj) = context.and_then(Value::as_object) else {
        return Vec::new();
    };

    CONTEXT_CATEGORIES
        .iter()
        .copied()
        .filter(|category| {
            let snake = match *category {
                "threatIntel" => "threat_intel",
                other => other,
            };
            obj.get(*category)
                .or_else(|| obj.get(snake))
                .is_some_and(has_data)
        })
        .collect()
}

fn has_data(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn required_field_ratio(alert: &Alert) -> f64 {
    let present = [
        alert.severity.is_some(),
        alert.source_ip.is_some(),
        alert.description.is_some(),
        alert.alert_type.is_some(),
        alert.timestamp.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();

    present as f64 / REQUIRED_FIELDS.len() as f64
}

fn build_reasoning(
    upstream: Option<f64>,
    context_present: usize,
    factors: &BTreeMap<String, f64>,
) -> String {
    let mut parts = Vec::new();

    parts.push(match upstream {
        Some(c) if c >= 0.8 => format!("High model confidence ({:.2})", c),
        Some(c) if c >= 0.5 => format!("Moderate model confidence ({:.2})", c),
        Some(c) => format!("Low model confidence ({:.2})", c),
        None => format!(
            "No model confidence reported; assuming {:.2}",
            NEUTRAL_CONFIDENCE
        ),
    });

    let total = CONTEXT_CATEGORIES.len();
    parts.push(if context_present == total {
        "complete enrichment context".to_string()
    } else if context_present * 2 >= total {
        format!("partial enrichment context ({}/{} categories)", context_present, total)
    } else {
        format!("limited enrichment context ({}/{} categories)", context_present, total)
    });

    let strong: Vec<String> = factors
        .iter()
        .filter(|(_, w)| **w > STRONG_INDICATOR)
        .map(|(name, w)| format!("{} ({:.2})", name, w))
        .collect();
    if !strong.is_empty() {
        parts.push(format!("false-positive indicators: {}", strong.join(", ")));
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn saturday_night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_allow_list_cidr_matching() {
        let list = AllowList::parse(&["10.20.0.0/16", "198.51.100.7", "not-an-ip", "2001:db8::/32"]);
        assert_eq!(list.len(), 3);
        assert!(list.contains("10.20.5.1".parse().unwrap()));
        assert!(!list.contains("10.21.0.1".parse().unwrap()));
        assert!(list.contains("198.51.100.7".parse().unwrap()));
        assert!(list.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_locality_classification() {
        let list = AllowList::default();
        assert_eq!(list.locality("192.168.1.100".parse().unwrap()), SourceLocality::Private);
        assert_eq!(list.locality("127.0.0.1".parse().unwrap()), SourceLocality::Internal);
        assert_eq!(list.locality("fd00::1".parse().unwrap()), SourceLocality::Internal);
        assert_eq!(list.locality("203.0.113.1".parse().unwrap()), SourceLocality::External);
    }

    #[test]
    fn test_empty_alert_uses_defaults() {
        let alert = Alert::default();
        let score = Scorer::default().score(&ScoringInput::new(&alert, saturday_night()));

        // severity 0.8, time 0.3, context gap 1.0
        assert!((score.false_positive_probability - 2.1 / 3.0).abs() < 1e-9);
        assert!(score.defaulted_inputs.contains(&"severity".to_string()));
        assert!(score.defaulted_inputs.contains(&"summaryConfidence".to_string()));
        assert!(!score.factors.contains_key(FACTOR_AI));
        assert!(!score.factors.contains_key(FACTOR_SOURCE));
        // (0 + 0 + 0.5 + 0.7) / 4
        assert!((score.automation_confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_business_hours_bucket() {
        let scorer = Scorer::default();
        let tuesday_morning = Utc.with_ymd_and_hms(2024, 6, 4, 10, 30, 0).unwrap();
        assert!(scorer.is_business_hours(tuesday_morning));
        assert!(!scorer.is_business_hours(saturday_night()));
        assert!(!scorer.is_business_hours(Utc.with_ymd_and_hms(2024, 6, 4, 17, 0, 0).unwrap()));
    }

    #[test]
    fn test_context_completeness() {
        let context = json!({
            "asset": {"owner": "it"},
            "user": {},
            "threat_intel": ["ioc"],
            "network": null
        });
        assert_eq!(context_categories_present(Some(&context)), 2);
        assert_eq!(context_categories(Some(&context)), vec!["asset", "threatIntel"]);
        assert_eq!(context_categories_present(None), 0);
    }

    #[test]
    fn test_reasoning_is_deterministic() {
        let alert = Alert::from_value(&json!({"severity": "low", "count": 20}));
        let summary = Summary::new("s").with_confidence(0.9);
        let input = ScoringInput::new(&alert, saturday_night()).summary(Some(&summary));

        let scorer = Scorer::default();
        let a = scorer.score(&input);
        let b = scorer.score(&input);

        assert_eq!(a.reasoning, b.reasoning);
        assert!(a.reasoning.starts_with("High model confidence (0.90)"));
        assert!(a.reasoning.contains("limited enrichment context (0/5 categories)"));
        assert!(a.reasoning.contains("context_gap (1.00)"));
        assert!(a.reasoning.contains("repetition (0.70)"));
    }
}
