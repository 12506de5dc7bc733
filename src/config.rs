//! Configuration for the triage engine.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SOC_TRIAGE_HOME)
//! 2. Config file (.soc-triage/config.yaml)
//! 3. Defaults (~/.soc-triage)
//!
//! Config file discovery:
//! - Searches current directory and parents for .soc-triage/config.yaml
//! - A relative `paths.home` is resolved against the .soc-triage/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".soc-triage";
const HOME_ENV: &str = "SOC_TRIAGE_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub roi: RoiConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .soc-triage/)
    pub home: Option<String>,
}

/// Inputs to the confidence / false-positive scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Fixed prior folded into automation confidence
    #[serde(default = "default_historical_precedent")]
    pub historical_precedent: f64,

    /// Known-safe source addresses, as single IPs or CIDR blocks
    #[serde(default)]
    pub allow_list: Vec<String>,

    /// First business hour (UTC, inclusive)
    #[serde(default = "default_business_hours_start")]
    pub business_hours_start: u32,

    /// Last business hour (UTC, exclusive)
    #[serde(default = "default_business_hours_end")]
    pub business_hours_end: u32,
}

fn default_historical_precedent() -> f64 {
    0.7
}

fn default_business_hours_start() -> u32 {
    9
}

fn default_business_hours_end() -> u32 {
    17
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            historical_precedent: default_historical_precedent(),
            allow_list: Vec::new(),
            business_hours_start: default_business_hours_start(),
            business_hours_end: default_business_hours_end(),
        }
    }
}

/// Thresholds and keywords for the escalation decision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Below this false-positive probability an alert is escalated
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,

    /// Minimum overall confidence for auto-close
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Minimum automation confidence for auto-close
    #[serde(default = "default_automation_threshold")]
    pub automation_threshold: f64,

    /// Below this false-positive probability an alert is monitored
    #[serde(default = "default_monitor_fp_threshold")]
    pub monitor_fp_threshold: f64,

    /// Description keywords that always escalate (case-insensitive)
    #[serde(default = "default_threat_keywords")]
    pub threat_keywords: Vec<String>,
}

fn default_escalation_threshold() -> f64 {
    0.3
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_automation_threshold() -> f64 {
    0.6
}

fn default_monitor_fp_threshold() -> f64 {
    0.5
}

fn default_threat_keywords() -> Vec<String> {
    [
        "malware",
        "ransomware",
        "privilege escalation",
        "privilege-escalation",
        "exfiltration",
        "exfil",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            confidence_threshold: default_confidence_threshold(),
            automation_threshold: default_automation_threshold(),
            monitor_fp_threshold: default_monitor_fp_threshold(),
            threat_keywords: default_threat_keywords(),
        }
    }
}

/// Metrics cache lifetimes and the automation target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_ttl")]
    pub metrics_ttl_seconds: u64,

    #[serde(default = "default_dashboard_ttl")]
    pub dashboard_ttl_seconds: u64,

    #[serde(default = "default_target_automation_rate")]
    pub target_automation_rate: f64,
}

fn default_metrics_ttl() -> u64 {
    300
}

fn default_dashboard_ttl() -> u64 {
    120
}

fn default_target_automation_rate() -> f64 {
    0.8
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            metrics_ttl_seconds: default_metrics_ttl(),
            dashboard_ttl_seconds: default_dashboard_ttl(),
            target_automation_rate: default_target_automation_rate(),
        }
    }
}

/// Baselines for ROI derivation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiConfig {
    /// Analyst minutes to triage one alert by hand
    #[serde(default = "default_baseline_manual_minutes")]
    pub baseline_manual_minutes: f64,

    /// Fully loaded analyst cost per hour
    #[serde(default = "default_hourly_rate")]
    pub hourly_rate: f64,

    #[serde(default = "default_working_days_per_year")]
    pub working_days_per_year: u32,

    /// Alerts one analyst clears per day without automation
    #[serde(default = "default_baseline_capacity")]
    pub baseline_capacity_per_day: f64,
}

fn default_baseline_manual_minutes() -> f64 {
    45.0
}

fn default_hourly_rate() -> f64 {
    75.0
}

fn default_working_days_per_year() -> u32 {
    250
}

fn default_baseline_capacity() -> f64 {
    20.0
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            baseline_manual_minutes: default_baseline_manual_minutes(),
            hourly_rate: default_hourly_rate(),
            working_days_per_year: default_working_days_per_year(),
            baseline_capacity_per_day: default_baseline_capacity(),
        }
    }
}

/// Progress record retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Finished records older than this are evicted from the cache
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl ProgressConfig {
    /// Retention as a duration; negative values mean zero and values too
    /// large to represent mean "keep forever"
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.retention_days.max(0)).unwrap_or(chrono::Duration::MAX)
    }
}

/// Engine tunables, independent of where state lives
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSettings {
    pub scoring: ScoringConfig,
    pub decision: DecisionConfig,
    pub metrics: MetricsConfig,
    pub roi: RoiConfig,
    pub progress: ProgressConfig,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub settings: EngineSettings,
}

impl ResolvedConfig {
    /// SQLite database holding records, progress and metrics
    pub fn database_path(&self) -> PathBuf {
        self.home.join("triage.db")
    }

    /// Root of the filesystem blob store (audit journal and reports)
    pub fn journal_dir(&self) -> PathBuf {
        self.home.join("journal")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine a parsed file (if any) with the environment
fn resolve(
    config_file: Option<PathBuf>,
    file: ConfigFile,
    env_home: Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    let home = if let Some(env_home) = env_home {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(config_path)) = (&file.paths.home, &config_file) {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    ResolvedConfig {
        home,
        config_file,
        settings: EngineSettings {
            scoring: file.scoring,
            decision: file.decision,
            metrics: file.metrics,
            roi: file.roi,
            progress: file.progress,
        },
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    Ok(resolve(
        config_file,
        file,
        std::env::var(HOME_ENV).ok(),
        default_home,
    ))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the state directory
pub fn triage_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}
