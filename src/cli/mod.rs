//! Command-line interface for soc-triage.
//!
//! Provides commands for triaging alerts end to end, dispatching single
//! stages, inspecting progress and metrics, and verifying the audit journal.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::config;
use crate::core::{Collaborators, DashboardAggregator, Orchestrator, TriageServices};
use crate::domain::InvestigationEvent;

/// soc-triage - staged security-alert investigation engine
#[derive(Parser, Debug)]
#[command(name = "soc-triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an alert through all six stages
    Triage {
        /// Alert JSON file ("-" reads stdin)
        alert: PathBuf,

        /// Tenant the alert belongs to
        #[arg(short, long, env = "SOC_TRIAGE_TENANT", default_value = "default")]
        tenant: String,

        /// Investigation ID (generated if not provided)
        #[arg(long)]
        id: Option<String>,

        /// Print the final event as JSON
        #[arg(long)]
        json: bool,
    },

    /// Dispatch one event to the agent for a stage
    Dispatch {
        /// Stage name (plan, execute, analyze, respond, adapt, report)
        stage: String,

        /// Event JSON file ("-" reads stdin)
        event: PathBuf,
    },

    /// Show progress of an investigation
    Progress {
        tenant: String,
        investigation_id: String,
    },

    /// Show automation metrics for a tenant
    Metrics {
        tenant: String,

        /// Window size in days
        #[arg(short, long, default_value = "7")]
        window: u32,

        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the composed dashboard view for a tenant
    Dashboard {
        tenant: String,

        /// Trend window in days
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Recompute every audit journal checksum for an investigation
    Verify {
        tenant: String,
        investigation_id: String,
    },

    /// List stage agent bindings
    Agents,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Triage {
                alert,
                tenant,
                id,
                json,
            } => triage(&alert, &tenant, id, json).await,
            Commands::Dispatch { stage, event } => dispatch(&stage, &event).await,
            Commands::Progress {
                tenant,
                investigation_id,
            } => show_progress(&tenant, &investigation_id).await,
            Commands::Metrics {
                tenant,
                window,
                json,
            } => show_metrics(&tenant, window, json).await,
            Commands::Dashboard { tenant, days } => show_dashboard(&tenant, days).await,
            Commands::Verify {
                tenant,
                investigation_id,
            } => verify(&tenant, &investigation_id).await,
            Commands::Agents => list_agents(),
            Commands::Config => show_config(),
        }
    }
}

/// Services wired to the local state directory
fn open_services() -> Result<Arc<TriageServices>> {
    let cfg = config::config()?;
    let collaborators = Collaborators::local(cfg)?;
    Ok(Arc::new(TriageServices::new(&cfg.settings, collaborators)))
}

fn read_json(path: &Path) -> Result<Value> {
    let text = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    };

    serde_json::from_str(&text).context("Input is not valid JSON")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run an alert through the whole pipeline
async fn triage(alert_path: &Path, tenant: &str, id: Option<String>, json: bool) -> Result<()> {
    let alert = read_json(alert_path)?;
    let investigation_id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let event = InvestigationEvent::new(tenant, &investigation_id, alert);

    let orchestrator = Orchestrator::new(open_services()?);
    let result = orchestrator.run_investigation(event.into_value()).await?;

    if json {
        return print_json(&result);
    }

    println!("Investigation: {}", investigation_id);
    println!("Tenant:        {}", tenant);
    if let Some(confidence) = result.get("confidence") {
        println!(
            "Confidence:    {:.2} (false positive {:.2}, automation {:.2})",
            confidence["overallConfidence"].as_f64().unwrap_or_default(),
            confidence["falsePositiveProbability"].as_f64().unwrap_or_default(),
            confidence["automationConfidence"].as_f64().unwrap_or_default()
        );
    }
    if let Some(decision) = result.get("decision") {
        println!(
            "Decision:      {} (risk {})",
            decision["automationAction"].as_str().unwrap_or("?"),
            decision["riskLevel"].as_str().unwrap_or("?")
        );
        println!("Reasoning:     {}", decision["reasoning"].as_str().unwrap_or(""));
    }
    if let Some(report) = result.pointer("/report/report").and_then(Value::as_str) {
        println!("Report:        {}", report);
    }
    for warning in result
        .get("warnings")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        eprintln!(
            "[warning] {}: {}",
            warning["stage"].as_str().unwrap_or("?"),
            warning["message"].as_str().unwrap_or("")
        );
    }

    Ok(())
}

/// Dispatch a single stage and print the forwarded event
async fn dispatch(stage: &str, event_path: &Path) -> Result<()> {
    let event = read_json(event_path)?;
    let orchestrator = Orchestrator::new(open_services()?);
    let result = orchestrator.dispatch(stage, event).await?;
    print_json(&result)
}

async fn show_progress(tenant: &str, investigation_id: &str) -> Result<()> {
    let services = open_services()?;
    let progress = services
        .tracker
        .get_progress(tenant, investigation_id)
        .await
        .with_context(|| format!("No progress found for {}/{}", tenant, investigation_id))?;

    println!("Investigation: {}", progress.investigation_id);
    println!("Status:        {}", progress.overall_status);
    println!("Progress:      {:.1}%", progress.overall_progress);
    println!("Current stage: {} ({})", progress.current_stage, progress.current_agent);
    if let Some(action) = progress.automation_decision {
        println!("Decision:      {}", action);
    }
    println!();
    println!("{:<10} {:<12} {:<10} {:>6}", "STAGE", "AGENT", "STATUS", "PCT");
    println!("{}", "-".repeat(42));
    for (stage, agent) in &progress.stages {
        println!(
            "{:<10} {:<12} {:<10} {:>5.0}%",
            stage.as_str(),
            agent.agent_name,
            agent.status.as_str(),
            agent.progress_percentage
        );
    }
    println!();
    println!("Timeline:");
    for event in &progress.timeline_events {
        println!("  {} {}", event.timestamp.format("%Y-%m-%d %H:%M:%S"), event.message);
    }

    Ok(())
}

async fn show_metrics(tenant: &str, window: u32, json: bool) -> Result<()> {
    let services = open_services()?;
    let snapshot = services.metrics.snapshot(tenant, window).await?;

    if json {
        return print_json(&snapshot);
    }

    let a = &snapshot.automation;
    println!("Tenant {} - last {} days", tenant, snapshot.window_days);
    println!();
    println!("Investigations:   {}", a.total_investigations);
    println!(
        "Automation rate:  {:.1}% (target {:.0}%: {})",
        a.automation_rate * 100.0,
        services.metrics.config().target_automation_rate * 100.0,
        if a.target_met { "met" } else { "not met" }
    );
    println!("  auto-closed:    {:.1}%", a.auto_close_rate * 100.0);
    println!("  monitored:      {:.1}%", a.monitoring_rate * 100.0);
    println!("  escalated:      {:.1}%", a.escalation_rate * 100.0);
    println!();
    let c = &snapshot.confidence;
    println!(
        "Confidence:       avg {:.2}, avg FP {:.2} (low {}, medium {}, high {})",
        c.avg_confidence, c.avg_fp_probability, c.buckets.low, c.buckets.medium, c.buckets.high
    );
    let e = &snapshot.efficiency;
    println!(
        "Efficiency:       {:.1}s avg processing, {:.1}/day",
        e.avg_processing_time_secs, e.throughput_per_day
    );
    let r = &snapshot.roi;
    println!(
        "ROI:              {:.1}h saved, ${:.2} ({:.2}/yr projected), {:.1}x capacity",
        r.time_saved_hours, r.cost_savings, r.annual_projection, r.productivity_multiplier
    );

    Ok(())
}

async fn show_dashboard(tenant: &str, days: u32) -> Result<()> {
    let services = open_services()?;
    let dashboard = DashboardAggregator::new(services.metrics.clone(), services.tracker.clone());
    let view = dashboard.view(tenant, days).await?;
    print_json(&view)
}

async fn verify(tenant: &str, investigation_id: &str) -> Result<()> {
    let services = open_services()?;
    let verified = services
        .journal
        .verify(tenant, investigation_id)
        .await
        .with_context(|| format!("Audit journal verification failed for {}", investigation_id))?;

    if verified == 0 {
        println!("No journal entries for {}/{}", tenant, investigation_id);
    } else {
        println!("{} journal entries verified for {}/{}", verified, tenant, investigation_id);
    }
    Ok(())
}

fn list_agents() -> Result<()> {
    let registry = crate::core::AgentRegistry::new();
    registry.seed_defaults();

    println!("{:<10} {:<12} {:<10} {:>7}", "STAGE", "AGENT", "KIND", "WEIGHT");
    println!("{}", "-".repeat(42));
    for binding in registry.bindings() {
        println!(
            "{:<10} {:<12} {:<10} {:>6}%",
            binding.stage.as_str(),
            binding.agent_name,
            format!("{:?}", binding.kind).to_lowercase(),
            binding.stage.weight_percent()
        );
    }
    Ok(())
}

/// Show resolved configuration
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("soc-triage configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database_path().display());
    println!("  Journal:  {}", cfg.journal_dir().display());
    println!();
    println!("Settings:");
    print!("{}", serde_yaml::to_string(&cfg.settings)?);

    Ok(())
}
