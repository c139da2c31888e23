use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod collector;
mod config;
mod db;
mod error;
mod escalation;
mod heuristics;
mod merge;
mod model_client;
mod models;
mod parser;
mod pipeline;
mod prompt;
mod report;
mod stats;
mod store;
#[cfg(test)]
mod test_support;

use crate::config::PipelineConfig;
use crate::db::PgStore;
use crate::error::{parse_id, PipelineError};
use crate::escalation::EscalationEngine;
use crate::model_client::OllamaClient;
use crate::models::SupportTier;
use crate::pipeline::AssessmentPipeline;
use crate::stats::SupportAggregator;
use crate::store::{AssessmentStore, SignalSource};

#[derive(Parser)]
#[command(name = "peer-support-pipeline")]
#[command(about = "Wellbeing assessments and tiered peer-support escalation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Run a recent (3-day) assessment for one user
    Analyze {
        #[arg(long)]
        user: String,
    },
    /// Establish a long-run baseline for one user
    Baseline {
        #[arg(long)]
        user: String,
    },
    /// Run recent assessments for every known user
    Sweep,
    /// Advance support requests whose escalation is due
    Reconcile {
        /// Keep running, reconciling every N seconds
        #[arg(long)]
        every_secs: Option<u64>,
    },
    /// Show the latest assessment for a user
    Latest {
        #[arg(long)]
        user: String,
    },
    /// Show support statistics and impact score
    Stats {
        #[arg(long)]
        user: String,
    },
    /// Record that a peer provided support for an assessment
    ProvideSupport {
        #[arg(long)]
        assessment: String,
        #[arg(long)]
        provider: String,
    },
    /// List open support requests a user can answer at a tier
    Active {
        #[arg(long)]
        tier: String,
        #[arg(long)]
        user: String,
    },
    /// Generate a markdown support report
    Report {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "support-report.md")]
        out: PathBuf,
    },
}

fn parse_tier(value: &str) -> Result<SupportTier, PipelineError> {
    value.parse::<SupportTier>().map_err(|reason| PipelineError::Validation {
        field: "tier",
        value: value.to_string(),
        reason,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config::database_max_connections()?)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PgStore::new(pool.clone()));

    let escalation = Arc::new(EscalationEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        config.timeouts,
    ));
    let aggregator = SupportAggregator::new(store.clone(), store.clone(), store.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Analyze { user } => {
            let user_id = parse_id("user", &user)?;
            let pipeline = build_pipeline(&store, &escalation, &config)?;
            let outcome = pipeline.analyze_recent(user_id, Utc::now()).await?;
            let assessment = &outcome.assessment;
            println!(
                "Assessment {}: {} (confidence {:.2}, parse {}).",
                assessment.id,
                assessment.status,
                assessment.confidence_score,
                assessment.parse_quality.as_str()
            );
            match outcome.escalation {
                Some(status) => println!("Support requested: {status}."),
                None => println!("No support needed."),
            }
        }
        Commands::Baseline { user } => {
            let user_id = parse_id("user", &user)?;
            let pipeline = build_pipeline(&store, &escalation, &config)?;
            let outcome = pipeline.establish_baseline(user_id, Utc::now()).await?;
            let points = outcome.baseline.data_points;
            println!(
                "Baseline {} from {} days ({} check-ins), confidence {:.2}.",
                outcome.baseline.id,
                points.total_days,
                points.check_ins_count,
                outcome.baseline.confidence_score
            );
        }
        Commands::Sweep => {
            let pipeline = build_pipeline(&store, &escalation, &config)?;
            let summary = pipeline.sweep(Utc::now()).await?;
            println!(
                "Assessed {} of {} users ({} escalated, {} failed).",
                summary.assessed, summary.users, summary.escalated, summary.failed
            );
        }
        Commands::Reconcile { every_secs } => match every_secs {
            None => {
                let summary = escalation.reconcile_due_escalations(Utc::now()).await?;
                println!(
                    "{} opened, {} due, {} advanced, {} failed.",
                    summary.initiated, summary.due, summary.advanced, summary.failed
                );
            }
            Some(secs) => {
                let interval = Duration::from_secs(secs.max(1));
                info!(every_secs = secs, "reconciling escalations");
                loop {
                    if let Err(e) = escalation.reconcile_due_escalations(Utc::now()).await {
                        warn!(error = %e, "reconciliation pass failed");
                    }
                    tokio::time::sleep(interval).await;
                }
            }
        },
        Commands::Latest { user } => {
            let user_id = parse_id("user", &user)?;
            match store.latest_assessment(user_id).await? {
                Some(assessment) => println!("{}", serde_json::to_string_pretty(&assessment)?),
                None => println!("No assessments for this user."),
            }
        }
        Commands::Stats { user } => {
            let user_id = parse_id("user", &user)?;
            let summary = aggregator.get_support_statistics(user_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::ProvideSupport {
            assessment,
            provider,
        } => {
            let assessment_id = parse_id("assessment", &assessment)?;
            let provider_id = parse_id("provider", &provider)?;
            if escalation
                .record_support_provided(assessment_id, provider_id, Utc::now())
                .await?
            {
                println!("Support recorded.");
            } else {
                println!("Nothing to record: no open request for this assessment.");
            }
        }
        Commands::Active { tier, user } => {
            let tier = parse_tier(&tier)?;
            let user_id = parse_id("user", &user)?;
            let requests = aggregator.get_active_support_requests(tier, user_id).await?;
            if requests.is_empty() {
                println!("No open {tier} requests.");
                return Ok(());
            }
            println!("Open {tier} requests:");
            for request in &requests {
                println!(
                    "- {} from {} ({}, requested {})",
                    request.id,
                    request.user_id,
                    request.status,
                    request
                        .support_request_time
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                );
            }
        }
        Commands::Report { user, out } => {
            let user_id = parse_id("user", &user)?;
            if !store.user_exists(user_id).await? {
                return Err(PipelineError::NotFound {
                    kind: "user",
                    id: user_id,
                }
                .into());
            }
            let latest = store.latest_assessment(user_id).await?;
            let baseline = store.current_baseline(user_id).await?;
            let statistics = aggregator.get_support_statistics(user_id).await?;
            let report = report::build_support_report(
                user_id,
                Utc::now(),
                latest.as_ref(),
                baseline.as_ref(),
                &statistics,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn build_pipeline(
    store: &Arc<PgStore>,
    escalation: &Arc<EscalationEngine>,
    config: &PipelineConfig,
) -> anyhow::Result<AssessmentPipeline> {
    let model = Arc::new(OllamaClient::new(&config.model)?);
    Ok(AssessmentPipeline::new(
        store.clone(),
        store.clone(),
        model,
        escalation.clone(),
        config.clone(),
    ))
}
