mod canonical;
mod cli;
mod config;
mod decimal;
mod domain;
mod error;
mod flex;
mod ledger;
mod orchestrator;
mod preflight;
mod raw_persistence;
mod store;
mod valuation;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::Settings;
use domain::RunType;
use flex::FlexClient;
use orchestrator::TriggerOutcome;
use store::Store;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load settings")?;
    let store = Store::open(&settings.database_url).context("failed to open store")?;

    let outcome = match cli.command {
        Commands::Ingest => {
            let client = FlexClient::new().context("failed to build Flex HTTP client")?;
            orchestrator::run_ingestion(&store, &client, &settings, RunType::Manual).await?
        }
        Commands::Reprocess {
            period_key,
            flex_query_id,
        } => {
            orchestrator::run_reprocess(
                &store,
                &settings,
                period_key.as_deref(),
                flex_query_id.as_deref(),
            )
            .await?
        }
    };

    match outcome {
        TriggerOutcome::Started(run_id) => {
            let run = store.get_run(run_id).context("failed to load finished run")?;
            println!("run {run_id} finished with status {:?}", run.status);
            let timeline: Vec<serde_json::Value> =
                serde_json::from_value(run.diagnostics.clone()).unwrap_or_default();
            for event in timeline {
                if let (Some(stage), Some(status), Some(ms)) = (
                    event.get("stage").and_then(|v| v.as_str()),
                    event.get("status").and_then(|v| v.as_str()),
                    event.get("duration_ms").and_then(|v| v.as_i64()),
                ) {
                    println!("  {stage} [{status}] {ms}ms");
                }
            }
            if run.status == domain::RunStatus::Failed {
                std::process::exit(1);
            }
        }
        TriggerOutcome::Rejected => {
            println!("run rejected: another run is already active for this account");
            std::process::exit(2);
        }
    }

    Ok(())
}
