use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linkscope::attribution::AttributionModel;
use linkscope::clock::SystemClock;
use linkscope::config::Config;
use linkscope::experiments::{ConfidenceLevel, CreateAbTestRequest, StopTestRequest};
use linkscope::{open_store, App};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "linkscope-admin")]
#[command(about = "Linkscope reporting and experiment management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the attribution report of a short code
    Report {
        short_code: String,
        /// Attribution model (defaults to ATTRIBUTION_DEFAULT_MODEL)
        #[arg(long)]
        model: Option<String>,
        /// Report window in days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Create an A/B test from a JSON file
    CreateTest {
        /// Path to a JSON test definition
        file: PathBuf,
    },
    /// Move a draft test to active
    StartTest { id: i64 },
    /// Stop an active test
    StopTest {
        id: i64,
        #[arg(long)]
        reason: String,
        /// Declared winner variant id
        #[arg(long)]
        winner: Option<i64>,
    },
    /// List tests, newest first
    ListTests {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Print state, statistics and analyses of a test
    Status {
        id: i64,
        /// 90, 95 or 99
        #[arg(long)]
        confidence: Option<String>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = open_store(&config.database).await?;
    let app = App::new(config, store, Arc::new(SystemClock));
    let state = Arc::clone(&app.state);

    match cli.command {
        Commands::Report {
            short_code,
            model,
            days,
        } => {
            let model = match model {
                Some(raw) => raw.parse::<AttributionModel>()?,
                None => state.reporting.default_model(),
            };
            let days = days.unwrap_or_else(|| state.reporting.default_days());
            let report = state
                .reporting
                .attribution_report(&short_code, model, days)
                .await?;
            print_json(&report)?;
        }
        Commands::CreateTest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let request: CreateAbTestRequest = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid test definition in {}", file.display()))?;
            let test = state.experiments.create(request).await?;
            println!("✓ Created test {} '{}' ({})", test.id, test.name, test.state);
        }
        Commands::StartTest { id } => {
            let test = state.experiments.start(id).await?;
            println!("✓ Test {} is {}", test.id, test.state);
        }
        Commands::StopTest { id, reason, winner } => {
            let test = state
                .experiments
                .stop(
                    id,
                    StopTestRequest {
                        reason,
                        winner_variant_id: winner,
                    },
                )
                .await?;
            println!("✓ Test {} is {}", test.id, test.state);
        }
        Commands::ListTests { limit, cursor } => {
            let page = state.experiments.list(limit, cursor.as_deref()).await?;
            if page.tests.is_empty() {
                println!("No tests found.");
            } else {
                println!("{:<8} {:<12} {:<10} {}", "ID", "State", "Variants", "Name");
                println!("{}", "-".repeat(80));
                for test in &page.tests {
                    println!(
                        "{:<8} {:<12} {:<10} {}",
                        test.id,
                        test.state,
                        test.variants.len(),
                        test.name
                    );
                }
            }
            if let Some(next) = page.next_cursor {
                println!("\nNext page: --cursor {next}");
            }
        }
        Commands::Status { id, confidence } => {
            let level = match confidence {
                Some(raw) => raw.parse::<ConfidenceLevel>()?,
                None => state.experiments.default_confidence(),
            };
            let status = state.reporting.experiment_status(id, level).await?;
            print_json(&status)?;
        }
    }

    app.shutdown().await;
    Ok(())
}
