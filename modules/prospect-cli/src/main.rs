use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use prospect_common::{normalize_company_url, Company, Config, RunStatus};
use prospect_pipeline::batch::BatchDriver;
use prospect_pipeline::bootstrap::build_deps;
use prospect_pipeline::runner::PipelineRunner;

#[derive(Parser)]
#[command(name = "prospect", about = "Company enrichment pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enrich a single company.
    Run {
        /// Company website URL.
        #[arg(long)]
        url: String,
        /// Salesforce account id for write-back.
        #[arg(long = "sf-id")]
        sf_id: Option<String>,
    },
    /// Drain the queued leads from the registry.
    Batch {
        /// Max leads to pull from the queue.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Serve the enrichment webhook.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    match cli.command {
        Command::Run { url, sf_id } => {
            let url = normalize_company_url(&url)?;
            let (deps, _registry) = build_deps(&config).await?;

            let company = Company {
                lead_id: String::new(),
                name: String::new(),
                url,
                salesforce_id: sf_id.filter(|s| !s.is_empty()),
                location: None,
            };

            let run = PipelineRunner::new(deps).run(company).await?;
            info!(
                run_id = %run.id,
                status = %run.status,
                score = run.score,
                tokens = run.total_tokens,
                cost_usd = run.total_cost_usd,
                "Run finished"
            );
            if run.status != RunStatus::Complete {
                if let Some(error) = run.error {
                    anyhow::bail!(
                        "enrichment failed in {} ({}): {}",
                        error.failed_phase,
                        error.category,
                        error.message
                    );
                }
            }
        }
        Command::Batch { limit } => {
            let (deps, registry) = build_deps(&config).await?;
            let limit = limit.unwrap_or(config.batch_limit);

            let leads = registry.fetch_queued(limit).await?;
            let driver = BatchDriver::new(deps, config.max_concurrent_companies);
            let report = driver.run(leads).await;

            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                "Batch finished"
            );
            // Per-company failures never affect the exit code.
        }
        Command::Serve { port } => {
            let (deps, _registry) = build_deps(&config).await?;
            let port = port.unwrap_or(config.web_port);
            prospect_api::serve(deps, &config.web_host, port).await?;
        }
    }

    Ok(())
}
