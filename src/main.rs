use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use twinhub::config::Config;
use twinhub::observability::metrics;
use twinhub::server::{start_server, AppState};
#[cfg(feature = "db")]
use twinhub::storage::DatabaseStorage;
#[cfg(not(feature = "db"))]
use twinhub::storage::InMemoryStorage;
use twinhub::storage::Storage;
use twinhub::logging;
use twinhub::workflow::InspectionGenerator;

#[derive(Parser)]
#[command(name = "twinhub")]
#[command(about = "Building-management backend: directory, sites, twins and workflow")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one inspection-record generation sweep and exit
    GenerateInspections,
    /// Run one scheduled-ticket generation sweep and exit
    GenerateTickets,
}

/// libSQL-backed storage from `LIBSQL_URL`/`LIBSQL_AUTH_TOKEN`, migrated on
/// startup, so the server and the generation subcommands share one store.
#[cfg(feature = "db")]
async fn build_storage() -> anyhow::Result<Arc<dyn Storage>> {
    let storage = DatabaseStorage::new().await?;
    storage.run_migrations().await?;
    Ok(Arc::new(storage))
}

/// Without the `db` feature state lives only inside the running process.
#[cfg(not(feature = "db"))]
async fn build_storage() -> anyhow::Result<Arc<dyn Storage>> {
    Ok(Arc::new(InMemoryStorage::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;
    let storage = build_storage().await?;

    match cli.command {
        Commands::Serve { port } => {
            metrics::install();
            let port = port.unwrap_or(config.server.port);
            let state = AppState::build(&config, storage);
            start_server(state, port).await?;
        }
        Commands::GenerateInspections => {
            let generator = InspectionGenerator::new(storage);
            let summary = generator.generate(Utc::now()).await?;
            info!(
                "Inspection sweep finished: {} created, {} suppressed, {} skipped",
                summary.records_created, summary.suppressed, summary.skipped
            );
        }
        Commands::GenerateTickets => {
            let state = AppState::build(&config, storage);
            let created = state.templates.sweep(Utc::now()).await?;
            info!("Scheduled-ticket sweep finished: {} tickets created", created);
        }
    }

    Ok(())
}
