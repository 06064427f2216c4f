// Main entry point for the Lyra runtime server.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lyra_evidence::store::EvidenceStore;
use lyra_server::server::app::build_app;
use lyra_server::{Collaborators, Config, RuntimeKernel};

#[derive(Parser)]
#[command(name = "lyra-server", about = "Research-task runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the runtime and serve the tool-call API.
    Serve,
    /// Check that the environment is usable and exit.
    Doctor,
}

const EXIT_RUNTIME_ERROR: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lyra_server=debug,lyra_evidence=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let result = match cli.command {
        Command::Serve => serve(config).await,
        Command::Doctor => doctor(config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!("starting lyra runtime");

    let store = EvidenceStore::open(&config.database_url)
        .await
        .context("failed to open evidence store")?;
    tracing::info!(database = %config.database_url, "store opened and migrated");

    let collaborators =
        Collaborators::from_config(&config).context("failed to wire collaborators")?;
    let kernel = Arc::new(
        RuntimeKernel::assemble(store, config.runtime.clone(), collaborators)
            .context("failed to assemble kernel")?,
    );

    let workers = kernel.start_workers();
    tracing::info!(workers = workers.len(), "worker pools started");

    let app = build_app(kernel.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "tool-call surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    kernel.shutdown();
    for handle in workers {
        let _ = handle.await;
    }
    tracing::info!("runtime stopped");
    Ok(())
}

async fn doctor(config: Config) -> Result<()> {
    let all_ok = lyra_server::doctor::run_checks(&config).await?;
    if !all_ok {
        anyhow::bail!("one or more checks failed");
    }
    Ok(())
}
