use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// spec-hub, an OpenAPI documentation aggregator and reverse proxy
#[derive(Parser)]
#[command(name = "spec-hub", version, about)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.json")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("spec-hub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!(config = cli.config, "loading configuration");
        spec_hub::config::Config::from_file(&cli.config)?
    } else {
        tracing::warn!(config = cli.config, "config file not found, using defaults");
        spec_hub::config::Config::default()
    };

    // Build the catalog and start the providers
    let shutdown = CancellationToken::new();
    let catalog = config.build_catalog(&shutdown).await?;
    tracing::info!(specs = catalog.len(), "catalog ready");

    // Start the HTTP surface
    let server = spec_hub::server::DocsServer::bind(&config.host, config.port).await?;
    let addr = server.local_addr()?;
    tracing::info!(%addr, "serving docs");
    let server_task = tokio::spawn(server.run(catalog, shutdown.clone()));

    tracing::info!("spec-hub ready, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    // Stop providers and drain the server
    shutdown.cancel();
    server_task.await?;

    Ok(())
}
