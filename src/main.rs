use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use eventmaster::config::Config;
use eventmaster::http::api::StoreApi;
use eventmaster::http::{build_router, HttpServer};
use eventmaster::ingest::{tls, IngestServer};
use eventmaster::metrics::Metrics;
use eventmaster::parser::ParserRegistry;
use eventmaster::store::{InstrumentedStore, MemoryStore};
use eventmaster::version;

/// Event ingestion edge: rsyslog TCP/TLS intake and instrumented HTTP API.
#[derive(Parser)]
#[command(name = "eventmaster", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the config file.
    #[arg(long)]
    log_level: Option<String>,

    /// Start the rsyslog ingestion server regardless of config.
    #[arg(short = 'r', long)]
    rsyslog_server: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("eventmaster {}", version::full());
        return Ok(());
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if cli.rsyslog_server {
        cfg.ingest.enabled = true;
        cfg.validate()?;
    }

    // Initialize tracing.
    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting eventmaster",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let metrics = Arc::new(Metrics::new().context("creating metrics")?);
    let events = Arc::new(MemoryStore::bounded(cfg.store.max_events));

    // Bind ingestion first so a bad port or bad TLS material aborts startup
    // before anything is served.
    let ingest = if cfg.ingest.enabled {
        let acceptor = cfg
            .ingest
            .tls
            .as_ref()
            .map(tls::load_acceptor)
            .transpose()
            .context("loading rsyslog TLS material")?;

        let server = IngestServer::bind(
            &cfg.ingest,
            acceptor,
            ParserRegistry::with_defaults(),
            InstrumentedStore::new(Arc::clone(&events), Arc::clone(&metrics)),
            Arc::clone(&metrics),
        )
        .await
        .context("starting rsyslog server")?;

        Some(server)
    } else {
        None
    };

    let api = Arc::new(StoreApi::new(InstrumentedStore::new(
        Arc::clone(&events),
        Arc::clone(&metrics),
    )));
    let http = HttpServer::new(&cfg.http.addr, build_router(api, Arc::clone(&metrics)));
    http.start().await.context("starting http server")?;

    let ingest = ingest.map(IngestServer::start);

    // Wait for shutdown signal.
    let _ = shutdown_rx.await;

    // Graceful shutdown.
    if let Some(handle) = ingest {
        handle.stop().await?;
    }
    http.stop().await?;

    tracing::info!("eventmaster stopped");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
                return;
            }
        };

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
