//! cag-bridge binary: HTTP bridge and cache inventory CLI.

use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use cag_bridge::config::{Cli, Command, Config};
use cag_bridge::inference::invoker::ProcessInvoker;
use cag_bridge::registry::reconciler::{list_caches, ListOptions};
use cag_bridge::registry::report::{render_json, render_table};
use cag_bridge::registry::open_registry;
use cag_bridge::server::bridge_api::{build_router, AppState};
use cag_bridge::server::health::check_health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "cag_bridge=debug,tower_http=debug"
    } else {
        "cag_bridge=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    // Logs go to stderr so `list --json` output stays parseable.
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("cag-bridge v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_env()?;
    config.validate()?;

    match cli.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            serve(Arc::new(config)).await
        }
        Command::List {
            sort,
            days,
            unused,
            json,
        } => {
            let options = ListOptions {
                sort,
                days,
                unused_only: unused,
            };
            // The registry clients block; keep them off the async workers.
            tokio::task::spawn_blocking(move || list(&config, &options, json)).await?
        }
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    info!(
        model = %config.inference.model_path.display(),
        query_script = %config.inference.query_script.display(),
        create_script = %config.inference.create_script.display(),
        master_cache = %config.storage.master_cache_path.display(),
        max_context = config.inference.max_context,
        threads = config.inference.threads,
        batch_size = config.inference.batch_size,
        timeout_secs = config.inference.timeout_secs,
        "Configuration loaded"
    );

    let report = check_health(&config);
    for issue in &report.issues {
        warn!("{issue}");
    }
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.issues.is_empty() {
        warn!("Bridge started with issues. The service may not work correctly.");
    }

    let invoker = Arc::new(ProcessInvoker::new(config.invocation_timeout()));
    let registry = open_registry(&config.registry);
    let state = Arc::new(AppState::new(config.clone(), invoker, registry));

    // Build the HTTP router.
    let app = build_router(state);

    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Server shutting down...");
}

fn list(config: &Config, options: &ListOptions, json: bool) -> anyhow::Result<()> {
    let cache_dir = &config.storage.cache_dir;
    if !cache_dir.is_dir() {
        bail!("Cache directory not found: {}", cache_dir.display());
    }

    let registry = open_registry(&config.registry);
    let entries = list_caches(cache_dir, registry.as_ref(), options, Utc::now());

    if json {
        println!("{}", render_json(&entries)?);
    } else {
        print!("{}", render_table(&entries));
    }
    Ok(())
}
