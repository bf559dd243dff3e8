use anyhow::{Context, Result};
use clap::Parser;
use scriptconf::ScriptConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use scriptability_mcp::tools::ScriptHandler;
use scriptability_mcp::{app_router, build_store, telemetry, upstream, AppState, SERVER_NAME};

/// ScriptAbility pharmacy tools over MCP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./scriptability-mcp.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides config and MCP_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve MCP over HTTP at /mcp
    #[arg(long)]
    http: bool,

    /// Serve MCP over stdin/stdout
    #[arg(long)]
    stdio: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ScriptConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.http_port = port;
    }
    config.server.http |= cli.http;
    config.server.stdio |= cli.stdio;

    if cli.print_config {
        println!("{}", config.to_toml());
        return Ok(());
    }

    let telemetry = telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;

    if !config.server.http && !config.server.stdio {
        tracing::info!("No transport selected, defaulting to HTTP");
        config.server.http = true;
    }

    let http = upstream::http_client().context("Failed to build HTTP client")?;
    let store = build_store(&config, &http)?;
    let state = AppState::new(&config, store, http);

    let shutdown = CancellationToken::new();

    if config.server.http {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!("{} listening on http://{}", SERVER_NAME, addr);
        tracing::info!("   MCP Streamable HTTP: POST http://{}/mcp", addr);
        tracing::info!("   Podcast downloads: GET http://{}/files/medcast/{{jobId}}", addr);
        tracing::info!("   Health: GET http://{}/health", addr);

        let server_shutdown = shutdown.clone();
        let server = axum::serve(listener, app_router(state.clone())).with_graceful_shutdown(async move {
            server_shutdown.cancelled().await;
            tracing::info!("HTTP server shutdown signal received");
        });
        tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("HTTP server stopped with error: {:?}", e);
            }
        });
    }

    if config.server.stdio {
        tracing::info!("{} serving MCP on stdio", SERVER_NAME);
        let mcp = Arc::new(mcpkit::McpServer::new(ScriptHandler::new(state.clone())));
        let stdio_shutdown = shutdown.clone();
        let http_enabled = config.server.http;
        tokio::spawn(async move {
            if let Err(e) = mcpkit::transport::serve_stdio(mcp).await {
                tracing::error!("stdio transport failed: {}", e);
            }
            // With no HTTP listener, end of input is the end of the process.
            if !http_enabled {
                stdio_shutdown.cancel();
            }
        });
    }

    let stats_state = state.clone();
    let stats_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let jobs = stats_state.registry.stats();
                    tracing::info!(
                        jobs.total = jobs.total,
                        jobs.pending = jobs.pending,
                        jobs.running = jobs.running,
                        jobs.succeeded = jobs.succeeded,
                        jobs.failed = jobs.failed,
                        "Server statistics"
                    );
                }
                _ = stats_shutdown.cancelled() => break,
            }
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, container runtimes)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down gracefully...");
        }
        result = terminate() => {
            result?;
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("stdin closed, shutting down");
        }
    }
    shutdown.cancel();

    let in_flight = state.registry.stats();
    if in_flight.pending + in_flight.running > 0 {
        tracing::warn!(
            jobs.pending = in_flight.pending,
            jobs.running = in_flight.running,
            "Exiting with podcast jobs still in flight"
        );
    }

    // Give the HTTP server a moment to drain
    tokio::time::sleep(Duration::from_millis(100)).await;
    telemetry.shutdown();
    Ok(())
}

#[cfg(unix)]
async fn terminate() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate() -> Result<()> {
    std::future::pending().await
}
