use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vox_domain::config::Config;
use vox_gateway::api;
use vox_gateway::bootstrap::build_app_state;
use vox_gateway::cli::{self, Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let config = cli::load_config(&args.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config { command: ConfigCommand::Validate }) => {
            let config = cli::load_config(&args.config)?;
            if !cli::validate(&config, &args.config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config { command: ConfigCommand::Show }) => {
            let config = cli::load_config(&args.config)?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("voxagent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the server process.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vox_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("voxagent starting");

    let state = build_app_state(config.clone()).await?;

    // ── Background maintenance: expire idle sessions, drop finished
    //    stream entries ────────────────────────────────────────────
    {
        let store = state.store.clone();
        let streams = state.streams.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3600));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let expired = store.cleanup_expired_sessions();
                let finished = streams.cleanup_completed().await;
                tracing::debug!(expired, finished, "maintenance sweep");
            }
        });
    }

    // ── Router ───────────────────────────────────────────────────
    let cors = build_cors(&config);
    let app = api::router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("voxagent stopped");
    Ok(())
}

/// CORS from the configured allow-list; an empty list means any origin
/// (dev mode).
fn build_cors(config: &Config) -> CorsLayer {
    let origins = &config.server.cors_allowed_origins;
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
