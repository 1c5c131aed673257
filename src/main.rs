use anyhow::Context as _;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cachet::app::{self, AppState};
use cachet::config::AppConfig;
use cachet::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment still applies.
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    info!(
        addr = %config.addr,
        memory_ttl = ?config.memory_ttl,
        response_max_age = ?config.response_max_age,
        sweep_interval = ?config.sweep_interval,
        "starting cachet"
    );

    let state = AppState::new();
    let sweepers = match config.sweep_interval {
        Some(period) => state.spawn_sweepers(period),
        None => Vec::new(),
    };

    let router = app::router(&config, &state);
    let server = Server::bind(&config.addr)
        .await
        .with_context(|| format!("failed to start server on {}", config.addr))?;
    info!("listening on http://{}", server.local_addr());

    server.serve(router, shutdown_signal()).await?;

    for sweeper in sweepers {
        sweeper.abort();
    }
    info!("shutdown complete");
    Ok(())
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", env!("CARGO_CRATE_NAME"))));

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(true))
        .with(env_filter)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
}
