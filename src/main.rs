use anyhow::Context;
use project_marketplace::config::MarketConfig;
use project_marketplace::gateway::HttpGateway;
use project_marketplace::http::{self, AppState};
use project_marketplace::store::Store;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &MarketConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter.as_str().into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MarketConfig::from_env()?;
    init_tracing(&config);
    info!(
        bind = %config.bind_address(),
        sandbox = config.payments.sandbox,
        "Starting marketplace server"
    );

    let store = if config.database.temporary {
        warn!("using a temporary database, all data is lost on exit");
        Store::temporary()?
    } else {
        Store::open(&config.database.path)
            .with_context(|| format!("opening database at {}", config.database.path.display()))?
    };

    let gateway = HttpGateway::new(
        &config.payments.gateway_url,
        &config.payments.gateway_api_key,
        config.payments.timeout(),
        config.payments.sandbox,
    )?
    .shared();

    let state = AppState::new(store.clone(), gateway, &config);
    if let Some(token) = &config.auth.bootstrap_admin_token {
        state
            .accounts
            .bootstrap_admin(&config.auth.bootstrap_admin_email, token)?;
    }

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.flush()?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
