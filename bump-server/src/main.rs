use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bump_server::config::{ServerConfig, EXPIRY_SWEEP_INTERVAL_SECS};
use bump_server::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bump_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env();
    info!("starting claims service on {}", config.bind_addr());

    let state = Arc::new(AppState::new(config));

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(EXPIRY_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep_state.claims.expire_overdue().await;
        }
    });

    server::run(state).await?;
    Ok(())
}
