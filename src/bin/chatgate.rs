use std::net::SocketAddr;
use std::sync::Arc;

use chatgate::admission::{MemoryCounterStore, UserAgentOracle};
use chatgate::config::ChatbotConfig;
use chatgate::engine::HttpEngine;
use chatgate::server::{AppState, router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real environment variables win either way.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chatgate=info")),
        )
        .init();

    let config = ChatbotConfig::from_env();
    let engine = HttpEngine::from_env(config.generation_timeout)?;
    let oracle = UserAgentOracle::new(config.security.clone());

    let state = AppState {
        config: Arc::new(config),
        oracle: Arc::new(oracle),
        counters: Arc::new(MemoryCounterStore::new()),
        engine: Arc::new(engine),
    };

    let bind = std::env::var("CHATGATE_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "chatgate listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
