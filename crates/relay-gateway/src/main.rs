//! Relay gateway: HTTP front door for the message processor.

mod app;

use app::{build_router, AppState};
use relay_core::{FileUserRegistry, MessageProcessor, RelayConfig, UserRegistry};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[relay-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::load()?;
    let registry: Arc<dyn UserRegistry> = Arc::new(FileUserRegistry::open(&config.registry)?);
    let processor = MessageProcessor::from_config(&config, registry.clone());

    let state = Arc::new(AppState {
        processor,
        registry,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        target: "relay::gateway",
        app = %config.app_name,
        addr = %config.bind_addr,
        version = relay_core::version(),
        "gateway listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
