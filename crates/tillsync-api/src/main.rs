mod config;
mod error;
mod routes;

use std::sync::Arc;

use tillsync_core::retry::RetryPolicy;
use tillsync_core::sync::{CollaboratorRegistry, InMemoryApplier, OperationApplier};
use tillsync_core::OfflineQueueService;

use config::AppConfig;
use routes::{app_router, AppState};

/// Domain collaborators are wired here. Until the domain services are
/// linked in, the in-process ledger stands in for all operation kinds.
fn collaborators() -> CollaboratorRegistry {
    let ledger: Arc<dyn OperationApplier> = Arc::new(InMemoryApplier::new("SRV"));
    CollaboratorRegistry::new().register_all(&ledger)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tillsync_api=info".parse().expect("valid directive"))
                .add_directive("tillsync_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting tillsync-api with config: {:?}", config);

    let policy = RetryPolicy::new(config.backoff_cap_secs);
    let service = OfflineQueueService::open_path(&config.db_path, collaborators(), policy)
        .await?
        .with_max_attempts(config.max_attempts);

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, service);
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("tillsync-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
