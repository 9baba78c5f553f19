use monitor_core::{
    Result,
    config::{Config, StorageBackend},
    db::{create_pool, run_migrations},
    logging,
    monitor::{CheckEngine, MonitorRegistry},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod server;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();

    let config = Config::from_env()?;
    info!(
        storage = ?config.storage.backend,
        "Starting Monitor API server"
    );

    let registry = Arc::new(MonitorRegistry::with_builtin_kinds());

    let repositories = match config.storage.backend {
        StorageBackend::Memory => server::Repositories::in_memory(),
        StorageBackend::Postgres => {
            let db_pool = create_pool(&config.database).await?;
            info!("Database connection established");

            run_migrations(&db_pool).await?;
            info!("Database migrations completed");

            server::Repositories::postgres(db_pool, registry.clone())
        }
    };

    let engine = CheckEngine::from_config(&config.checks)?;
    let address = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(server::AppState::new(
        &config,
        repositories,
        registry,
        engine,
    ));
    let app = server::create_app(state);

    let listener = TcpListener::bind(&address).await?;
    info!("Server listening on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
