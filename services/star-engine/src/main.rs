use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use point_ledger::{LedgerStore, MemoryStore, MockTokenIssuer};
use star_engine::{
    config::{Config, StorageBackend},
    database::PgLedgerStore,
    handlers,
    services::StarService,
    telemetry,
};
use std::sync::Arc;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init(&config.log);

    info!("Starting STAR Engine on port {}", config.server.port);

    let store: Arc<dyn LedgerStore> = match config.database.backend {
        StorageBackend::Postgres => {
            let store = PgLedgerStore::connect(&config.database)
                .await
                .context("Failed to connect to database")?;
            store.migrate().await?;
            info!("Database connected successfully");
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory ledger; balances are lost on restart");
            Arc::new(MemoryStore::from_config(&config.points))
        }
    };

    let service = Arc::new(StarService::new(
        store,
        Arc::new(MockTokenIssuer::new()),
        config.points.clone(),
    ));
    service.initialize().await?;

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(service.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
