use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use postback_gateway::config::Config;
use postback_gateway::handlers::{self, AppState};
use reconcile_core::{LedgerStore, MemoryLedgerStore, PgLedgerStore, ProviderRegistry, Reconciler};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!("Starting postback gateway on port {}", config.server.port);

    let store: Arc<dyn LedgerStore> = if config.database.url.is_empty() {
        warn!("database.url not configured; using volatile in-memory ledger store");
        Arc::new(MemoryLedgerStore::new())
    } else {
        Arc::new(
            PgLedgerStore::connect(&config.database.url, config.database.max_connections)
                .await
                .expect("Failed to connect to database"),
        )
    };

    let registry = ProviderRegistry::from_specs(config.provider_specs())
        .expect("Invalid provider registry");
    info!("Loaded {} provider descriptors", registry.len());

    let state = web::Data::new(AppState {
        reconciler: Arc::new(Reconciler::new(registry, store)),
    });

    let workers = config.server.workers;
    let bind = (config.server.host.clone(), config.server.port);

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(state.clone())
            .configure(handlers::configure_routes)
    })
    .workers(workers)
    .bind(bind)?
    .run()
    .await
}
