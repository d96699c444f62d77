//! Recommender Service
//!
//! Port: 8000 (RECOMMENDER_PORT)
//! Restores the last persisted generation on startup, then serves
//! training and recommendation requests.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use media_gateway_recommender::{config, handlers, RecommenderService};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv();

    let config = config::RecommenderConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .json()
        .init();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!(
        loss = %config.model.loss,
        no_components = config.model.no_components,
        epochs = config.model.epochs,
        cooldown_secs = config.training.cooldown.as_secs(),
        "Starting Recommender Service on {}",
        bind_addr
    );

    let service = RecommenderService::new(config);
    service
        .restore()
        .context("Persisted model state is unusable, refusing to start")?;

    let service = web::Data::new(service);

    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .configure(handlers::configure_routes)
            .wrap(actix_web::middleware::Logger::default())
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
