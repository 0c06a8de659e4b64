mod config;
mod db;
mod error;
mod handlers;
mod models;
mod realtime;
mod service;
mod store;
mod voting;

use config::Config;
use db::{Database, MemoryDatabase, PollRepository};
use log::{error, info, warn};
use service::PollService;
use std::sync::Arc;

async fn open_repository(
    config: &Config,
) -> Result<Arc<dyn PollRepository>, Box<dyn std::error::Error + Send + Sync>> {
    if config.uses_memory_store() {
        warn!("Using in-memory poll storage; polls are lost on restart");
        return Ok(Arc::new(MemoryDatabase::new()));
    }
    let database = Database::connect(&config.database_url, config.max_connections).await?;
    Ok(Arc::new(database))
}

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let repository = match open_repository(&config).await {
        Ok(repository) => repository,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };

    let service = Arc::new(PollService::new(repository));
    let app = handlers::router(service);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.bind_addr, e);
            return;
        }
    };
    info!("Poll server listening on {}", config.bind_addr);

    if let Err(why) = axum::serve(listener, app).await {
        error!("Server error: {:?}", why);
    }
}
