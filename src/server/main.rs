use todo_api::Config;
use todo_api::adapters::HttpServer;
use todo_api::storage;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let storage = storage::connect(&config.database_url, config.max_connections)?;
    // A database that is down at boot is not fatal: health reports
    // "degraded" and the schema is created on first contact.
    match storage.ensure_schema().await {
        Ok(()) => tracing::info!("database initialized"),
        Err(e) => tracing::error!(error = %e, "database initialization failed, starting degraded"),
    }

    let server = HttpServer::new(storage.clone(), config.addr()?).await?;
    server.run().await?;
    storage.close().await;
    Ok(())
}
