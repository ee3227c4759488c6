use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use octopus::catalog::Catalog;
use octopus::config::Config;
use octopus::{serve, Gateway};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    info!("octopus v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(Catalog::new(&config.superuser, &config.superuser_password));
    let datasources = config.datasource_entries().map_err(anyhow::Error::msg)?;
    for (name, url) in &datasources {
        catalog
            .add_data_source(name, url, None)
            .map_err(|e| anyhow::anyhow!("Failed to register data source '{}': {}", name, e))?;
        info!("Registered data source {} ({})", name, url);
    }

    let listener = TcpListener::bind((config.listen_address.as_str(), config.port)).await?;
    let gateway = Gateway::new(catalog, config.max_connections);
    serve(listener, gateway).await?;
    Ok(())
}
