//! Standalone live presentation server.
//!
//! ```text
//! AGORA_BIND_ADDR=0.0.0.0:9090 AGORA_CATALOG=decks.json RUST_LOG=info agora-server
//! ```

use std::sync::Arc;

use agora_live::catalog::MemoryCatalog;
use agora_live::server::{LiveServer, ServerConfig};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    info!("Starting Agora live server...");

    let config = ServerConfig::from_env();
    let catalog = match &config.catalog_path {
        Some(path) => MemoryCatalog::load(path)?,
        None => {
            warn!("No catalog configured; every access code will be rejected");
            MemoryCatalog::new()
        }
    };
    info!("{} presentation(s) in catalog", catalog.len());

    let server = LiveServer::new(config, Arc::new(catalog));
    server.run().await
}
