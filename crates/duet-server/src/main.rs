mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use duet_api::auth::{AppState, AppStateInner};
use duet_api::images::{Cloudinary, ImageHost, LocalStore};
use duet_gateway::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "duet=debug,duet_api=debug,duet_gateway=debug,duet_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = duet_db::Database::open(&config.db_path)?;

    let images = match config.cloudinary {
        Some(c) => ImageHost::Cloudinary(Cloudinary::new(c.cloud_name, c.api_key, c.api_secret)),
        None => {
            warn!("Cloudinary not configured, storing images in {}", config.upload_dir.display());
            ImageHost::Local(LocalStore::new(&config.upload_dir, &config.public_url))
        }
    };

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret,
        dispatcher: Dispatcher::new(),
        images,
    });

    let app = routes::build_router(state, &config.upload_dir);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Duet server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
