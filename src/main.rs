use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use tracing_subscriber::EnvFilter;

use tileserver_rs::cli::Settings;
use tileserver_rs::config::load_config;
use tileserver_rs::http::{build_router, AppState};
use tileserver_rs::logging::request_logger;
use tileserver_rs::migrate::Migrator;
use tileserver_rs::pgpool::{PoolSettings, PostgresPool};
use tileserver_rs::tilecache::TileCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = Settings::parse_args();

    let config = load_config(&settings.config_path).await?;
    tracing::info!(config = %settings.config_path.display(), layers = config.layers.len(), "loaded layer schema");

    let pool = PostgresPool::new(&settings.psql_dsn, PoolSettings::default()).await?;

    let conn = pool.get().await?;
    Migrator::run(&conn, &config).await?;
    drop(conn);
    tracing::info!("migrations complete");

    let cache = TileCache::connect(&settings.redis_url).await?;

    let state = Arc::new(AppState {
        config,
        pool,
        cache,
        root_url: settings.root_url.clone(),
        max_zoom: settings.max_zoom,
    });

    let router = build_router(state).layer(middleware::from_fn(request_logger));

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service()).await?;

    Ok(())
}
