use clap::Parser;
use std::path::PathBuf;

/// Process settings: where the layer schema document lives, how to reach
/// PostgreSQL and the cache, and what to bind to. Every field doubles as an
/// environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "tileserver-rs")]
#[command(author, version, about = "A dynamic vector-tile server for PostGIS feature layers", long_about = None)]
pub struct Settings {
    /// Path to the YAML layer schema document.
    #[arg(long, value_name = "FILE", env = "CONFIG_PATH", default_value = "layers.yml")]
    pub config_path: PathBuf,

    /// PostgreSQL connection string.
    #[arg(long, env = "PSQL_DSN")]
    pub psql_dsn: String,

    #[arg(long, env = "PSQL_USER")]
    pub psql_user: Option<String>,

    #[arg(long, env = "PSQL_PASSWORD")]
    pub psql_password: Option<String>,

    /// Cache store connection URL.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: String,

    /// Public base URL this process is reachable at, used to build TileJSON
    /// tile-url templates.
    #[arg(long, env = "ROOT_URL", default_value = "http://localhost:8080")]
    pub root_url: String,

    /// Maximum zoom level the affected-tile walk descends to.
    #[arg(long, env = "MAX_ZOOM", default_value_t = 18)]
    pub max_zoom: u8,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Settings {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
