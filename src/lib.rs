//! tileserver-rs: a dynamic vector-tile server for geographic feature
//! layers, backed by PostGIS and an external tile cache.

pub mod cache_control;
pub mod cachekey;
pub mod cli;
pub mod config;
pub mod dsl;
pub mod error;
pub mod http;
pub mod logging;
pub mod migrate;
pub mod mvt;
pub mod pgpool;
pub mod schema;
pub mod tilecache;
pub mod tilemath;
pub mod write;

pub use error::{Result, TileServerError};
pub use schema::Config;
