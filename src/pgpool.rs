//! PostgreSQL/PostGIS connection pool.

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Timeouts};
use semver::Version;
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::error::{Result, TileServerError};

const MINIMUM_POSTGRES_VERSION: Version = Version::new(11, 0, 0);
const MINIMUM_POSTGIS_VERSION: Version = Version::new(3, 0, 0);

#[derive(Clone, Debug)]
pub struct PoolSettings {
    pub max_size: usize,
    pub wait_timeout_ms: u64,
    pub create_timeout_ms: u64,
    pub recycle_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 20,
            wait_timeout_ms: 30_000,
            create_timeout_ms: 10_000,
            recycle_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostgresPool {
    pool: Pool,
    postgres_version: Version,
    postgis_version: Version,
}

impl PostgresPool {
    pub async fn new(connection_string: &str, settings: PoolSettings) -> Result<Self> {
        let pg_config: tokio_postgres::Config = connection_string
            .parse()
            .map_err(|e| TileServerError::SchemaError(format!("invalid psql_dsn: {e}")))?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);

        let timeouts = Timeouts {
            wait: Some(Duration::from_millis(settings.wait_timeout_ms)),
            create: Some(Duration::from_millis(settings.create_timeout_ms)),
            recycle: Some(Duration::from_millis(settings.recycle_timeout_ms)),
        };

        let pool = Pool::builder(mgr)
            .max_size(settings.max_size)
            .timeouts(timeouts)
            .build()
            .map_err(|e| TileServerError::SchemaError(format!("failed to build pool: {e}")))?;

        let mut result = Self {
            pool,
            postgres_version: Version::new(0, 0, 0),
            postgis_version: Version::new(0, 0, 0),
        };

        let conn = result.get().await?;
        let postgres_version = Self::get_postgres_version(&conn).await?;
        if postgres_version < MINIMUM_POSTGRES_VERSION {
            return Err(TileServerError::SchemaError(format!(
                "PostgreSQL {postgres_version} is older than minimum required {MINIMUM_POSTGRES_VERSION}"
            )));
        }

        let postgis_version = Self::get_postgis_version(&conn).await?;
        if postgis_version < MINIMUM_POSTGIS_VERSION {
            return Err(TileServerError::SchemaError(format!(
                "PostGIS {postgis_version} is older than minimum required {MINIMUM_POSTGIS_VERSION}"
            )));
        }

        tracing::info!(%postgres_version, %postgis_version, "connected to postgres");
        result.postgres_version = postgres_version;
        result.postgis_version = postgis_version;

        Ok(result)
    }

    pub async fn get(&self) -> Result<Object> {
        self.pool.get().await.map_err(TileServerError::from)
    }

    pub fn postgres_version(&self) -> &Version {
        &self.postgres_version
    }

    pub fn postgis_version(&self) -> &Version {
        &self.postgis_version
    }

    async fn get_postgres_version(conn: &Object) -> Result<Version> {
        let row = conn
            .query_one(
                r"SELECT (regexp_matches(
                    current_setting('server_version'),
                    '^(\d+\.\d+)',
                    'g'
                ))[1] || '.0' as version;",
                &[],
            )
            .await?;
        let version_str: String = row.get("version");
        version_str
            .parse()
            .map_err(|e| TileServerError::SchemaError(format!("invalid postgres version '{version_str}': {e}")))
    }

    async fn get_postgis_version(conn: &Object) -> Result<Version> {
        let row = conn
            .query_one(
                r"SELECT (regexp_matches(
                    PostGIS_Lib_Version(),
                    '^(\d+\.\d+\.\d+)',
                    'g'
                ))[1] as version;",
                &[],
            )
            .await?;
        let version_str: String = row.get("version");
        version_str
            .parse()
            .map_err(|e| TileServerError::SchemaError(format!("invalid postgis version '{version_str}': {e}")))
    }
}
