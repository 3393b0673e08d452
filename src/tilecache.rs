//! Read-through cache around the MVT builder, backed by an external
//! key/value store. Unlike an in-process cache, invalidation here must
//! reach every process serving this layer, and bulk purge needs the store's
//! own pattern-matching primitive — this is why a real external store
//! (Redis) backs it rather than a process-local cache.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{Result, TileServerError};

#[derive(Clone)]
pub struct TileCache {
    conn: ConnectionManager,
}

impl TileCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(TileServerError::CacheError)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(TileServerError::CacheError)?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(TileServerError::CacheError)?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(TileServerError::CacheError)?;
        Ok(value)
    }

    pub async fn put(&self, key: &str, bytes: &[u8], ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, bytes, ttl_seconds)
            .await
            .map_err(TileServerError::CacheError)?;
        Ok(())
    }

    /// Batch delete. A no-op on an empty key list (Redis rejects a bare DEL
    /// with no arguments).
    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(keys).await.map_err(TileServerError::CacheError)?;
        Ok(())
    }

    /// Resolves every key matching `pattern` via SCAN and deletes them.
    /// SCAN is cursor-based and non-blocking, unlike KEYS, which is safe
    /// for this to run against a live store under load.
    pub async fn purge_prefix(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut purged = 0u64;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(TileServerError::CacheError)?;

            if !batch.is_empty() {
                purged += batch.len() as u64;
                self.delete(&batch).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use crate::cachekey::{full_tile_key, layer_wildcard};
    use crate::tilemath::AffectedTile;

    #[test]
    fn purge_prefix_pattern_matches_emitted_keys() {
        let key = full_tile_key(
            "osrd_track_section",
            "geo",
            "test",
            AffectedTile { z: 14, x: 8299, y: 5632 },
        );
        let pattern = layer_wildcard("osrd_track_section", Some("test"));
        let prefix = pattern.trim_end_matches('*');
        assert!(key.starts_with(prefix));
    }
}
