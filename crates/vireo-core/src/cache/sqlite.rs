//! SQLite-backed cache implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{CacheBackend, CacheStats, NamespaceStats};
use crate::error::{Result, VireoError};

/// SQLite cache backend.
///
/// One shared database, one table, thread-safe via an internal mutex on the
/// connection. Expired entries are dropped lazily on read and by
/// [`CacheBackend::cleanup_expired`].
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) a cache database at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VireoError::io_with_path(e, parent))?;
        }

        let conn = Connection::open(db_path).map_err(|e| VireoError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| VireoError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       BLOB NOT NULL,
                inserted_at TEXT NOT NULL,
                ttl_secs    INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE INDEX IF NOT EXISTS idx_cache_namespace
                ON cache_entries(namespace);
            "#,
        )
        .map_err(|e| VireoError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory cache. Useful for tests and ephemeral runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace   TEXT NOT NULL,
                key         TEXT NOT NULL,
                value       BLOB NOT NULL,
                inserted_at TEXT NOT NULL,
                ttl_secs    INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| VireoError::Database {
            message: format!("Cache lock poisoned: {}", e),
            source: None,
        })
    }

    fn is_expired(inserted_at: &str, ttl_secs: i64, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(inserted_at) {
            Ok(inserted) => {
                let age = now.signed_duration_since(inserted.with_timezone(&Utc));
                age.num_seconds() >= ttl_secs
            }
            // An unparseable timestamp is treated as expired.
            Err(_) => true,
        }
    }
}

impl CacheBackend for SqliteCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let row: Option<(Vec<u8>, String, i64)> = conn
            .query_row(
                "SELECT value, inserted_at, ttl_secs FROM cache_entries
                 WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((value, inserted_at, ttl_secs)) = row else {
            return Ok(None);
        };

        if Self::is_expired(&inserted_at, ttl_secs, Utc::now()) {
            debug!("Cache entry {}/{} expired, dropping", namespace, key);
            conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            return Ok(None);
        }

        Ok(Some(value))
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
                 (namespace, key, value, inserted_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                namespace,
                key,
                value,
                Utc::now().to_rfc3339(),
                ttl.as_secs() as i64
            ],
        )?;
        Ok(())
    }

    fn invalidate(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self, namespace: Option<&str>) -> Result<usize> {
        let conn = self.lock()?;
        let removed = match namespace {
            Some(ns) => conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1",
                params![ns],
            )?,
            None => conn.execute("DELETE FROM cache_entries", [])?,
        };
        Ok(removed)
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let conn = self.lock()?;
        let now = Utc::now();

        let mut stmt =
            conn.prepare("SELECT namespace, key, inserted_at, ttl_secs FROM cache_entries")?;
        let expired: Vec<(String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .filter(|(_, _, inserted_at, ttl)| Self::is_expired(inserted_at, *ttl, now))
            .map(|(ns, key, _, _)| (ns, key))
            .collect();
        drop(stmt);

        for (ns, key) in &expired {
            conn.execute(
                "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![ns, key],
            )?;
        }

        Ok(expired.len())
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT namespace, COUNT(*), COALESCE(SUM(LENGTH(value)), 0)
             FROM cache_entries GROUP BY namespace ORDER BY namespace",
        )?;
        let namespaces: Vec<NamespaceStats> = stmt
            .query_map([], |row| {
                Ok(NamespaceStats {
                    namespace: row.get(0)?,
                    entry_count: row.get::<_, i64>(1)? as usize,
                    total_size_bytes: row.get::<_, i64>(2)? as u64,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(CacheStats {
            total_entries: namespaces.iter().map(|n| n.entry_count).sum(),
            total_size_bytes: namespaces.iter().map(|n| n.total_size_bytes).sum(),
            namespaces,
        })
    }
}
