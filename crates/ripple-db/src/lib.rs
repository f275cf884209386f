//! # ripple-db
//!
//! libSQL persistence for Ripple.
//!
//! Owns the hash store (hash records and their dependency links), the delivery
//! queue (targets and tasks), and the scheduler lease table. Repository methods
//! are implemented on [`service::RippleService`], one module per table.

pub mod error;
pub mod helpers;
mod migrations;
pub mod repos;
pub mod service;
pub mod updates;

#[cfg(test)]
mod test_support;

use error::DatabaseError;
use libsql::Builder;

/// Central database handle.
///
/// Wraps a libSQL database and a single connection. Cloning the connection is
/// cheap; the service layer shares it across repositories.
pub struct RippleDb {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
}

impl RippleDb {
    /// Open a local database at the given path, or `":memory:"`.
    ///
    /// Runs migrations automatically.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        // Must be enabled per connection in SQLite
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("PRAGMA foreign_keys: {e}")))?;

        let ripple_db = Self { db, conn };
        ripple_db.run_migrations().await?;
        tracing::debug!(path, "ripple database opened");
        Ok(ripple_db)
    }

    /// Access the underlying libSQL connection for direct queries.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    /// Generate a prefixed ID via libSQL. Returns e.g., `"hsh-a3f8b2c1907d4e15"`.
    ///
    /// 64 random bits: hash records, links, and tasks are the large tables.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or returns no rows.
    pub async fn generate_id(&self, prefix: &str) -> Result<String, DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT ?1 || '-' || lower(hex(randomblob(8)))", [prefix])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        Ok(row.get::<String>(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    async fn test_db() -> RippleDb {
        RippleDb::open_local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn open_local_creates_schema() {
        let db = test_db().await;

        let tables = [
            "hash_records",
            "dependency_links",
            "delivery_targets",
            "delivery_tasks",
            "leases",
        ];
        for table in &tables {
            let mut rows = db
                .conn()
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap();
            assert!(row.is_some(), "table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn generate_id_correct_format() {
        let db = test_db().await;
        let id = db.generate_id("hsh").await.unwrap();
        assert!(id.starts_with("hsh-"), "ID should start with 'hsh-': {id}");
        assert_eq!(id.len(), 20, "3 prefix + 1 dash + 16 hex: {id}");
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn generate_id_all_prefixes() {
        let db = test_db().await;
        for prefix in ripple_core::ids::ALL_PREFIXES {
            let id = db.generate_id(prefix).await.unwrap();
            assert!(id.starts_with(&format!("{prefix}-")));
        }
    }

    #[tokio::test]
    async fn generate_id_uniqueness() {
        let db = test_db().await;
        let mut ids = HashSet::new();
        for _ in 0..100 {
            let id = db.generate_id("tst").await.unwrap();
            assert!(ids.insert(id.clone()), "Duplicate ID generated: {id}");
        }
    }

    #[tokio::test]
    async fn idempotent_migrations() {
        let db = test_db().await;
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn live_hash_records_unique_per_entity() {
        let db = test_db().await;
        let insert = "INSERT INTO hash_records (id, entity_type, entity_id, attribute_hash, tombstoned_at, created_at, updated_at)
                      VALUES (?1, 'article', '1', 'h', ?2, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')";

        db.conn()
            .execute(insert, libsql::params!["hsh-1", Some("2026-01-01T00:00:00Z")])
            .await
            .unwrap();
        db.conn()
            .execute(insert, libsql::params!["hsh-2", None::<String>])
            .await
            .unwrap();

        // A second live record for the same entity violates the partial index.
        let result = db
            .conn()
            .execute(insert, libsql::params!["hsh-3", None::<String>])
            .await;
        assert!(result.is_err(), "duplicate live hash record should be rejected");
    }
}
