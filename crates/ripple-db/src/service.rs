//! Service layer over the Ripple database.
//!
//! `RippleService` wraps `RippleDb`. All repo methods are implemented as
//! `impl RippleService` blocks under [`crate::repos`].

use crate::RippleDb;
use crate::error::DatabaseError;

/// Entry point for hash store, delivery queue, and lease operations.
pub struct RippleService {
    db: RippleDb,
}

impl RippleService {
    /// Create a new service wrapping a local database.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the libSQL database file, or `":memory:"` for tests.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new_local(db_path: &str) -> Result<Self, DatabaseError> {
        let db = RippleDb::open_local(db_path).await?;
        Ok(Self { db })
    }

    /// Create from an existing `RippleDb`.
    #[must_use]
    pub const fn from_db(db: RippleDb) -> Self {
        Self { db }
    }

    /// Access the underlying database handle.
    #[must_use]
    pub const fn db(&self) -> &RippleDb {
        &self.db
    }
}
