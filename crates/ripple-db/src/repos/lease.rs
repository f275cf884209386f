//! Named leases with owner tokens and expiry.
//!
//! Acquisition is one atomic upsert: it succeeds when the key is free, expired,
//! or already held by the same owner.

use std::time::Duration;

use chrono::{DateTime, Utc};

use ripple_core::entities::Lease;

use crate::error::DatabaseError;
use crate::helpers::{fmt_datetime, now_utc, parse_datetime};
use crate::service::RippleService;

fn row_to_lease(row: &libsql::Row) -> Result<Lease, DatabaseError> {
    Ok(Lease {
        key: row.get(0)?,
        owner: row.get(1)?,
        acquired_at: parse_datetime(&row.get::<String>(2)?)?,
        expires_at: parse_datetime(&row.get::<String>(3)?)?,
    })
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, DatabaseError> {
    let offset =
        chrono::Duration::from_std(ttl).map_err(|_| DatabaseError::InvalidLeaseTtl(ttl))?;
    now.checked_add_signed(offset)
        .ok_or(DatabaseError::InvalidLeaseTtl(ttl))
}

impl RippleService {
    /// Try to take `key` for `owner`. Returns the lease if acquired.
    pub async fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, DatabaseError> {
        let now = now_utc();
        let expires_at = expiry(now, ttl)?;

        let affected = self
            .db()
            .conn()
            .execute(
                "INSERT INTO leases (key, owner, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (key) DO UPDATE SET
                     owner = excluded.owner,
                     acquired_at = excluded.acquired_at,
                     expires_at = excluded.expires_at
                 WHERE leases.expires_at <= excluded.acquired_at OR leases.owner = excluded.owner",
                libsql::params![key, owner, fmt_datetime(now), fmt_datetime(expires_at)],
            )
            .await?;

        if affected == 0 {
            tracing::debug!(key, owner, "lease held by another owner");
            return Ok(None);
        }
        Ok(Some(Lease {
            key: key.to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at,
        }))
    }

    /// Push the expiry of a lease `owner` still holds. Returns `None` if it was lost.
    pub async fn renew_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, DatabaseError> {
        let expires_at = expiry(now_utc(), ttl)?;
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE leases SET expires_at = ?1 WHERE key = ?2 AND owner = ?3",
                libsql::params![fmt_datetime(expires_at), key, owner],
            )
            .await?;
        if affected == 0 {
            tracing::warn!(key, owner, "lease lost before renewal");
            return Ok(None);
        }
        self.get_lease(key).await
    }

    /// Release a lease held by `owner`. Returns `false` if `owner` no longer held it.
    pub async fn release_lease(&self, key: &str, owner: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "DELETE FROM leases WHERE key = ?1 AND owner = ?2",
                [key, owner],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn get_lease(&self, key: &str) -> Result<Option<Lease>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                "SELECT key, owner, acquired_at, expires_at FROM leases WHERE key = ?1",
                [key],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_lease(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::test_service;

    const KEY: &str = "ripple:publish";

    #[tokio::test]
    async fn second_owner_is_refused_while_held() {
        let svc = test_service().await;
        let ttl = Duration::from_secs(60);

        let first = svc.try_acquire_lease(KEY, "own-a", ttl).await.unwrap();
        assert!(first.is_some());
        let second = svc.try_acquire_lease(KEY, "own-b", ttl).await.unwrap();
        assert!(second.is_none());

        let held = svc.get_lease(KEY).await.unwrap().unwrap();
        assert_eq!(held.owner, "own-a");
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_rejected() {
        let svc = test_service().await;
        let err = svc.try_acquire_lease(KEY, "own-a", Duration::MAX).await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidLeaseTtl(ttl) if ttl == Duration::MAX));
        assert!(svc.get_lease(KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn same_owner_reacquires() {
        let svc = test_service().await;
        let ttl = Duration::from_secs(60);
        svc.try_acquire_lease(KEY, "own-a", ttl).await.unwrap();
        assert!(svc.try_acquire_lease(KEY, "own-a", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let svc = test_service().await;
        svc.try_acquire_lease(KEY, "own-a", Duration::ZERO).await.unwrap();

        let taken = svc
            .try_acquire_lease(KEY, "own-b", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(taken.is_some());
        assert!(!svc.release_lease(KEY, "own-a").await.unwrap());
        assert!(svc.renew_lease(KEY, "own-a", Duration::from_secs(60)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn renew_extends_and_release_frees() {
        let svc = test_service().await;
        let acquired = svc
            .try_acquire_lease(KEY, "own-a", Duration::from_secs(10))
            .await
            .unwrap()
            .unwrap();

        let renewed = svc
            .renew_lease(KEY, "own-a", Duration::from_secs(600))
            .await
            .unwrap()
            .unwrap();
        assert!(renewed.expires_at > acquired.expires_at);
        assert!(!renewed.is_expired(now_utc()));

        assert!(svc.release_lease(KEY, "own-a").await.unwrap());
        assert!(svc.get_lease(KEY).await.unwrap().is_none());
        assert!(svc.try_acquire_lease(KEY, "own-b", Duration::from_secs(10)).await.unwrap().is_some());
    }
}
