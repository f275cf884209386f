//! Shared test utilities for ripple-db unit tests.

#[cfg(test)]
pub(crate) mod helpers {
    use ripple_core::entities::{DeliveryTarget, HashRecord};

    use crate::RippleDb;
    use crate::repos::hash::HashWrite;
    use crate::service::RippleService;

    /// Create an in-memory `RippleService`.
    pub async fn test_service() -> RippleService {
        let db = RippleDb::open_local(":memory:").await.unwrap();
        RippleService::from_db(db)
    }

    /// Store a live hash record with the given attribute hash and no composite.
    pub async fn seed_hash(svc: &RippleService, entity_type: &str, id: &str, hash: &str) -> HashRecord {
        let (record, _) = svc
            .upsert_hash(&HashWrite {
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
                attribute_hash: hash.to_string(),
                composite_hash: None,
            })
            .await
            .unwrap();
        record
    }

    /// Create an active target serving `entity_type`.
    pub async fn seed_target(svc: &RippleService, name: &str, entity_type: &str) -> DeliveryTarget {
        svc.create_target(name, entity_type, None).await.unwrap()
    }
}
