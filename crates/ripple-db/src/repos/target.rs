//! Delivery target repository.

use ripple_core::entities::DeliveryTarget;
use ripple_core::enums::TargetStatus;
use ripple_core::ids::PREFIX_TARGET;

use crate::error::DatabaseError;
use crate::helpers::{fmt_datetime, get_opt_string, now_utc, parse_datetime, parse_enum, parse_optional_json, json_to_sql};
use crate::service::RippleService;

const SELECT_COLS: &str = "id, name, entity_type, config, status, created_at, updated_at";

fn row_to_target(row: &libsql::Row) -> Result<DeliveryTarget, DatabaseError> {
    Ok(DeliveryTarget {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        config: parse_optional_json(get_opt_string(row, 3)?.as_deref())?,
        status: parse_enum(&row.get::<String>(4)?)?,
        created_at: parse_datetime(&row.get::<String>(5)?)?,
        updated_at: parse_datetime(&row.get::<String>(6)?)?,
    })
}

impl RippleService {
    /// Register an active delivery target. Names are unique.
    pub async fn create_target(
        &self,
        name: &str,
        entity_type: &str,
        config: Option<serde_json::Value>,
    ) -> Result<DeliveryTarget, DatabaseError> {
        let now = now_utc();
        let id = self.db().generate_id(PREFIX_TARGET).await?;

        self.db()
            .conn()
            .execute(
                &format!("INSERT INTO delivery_targets ({SELECT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                libsql::params![
                    id.as_str(),
                    name,
                    entity_type,
                    json_to_sql(config.as_ref())?,
                    TargetStatus::Active.as_str(),
                    fmt_datetime(now),
                    fmt_datetime(now)
                ],
            )
            .await?;

        tracing::info!(target_id = %id, name, entity_type, "delivery target created");

        Ok(DeliveryTarget {
            id,
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            config,
            status: TargetStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_target(&self, id: &str) -> Result<DeliveryTarget, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(&format!("SELECT {SELECT_COLS} FROM delivery_targets WHERE id = ?1"), [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_target(&row)
    }

    pub async fn get_target_by_name(&self, name: &str) -> Result<Option<DeliveryTarget>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(&format!("SELECT {SELECT_COLS} FROM delivery_targets WHERE name = ?1"), [name])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_target(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_targets(&self) -> Result<Vec<DeliveryTarget>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(&format!("SELECT {SELECT_COLS} FROM delivery_targets ORDER BY name"), ())
            .await?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(row_to_target(&row)?);
        }
        Ok(targets)
    }

    /// Active targets that receive changes for `entity_type`.
    pub async fn targets_for_entity_type(
        &self,
        entity_type: &str,
    ) -> Result<Vec<DeliveryTarget>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM delivery_targets
                     WHERE entity_type = ?1 AND status = ?2
                     ORDER BY name"
                ),
                [entity_type, TargetStatus::Active.as_str()],
            )
            .await?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(row_to_target(&row)?);
        }
        Ok(targets)
    }

    pub async fn set_target_status(
        &self,
        id: &str,
        status: TargetStatus,
    ) -> Result<DeliveryTarget, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE delivery_targets SET status = ?1, updated_at = ?2 WHERE id = ?3",
                libsql::params![status.as_str(), fmt_datetime(now_utc()), id],
            )
            .await?;
        if affected == 0 {
            return Err(DatabaseError::NoResult);
        }
        tracing::info!(target_id = id, %status, "delivery target status changed");
        self.get_target(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{seed_target, test_service};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn create_and_lookup_by_name() {
        let svc = test_service().await;
        let created = svc
            .create_target("search", "article", Some(serde_json::json!({"index": "main"})))
            .await
            .unwrap();

        let by_id = svc.get_target(&created.id).await.unwrap();
        assert_eq!(by_id, created);
        let by_name = svc.get_target_by_name("search").await.unwrap().unwrap();
        assert_eq!(by_name.id, created.id);
        assert!(svc.get_target_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let svc = test_service().await;
        seed_target(&svc, "search", "article").await;
        assert!(svc.create_target("search", "author", None).await.is_err());
    }

    #[tokio::test]
    async fn inactive_targets_are_not_served() {
        let svc = test_service().await;
        let a = seed_target(&svc, "a", "article").await;
        seed_target(&svc, "b", "article").await;
        seed_target(&svc, "c", "author").await;

        let updated = svc.set_target_status(&a.id, TargetStatus::Inactive).await.unwrap();
        assert_eq!(updated.status, TargetStatus::Inactive);

        let names: Vec<_> = svc
            .targets_for_entity_type("article")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b"]);
        assert_eq!(svc.list_targets().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn set_status_of_unknown_target_fails() {
        let svc = test_service().await;
        let err = svc
            .set_target_status("tgt-00000000", TargetStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NoResult));
    }
}
