//! Dependency link repository. Links are rewritten wholesale per recomputation.

use ripple_core::EntityRef;
use ripple_core::entities::{DependencyLink, NewDependencyLink};
use ripple_core::ids::PREFIX_LINK;

use crate::error::DatabaseError;
use crate::service::RippleService;

const SELECT_COLS: &str = "id, hash_id, dependent_type, dependent_id, relation_name";

fn row_to_link(row: &libsql::Row) -> Result<DependencyLink, DatabaseError> {
    Ok(DependencyLink {
        id: row.get(0)?,
        hash_id: row.get(1)?,
        dependent_type: row.get(2)?,
        dependent_id: row.get(3)?,
        relation_name: row.get(4)?,
    })
}

impl RippleService {
    /// Replace every link owned by `hash_id` with `links`, atomically.
    ///
    /// Duplicate `(relation, dependent)` pairs collapse to one row.
    pub async fn replace_links(
        &self,
        hash_id: &str,
        links: &[NewDependencyLink],
    ) -> Result<Vec<DependencyLink>, DatabaseError> {
        let mut links = links.to_vec();
        links.sort();
        links.dedup();

        let mut ids = Vec::with_capacity(links.len());
        for _ in &links {
            ids.push(self.db().generate_id(PREFIX_LINK).await?);
        }

        let tx = self.db().conn().transaction().await?;
        tx.execute("DELETE FROM dependency_links WHERE hash_id = ?1", [hash_id])
            .await?;
        for (id, link) in ids.iter().zip(&links) {
            tx.execute(
                &format!("INSERT INTO dependency_links ({SELECT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                libsql::params![
                    id.as_str(),
                    hash_id,
                    link.dependent.entity_type.as_str(),
                    link.dependent.entity_id.as_str(),
                    link.relation_name.as_str()
                ],
            )
            .await?;
        }
        tx.commit().await?;

        Ok(ids
            .into_iter()
            .zip(links)
            .map(|(id, link)| DependencyLink {
                id,
                hash_id: hash_id.to_string(),
                dependent_type: link.dependent.entity_type,
                dependent_id: link.dependent.entity_id,
                relation_name: link.relation_name,
            })
            .collect())
    }

    pub async fn links_for_hash(&self, hash_id: &str) -> Result<Vec<DependencyLink>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM dependency_links
                     WHERE hash_id = ?1
                     ORDER BY relation_name, dependent_type, dependent_id"
                ),
                [hash_id],
            )
            .await?;

        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }

    /// Live records whose composite hash was built from `dependent`.
    pub async fn dependents_of(&self, dependent: &EntityRef) -> Result<Vec<EntityRef>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                "SELECT DISTINCT h.entity_type, h.entity_id
                 FROM dependency_links l
                 JOIN hash_records h ON h.id = l.hash_id
                 WHERE l.dependent_type = ?1 AND l.dependent_id = ?2
                   AND h.tombstoned_at IS NULL
                 ORDER BY h.entity_type, h.entity_id",
                [dependent.entity_type.as_str(), dependent.entity_id.as_str()],
            )
            .await?;

        let mut owners = Vec::new();
        while let Some(row) = rows.next().await? {
            owners.push(EntityRef::new(row.get::<String>(0)?, row.get::<String>(1)?));
        }
        Ok(owners)
    }
}
