//! Stores survive reopening a file-backed database.

use std::time::Duration;

use ripple_core::enums::DeliveryStatus;
use ripple_db::repos::hash::{HashChange, HashWrite};
use ripple_db::service::RippleService;
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> String {
    dir.path().join("ripple.db").to_string_lossy().into_owned()
}

#[tokio::test]
async fn hashes_tasks_and_leases_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let (hash_id, task_id) = {
        let svc = RippleService::new_local(&path).await.unwrap();
        let (record, change) = svc
            .upsert_hash(&HashWrite {
                entity_type: "article".into(),
                entity_id: "1".into(),
                attribute_hash: "aaaa".into(),
                composite_hash: Some("cccc".into()),
            })
            .await
            .unwrap();
        assert_eq!(change, HashChange::Created);
        let target = svc.create_target("search", "article", None).await.unwrap();
        let task = svc.enqueue_for_hash(&record.id, &target.id).await.unwrap();
        svc.try_acquire_lease("ripple:publish", "own-1", Duration::from_secs(300))
            .await
            .unwrap()
            .unwrap();
        (record.id, task.id)
    };

    let svc = RippleService::new_local(&path).await.unwrap();
    let record = svc.get_hash(&hash_id).await.unwrap();
    assert_eq!(record.effective_hash(), "cccc");
    let task = svc.get_task(&task_id).await.unwrap();
    assert_eq!(task.status, DeliveryStatus::Pending);
    let lease = svc.get_lease("ripple:publish").await.unwrap().unwrap();
    assert_eq!(lease.owner, "own-1");
}

#[tokio::test]
async fn purge_cascades_links_and_tasks() {
    let dir = TempDir::new().unwrap();
    let svc = RippleService::new_local(&db_path(&dir)).await.unwrap();

    let (record, _) = svc
        .upsert_hash(&HashWrite {
            entity_type: "article".into(),
            entity_id: "1".into(),
            attribute_hash: "aaaa".into(),
            composite_hash: Some("cccc".into()),
        })
        .await
        .unwrap();
    svc.replace_links(
        &record.id,
        &[ripple_core::entities::NewDependencyLink {
            relation_name: "author".into(),
            dependent: ripple_core::EntityRef::new("author", "7"),
        }],
    )
    .await
    .unwrap();
    let target = svc.create_target("search", "article", None).await.unwrap();
    let task = svc.enqueue_for_hash(&record.id, &target.id).await.unwrap();

    svc.tombstone_hashes("article", &["1".to_string()]).await.unwrap();
    let report = svc.purge_tombstoned(None, None).await.unwrap();
    assert_eq!((report.hashes, report.links, report.tasks), (1, 1, 1));

    assert!(svc.links_for_hash(&record.id).await.unwrap().is_empty());
    assert!(svc.get_task(&task.id).await.is_err());
    assert_eq!(svc.delivery_stats(&target.id).await.unwrap().total(), 0);
}
