//! Contract checks against a live etcd.
//!
//! Skipped unless `SHARDMETA_TEST_ETCD` names the endpoints, e.g.
//! `SHARDMETA_TEST_ETCD=127.0.0.1:2379 cargo test --test etcd`.

use shardmeta::client::{new_client, CoordClient, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

async fn live_client() -> Option<Arc<dyn CoordClient>> {
    let addrs = std::env::var("SHARDMETA_TEST_ETCD").ok()?;
    Some(
        new_client("etcd", &addrs, "", Duration::from_secs(5))
            .await
            .unwrap(),
    )
}

fn scratch_dir(name: &str) -> String {
    format!("/shardmeta-test/{}/{}", uuid::Uuid::new_v4(), name)
}

#[tokio::test]
async fn test_etcd_create_and_delete() {
    let Some(c) = live_client().await else { return };
    let path = scratch_dir("pd");

    c.create(&path, b"a").await.unwrap();
    assert!(c.create(&path, b"b").await.unwrap_err().is_already_exists());
    assert_eq!(c.read(&path, true).await.unwrap(), Some(b"a".to_vec()));

    c.delete(&path).await.unwrap();
    c.delete(&path).await.unwrap();
    assert_eq!(c.read(&path, false).await.unwrap(), None);
    c.close().await.unwrap();
}

#[tokio::test]
async fn test_etcd_ordered_children_and_watch() {
    let Some(c) = live_client().await else { return };
    let dir = scratch_dir("actions");

    let (watch, children) = c.watch_in_order(&dir).await.unwrap();
    assert!(children.is_empty());

    let first = c.create_in_order(&dir, b"1").await.unwrap();
    let second = c.create_in_order(&dir, b"2").await.unwrap();
    assert_eq!(first, format!("{}/000001", dir));
    assert_eq!(second, format!("{}/000002", dir));
    assert_eq!(
        timeout(Duration::from_secs(5), watch.fired()).await.unwrap(),
        Event::ChildrenChanged
    );
    assert_eq!(c.list(&dir, true).await.unwrap(), vec![first.clone(), second.clone()]);

    for path in [first, second] {
        c.delete(&path).await.unwrap();
    }
    c.close().await.unwrap();
}

#[tokio::test]
async fn test_etcd_ephemeral_removed_on_close() {
    let Some(owner) = live_client().await else { return };
    let Some(observer) = live_client().await else { return };
    let path = scratch_dir("live");

    let lost = owner.create_ephemeral(&path, b"").await.unwrap();
    assert!(observer.read(&path, false).await.unwrap().is_some());

    owner.close().await.unwrap();
    timeout(Duration::from_secs(5), lost.lost()).await.unwrap();
    assert_eq!(observer.read(&path, false).await.unwrap(), None);
    observer.close().await.unwrap();
}
