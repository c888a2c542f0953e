//! Product lock, leader descriptor and the active CLI registry

use shardmeta::client::{CoordClient, MemKv, OrderedKeyClient};
use shardmeta::models::{load_topom, Lock, Paths, Store, Topom};
use shardmeta::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn store_on(kv: &Arc<MemKv>) -> Store {
    let client: Arc<dyn CoordClient> =
        Arc::new(OrderedKeyClient::new(kv.clone(), Duration::from_secs(1)));
    Store::new(client, "demo").unwrap()
}

#[tokio::test]
async fn test_lock_twice_then_unlock() {
    let store = store_on(&Arc::new(MemKv::new()));
    assert_ok!(store.lock().await);

    let err = store.lock().await.unwrap_err();
    assert!(err.is_already_exists());

    assert_ok!(store.unlock().await);
    assert_ok!(store.lock().await);

    let raw = store
        .client()
        .read(&store.paths().lock(), true)
        .await
        .unwrap()
        .unwrap();
    let holder: Lock = serde_json::from_slice(&raw).unwrap();
    assert_eq!(holder.pid, std::process::id());
}

#[tokio::test]
async fn test_unlock_without_lock_succeeds() {
    let store = store_on(&Arc::new(MemKv::new()));
    assert_ok!(store.unlock().await);
    assert_ok!(store.release().await);
}

#[tokio::test]
async fn test_lock_excludes_other_processes() {
    let kv = Arc::new(MemKv::new());
    let first = store_on(&kv);
    let second = store_on(&kv);

    assert_ok!(first.lock().await);
    assert!(matches!(second.lock().await, Err(Error::AlreadyExists(_))));

    first.unlock().await.unwrap();
    assert_ok!(second.lock().await);
}

#[tokio::test]
async fn test_acquire_publishes_leader() {
    let kv = Arc::new(MemKv::new());
    let leader = store_on(&kv);
    let follower = store_on(&kv);

    assert_eq!(follower.load_topom(false).await.unwrap(), None);
    assert!(matches!(
        follower.load_topom(true).await,
        Err(Error::NotFound(_))
    ));

    let topom = Topom::new("demo", "10.0.0.1:18080");
    leader.acquire(&topom).await.unwrap();

    assert_eq!(follower.load_topom(true).await.unwrap(), Some(topom.clone()));
    let via_client = load_topom(follower.client().as_ref(), &Paths::new("demo"), true)
        .await
        .unwrap();
    assert_eq!(via_client, Some(topom.clone()));

    let rival = Topom::new("demo", "10.0.0.2:18080");
    assert!(follower.acquire(&rival).await.unwrap_err().is_already_exists());
    // and a plain lock is refused too
    assert!(follower.lock().await.unwrap_err().is_already_exists());

    leader.release().await.unwrap();
    assert_eq!(follower.load_topom(false).await.unwrap(), None);
    assert_ok!(follower.acquire(&rival).await);
}

#[tokio::test]
async fn test_products_do_not_share_locks() {
    let kv = Arc::new(MemKv::new());
    let client: Arc<dyn CoordClient> =
        Arc::new(OrderedKeyClient::new(kv, Duration::from_secs(1)));
    let a = Store::new(client.clone(), "alpha").unwrap();
    let b = Store::new(client, "beta").unwrap();

    assert_ok!(a.lock().await);
    assert_ok!(b.lock().await);
}

#[tokio::test]
async fn test_active_cli_registry() {
    let store = store_on(&Arc::new(MemKv::new()));
    let me = Lock::new();
    let path = store.paths().cli(&me.name());

    store.register_active_cli(&me).await.unwrap();
    // re-registering is an upsert
    store.register_active_cli(&me).await.unwrap();
    assert!(store.exists(&path).await.unwrap());
    assert_eq!(
        store
            .client()
            .list(&store.paths().cli_dir(), true)
            .await
            .unwrap(),
        vec![path.clone()]
    );

    store.unregister_active_cli(&me.name()).await.unwrap();
    assert!(!store.exists(&path).await.unwrap());
}
