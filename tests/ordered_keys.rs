//! Coordination client contract, exercised over the in-process key space

use async_trait::async_trait;
use shardmeta::client::flat::KvWatchStream;
use shardmeta::client::{
    connect, new_client, CoordClient, Event, FlatKv, LeaseId, MemKv, OrderedKeyClient, Revision,
};
use shardmeta::common::CoordinatorConfig;
use shardmeta::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(2);

fn client_on(kv: &Arc<MemKv>) -> OrderedKeyClient<MemKv> {
    OrderedKeyClient::new(kv.clone(), Duration::from_secs(1))
}

#[tokio::test]
async fn test_create_never_overwrites() {
    let c = client_on(&Arc::new(MemKv::new()));
    assert_ok!(c.create("/p/pd", b"first").await);
    let err = c.create("/p/pd", b"second").await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(c.read("/p/pd", true).await.unwrap(), Some(b"first".to_vec()));
}

#[tokio::test]
async fn test_update_upserts() {
    let c = client_on(&Arc::new(MemKv::new()));
    assert_ok!(c.update("/p/proxy/a", b"1").await);
    assert_ok!(c.update("/p/proxy/a", b"2").await);
    assert_eq!(c.read("/p/proxy/a", true).await.unwrap(), Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_delete_of_absent_key_succeeds() {
    let c = client_on(&Arc::new(MemKv::new()));
    assert_ok!(c.delete("/p/never-written").await);
    c.update("/p/k", b"").await.unwrap();
    assert_ok!(c.delete("/p/k").await);
    assert_ok!(c.delete("/p/k").await);
}

#[tokio::test]
async fn test_read_and_list_must() {
    let c = client_on(&Arc::new(MemKv::new()));
    assert_eq!(c.read("/p/missing", false).await.unwrap(), None);
    assert!(matches!(
        c.read("/p/missing", true).await,
        Err(Error::NotFound(_))
    ));

    assert!(c.list("/p/slots", false).await.unwrap().is_empty());
    let err = c.list("/p/slots", true).await.unwrap_err();
    assert!(matches!(err, Error::NotADirectory(_)));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_stays_inside_directory() {
    let c = client_on(&Arc::new(MemKv::new()));
    for path in ["/p/group/group-0001", "/p/group/group-0002", "/p/groups-old/x"] {
        c.update(path, b"").await.unwrap();
    }
    assert_eq!(
        c.list("/p/group", true).await.unwrap(),
        vec!["/p/group/group-0001", "/p/group/group-0002"]
    );
}

#[tokio::test]
async fn test_sequential_keys_are_padded_and_ordered() {
    let c = client_on(&Arc::new(MemKv::new()));
    let mut created = Vec::new();
    for i in 0..12 {
        let path = c
            .create_in_order("/p/actions", format!("{}", i).as_bytes())
            .await
            .unwrap();
        created.push(path);
    }
    assert_eq!(created[0], "/p/actions/000001");
    assert_eq!(created[11], "/p/actions/000012");
    assert!(created.windows(2).all(|w| w[0] < w[1]));

    // lexicographic listing reproduces creation order
    assert_eq!(c.list("/p/actions", true).await.unwrap(), created);
}

#[tokio::test]
async fn test_new_instance_continues_after_existing_children() {
    let kv = Arc::new(MemKv::new());
    let first = client_on(&kv);
    for _ in 0..3 {
        first.create_in_order("/p/actions", b"").await.unwrap();
    }
    first.close().await.unwrap();

    let second = client_on(&kv);
    assert_eq!(
        second.create_in_order("/p/actions", b"").await.unwrap(),
        "/p/actions/000004"
    );
}

#[tokio::test]
async fn test_watch_on_empty_dir_fires_once() {
    let c = client_on(&Arc::new(MemKv::new()));
    let (mut watch, children) = c.watch_in_order("/p/actions").await.unwrap();
    assert!(children.is_empty());
    assert_eq!(watch.try_fired(), None);

    c.create_in_order("/p/actions", b"a").await.unwrap();
    c.create_in_order("/p/actions", b"b").await.unwrap();

    let event = timeout(WAIT, watch.fired()).await.unwrap();
    assert_eq!(event, Event::ChildrenChanged);

    // re-arming sees both children and waits for the next one
    let (mut watch, children) = c.watch_in_order("/p/actions").await.unwrap();
    assert_eq!(children.len(), 2);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watch.try_fired(), None);
}

#[tokio::test]
async fn test_watch_ignores_deletes_and_updates() {
    let c = client_on(&Arc::new(MemKv::new()));
    let first = c.create_in_order("/p/actions", b"").await.unwrap();

    let (mut watch, children) = c.watch_in_order("/p/actions").await.unwrap();
    assert_eq!(children, vec![first.clone()]);

    c.update(&first, b"rewritten").await.unwrap();
    c.delete(&first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(watch.try_fired(), None);

    c.create_in_order("/p/actions", b"").await.unwrap();
    assert_eq!(
        timeout(WAIT, watch.fired()).await.unwrap(),
        Event::ChildrenChanged
    );
}

#[tokio::test]
async fn test_close_ends_watches_and_rejects_calls() {
    let c = client_on(&Arc::new(MemKv::new()));
    let (watch, _) = c.watch_in_order("/p/actions").await.unwrap();

    c.close().await.unwrap();
    assert_eq!(timeout(WAIT, watch.fired()).await.unwrap(), Event::NotWatching);

    assert!(matches!(c.update("/p/x", b"").await, Err(Error::ClosedClient)));
    assert!(matches!(
        c.create_in_order("/p/actions", b"").await,
        Err(Error::ClosedClient)
    ));
    assert!(matches!(
        c.watch_in_order("/p/actions").await,
        Err(Error::ClosedClient)
    ));
}

#[tokio::test]
async fn test_ephemeral_key_dies_with_client() {
    let kv = Arc::new(MemKv::new());
    let owner = client_on(&kv);
    let observer = client_on(&kv);

    let lost = owner.create_ephemeral("/p/live/cli-1", b"me").await.unwrap();
    let (_, seq_path) = owner
        .create_ephemeral_in_order("/p/live-seq", b"me")
        .await
        .unwrap();
    assert_eq!(seq_path, "/p/live-seq/000001");
    assert!(observer.read("/p/live/cli-1", false).await.unwrap().is_some());
    assert!(!lost.is_lost());

    owner.close().await.unwrap();
    timeout(WAIT, lost.lost()).await.unwrap();
    assert_eq!(observer.read("/p/live/cli-1", false).await.unwrap(), None);
    assert_eq!(observer.read(&seq_path, false).await.unwrap(), None);
    assert!(kv.live_leases().is_empty());
}

#[tokio::test]
async fn test_ephemeral_session_loss_is_signalled() {
    let kv = Arc::new(MemKv::new());
    let owner = client_on(&kv).with_session_ttl(3);

    let lost = owner.create_ephemeral("/p/live/a", b"").await.unwrap();
    let leases = kv.live_leases();
    assert_eq!(leases.len(), 1);

    kv.expire_lease(leases[0]);
    assert_eq!(owner.read("/p/live/a", false).await.unwrap(), None);
    timeout(Duration::from_secs(5), lost.lost()).await.unwrap();

    // a fresh session backs the next ephemeral key
    assert_ok!(owner.create_ephemeral("/p/live/a", b"").await);
    let renewed = kv.live_leases();
    assert_eq!(renewed.len(), 1);
    assert_ne!(renewed[0], leases[0]);
}

#[tokio::test]
async fn test_ephemeral_create_never_overwrites() {
    let c = client_on(&Arc::new(MemKv::new()));
    c.update("/p/live/a", b"plain").await.unwrap();
    let err = c.create_ephemeral("/p/live/a", b"").await.unwrap_err();
    assert!(err.is_already_exists());
}

/// Key space whose reads and lease renewals never answer
struct StallKv(MemKv);

#[async_trait]
impl FlatKv for StallKv {
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> shardmeta::Result<()> {
        self.0.put(key, value, lease).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> shardmeta::Result<bool> {
        self.0.put_if_absent(key, value, lease).await
    }

    async fn get(&self, _key: &str) -> shardmeta::Result<Option<Vec<u8>>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> shardmeta::Result<(Vec<String>, Revision)> {
        self.0.keys_with_prefix(prefix).await
    }

    async fn last_key_with_prefix(&self, prefix: &str) -> shardmeta::Result<Option<String>> {
        self.0.last_key_with_prefix(prefix).await
    }

    async fn delete(&self, key: &str) -> shardmeta::Result<u64> {
        self.0.delete(key).await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: Revision,
    ) -> shardmeta::Result<KvWatchStream> {
        self.0.watch_prefix(prefix, start_revision).await
    }

    async fn grant_lease(&self, ttl_secs: i64) -> shardmeta::Result<LeaseId> {
        self.0.grant_lease(ttl_secs).await
    }

    async fn keep_alive(&self, _lease: LeaseId) -> shardmeta::Result<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> shardmeta::Result<()> {
        self.0.revoke_lease(lease).await
    }
}

#[tokio::test]
async fn test_calls_time_out() {
    let c = OrderedKeyClient::new(Arc::new(StallKv(MemKv::new())), Duration::from_millis(50));
    let err = c.read("/p/pd", false).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_retryable());
    // writes still go through
    assert_ok!(c.update("/p/pd", b"").await);
}

#[tokio::test]
async fn test_close_aborts_in_flight_call() {
    let c = Arc::new(OrderedKeyClient::new(
        Arc::new(StallKv(MemKv::new())),
        Duration::from_secs(30),
    ));
    let reader = {
        let c = c.clone();
        tokio::spawn(async move { c.read("/p/pd", false).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    c.close().await.unwrap();

    let res = timeout(WAIT, reader).await.unwrap().unwrap();
    assert!(matches!(res, Err(Error::ClosedClient)));
}

#[tokio::test]
async fn test_stalled_keepalive_loses_session() {
    let c = OrderedKeyClient::new(Arc::new(StallKv(MemKv::new())), Duration::from_millis(50))
        .with_session_ttl(3);
    let lost = c.create_ephemeral("/p/live/a", b"").await.unwrap();
    assert!(!lost.is_lost());

    timeout(Duration::from_secs(5), lost.lost()).await.unwrap();
    assert_ok!(c.close().await);
}

#[tokio::test]
async fn test_factory() {
    let c = new_client("memory", "", "", Duration::ZERO).await.unwrap();
    assert_ok!(c.create("/p/pd", b"").await);

    let cfg = CoordinatorConfig {
        name: "memory".into(),
        ..Default::default()
    };
    let c = connect(&cfg).await.unwrap();
    assert_eq!(c.read("/p/pd", false).await.unwrap(), None);

    let err = new_client("zookeeper", "127.0.0.1:2181", "", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::UnsupportedCoordinator(_)));

    let err = new_client("redis", "", "", Duration::ZERO).await.err().unwrap();
    assert!(matches!(err, Error::InvalidCoordinator(_)));

    let err = new_client("etcd", "127.0.0.1:2379", "nopassword", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::InvalidAuth));
}
