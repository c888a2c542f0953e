//! Ordered-key adapter
//!
//! Emulates sequential children and one-shot child watches on a flat key
//! space. Sequence numbers come from a counter cached in the client instance,
//! seeded from the last existing child of each directory. Two independent
//! instances appending to the same directory can therefore collide or
//! interleave; one writer per directory is assumed.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::flat::{FlatKv, KvWatchStream, LeaseId};
use super::{
    until_set, CoordClient, EtcdKv, Event, MemKv, OrderedWatch, SessionSignal,
    DEFAULT_SESSION_TTL_SECS,
};
use crate::common::{Error, Result};

/// Zero padding of sequential child names
pub const SEQ_WIDTH: usize = 6;

const SEQ_MAX: u64 = 999_999;

/// Ordered-key adapter over etcd
pub type EtcdClient = OrderedKeyClient<EtcdKv>;

/// Ordered-key adapter over an in-process key space
pub type MemoryClient = OrderedKeyClient<MemKv>;

struct Session {
    lease: LeaseId,
    lost: Arc<watch::Sender<bool>>,
}

#[derive(Default)]
struct Inner {
    closed: bool,
    /// Last sequence number handed out, per directory prefix
    last_seq: HashMap<String, u64>,
    session: Option<Session>,
}

pub struct OrderedKeyClient<K: FlatKv> {
    kv: Arc<K>,
    timeout: Duration,
    session_ttl: i64,
    inner: Mutex<Inner>,
    shutdown: watch::Sender<bool>,
}

fn dir_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

fn seq_key(prefix: &str, seq: u64) -> String {
    format!("{}{:0width$}", prefix, seq, width = SEQ_WIDTH)
}

impl<K: FlatKv> OrderedKeyClient<K> {
    pub fn new(kv: Arc<K>, timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            kv,
            timeout,
            session_ttl: DEFAULT_SESSION_TTL_SECS,
            inner: Mutex::new(Inner::default()),
            shutdown,
        }
    }

    /// TTL of the lease behind ephemeral nodes
    pub fn with_session_ttl(mut self, secs: i64) -> Self {
        self.session_ttl = secs.max(1);
        self
    }

    /// The key space this adapter writes to
    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Take the single in-flight slot; fails once the client is closed
    async fn enter(&self) -> Result<MutexGuard<'_, Inner>> {
        let shutting_down = *self.shutdown.borrow();
        if shutting_down {
            return Err(Error::ClosedClient);
        }
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::ClosedClient);
        }
        Ok(inner)
    }

    /// Run one backend call under the per-call timeout, aborting on close
    async fn call<T, F>(&self, op: &'static str, path: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let closed = until_set(self.shutdown.subscribe());
        let res = tokio::select! {
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(res) => res.map_err(|e| e.context(op, path)),
                Err(_) => Err(Error::Timeout(format!("{} {}", op, path))),
            },
            _ = closed => Err(Error::ClosedClient),
        };
        match &res {
            Ok(_) => debug!(op, path, "coordination call ok"),
            Err(e) => debug!(op, path, error = %e, "coordination call failed"),
        }
        res
    }

    /// Next free sequence number under `prefix`, seeding the counter on first use
    async fn next_seq(&self, inner: &mut Inner, prefix: &str) -> Result<u64> {
        let last = match inner.last_seq.get(prefix) {
            Some(last) => *last,
            None => {
                let last_key = self
                    .call("last-key", prefix, self.kv.last_key_with_prefix(prefix))
                    .await?;
                match last_key {
                    Some(key) => {
                        let child = key[prefix.len()..].split('/').next().unwrap_or_default();
                        child.parse::<u64>().map_err(|e| Error::Corrupted {
                            path: key.clone(),
                            message: format!("sequential child {:?}: {}", child, e),
                        })?
                    }
                    None => 0,
                }
            }
        };
        let seq = last + 1;
        inner.last_seq.insert(prefix.to_string(), seq);
        if seq > SEQ_MAX {
            warn!(
                dir = prefix,
                seq, "sequence counter exceeds {} digits; ordering degrades", SEQ_WIDTH
            );
        }
        Ok(seq)
    }

    async fn append(
        &self,
        inner: &mut Inner,
        dir: &str,
        data: &[u8],
        lease: Option<LeaseId>,
    ) -> Result<String> {
        let prefix = dir_prefix(dir);
        let seq = self.next_seq(inner, &prefix).await?;
        let key = seq_key(&prefix, seq);
        let created = self
            .call(
                "create-in-order",
                &key,
                self.kv.put_if_absent(&key, data.to_vec(), lease),
            )
            .await?;
        if !created {
            // another writer took this number; it stays consumed
            return Err(Error::AlreadyExists(key));
        }
        Ok(key)
    }

    /// Current session lease, granting a fresh one if none is alive
    async fn session(&self, inner: &mut Inner) -> Result<(LeaseId, Arc<watch::Sender<bool>>)> {
        if let Some(session) = &inner.session {
            let alive = !*session.lost.borrow();
            if alive {
                return Ok((session.lease, session.lost.clone()));
            }
        }

        let lease = self
            .call(
                "grant-lease",
                "",
                self.kv.grant_lease(self.session_ttl),
            )
            .await?;
        let (lost, _) = watch::channel(false);
        let lost = Arc::new(lost);
        self.spawn_keepalive(lease, lost.clone());
        info!(lease, ttl = self.session_ttl, "session started");

        inner.session = Some(Session {
            lease,
            lost: lost.clone(),
        });
        Ok((lease, lost))
    }

    fn spawn_keepalive(&self, lease: LeaseId, lost: Arc<watch::Sender<bool>>) {
        let kv = self.kv.clone();
        let shutdown = self.shutdown.subscribe();
        let timeout = self.timeout;
        let period = Duration::from_secs((self.session_ttl / 3).max(1) as u64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                // close() revokes the lease and signals the loss itself
                tokio::select! {
                    _ = until_set(shutdown.clone()) => return,
                    _ = ticker.tick() => {}
                }
                let res = tokio::select! {
                    _ = until_set(shutdown.clone()) => return,
                    res = tokio::time::timeout(timeout, kv.keep_alive(lease)) => res,
                };
                let err = match res {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e,
                    Err(_) => Error::Timeout(format!("keep-alive lease {lease:x}")),
                };
                warn!(lease, error = %err, "session lost");
                lost.send_replace(true);
                return;
            }
        });
    }
}

async fn first_created(mut stream: KvWatchStream, prefix: String) -> Event {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) if event.is_create() => {
                debug!(dir = %prefix, key = %event.key, "watch-in-order fired");
                return Event::ChildrenChanged;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(dir = %prefix, error = %e, "watch-in-order stream failed");
                return Event::NotWatching;
            }
        }
    }
    debug!(dir = %prefix, "watch-in-order stream ended");
    Event::NotWatching
}

#[async_trait]
impl<K: FlatKv> CoordClient for OrderedKeyClient<K> {
    async fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        let _inner = self.enter().await?;
        let created = self
            .call("create", path, self.kv.put_if_absent(path, data.to_vec(), None))
            .await?;
        if created {
            Ok(())
        } else {
            Err(Error::AlreadyExists(path.to_string()))
        }
    }

    async fn update(&self, path: &str, data: &[u8]) -> Result<()> {
        let _inner = self.enter().await?;
        self.call("update", path, self.kv.put(path, data.to_vec(), None))
            .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let _inner = self.enter().await?;
        let deleted = self.call("delete", path, self.kv.delete(path)).await?;
        debug!(path, deleted, "delete");
        Ok(())
    }

    async fn read(&self, path: &str, must: bool) -> Result<Option<Vec<u8>>> {
        let _inner = self.enter().await?;
        match self.call("read", path, self.kv.get(path)).await? {
            Some(data) => Ok(Some(data)),
            None if must => Err(Error::NotFound(path.to_string())),
            None => Ok(None),
        }
    }

    async fn list(&self, path: &str, must: bool) -> Result<Vec<String>> {
        let _inner = self.enter().await?;
        let prefix = dir_prefix(path);
        let (keys, _) = self
            .call("list", &prefix, self.kv.keys_with_prefix(&prefix))
            .await?;
        if keys.is_empty() && must {
            return Err(Error::NotADirectory(path.to_string()));
        }
        Ok(keys)
    }

    async fn create_in_order(&self, dir: &str, data: &[u8]) -> Result<String> {
        let mut inner = self.enter().await?;
        self.append(&mut inner, dir, data, None).await
    }

    async fn watch_in_order(&self, dir: &str) -> Result<(OrderedWatch, Vec<String>)> {
        let _inner = self.enter().await?;
        let prefix = dir_prefix(dir);
        let (keys, revision) = self
            .call("watch-in-order", &prefix, self.kv.keys_with_prefix(&prefix))
            .await?;
        // resume right after the snapshot so nothing created in between is missed
        let stream = self
            .call(
                "watch-in-order",
                &prefix,
                self.kv.watch_prefix(&prefix, revision + 1),
            )
            .await?;

        let (mut tx, rx) = oneshot::channel();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let event = tokio::select! {
                event = first_created(stream, prefix) => event,
                _ = until_set(shutdown) => Event::NotWatching,
                _ = tx.closed() => return,
            };
            let _ = tx.send(event);
        });
        Ok((OrderedWatch::new(rx), keys))
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<SessionSignal> {
        let mut inner = self.enter().await?;
        let (lease, lost) = self.session(&mut inner).await?;
        let created = self
            .call(
                "create-ephemeral",
                path,
                self.kv.put_if_absent(path, data.to_vec(), Some(lease)),
            )
            .await?;
        if !created {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        Ok(SessionSignal::new(lost.subscribe()))
    }

    async fn create_ephemeral_in_order(
        &self,
        dir: &str,
        data: &[u8],
    ) -> Result<(SessionSignal, String)> {
        let mut inner = self.enter().await?;
        let (lease, lost) = self.session(&mut inner).await?;
        let key = self.append(&mut inner, dir, data, Some(lease)).await?;
        Ok((SessionSignal::new(lost.subscribe()), key))
    }

    async fn close(&self) -> Result<()> {
        // abort in-flight calls and armed watches before queueing for the lock
        self.shutdown.send_replace(true);
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        if let Some(session) = inner.session.take() {
            match tokio::time::timeout(self.timeout, self.kv.revoke_lease(session.lease)).await {
                Ok(Ok(())) => debug!(lease = session.lease, "session revoked"),
                Ok(Err(e)) => warn!(error = %e, "revoking session failed"),
                Err(_) => warn!("revoking session timed out"),
            }
            session.lost.send_replace(true);
        }
        info!("coordination client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MemoryClient {
        OrderedKeyClient::new(Arc::new(MemKv::new()), Duration::from_secs(1))
    }

    #[test]
    fn test_seq_key_is_padded() {
        assert_eq!(seq_key("/p/actions/", 7), "/p/actions/000007");
        assert_eq!(seq_key("/p/actions/", 999_999), "/p/actions/999999");
        assert_eq!(dir_prefix("/p/actions"), "/p/actions/");
        assert_eq!(dir_prefix("/p/actions/"), "/p/actions/");
    }

    #[tokio::test]
    async fn test_counter_is_per_directory() {
        let c = client();
        assert_eq!(c.create_in_order("/a", b"").await.unwrap(), "/a/000001");
        assert_eq!(c.create_in_order("/b", b"").await.unwrap(), "/b/000001");
        assert_eq!(c.create_in_order("/a/", b"").await.unwrap(), "/a/000002");
    }

    #[tokio::test]
    async fn test_counter_seeds_from_existing_children() {
        let kv = Arc::new(MemKv::new());
        kv.put("/a/000041", vec![], None).await.unwrap();
        let c = OrderedKeyClient::new(kv, Duration::from_secs(1));
        assert_eq!(c.create_in_order("/a", b"").await.unwrap(), "/a/000042");
    }

    #[tokio::test]
    async fn test_non_numeric_child_fails() {
        let kv = Arc::new(MemKv::new());
        kv.put("/a/zzz", vec![], None).await.unwrap();
        let c = OrderedKeyClient::new(kv, Duration::from_secs(1));
        let err = c.create_in_order("/a", b"").await.unwrap_err();
        assert!(matches!(err, Error::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_second_writer_collides_instead_of_overwriting() {
        let kv = Arc::new(MemKv::new());
        let first = OrderedKeyClient::new(kv.clone(), Duration::from_secs(1));
        let second = OrderedKeyClient::new(kv.clone(), Duration::from_secs(1));

        assert_eq!(first.create_in_order("/a", b"x").await.unwrap(), "/a/000001");
        assert_eq!(second.create_in_order("/a", b"y").await.unwrap(), "/a/000002");

        // first still believes 000001 is the last child
        let err = first.create_in_order("/a", b"z").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(kv.get("/a/000002").await.unwrap(), Some(b"y".to_vec()));

        // the lost number is skipped, never reused
        assert_eq!(first.create_in_order("/a", b"z").await.unwrap(), "/a/000003");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let c = client();
        c.close().await.unwrap();
        c.close().await.unwrap();
        assert!(matches!(c.read("/x", false).await, Err(Error::ClosedClient)));
    }
}
