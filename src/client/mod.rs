//! Coordination client contract
//!
//! Every backend adapter exposes the same ZooKeeper-flavoured surface: plain
//! nodes, sequential children, one-shot child watches and session-bound
//! (ephemeral) nodes. Backends are picked by name through [`new_client`].
//!
//! - `etcd`: etcd v3, sequential children emulated by [`OrderedKeyClient`]
//! - `memory`: the same adapter over an in-process key space
//! - `zk`, `zookeeper`, `etcdv2`: adapters that live outside this crate

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

pub mod etcd;
pub mod flat;
pub mod memory;
pub mod ordered;

pub use etcd::EtcdKv;
pub use flat::{FlatKv, KvEvent, KvEventKind, LeaseId, Revision};
pub use memory::MemKv;
pub use ordered::{EtcdClient, MemoryClient, OrderedKeyClient};

use crate::common::{CoordinatorConfig, Error, Result};

/// Default per-call timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TTL of the session lease behind ephemeral nodes
pub const DEFAULT_SESSION_TTL_SECS: i64 = 10;

/// Signal delivered by an [`OrderedWatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A child was created under the watched directory
    ChildrenChanged,
    /// The watch ended without a change (client closed, stream lost)
    NotWatching,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::ChildrenChanged => write!(f, "EventNodeChildrenChanged"),
            Event::NotWatching => write!(f, "EventNotWatching"),
        }
    }
}

/// One-shot notification armed by [`CoordClient::watch_in_order`].
///
/// Armed until it yields exactly one [`Event`]; consuming it with
/// [`fired`](Self::fired) is the only way out, so it cannot fire twice.
/// Continuous monitoring means: consume, re-list, arm a new watch.
#[derive(Debug)]
pub struct OrderedWatch {
    rx: oneshot::Receiver<Event>,
}

impl OrderedWatch {
    pub(crate) fn new(rx: oneshot::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Wait for the single event
    pub async fn fired(self) -> Event {
        self.rx.await.unwrap_or(Event::NotWatching)
    }

    /// Non-blocking poll; `None` while still armed
    pub fn try_fired(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Event::NotWatching),
        }
    }
}

/// Resolves once the session owning an ephemeral node is gone
#[derive(Debug, Clone)]
pub struct SessionSignal {
    rx: watch::Receiver<bool>,
}

impl SessionSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Wait until the session is lost or its client is closed
    pub async fn lost(self) {
        until_set(self.rx).await
    }

    pub fn is_lost(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

/// Resolve once the flag turns true or its sender is dropped
pub(crate) async fn until_set(mut rx: watch::Receiver<bool>) {
    loop {
        let set = *rx.borrow_and_update();
        if set || rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
pub trait CoordClient: Send + Sync {
    /// Create a node; fails with `AlreadyExists` instead of overwriting
    async fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Upsert a node
    async fn update(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Remove a node. Removing an absent node succeeds: etcd reports zero
    /// deletions rather than an error (ZooKeeper would say `NoNode`).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Read a node; an absent node is `NotFound` when `must`, `None` otherwise
    async fn read(&self, path: &str, must: bool) -> Result<Option<Vec<u8>>>;

    /// Every node below `path`, ascending; empty is `NotADirectory` when `must`
    async fn list(&self, path: &str, must: bool) -> Result<Vec<String>>;

    /// Create a sequential child of `dir`; returns its full path
    async fn create_in_order(&self, dir: &str, data: &[u8]) -> Result<String>;

    /// Current children of `dir` plus a watch armed for the next created child
    async fn watch_in_order(&self, dir: &str) -> Result<(OrderedWatch, Vec<String>)>;

    /// Create a node that disappears with this client's session
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<SessionSignal>;

    /// Sequential variant of [`create_ephemeral`](Self::create_ephemeral)
    async fn create_ephemeral_in_order(
        &self,
        dir: &str,
        data: &[u8],
    ) -> Result<(SessionSignal, String)>;

    /// Release backend resources; later calls fail with `ClosedClient`
    async fn close(&self) -> Result<()>;
}

/// Split `host:port,host:port` into endpoint URLs
pub fn parse_endpoints(addrlist: &str) -> Vec<String> {
    addrlist
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.contains("://") {
                s.to_string()
            } else {
                format!("http://{}", s)
            }
        })
        .collect()
}

/// Parse an optional `user:password`
pub fn parse_auth(auth: &str) -> Result<Option<(String, String)>> {
    if auth.is_empty() {
        return Ok(None);
    }
    match auth.split_once(':') {
        Some((user, password)) if !user.is_empty() => {
            Ok(Some((user.to_string(), password.to_string())))
        }
        _ => Err(Error::InvalidAuth),
    }
}

/// Build a coordination client by backend name
pub async fn new_client(
    coordinator: &str,
    addrlist: &str,
    auth: &str,
    timeout: Duration,
) -> Result<Arc<dyn CoordClient>> {
    build(coordinator, addrlist, auth, timeout, DEFAULT_SESSION_TTL_SECS).await
}

/// Build a coordination client from configuration
pub async fn connect(cfg: &CoordinatorConfig) -> Result<Arc<dyn CoordClient>> {
    build(
        &cfg.name,
        &cfg.addrs,
        &cfg.auth,
        cfg.timeout(),
        cfg.session_ttl_secs,
    )
    .await
}

async fn build(
    coordinator: &str,
    addrlist: &str,
    auth: &str,
    timeout: Duration,
    session_ttl: i64,
) -> Result<Arc<dyn CoordClient>> {
    let timeout = if timeout.is_zero() {
        DEFAULT_TIMEOUT
    } else {
        timeout
    };
    match coordinator {
        "etcd" => {
            let auth = parse_auth(auth)?;
            let kv = EtcdKv::connect(parse_endpoints(addrlist), auth).await?;
            Ok(Arc::new(
                OrderedKeyClient::new(Arc::new(kv), timeout).with_session_ttl(session_ttl),
            ))
        }
        "memory" => Ok(Arc::new(
            OrderedKeyClient::new(Arc::new(MemKv::new()), timeout).with_session_ttl(session_ttl),
        )),
        "zk" | "zookeeper" | "etcdv2" => {
            Err(Error::UnsupportedCoordinator(coordinator.to_string()))
        }
        other => Err(Error::InvalidCoordinator(other.to_string())),
    }
}
