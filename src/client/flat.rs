//! Flat key space primitives
//!
//! The coordination backends this crate talks to expose a flat, sorted key
//! space: prefix range reads, a global revision counter, prefix watches that
//! can resume from a revision, and leases that own keys. Directory semantics,
//! sequential children and one-shot watches are emulated on top of this by
//! [`OrderedKeyClient`](super::ordered::OrderedKeyClient).

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::common::Result;

/// Store-wide modification counter
pub type Revision = i64;

/// Lease handle; keys attached to a lease vanish when it is revoked or expires
pub type LeaseId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvEventKind {
    Put,
    Delete,
}

/// One change observed by a prefix watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    pub kind: KvEventKind,
    pub key: String,
    /// Per-key version after the change; 1 on creation, 0 on deletion
    pub version: i64,
    pub revision: Revision,
}

impl KvEvent {
    /// Was this key created (not updated, not deleted) by this event?
    pub fn is_create(&self) -> bool {
        self.kind == KvEventKind::Put && self.version == 1
    }
}

pub type KvWatchStream = BoxStream<'static, Result<KvEvent>>;

#[async_trait]
pub trait FlatKv: Send + Sync + 'static {
    /// Unconditional upsert
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()>;

    /// Write only if the key has never been created (or was deleted).
    /// Returns false when the key already exists.
    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, ascending, with the revision they were read at
    async fn keys_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Revision)>;

    /// Lexicographically greatest key starting with `prefix`
    async fn last_key_with_prefix(&self, prefix: &str) -> Result<Option<String>>;

    /// Remove a key; returns how many keys were removed (0 if absent)
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Changes under `prefix` from `start_revision` on (0 means "from now")
    async fn watch_prefix(&self, prefix: &str, start_revision: Revision) -> Result<KvWatchStream>;

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId>;

    /// Refresh a lease once; fails if the lease is gone
    async fn keep_alive(&self, lease: LeaseId) -> Result<()>;

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;
}
