//! In-process key space
//!
//! Behaves like a single-member etcd: one global revision, sorted keys, per-key
//! versions, prefix watches that replay retained history, and leases. Used for
//! local development and tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::flat::{FlatKv, KvEvent, KvEventKind, KvWatchStream, LeaseId, Revision};
use crate::common::{Error, Result};

/// Events retained for watches that resume from an older revision
const HISTORY_LIMIT: usize = 4096;

struct Entry {
    value: Vec<u8>,
    version: i64,
    lease: Option<LeaseId>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<Result<KvEvent>>,
}

#[derive(Default)]
struct State {
    revision: Revision,
    /// Newest revision no longer in `history`
    compacted: Revision,
    entries: BTreeMap<String, Entry>,
    history: VecDeque<KvEvent>,
    watchers: Vec<Watcher>,
    leases: HashMap<LeaseId, i64>,
    next_lease: LeaseId,
}

impl State {
    fn record(&mut self, event: KvEvent) {
        self.watchers.retain(|w| {
            !event.key.starts_with(&w.prefix) || w.tx.send(Ok(event.clone())).is_ok()
        });
        self.history.push_back(event);
        while self.history.len() > HISTORY_LIMIT {
            if let Some(old) = self.history.pop_front() {
                self.compacted = old.revision;
            }
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        if let Some(id) = lease {
            if !self.leases.contains_key(&id) {
                return Err(Error::Transport(format!("lease {id:x} not found")));
            }
        }
        self.revision += 1;
        let version = match self.entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.version += 1;
                entry.lease = lease;
                entry.version
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    Entry {
                        value,
                        version: 1,
                        lease,
                    },
                );
                1
            }
        };
        let revision = self.revision;
        self.record(KvEvent {
            kind: KvEventKind::Put,
            key: key.to_string(),
            version,
            revision,
        });
        Ok(())
    }

    fn delete(&mut self, key: &str) -> u64 {
        if self.entries.remove(key).is_none() {
            return 0;
        }
        self.revision += 1;
        let revision = self.revision;
        self.record(KvEvent {
            kind: KvEventKind::Delete,
            key: key.to_string(),
            version: 0,
            revision,
        });
        1
    }
}

/// Shared in-memory key space; clone the `Arc` to give several clients the same view
#[derive(Default)]
pub struct MemKv {
    state: Mutex<State>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop a lease as if its TTL ran out
    pub fn expire_lease(&self, lease: LeaseId) {
        let mut state = self.lock();
        Self::drop_lease(&mut state, lease);
    }

    /// Leases currently alive
    pub fn live_leases(&self) -> Vec<LeaseId> {
        let mut leases: Vec<_> = self.lock().leases.keys().copied().collect();
        leases.sort_unstable();
        leases
    }

    fn drop_lease(state: &mut State, lease: LeaseId) -> bool {
        if state.leases.remove(&lease).is_none() {
            return false;
        }
        let owned: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.lease == Some(lease))
            .map(|(k, _)| k.clone())
            .collect();
        for key in owned {
            state.delete(&key);
        }
        true
    }
}

#[async_trait]
impl FlatKv for MemKv {
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        self.lock().put(key, value, lease)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<bool> {
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            return Ok(false);
        }
        state.put(key, value, lease)?;
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock().entries.get(key).map(|e| e.value.clone()))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Revision)> {
        let state = self.lock();
        let keys = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok((keys, state.revision))
    }

    async fn last_key_with_prefix(&self, prefix: &str) -> Result<Option<String>> {
        let state = self.lock();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .last()
            .map(|(k, _)| k.clone()))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        Ok(self.lock().delete(key))
    }

    async fn watch_prefix(&self, prefix: &str, start_revision: Revision) -> Result<KvWatchStream> {
        let mut state = self.lock();
        if start_revision > 0 && start_revision <= state.compacted {
            return Err(Error::Transport(format!(
                "required revision {start_revision} has been compacted"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if start_revision > 0 {
            for event in state
                .history
                .iter()
                .filter(|e| e.revision >= start_revision && e.key.starts_with(prefix))
            {
                // receiver is still in scope; send cannot fail here
                let _ = tx.send(Ok(event.clone()));
            }
        }
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        let mut state = self.lock();
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(id, ttl_secs);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        if self.lock().leases.contains_key(&lease) {
            Ok(())
        } else {
            Err(Error::Transport(format!("lease {lease:x} expired")))
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.lock();
        if Self::drop_lease(&mut state, lease) {
            Ok(())
        } else {
            Err(Error::Transport(format!("lease {lease:x} not found")))
        }
    }
}
