//! Action log
//!
//! Every topology change is announced by appending an [`Action`] as a
//! sequential child of the product's `actions` directory. The sequence number
//! is the only ordering; entries are never rewritten, only garbage collected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::paths::seq_of;
use super::store::Store;
use super::{decode, encode};
use crate::client::{Event, OrderedWatch};
use crate::common::{timestamp_now, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "group_changed")]
    ServerGroupChanged,
    #[serde(rename = "group_remove")]
    ServerGroupRemove,
    #[serde(rename = "slot_changed")]
    SlotChanged,
    #[serde(rename = "multi_slot_changed")]
    MultiSlotChanged,
    #[serde(rename = "slot_migrate")]
    SlotMigrate,
    #[serde(rename = "slot_premigrate")]
    SlotPremigrate,
}

/// One entry of the action log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub desc: String,
    /// Payload, shaped according to `kind`
    pub target: serde_json::Value,
    /// Unix seconds, as decimal text
    pub ts: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub receivers: Vec<String>,
}

fn null_as_empty<'de, D>(d: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

impl Action {
    /// Decode the payload into the shape its `kind` implies
    pub fn target_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.target.clone())?)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.ts.parse().ok()
    }
}

/// Which entries [`Store::action_gc`] removes
#[derive(Debug, Clone, PartialEq)]
pub enum ActionGcPolicy {
    /// Keep the newest `n` entries (at least one)
    KeepLast(usize),
    /// Remove entries older than this
    OlderThan(Duration),
}

/// Sequence numbers of action paths, ascending
pub fn extract_seq_list(paths: &[String]) -> Result<Vec<u64>> {
    let mut seqs = paths
        .iter()
        .map(|p| {
            seq_of(p).ok_or_else(|| Error::Corrupted {
                path: p.clone(),
                message: "not a sequential action key".into(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    seqs.sort_unstable();
    Ok(seqs)
}

impl Store {
    // === Append ===

    /// Append a prepared action; returns its path
    pub async fn create_action_in_order(&self, action: &Action) -> Result<String> {
        self.client()
            .create_in_order(&self.paths().action_dir(), &encode(action)?)
            .await
    }

    /// Announce a change.
    ///
    /// `need_confirm` asks for every live receiver to acknowledge; no
    /// acknowledgement is tracked yet, so the call never waits.
    pub async fn new_action<T>(
        &self,
        kind: ActionType,
        target: &T,
        desc: &str,
        need_confirm: bool,
    ) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let action = Action {
            kind,
            desc: desc.to_string(),
            target: serde_json::to_value(target)?,
            ts: timestamp_now().to_string(),
            receivers: Vec::new(),
        };
        let path = self.create_action_in_order(&action).await?;
        debug!(%path, ?kind, need_confirm, "action appended");
        Ok(())
    }

    // === Read ===

    /// Current action paths plus a watch for the next one
    pub async fn watch_actions(&self) -> Result<(OrderedWatch, Vec<String>)> {
        self.client()
            .watch_in_order(&self.paths().action_dir())
            .await
    }

    /// Every recorded sequence number, ascending; `NotADirectory` if the log is empty
    pub async fn get_action_seq_list(&self) -> Result<Vec<u64>> {
        let paths = self.client().list(&self.paths().action_dir(), true).await?;
        extract_seq_list(&paths)
    }

    pub async fn get_action_with_seq(&self, seq: u64) -> Result<Action> {
        self.get_action_object(seq).await
    }

    /// Decode a whole action document into a caller-chosen shape,
    /// e.g. one with a typed `target`
    pub async fn get_action_object<T: DeserializeOwned>(&self, seq: u64) -> Result<T> {
        let path = self.paths().action(seq);
        let data = self
            .client()
            .read(&path, true)
            .await?
            .ok_or_else(|| Error::NotFound(path.clone()))?;
        decode(&path, &data)
    }

    /// Follow the log, starting after `after` (or from the first entry)
    pub fn action_feed(&self, after: Option<u64>) -> ActionFeed<'_> {
        ActionFeed {
            store: self,
            last: after,
            watch: None,
        }
    }

    // === Garbage collection ===

    /// Remove old entries; returns how many were removed.
    /// An empty or missing log is a no-op.
    ///
    /// The newest entry always survives: it seeds the sequence counter of
    /// the next writer, so numbering never restarts.
    pub async fn action_gc(&self, policy: ActionGcPolicy) -> Result<usize> {
        let dir = self.paths().action_dir();
        let mut paths = self.client().list(&dir, false).await?;
        if paths.is_empty() {
            return Ok(0);
        }
        paths.sort_by_key(|p| seq_of(p));
        paths.pop();

        let doomed: Vec<String> = match policy {
            ActionGcPolicy::KeepLast(keep) => {
                let excess = paths.len().saturating_sub(keep.saturating_sub(1));
                paths.into_iter().take(excess).collect()
            }
            ActionGcPolicy::OlderThan(age) => {
                let cutoff = i64::try_from(age.as_secs())
                    .ok()
                    .and_then(|age| timestamp_now().checked_sub(age));
                let Some(cutoff) = cutoff else {
                    debug!(?age, "age bound out of range, nothing to collect");
                    return Ok(0);
                };
                let mut doomed = Vec::new();
                for path in paths {
                    let Some(data) = self.client().read(&path, false).await? else {
                        continue;
                    };
                    let ts = decode::<Action>(&path, &data)
                        .ok()
                        .and_then(|a| a.timestamp());
                    match ts {
                        Some(ts) if ts < cutoff => doomed.push(path),
                        Some(_) => {}
                        None => warn!(%path, "action without a usable timestamp kept"),
                    }
                }
                doomed
            }
        };

        for path in &doomed {
            self.client().delete(path).await?;
        }
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "action log collected");
        }
        Ok(doomed.len())
    }
}

/// Cursor over the action log.
///
/// Each call to [`next_batch`](Self::next_batch) waits until at least one
/// entry newer than the last one returned exists, then returns all of them in
/// sequence order. Every entry is returned once.
pub struct ActionFeed<'a> {
    store: &'a Store,
    last: Option<u64>,
    watch: Option<OrderedWatch>,
}

impl ActionFeed<'_> {
    /// Sequence number of the last entry handed out
    pub fn position(&self) -> Option<u64> {
        self.last
    }

    pub async fn next_batch(&mut self) -> Result<Vec<(u64, Action)>> {
        let mut interrupted = false;
        loop {
            if let Some(watch) = self.watch.take() {
                match watch.fired().await {
                    Event::ChildrenChanged => interrupted = false,
                    Event::NotWatching if interrupted => {
                        return Err(Error::Transport("action watch keeps ending".into()));
                    }
                    Event::NotWatching => interrupted = true,
                }
            }

            let (watch, paths) = self.store.watch_actions().await?;
            self.watch = Some(watch);

            let last = self.last;
            let fresh: Vec<u64> = extract_seq_list(&paths)?
                .into_iter()
                .filter(|seq| last.map_or(true, |l| *seq > l))
                .collect();

            let mut batch = Vec::with_capacity(fresh.len());
            for seq in fresh {
                match self.store.get_action_with_seq(seq).await {
                    Ok(action) => batch.push((seq, action)),
                    // collected between listing and reading
                    Err(e) if e.is_not_found() => debug!(seq, "action vanished"),
                    Err(e) => return Err(e),
                }
                self.last = Some(seq);
            }
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
    }
}
