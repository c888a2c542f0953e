//! Cluster metadata model
//!
//! Entities are flat JSON documents stored one per key under the product
//! namespace described in [`paths`]. [`Store`] is the only writer.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::{Error, Result};

pub mod action;
pub mod group;
pub mod lock;
pub mod paths;
pub mod proxy;
pub mod slot;
pub mod store;

pub use action::{extract_seq_list, Action, ActionFeed, ActionGcPolicy, ActionType};
pub use group::{Server, ServerGroup, ServerType};
pub use lock::{load_topom, Lock, Topom};
pub use paths::{Paths, BASE_DIR};
pub use proxy::{ProxyInfo, ProxyState};
pub use slot::{Slot, SlotMigrateStatus, SlotMultiSetParam, SlotState, SlotStatus};
pub use store::Store;

pub type SlotId = u32;
pub type GroupId = i64;

/// Group id of a slot that no group owns
pub const INVALID_ID: GroupId = -1;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a stored document; garbage is reported with the path it came from
pub(crate) fn decode<T: DeserializeOwned>(path: &str, data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Corrupted {
        path: path.to_string(),
        message: e.to_string(),
    })
}
