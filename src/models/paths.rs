//! Key namespace of one product
//!
//! ```text
//! /<base>/<product>/actions/<seq>
//! /<base>/<product>/pd
//! /<base>/<product>/living-cli-config/<name>
//! /<base>/<product>/proxy/<id>
//! /<base>/<product>/slots/slot-0042
//! /<base>/<product>/group/group-0003
//! /<base>/<product>/server/server-<addr>
//! ```

use super::{GroupId, SlotId};

/// Root of every product namespace
pub const BASE_DIR: &str = "/icefire";

/// Paths of one product; pure string formatting, no I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: String,
}

impl Paths {
    pub fn new(product: &str) -> Self {
        Self::with_base(BASE_DIR, product)
    }

    pub fn with_base(base: &str, product: &str) -> Self {
        Self {
            root: format!("{}/{}", base.trim_end_matches('/'), product),
        }
    }

    /// `/<base>/<product>`
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn action_dir(&self) -> String {
        format!("{}/actions", self.root)
    }

    pub fn action(&self, seq: u64) -> String {
        format!("{}/actions/{:06}", self.root, seq)
    }

    /// Lock / leader descriptor key
    pub fn lock(&self) -> String {
        format!("{}/pd", self.root)
    }

    pub fn cli_dir(&self) -> String {
        format!("{}/living-cli-config", self.root)
    }

    pub fn cli(&self, name: &str) -> String {
        format!("{}/living-cli-config/{}", self.root, name)
    }

    pub fn proxy_dir(&self) -> String {
        format!("{}/proxy", self.root)
    }

    pub fn proxy(&self, id: &str) -> String {
        format!("{}/proxy/{}", self.root, id)
    }

    pub fn slot_dir(&self) -> String {
        format!("{}/slots", self.root)
    }

    pub fn slot(&self, id: SlotId) -> String {
        format!("{}/slots/slot-{:04}", self.root, id)
    }

    pub fn group_dir(&self) -> String {
        format!("{}/group", self.root)
    }

    pub fn group(&self, id: GroupId) -> String {
        format!("{}/group/group-{:04}", self.root, id)
    }

    pub fn server_dir(&self) -> String {
        format!("{}/server", self.root)
    }

    pub fn server(&self, addr: &str) -> String {
        format!("{}/server/server-{}", self.root, addr)
    }
}

/// Sequence number encoded in the last segment of an action path
pub fn seq_of(path: &str) -> Option<u64> {
    path.rsplit('/').next()?.parse().ok()
}
