//! Error types for shardmeta

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Lookup Errors ===
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Group id {0} does not exist")]
    GroupNotFound(i64),

    #[error("Group master not found in group {0}")]
    GroupMasterNotFound(i64),

    // === Conflict Errors ===
    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    // === Input Errors ===
    #[error("Unknown slot status {0:?}, slot status should be (online, offline, migrate, pre_migrate)")]
    UnknownSlotStatus(String),

    #[error("Invalid status {0:?} for a slot range, should be (online, offline)")]
    InvalidSlotStatus(String),

    #[error("Invalid group id, from {from}, to {to}")]
    InvalidGroupId { from: i64, to: i64 },

    #[error("Invalid slot range {from}..={to}")]
    InvalidSlotRange { from: u32, to: u32 },

    #[error("Invalid coordinator name = {0}")]
    InvalidCoordinator(String),

    #[error("Coordinator {0} is not available in this build")]
    UnsupportedCoordinator(String),

    #[error("Invalid auth, expected user:password")]
    InvalidAuth,

    #[error("Bad product name = {0}")]
    InvalidProductName(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Client Lifecycle ===
    #[error("Use of closed coordination client")]
    ClosedClient,

    // === Backend Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{op} {path} failed: {message}")]
    Backend {
        op: &'static str,
        path: String,
        message: String,
    },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupted node {path}: {message}")]
    Corrupted { path: String, message: String },
}

impl Error {
    /// Is this a missing node or directory?
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::NotADirectory(_) | Error::GroupNotFound(_)
        )
    }

    /// Did a create lose against an existing node?
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }

    /// Is this a retryable error?
    ///
    /// Nothing in this crate retries on its own; callers decide.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::Transport(_) | Error::Backend { .. }
        )
    }

    /// Attach the failing operation and path to a raw transport error.
    pub(crate) fn context(self, op: &'static str, path: &str) -> Self {
        match self {
            Error::Transport(message) => Error::Backend {
                op,
                path: path.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl From<etcd_client::Error> for Error {
    fn from(e: etcd_client::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
