//! # shardmeta
//!
//! Metadata coordination for a sharded key-value proxy cluster:
//! - slot ownership and the slot migration state machine
//! - server groups, servers and registered proxies
//! - an append-only action log announcing every topology change
//! - a product lock electing the single topology manager
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Store (one product namespace)            │
//! │  slots · groups · proxies · lock · log   │
//! └───────────────┬──────────────────────────┘
//!                 │ CoordClient
//! ┌───────────────▼──────────────────────────┐
//! │ OrderedKeyClient                         │
//! │  sequential keys · one-shot watches      │
//! │  session-bound (ephemeral) keys          │
//! └───────────────┬──────────────────────────┘
//!                 │ FlatKv
//!        ┌────────┴─────────┐
//!   ┌────▼─────┐      ┌─────▼─────┐
//!   │ etcd v3  │      │ in-memory │
//!   └──────────┘      └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Create 1024 offline slots
//! shardmeta --product demo init-slots 1024
//!
//! # Hand slots 0..=511 to group 1
//! shardmeta --product demo group-add 1
//! shardmeta --product demo slot-range 0 511 1 online
//!
//! # Follow the action log
//! shardmeta --product demo watch
//! ```

pub mod client;
pub mod common;
pub mod models;

// Re-export commonly used types
pub use client::{new_client, CoordClient, Event, OrderedWatch, SessionSignal};
pub use common::{Config, Error, Result};
pub use models::{Action, ActionType, Slot, SlotStatus, Store};
