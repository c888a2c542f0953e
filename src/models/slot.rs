//! Slots and their state machine
//!
//! A slot moves `offline -> pre_migrate -> migrate -> online`, but any status
//! may be written at any time; only the set of legal statuses and the action
//! emitted for each write are enforced here.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::action::ActionType;
use super::store::Store;
use super::{GroupId, SlotId, INVALID_ID};
use crate::common::{timestamp_now, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SlotStatus {
    Online,
    Offline,
    Migrate,
    PreMigrate,
    /// Anything else read from the wire; never written back
    Unknown(String),
}

impl SlotStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SlotStatus::Online => "online",
            SlotStatus::Offline => "offline",
            SlotStatus::Migrate => "migrate",
            SlotStatus::PreMigrate => "pre_migrate",
            SlotStatus::Unknown(s) => s,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SlotStatus::Unknown(_))
    }
}

impl From<String> for SlotStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "online" => SlotStatus::Online,
            "offline" => SlotStatus::Offline,
            "migrate" => SlotStatus::Migrate,
            "pre_migrate" => SlotStatus::PreMigrate,
            _ => SlotStatus::Unknown(s),
        }
    }
}

impl From<&str> for SlotStatus {
    fn from(s: &str) -> Self {
        SlotStatus::from(s.to_string())
    }
}

impl From<SlotStatus> for String {
    fn from(status: SlotStatus) -> Self {
        match status {
            SlotStatus::Unknown(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMigrateStatus {
    pub from: GroupId,
    pub to: GroupId,
}

impl Default for SlotMigrateStatus {
    fn default() -> Self {
        Self {
            from: INVALID_ID,
            to: INVALID_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub status: SlotStatus,
    pub migrate_status: SlotMigrateStatus,
    /// Unix seconds of the last bulk or migration write, as decimal text
    #[serde(default)]
    pub last_op_ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub product_name: String,
    pub id: SlotId,
    pub group_id: GroupId,
    pub state: SlotState,
}

impl Slot {
    /// Fresh, unowned, offline slot
    pub fn new(product: &str, id: SlotId) -> Self {
        Self {
            product_name: product.to_string(),
            id,
            group_id: INVALID_ID,
            state: SlotState {
                status: SlotStatus::Offline,
                migrate_status: SlotMigrateStatus::default(),
                last_op_ts: "0".to_string(),
            },
        }
    }

    fn touch(&mut self) {
        self.state.last_op_ts = timestamp_now().to_string();
    }
}

/// Target of a `multi_slot_changed` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMultiSetParam {
    pub from: SlotId,
    pub to: SlotId,
    pub status: SlotStatus,
    pub group_id: GroupId,
}

impl Store {
    // === Slot reads ===

    pub async fn get_slot(&self, id: SlotId, must: bool) -> Result<Option<Slot>> {
        self.read_json(&self.paths().slot(id), must).await
    }

    /// All stored slots, by id
    pub async fn slots(&self) -> Result<Vec<Slot>> {
        let mut slots: Vec<Slot> = self.read_children(&self.paths().slot_dir()).await?;
        slots.sort_by_key(|s| s.id);
        Ok(slots)
    }

    /// Slots currently in `migrate`
    pub async fn get_migrating_slots(&self) -> Result<Vec<Slot>> {
        let mut slots = self.slots().await?;
        slots.retain(|s| s.state.status == SlotStatus::Migrate);
        Ok(slots)
    }

    // === Slot writes ===

    /// Write slots `0..n` as fresh offline slots, one `slot_changed` action each
    pub async fn init_slot_set(&self, n: SlotId) -> Result<()> {
        for id in 0..n {
            self.update_slot(&Slot::new(self.product(), id)).await?;
        }
        info!(product = self.product(), slots = n, "slot set initialized");
        Ok(())
    }

    pub async fn update_slot_without_action(&self, slot: &Slot) -> Result<()> {
        self.update_json(&self.paths().slot(slot.id), slot).await
    }

    /// Persist a slot and announce it: `slot_migrate` when migrating,
    /// `slot_changed` otherwise.
    ///
    /// The write and the announcement are two backend calls; a failure
    /// between them leaves the slot written without its action.
    pub async fn update_slot(&self, slot: &Slot) -> Result<()> {
        if !slot.state.status.is_known() {
            return Err(Error::UnknownSlotStatus(slot.state.status.to_string()));
        }
        self.update_slot_without_action(slot).await?;
        let kind = if slot.state.status == SlotStatus::Migrate {
            ActionType::SlotMigrate
        } else {
            ActionType::SlotChanged
        };
        self.new_action(kind, slot, "", true).await
    }

    pub async fn delete_slot(&self, id: SlotId) -> Result<()> {
        self.client().delete(&self.paths().slot(id)).await
    }

    /// Start moving `slot` from group `from` to group `to`.
    ///
    /// Announces `slot_premigrate`, then reassigns the slot to `to` in
    /// `migrate` state before any data has moved. `slot` is updated in place.
    pub async fn set_migrate_status(
        &self,
        slot: &mut Slot,
        from: GroupId,
        to: GroupId,
    ) -> Result<()> {
        if from < 0 || to < 0 {
            return Err(Error::InvalidGroupId { from, to });
        }
        self.new_action(ActionType::SlotPremigrate, &*slot, "", true)
            .await?;

        slot.state.status = SlotStatus::Migrate;
        slot.state.migrate_status = SlotMigrateStatus { from, to };
        slot.group_id = to;
        slot.touch();
        info!(slot = slot.id, from, to, "slot migration started");
        self.update_slot(slot).await
    }

    /// Assign slots `from..=to` to `group` with one `multi_slot_changed` action
    pub async fn set_slot_range(
        &self,
        from: SlotId,
        to: SlotId,
        group: GroupId,
        status: SlotStatus,
    ) -> Result<()> {
        if status != SlotStatus::Online && status != SlotStatus::Offline {
            return Err(Error::InvalidSlotStatus(status.to_string()));
        }
        if from > to {
            return Err(Error::InvalidSlotRange { from, to });
        }
        if !self.group_exists(group).await? {
            return Err(Error::GroupNotFound(group));
        }

        for id in from..=to {
            let mut slot = match self.get_slot(id, false).await? {
                Some(slot) => slot,
                None => Slot::new(self.product(), id),
            };
            slot.group_id = group;
            slot.state.status = status.clone();
            slot.touch();
            self.update_slot_without_action(&slot).await?;
        }

        let param = SlotMultiSetParam {
            from,
            to,
            status,
            group_id: group,
        };
        self.new_action(ActionType::MultiSlotChanged, &param, "", true)
            .await?;
        info!(from, to, group, status = %param.status, "slot range assigned");
        Ok(())
    }
}
