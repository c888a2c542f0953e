//! Server groups and their member servers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::action::ActionType;
use super::store::Store;
use super::{GroupId, INVALID_ID};
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Leader,
    Follower,
    Candidate,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub id: i64,
    pub group_id: GroupId,
    pub addr: String,
    #[serde(rename = "type")]
    pub server_type: ServerType,
}

impl Server {
    /// A server not yet placed in any group
    pub fn new(server_type: ServerType, addr: &str) -> Self {
        Self {
            id: 0,
            group_id: INVALID_ID,
            addr: addr.to_string(),
            server_type,
        }
    }
}

/// One replica set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub id: GroupId,
    pub product_name: String,
    #[serde(default)]
    pub servers: Vec<Server>,
}

impl ServerGroup {
    pub fn new(product: &str, id: GroupId) -> Self {
        Self {
            id,
            product_name: product.to_string(),
            servers: Vec::new(),
        }
    }

    pub fn server_exists(&self, addr: &str) -> bool {
        self.servers.iter().any(|s| s.addr == addr)
    }
}

impl Store {
    // === Groups ===

    pub async fn list_groups(&self) -> Result<BTreeMap<GroupId, ServerGroup>> {
        let groups: Vec<ServerGroup> = self.read_children(&self.paths().group_dir()).await?;
        Ok(groups.into_iter().map(|g| (g.id, g)).collect())
    }

    pub async fn load_group(&self, id: GroupId, must: bool) -> Result<Option<ServerGroup>> {
        self.read_json(&self.paths().group(id), must).await
    }

    pub async fn group_exists(&self, id: GroupId) -> Result<bool> {
        self.exists(&self.paths().group(id)).await
    }

    /// Persist a group and announce it with `group_changed`
    pub async fn update_group(&self, group: &ServerGroup) -> Result<()> {
        self.update_json(&self.paths().group(group.id), group)
            .await?;
        info!(group = group.id, servers = group.servers.len(), "group updated");
        self.new_action(ActionType::ServerGroupChanged, group, "", true)
            .await
    }

    /// Remove a group and announce it with `group_remove`
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        let group = self
            .load_group(id, false)
            .await?
            .unwrap_or_else(|| ServerGroup::new(self.product(), id));
        self.client().delete(&self.paths().group(id)).await?;
        info!(group = id, "group removed");
        self.new_action(ActionType::ServerGroupRemove, &group, "", true)
            .await
    }

    // === Servers ===

    pub async fn get_server(&self, addr: &str, must: bool) -> Result<Option<Server>> {
        self.read_json(&self.paths().server(addr), must).await
    }

    pub async fn get_server_by_path(&self, path: &str, must: bool) -> Result<Option<Server>> {
        self.read_json(path, must).await
    }

    pub async fn update_server(&self, server: &Server) -> Result<()> {
        self.update_json(&self.paths().server(&server.addr), server)
            .await
    }

    pub async fn delete_server(&self, addr: &str) -> Result<()> {
        self.client().delete(&self.paths().server(addr)).await
    }

    /// Members of `group`, each re-read from its own server key
    pub async fn get_servers(&self, group: &ServerGroup) -> Result<Vec<Server>> {
        let mut servers = Vec::with_capacity(group.servers.len());
        for member in &group.servers {
            if let Some(server) = self.get_server(&member.addr, true).await? {
                servers.push(server);
            }
        }
        Ok(servers)
    }

    /// First member whose stored role is leader
    pub async fn master(&self, group: &ServerGroup) -> Result<Server> {
        self.get_servers(group)
            .await?
            .into_iter()
            .find(|s| s.server_type == ServerType::Leader)
            .ok_or(Error::GroupMasterNotFound(group.id))
    }
}
