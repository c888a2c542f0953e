//! Proxy registry

use serde::{Deserialize, Serialize};

use super::store::Store;
use crate::common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyState {
    Online,
    Offline,
    MarkOffline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub id: String,
    pub addr: String,
    #[serde(default)]
    pub last_event: String,
    #[serde(default)]
    pub last_event_ts: i64,
    pub state: ProxyState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub debug_var_addr: String,
}

impl ProxyInfo {
    pub fn new(id: &str, addr: &str) -> Self {
        Self {
            id: id.to_string(),
            addr: addr.to_string(),
            last_event: String::new(),
            last_event_ts: 0,
            state: ProxyState::Offline,
            description: String::new(),
            debug_var_addr: String::new(),
        }
    }
}

impl Store {
    pub async fn load_proxy(&self, id: &str) -> Result<Option<ProxyInfo>> {
        self.read_json(&self.paths().proxy(id), true).await
    }

    pub async fn update_proxy(&self, proxy: &ProxyInfo) -> Result<()> {
        self.update_json(&self.paths().proxy(&proxy.id), proxy)
            .await
    }

    pub async fn delete_proxy(&self, id: &str) -> Result<()> {
        self.client().delete(&self.paths().proxy(id)).await
    }

    /// Registered proxies passing `filter`
    pub async fn list_proxies<F>(&self, filter: F) -> Result<Vec<ProxyInfo>>
    where
        F: Fn(&ProxyInfo) -> bool,
    {
        let mut proxies: Vec<ProxyInfo> = self.read_children(&self.paths().proxy_dir()).await?;
        proxies.retain(|p| filter(p));
        Ok(proxies)
    }
}
