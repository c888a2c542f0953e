//! Product lock and leader descriptor
//!
//! Both live at the same `pd` key. Creation never overwrites, so whoever
//! creates the key first holds the product until it deletes the key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::paths::Paths;
use super::store::Store;
use super::decode;
use crate::client::CoordClient;
use crate::common::{current_hostname, Result};

/// Identity of a lock holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub hostname: String,
    pub pid: u32,
}

impl Lock {
    /// Lock identity of the current process
    pub fn new() -> Self {
        Self {
            hostname: current_hostname(),
            pid: std::process::id(),
        }
    }

    /// `hostname-pid`
    pub fn name(&self) -> String {
        format!("{}-{}", self.hostname, self.pid)
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

/// Leader descriptor stored while a topology manager holds the product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topom {
    pub token: String,
    pub start_time: DateTime<Utc>,
    pub admin_addr: String,
    pub product_name: String,
    pub pid: u32,
    pub pwd: String,
    pub sys: String,
    pub hostname: String,
}

impl Topom {
    pub fn new(product: &str, admin_addr: &str) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            admin_addr: admin_addr.to_string(),
            product_name: product.to_string(),
            pid: std::process::id(),
            pwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            sys: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            hostname: current_hostname(),
        }
    }
}

/// Read the leader descriptor of a product
pub async fn load_topom(
    client: &dyn CoordClient,
    paths: &Paths,
    must: bool,
) -> Result<Option<Topom>> {
    let path = paths.lock();
    match client.read(&path, must).await? {
        Some(data) => Ok(Some(decode(&path, &data)?)),
        None => Ok(None),
    }
}

impl Store {
    /// Take the product lock for this process; `AlreadyExists` if held
    pub async fn lock(&self) -> Result<()> {
        let lock = Lock::new();
        self.create_json(&self.paths().lock(), &lock).await?;
        info!(holder = %lock.name(), "product lock acquired");
        Ok(())
    }

    /// Drop the product lock; succeeds when nobody holds it
    pub async fn unlock(&self) -> Result<()> {
        self.client().delete(&self.paths().lock()).await?;
        info!("product lock released");
        Ok(())
    }

    /// Take the product lock and publish `topom` as its holder
    pub async fn acquire(&self, topom: &Topom) -> Result<()> {
        self.create_json(&self.paths().lock(), topom).await?;
        info!(token = %topom.token, admin = %topom.admin_addr, "leadership acquired");
        Ok(())
    }

    pub async fn release(&self) -> Result<()> {
        self.client().delete(&self.paths().lock()).await?;
        info!("leadership released");
        Ok(())
    }

    pub async fn load_topom(&self, must: bool) -> Result<Option<Topom>> {
        load_topom(self.client().as_ref(), self.paths(), must).await
    }

    // === Active CLI registry ===

    pub async fn register_active_cli(&self, lock: &Lock) -> Result<()> {
        self.update_json(&self.paths().cli(&lock.name()), lock)
            .await
    }

    pub async fn unregister_active_cli(&self, name: &str) -> Result<()> {
        self.client().delete(&self.paths().cli(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name() {
        let lock = Lock {
            hostname: "node-a".into(),
            pid: 4242,
        };
        assert_eq!(lock.name(), "node-a-4242");
        assert_eq!(
            serde_json::to_string(&lock).unwrap(),
            r#"{"hostname":"node-a","pid":4242}"#
        );
    }

    #[test]
    fn test_topom_identity() {
        let topom = Topom::new("demo", "10.0.0.1:18080");
        assert_eq!(topom.pid, std::process::id());
        assert!(Uuid::parse_str(&topom.token).is_ok());
        let back: Topom =
            serde_json::from_slice(&serde_json::to_vec(&topom).unwrap()).unwrap();
        assert_eq!(back, topom);
    }
}
