//! Store facade
//!
//! Binds a coordination client to one product namespace. Entity operations
//! live next to their types (`slot.rs`, `group.rs`, ...); this file keeps
//! construction and the generic node helpers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use super::paths::Paths;
use super::{decode, encode};
use crate::client::CoordClient;
use crate::common::{validate_product, Result};

pub struct Store {
    client: Arc<dyn CoordClient>,
    product: String,
    paths: Paths,
}

impl Store {
    /// Bind `client` to `product` under the default base directory
    pub fn new(client: Arc<dyn CoordClient>, product: &str) -> Result<Self> {
        Self::with_paths(client, product, Paths::new(product))
    }

    /// Bind `client` to `product` under a custom base directory
    pub fn with_base(client: Arc<dyn CoordClient>, base: &str, product: &str) -> Result<Self> {
        Self::with_paths(client, product, Paths::with_base(base, product))
    }

    fn with_paths(client: Arc<dyn CoordClient>, product: &str, paths: Paths) -> Result<Self> {
        validate_product(product)?;
        Ok(Self {
            client,
            product: product.to_string(),
            paths,
        })
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn client(&self) -> &Arc<dyn CoordClient> {
        &self.client
    }

    /// Close the underlying client
    pub async fn close(&self) -> Result<()> {
        self.client.close().await
    }

    pub async fn delete_path(&self, path: &str) -> Result<()> {
        self.client.delete(path).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.client.read(path, false).await?.is_some())
    }

    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        path: &str,
        must: bool,
    ) -> Result<Option<T>> {
        match self.client.read(path, must).await? {
            Some(data) => Ok(Some(decode(path, &data)?)),
            None => Ok(None),
        }
    }

    /// Every document stored directly below `dir`, in key order
    pub(crate) async fn read_children<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for path in self.client.list(dir, false).await? {
            if let Some(value) = self.read_json(&path, true).await? {
                out.push(value);
            }
        }
        Ok(out)
    }

    pub(crate) async fn update_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        self.client.update(path, &encode(value)?).await
    }

    pub(crate) async fn create_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        self.client.create(path, &encode(value)?).await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("product", &self.product)
            .field("root", &self.paths.root())
            .finish()
    }
}
