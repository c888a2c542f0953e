//! etcd v3 key space
//!
//! Thin mapping of [`FlatKv`] onto etcd KV, Txn, Watch and Lease RPCs.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, EventType, GetOptions, PutOptions, SortOrder,
    SortTarget, Txn, TxnOp, WatchOptions,
};
use std::time::Duration;
use tracing::debug;

use super::flat::{FlatKv, KvEvent, KvEventKind, KvWatchStream, LeaseId, Revision};
use crate::common::{Error, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// etcd connection shared by every call of one client instance
#[derive(Clone)]
pub struct EtcdKv {
    client: Client,
}

impl EtcdKv {
    /// Connect to an etcd cluster.
    ///
    /// `endpoints` must already carry their scheme.
    pub async fn connect(endpoints: Vec<String>, auth: Option<(String, String)>) -> Result<Self> {
        let mut opts = ConnectOptions::new().with_connect_timeout(DIAL_TIMEOUT);
        if let Some((user, password)) = auth {
            opts = opts.with_user(user, password);
        }
        debug!(?endpoints, "connecting to etcd");
        let client = Client::connect(endpoints, Some(opts)).await?;
        Ok(Self { client })
    }

    fn put_options(lease: Option<LeaseId>) -> Option<PutOptions> {
        lease.map(|id| PutOptions::new().with_lease(id))
    }
}

#[async_trait]
impl FlatKv for EtcdKv {
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        self.client
            .clone()
            .put(key, value, Self::put_options(lease))
            .await?;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<bool> {
        let txn = Txn::new()
            .when([Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(key, value, Self::put_options(lease))]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self.client.clone().get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<(Vec<String>, Revision)> {
        let opts = GetOptions::new().with_prefix().with_keys_only();
        let resp = self.client.clone().get(prefix, Some(opts)).await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        let keys = resp
            .kvs()
            .iter()
            .map(|kv| String::from_utf8_lossy(kv.key()).into_owned())
            .collect();
        Ok((keys, revision))
    }

    async fn last_key_with_prefix(&self, prefix: &str) -> Result<Option<String>> {
        let opts = GetOptions::new()
            .with_prefix()
            .with_keys_only()
            .with_sort(SortTarget::Key, SortOrder::Descend)
            .with_limit(1);
        let resp = self.client.clone().get(prefix, Some(opts)).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| String::from_utf8_lossy(kv.key()).into_owned()))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let resp = self.client.clone().delete(key, None).await?;
        Ok(resp.deleted().max(0) as u64)
    }

    async fn watch_prefix(&self, prefix: &str, start_revision: Revision) -> Result<KvWatchStream> {
        let mut opts = WatchOptions::new().with_prefix();
        if start_revision > 0 {
            opts = opts.with_start_revision(start_revision);
        }
        let (watcher, mut stream) = self.client.clone().watch(prefix, Some(opts)).await?;

        let events = async_stream::stream! {
            // the watch is cancelled once its handle is dropped
            let _watcher = watcher;
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            yield Err(Error::Transport(format!(
                                "watch canceled: {}",
                                resp.cancel_reason()
                            )));
                            break;
                        }
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let kind = match event.event_type() {
                                EventType::Put => KvEventKind::Put,
                                EventType::Delete => KvEventKind::Delete,
                            };
                            yield Ok(KvEvent {
                                kind,
                                key: String::from_utf8_lossy(kv.key()).into_owned(),
                                version: kv.version(),
                                revision: kv.mod_revision(),
                            });
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::from(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(events))
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        let resp = self.client.clone().lease_grant(ttl_secs, None).await?;
        Ok(resp.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<()> {
        let (mut keeper, mut stream) = self.client.clone().lease_keep_alive(lease).await?;
        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(()),
            _ => Err(Error::Transport(format!("lease {lease:x} expired"))),
        }
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        self.client.clone().lease_revoke(lease).await?;
        Ok(())
    }
}
