use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tracing::warn;

use super::models::{STATION_KEY_PREFIX, Station, StatusUpdate, TARGET_KEY_PREFIX, Target, target_key};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("undecodable record at {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outcome of a status write, distinguishing the timestamp-guard no-ops from
/// an actual mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The result was newer than the stored state and was written.
    Applied,
    /// A result with the same or a newer timestamp is already stored.
    Stale,
    /// The target no longer exists; nothing was written.
    Missing,
}

/// Access contract over the shared key-value store.
///
/// The sentinel enumerates the registry read-only and writes only the status
/// fields; creating and deleting stations or targets belongs to the
/// presentation layer.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Startup connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// All stations, no ordering guarantee.
    async fn list_stations(&self) -> Result<Vec<Station>, StoreError>;

    /// All targets, or only the members of `station_id` when given. An
    /// unknown station id yields an empty vec, not an error.
    async fn list_targets(&self, station_id: Option<&str>) -> Result<Vec<Target>, StoreError>;

    async fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError>;

    /// Reconcile one probe result into the target's status fields under the
    /// timestamp guard. Atomic and idempotent per call.
    async fn update_target_status(
        &self,
        target_id: &str,
        update: &StatusUpdate,
    ) -> Result<UpdateOutcome, StoreError>;
}

/// Redis-backed store client.
///
/// The `ConnectionManager` multiplexes one reconnecting connection and is
/// cheap to clone, so a single `RedisStore` handle is safe to share across
/// probe tasks.
#[derive(Clone)]
pub struct RedisStore {
    con: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let con = ConnectionManager::new(client).await?;
        Ok(Self { con })
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.con.clone();
        let pattern = format!("{prefix}*");
        let mut iter: redis::AsyncIter<'_, String> = con.scan_match(&pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Codec { key: key.to_string(), source })
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Codec { key: key.to_string(), source })
}

#[async_trait]
impl StatusStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.con.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn list_stations(&self) -> Result<Vec<Station>, StoreError> {
        let mut con = self.con.clone();
        let keys = self.scan_keys(STATION_KEY_PREFIX).await?;
        let mut stations = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = con.get(&key).await?;
            let Some(raw) = raw else {
                continue;
            };
            match serde_json::from_str::<Station>(&raw) {
                Ok(mut station) => {
                    station.id = key[STATION_KEY_PREFIX.len()..].to_string();
                    stations.push(station);
                }
                // One bad record must not hide the rest of the registry.
                Err(error) => warn!(key = %key, %error, "skipping undecodable station record"),
            }
        }
        Ok(stations)
    }

    async fn list_targets(&self, station_id: Option<&str>) -> Result<Vec<Target>, StoreError> {
        let mut con = self.con.clone();
        let keys = self.scan_keys(TARGET_KEY_PREFIX).await?;
        let mut targets = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = con.get(&key).await?;
            let Some(raw) = raw else {
                continue;
            };
            match serde_json::from_str::<Target>(&raw) {
                Ok(mut target) => {
                    target.id = key[TARGET_KEY_PREFIX.len()..].to_string();
                    targets.push(target);
                }
                Err(error) => warn!(key = %key, %error, "skipping undecodable target record"),
            }
        }
        if let Some(station) = station_id {
            targets.retain(|t| t.station_id.as_deref() == Some(station));
        }
        Ok(targets)
    }

    async fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        let mut con = self.con.clone();
        let key = target_key(id);
        let raw: Option<String> = con.get(&key).await?;
        match raw {
            Some(raw) => {
                let mut target: Target = decode(&key, &raw)?;
                target.id = id.to_string();
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    async fn update_target_status(
        &self,
        target_id: &str,
        update: &StatusUpdate,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut con = self.con.clone();
        let key = target_key(target_id);
        let raw: Option<String> = con.get(&key).await?;
        let Some(raw) = raw else {
            // Deleted by the presentation layer while the probe was in
            // flight; the result has nowhere to go.
            return Ok(UpdateOutcome::Missing);
        };
        let mut target: Target = decode(&key, &raw)?;
        target.id = target_id.to_string();
        if !target.reconcile(update) {
            return Ok(UpdateOutcome::Stale);
        }
        let json = encode(&key, &target)?;
        let _: () = con.set(&key, json).await?;
        Ok(UpdateOutcome::Applied)
    }
}

/// In-memory store double for tests: same contract, no network, plus an
/// outage toggle for degraded-cycle scenarios.
#[cfg(test)]
pub use memory::MemoryStore;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Inner {
        stations: HashMap<String, Station>,
        targets: HashMap<String, Target>,
    }

    #[derive(Clone, Default)]
    pub struct MemoryStore {
        inner: Arc<Mutex<Inner>>,
        unavailable: Arc<AtomicBool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_station(&self, station: Station) {
            let mut inner = self.inner.lock().unwrap();
            inner.stations.insert(station.id.clone(), station);
        }

        pub fn put_target(&self, target: Target) {
            let mut inner = self.inner.lock().unwrap();
            inner.targets.insert(target.id.clone(), target);
        }

        pub fn remove_target(&self, id: &str) {
            self.inner.lock().unwrap().targets.remove(id);
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<(), StoreError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable(redis::RedisError::from((
                    redis::ErrorKind::IoError,
                    "simulated outage",
                ))));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StatusStore for MemoryStore {
        async fn ping(&self) -> Result<(), StoreError> {
            self.check_available()
        }

        async fn list_stations(&self) -> Result<Vec<Station>, StoreError> {
            self.check_available()?;
            Ok(self.inner.lock().unwrap().stations.values().cloned().collect())
        }

        async fn list_targets(&self, station_id: Option<&str>) -> Result<Vec<Target>, StoreError> {
            self.check_available()?;
            let inner = self.inner.lock().unwrap();
            let mut targets: Vec<Target> = inner.targets.values().cloned().collect();
            if let Some(station) = station_id {
                targets.retain(|t| t.station_id.as_deref() == Some(station));
            }
            Ok(targets)
        }

        async fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
            self.check_available()?;
            Ok(self.inner.lock().unwrap().targets.get(id).cloned())
        }

        async fn update_target_status(
            &self,
            target_id: &str,
            update: &StatusUpdate,
        ) -> Result<UpdateOutcome, StoreError> {
            self.check_available()?;
            let mut inner = self.inner.lock().unwrap();
            match inner.targets.get_mut(target_id) {
                None => Ok(UpdateOutcome::Missing),
                Some(target) => {
                    if target.reconcile(update) {
                        Ok(UpdateOutcome::Applied)
                    } else {
                        Ok(UpdateOutcome::Stale)
                    }
                }
            }
        }
    }
}
