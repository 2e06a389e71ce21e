use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use twi_relay_core::types::{LiveMessageKey, LiveMessageRecord};

type Slot = Arc<AsyncMutex<Option<LiveMessageRecord>>>;

/// Process-lifetime map from webhook target to the live message posted for it.
///
/// Each key owns its own async lock. Callers hold the [`LiveMessageGuard`]
/// across the outbound webhook call, so an online and an offline event for the
/// same target are applied one after the other while different targets never
/// wait on each other.
#[derive(Clone, Default)]
pub struct LiveMessageStore {
    slots: Arc<Mutex<HashMap<LiveMessageKey, Slot>>>,
}

impl LiveMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to the record stored under `key`.
    pub async fn lock(&self, key: &LiveMessageKey) -> LiveMessageGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };
        LiveMessageGuard {
            inner: slot.lock_owned().await,
        }
    }

    /// Returns a copy of the record stored under `key`, if any.
    pub async fn get(&self, key: &LiveMessageKey) -> Option<LiveMessageRecord> {
        self.lock(key).await.current().cloned()
    }

    /// Number of targets that currently have a live message recorded.
    ///
    /// Waits on every slot, so it must not be called while holding a guard.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.values().cloned().collect()
        };
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Exclusive handle on one target's live message record.
pub struct LiveMessageGuard {
    inner: OwnedMutexGuard<Option<LiveMessageRecord>>,
}

impl LiveMessageGuard {
    pub fn current(&self) -> Option<&LiveMessageRecord> {
        self.inner.as_ref()
    }

    /// Stores `record`, returning the one it replaced.
    pub fn replace(&mut self, record: LiveMessageRecord) -> Option<LiveMessageRecord> {
        self.inner.replace(record)
    }

    /// Removes and returns the stored record.
    pub fn take(&mut self) -> Option<LiveMessageRecord> {
        self.inner.take()
    }
}
