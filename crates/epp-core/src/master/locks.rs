//! Per-domain serialization of façade entry points

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per domain name
///
/// Names are compared case-insensitively. Entries nobody holds are pruned
/// on the next acquisition.
#[derive(Debug, Default, Clone)]
pub struct DomainLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other conversation works on `name`
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(name.to_lowercase()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of names currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
