use crate::errors::ServiceError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one balance row. Ordering is (warehouse_id, product_id), which
/// is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
}

impl BalanceKey {
    pub fn new(warehouse_id: Uuid, product_id: Uuid) -> Self {
        Self {
            warehouse_id,
            product_id,
        }
    }
}

impl fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.warehouse_id, self.product_id)
    }
}

type LockTable = DashMap<BalanceKey, Arc<Mutex<()>>>;

/// Per-balance async mutexes serializing read-check-write sequences on the
/// same (warehouse, product) pair within this process.
#[derive(Clone)]
pub struct BalanceLocks {
    table: Arc<LockTable>,
    timeout: Duration,
}

impl BalanceLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Acquires every key in sorted order under one bounded wait. Duplicate
    /// keys are locked once.
    pub async fn acquire<I>(&self, keys: I) -> Result<BalanceGuard, ServiceError>
    where
        I: IntoIterator<Item = BalanceKey>,
    {
        let ordered: BTreeSet<BalanceKey> = keys.into_iter().collect();
        let count = ordered.len();
        let table = self.table.clone();

        let acquisition = async move {
            let mut guard = BalanceGuard {
                table: table.clone(),
                held: Vec::with_capacity(ordered.len()),
            };
            for key in ordered {
                let mutex = table.entry(key).or_default().value().clone();
                let held = mutex.lock_owned().await;
                guard.held.push((key, held));
            }
            guard
        };

        match tokio::time::timeout(self.timeout, acquisition).await {
            Ok(guard) => {
                debug!(keys = count, "Acquired balance locks");
                Ok(guard)
            }
            Err(_) => {
                warn!(
                    keys = count,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Timed out waiting for balance locks"
                );
                Err(ServiceError::ConcurrencyConflict(
                    "timed out waiting for a stock balance lock, retry the operation".to_string(),
                ))
            }
        }
    }

    /// Number of keys currently tracked. Idle keys are evicted on release.
    pub fn tracked(&self) -> usize {
        self.table.len()
    }
}

/// Releases its locks on drop.
#[derive(Debug)]
pub struct BalanceGuard {
    table: Arc<LockTable>,
    held: Vec<(BalanceKey, OwnedMutexGuard<()>)>,
}

impl BalanceGuard {
    pub fn keys(&self) -> impl Iterator<Item = &BalanceKey> {
        self.held.iter().map(|(key, _)| key)
    }
}

impl Drop for BalanceGuard {
    fn drop(&mut self) {
        for (key, held) in self.held.drain(..).rev() {
            drop(held);
            self.table
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}
