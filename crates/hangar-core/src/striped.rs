//! Registry sharded over a fixed pool of read/write locks.
//!
//! Each stripe owns the entries whose key hashes onto it, so per-key
//! exclusivity needs no separate map lock. Guards release on drop, including
//! during unwinding; a stripe poisoned by a panic surfaces as
//! [`CoreError::LockPoisoned`].

use crate::CoreError;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

pub struct StripedLocks<K, V> {
    stripes: Vec<RwLock<HashMap<K, V>>>,
}

impl<K: Hash + Eq, V> StripedLocks<K, V> {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1))
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub fn stripe_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub fn read(&self, key: &K) -> Result<RwLockReadGuard<'_, HashMap<K, V>>, CoreError> {
        self.stripes[self.stripe_index(key)]
            .read()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    pub fn write(&self, key: &K) -> Result<RwLockWriteGuard<'_, HashMap<K, V>>, CoreError> {
        self.stripes[self.stripe_index(key)]
            .write()
            .map_err(|e| CoreError::LockPoisoned(e.to_string()))
    }

    /// Non-blocking write acquisition. `Ok(None)` when the stripe is held.
    pub fn try_write(
        &self,
        key: &K,
    ) -> Result<Option<RwLockWriteGuard<'_, HashMap<K, V>>>, CoreError> {
        match self.stripes[self.stripe_index(key)].try_write() {
            Ok(guard) => Ok(Some(guard)),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Poisoned(e)) => Err(CoreError::LockPoisoned(e.to_string())),
        }
    }

    /// Keys of all stripes, acquiring each stripe's read lock in turn.
    pub fn keys(&self) -> Result<Vec<K>, CoreError>
    where
        K: Clone,
    {
        let mut keys = Vec::new();
        for stripe in &self.stripes {
            let guard = stripe
                .read()
                .map_err(|e| CoreError::LockPoisoned(e.to_string()))?;
            keys.extend(guard.keys().cloned());
        }
        Ok(keys)
    }
}
