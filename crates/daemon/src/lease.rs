//! Per-resource lease state shared by the device and node pools.

use chrono::{DateTime, Utc};
use common::RecordView;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// One tracked resource. The identifier is the key of the owning pool's map.
///
/// `last_transition` moves whenever `free` flips or the record is (re)built.
/// It is not refreshed while the lease is held, so it doubles as the TTL clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub free: bool,
    pub aux_port: u16,
    pub last_transition: DateTime<Utc>,
}

impl Record {
    pub fn free(aux_port: u16) -> Self {
        Self {
            free: true,
            aux_port,
            last_transition: Utc::now(),
        }
    }

    /// A record that never came up. It is busy and already past any TTL, so
    /// the next allocation sweep reclaims it.
    pub fn stalled(aux_port: u16) -> Self {
        Self {
            free: false,
            aux_port,
            last_transition: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn lease(&mut self, now: DateTime<Utc>) {
        self.free = false;
        self.last_transition = now;
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.free = true;
        self.last_transition = now;
    }

    /// Busy for longer than `ttl`.
    pub fn is_overdue(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.free {
            return false;
        }
        now.signed_duration_since(self.last_transition)
            .to_std()
            .is_ok_and(|held| held > ttl)
    }

    pub fn view(&self, id: impl Into<String>) -> RecordView {
        RecordView {
            id: id.into(),
            free: self.free,
            aux_port: self.aux_port,
            last_transition: self.last_transition,
        }
    }
}

/// Record map behind a std lock. Guards are only ever held for a handful of
/// map operations and never across an `.await`.
#[derive(Debug)]
pub struct Records<K> {
    inner: RwLock<BTreeMap<K, Record>>,
}

impl<K: Ord + Clone> Records<K> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<K, Record>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<K, Record>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<Record>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<K> {
        self.read().keys().cloned().collect()
    }

    pub fn insert(&self, key: K, record: Record) {
        self.write().insert(key, record);
    }

    /// Leases `key` if it is currently free. Returns the auxiliary port.
    pub fn try_lease<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<u16>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut records = self.write();
        let record = records.get_mut(key).filter(|r| r.free)?;
        record.lease(now);
        Some(record.aux_port)
    }

    /// `None` if `key` is unknown, otherwise whether it was busy before.
    pub fn release<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<bool>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut records = self.write();
        let record = records.get_mut(key)?;
        let was_busy = !record.free;
        if was_busy {
            record.release(now);
        }
        Some(was_busy)
    }

    pub fn all_free(&self) -> bool {
        self.read().values().all(|r| r.free)
    }

    pub fn snapshot(&self) -> Vec<(K, Record)> {
        self.read()
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }
}

impl<K: Ord + Clone> Default for Records<K> {
    fn default() -> Self {
        Self::new()
    }
}
