//! A small in-process cache whose entries expire after a fixed TTL.
//!
//! Best effort only: contents are lost on restart and a poisoned lock is
//! recovered rather than propagated.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Mutex, PoisonError},
  time::{Duration, Instant},
};

pub struct TtlCache<K, V> {
  ttl:     Duration,
  entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
  pub fn new(ttl: Duration) -> Self { Self { ttl, entries: Mutex::new(HashMap::new()) } }

  pub fn get(&self, key: &K) -> Option<V> {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    match entries.get(key) {
      Some((stored, value)) if stored.elapsed() < self.ttl => Some(value.clone()),
      Some(_) => {
        entries.remove(key);
        None
      }
      None => None,
    }
  }

  pub fn insert(&self, key: K, value: V) {
    let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
    entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
    entries.insert(key, (Instant::now(), value));
  }

  pub fn invalidate(&self, key: &K) {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
  }
}
