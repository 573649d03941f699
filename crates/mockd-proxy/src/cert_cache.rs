//! LRU cache for issued host certificates.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Default capacity when the configured size is non-positive.
pub const DEFAULT_CACHE_SIZE: usize = 1000;

/// Host-keyed LRU cache.
///
/// `get` promotes the entry to the front of the recency order, so even
/// read-only lookups take the exclusive lock.
pub struct CertCache<V: Clone> {
    max_size: usize,
    inner: RwLock<CacheInner<V>>,
}

struct CacheInner<V> {
    entries: HashMap<String, V>,
    /// Most-recent first.
    order: VecDeque<String>,
}

impl<V: Clone> CertCache<V> {
    pub fn new(max_size: i64) -> Self {
        let max_size = if max_size <= 0 {
            DEFAULT_CACHE_SIZE
        } else {
            max_size as usize
        };
        CertCache {
            max_size,
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get(&self, host: &str) -> Option<V> {
        let mut inner = self.inner.write();
        let value = inner.entries.get(host).cloned()?;
        promote(&mut inner.order, host);
        Some(value)
    }

    pub fn set(&self, host: &str, value: V) {
        let mut inner = self.inner.write();
        if inner.entries.insert(host.to_string(), value).is_some() {
            promote(&mut inner.order, host);
            return;
        }
        if inner.entries.len() > self.max_size {
            if let Some(evicted) = inner.order.pop_back() {
                inner.entries.remove(&evicted);
                trace!(host = %evicted, "evicted cached certificate");
            }
        }
        inner.order.push_front(host.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

fn promote(order: &mut VecDeque<String>, host: &str) {
    if let Some(pos) = order.iter().position(|h| h == host) {
        if pos > 0 {
            if let Some(entry) = order.remove(pos) {
                order.push_front(entry);
            }
        }
    }
}
