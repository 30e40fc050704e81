//! In-memory TTL cache with background sweep.
//!
//! A [`Cache`] is a key/value map where every entry carries an optional
//! absolute expiry. Reads treat an expired entry as absent even before the
//! sweeper deletes it, so correctness never depends on sweep timing.
//!
//! # Sweeper
//!
//! Each cache owns one background thread that wakes on a configurable
//! interval, collects up to a bounded number of expired keys under a read
//! lock, then deletes them under a write lock. The two-phase scan+delete
//! keeps writer tail latency bounded on large maps.
//!
//! # Example
//!
//! ```rust
//! use xkit::cache::Cache;
//!
//! let cache: Cache<i64> = Cache::new();
//! cache.set("hits", 1, 60);
//! assert_eq!(cache.get("hits"), Some(1));
//! assert_eq!(cache.incr("hits").unwrap(), 2);
//! cache.close();
//! ```

mod value;

pub use value::{Counted, Value};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

/// Default sweeper wake interval.
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);
/// Default per-sweep delete budget.
const DEFAULT_GC_MAX_PER_SWEEP: usize = 1000;

/// Errors produced by cache operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// `incr`/`decr` on a key that is absent or expired.
    #[error("key not exists")]
    KeyNotExists,
    /// `incr`/`decr` on a stored value that is not integral.
    #[error("data type not supported")]
    DataTypeNotSupported,
    /// Decrementing an unsigned value already at zero.
    #[error("value less than zero")]
    ValueLessThanZero,
}

/// A stored value plus its optional absolute expiry.
struct Entry<V> {
    value: V,
    /// `None` means the entry never expires.
    expire_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn expired(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }
}

/// Sweeper parameters: wake interval and per-sweep delete budget.
#[derive(Debug, Clone, Copy)]
struct GcConfig {
    interval: Duration,
    max_per_sweep: usize,
}

/// State shared between the cache handle and its sweeper thread.
struct Shared<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    gc: Mutex<GcConfig>,
}

impl<V> Shared<V> {
    /// One sweep pass: collect up to `max_per_sweep` expired keys under the
    /// read lock, release it, then delete under the write lock. Entries are
    /// re-checked before deletion in case they were refreshed in between.
    fn sweep(&self) {
        let (max, now) = (self.gc.lock().max_per_sweep, Instant::now());
        let expired: Vec<String> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, e)| e.expired(now))
                .take(max)
                .map(|(k, _)| k.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut removed = 0usize;
        {
            let mut entries = self.entries.write();
            for key in &expired {
                if entries.get(key).is_some_and(|e| e.expired(now)) {
                    entries.remove(key);
                    removed += 1;
                }
            }
        }
        debug!(removed, "cache sweep removed expired entries");
    }
}

/// In-memory key/value cache with per-entry TTL and background eviction.
///
/// Values are cloned out on read; the cache owns its entries. All
/// operations are immediate and local: no I/O, no retries.
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Default for Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with the default sweeper parameters
    /// (60 s interval, 1000 keys per sweep).
    pub fn new() -> Self {
        Self::with_gc(DEFAULT_GC_INTERVAL.as_secs(), DEFAULT_GC_MAX_PER_SWEEP)
    }

    /// Create a cache with explicit sweeper parameters.
    pub fn with_gc(interval_secs: u64, max_per_sweep: usize) -> Self {
        let shared = Arc::new(Shared {
            entries: RwLock::new(HashMap::new()),
            gc: Mutex::new(GcConfig {
                interval: Duration::from_secs(interval_secs.max(1)),
                max_per_sweep: max_per_sweep.max(1),
            }),
        });
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let sweeper = spawn_sweeper(Arc::clone(&shared), stop_rx);
        Self {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Upsert `key`. `ttl_secs > 0` installs an absolute expiry of
    /// now + ttl; `ttl_secs <= 0` means the entry never expires.
    pub fn set(&self, key: &str, value: V, ttl_secs: i64) {
        let expire_at = if ttl_secs > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_secs as u64))
        } else {
            None
        };
        self.shared
            .entries
            .write()
            .insert(key.to_string(), Entry { value, expire_at });
    }

    /// Return a clone of the stored value, or `None` if the key is absent
    /// or expired (even if the sweeper has not deleted it yet).
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let entries = self.shared.entries.read();
        entries
            .get(key)
            .filter(|e| !e.expired(now))
            .map(|e| e.value.clone())
    }

    /// Ordered multi-get: one result per input key.
    pub fn mget(&self, keys: &[&str]) -> Vec<Option<V>> {
        let now = Instant::now();
        let entries = self.shared.entries.read();
        keys.iter()
            .map(|key| {
                entries
                    .get(*key)
                    .filter(|e| !e.expired(now))
                    .map(|e| e.value.clone())
            })
            .collect()
    }

    /// Whether `key` holds a live (non-expired) entry.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.shared
            .entries
            .read()
            .get(key)
            .is_some_and(|e| !e.expired(now))
    }

    /// Remove `key`. Absent keys silently succeed.
    pub fn del(&self, key: &str) {
        self.shared.entries.write().remove(key);
    }

    /// Discard all entries.
    pub fn flush(&self) {
        self.shared.entries.write().clear();
    }

    /// Number of raw entries in the map, including expired ones the
    /// sweeper has not visited yet.
    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    /// Whether the map holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconfigure the sweeper. Takes effect after the current sweep.
    pub fn set_gc(&self, interval_secs: u64, max_per_sweep: usize) {
        let mut gc = self.shared.gc.lock();
        gc.interval = Duration::from_secs(interval_secs.max(1));
        gc.max_per_sweep = max_per_sweep.max(1);
    }

    /// Stop the sweeper and flush. Synchronous: the sweeper thread has
    /// exited when this returns. Subsequent calls are no-ops.
    pub fn close(&self) {
        let stop_tx = self.stop_tx.lock().take();
        drop(stop_tx);
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        self.flush();
    }
}

impl<V> Cache<V>
where
    V: Counted + Clone + Send + Sync + 'static,
{
    /// Atomically adjust a numeric entry by +1, preserving its expiry.
    ///
    /// # Errors
    ///
    /// [`CacheError::KeyNotExists`] if the key is absent or expired;
    /// [`CacheError::DataTypeNotSupported`] if the value is not integral.
    pub fn incr(&self, key: &str) -> Result<V, CacheError> {
        self.adjust(key, Counted::incr)
    }

    /// Atomically adjust a numeric entry by -1, preserving its expiry.
    ///
    /// # Errors
    ///
    /// As [`Cache::incr`], plus [`CacheError::ValueLessThanZero`] when
    /// decrementing an unsigned value already at zero.
    pub fn decr(&self, key: &str) -> Result<V, CacheError> {
        self.adjust(key, Counted::decr)
    }

    fn adjust(
        &self,
        key: &str,
        op: impl Fn(&V) -> Result<V, CacheError>,
    ) -> Result<V, CacheError> {
        let now = Instant::now();
        let mut entries = self.shared.entries.write();
        let entry = entries
            .get_mut(key)
            .filter(|e| !e.expired(now))
            .ok_or(CacheError::KeyNotExists)?;
        let next = op(&entry.value)?;
        entry.value = next.clone();
        Ok(next)
    }
}

impl<V> Drop for Cache<V> {
    fn drop(&mut self) {
        // Signal the sweeper but do not join in Drop; explicit close() is
        // the synchronous shutdown path.
        self.stop_tx.lock().take();
    }
}

/// Spawn the sweeper thread. It re-reads the interval on every wake so
/// `set_gc` takes effect after the current sweep, and exits as soon as the
/// stop channel closes.
fn spawn_sweeper<V>(shared: Arc<Shared<V>>, stop_rx: Receiver<()>) -> JoinHandle<()>
where
    V: Send + Sync + 'static,
{
    thread::Builder::new()
        .name("cache-sweeper".into())
        .spawn(move || loop {
            let interval = shared.gc.lock().interval;
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => shared.sweep(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("cache sweeper stopping");
                    break;
                }
            }
        })
        .expect("failed to spawn cache sweeper thread")
}
