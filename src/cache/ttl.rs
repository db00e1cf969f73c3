//! Age-expiring cache.

use std::{
	collections::VecDeque,
	sync::{Arc, Mutex, MutexGuard, Weak},
	time::{Duration, Instant},
};

use tracing::warn;

use super::Cache;

/// One key/value pair stamped with its insertion time.
#[derive(Debug, Clone)]
struct TtlEntry<K, V> {
	/// The entry's key, unique within the cache.
	key: K,
	/// The cached value.
	value: V,
	/// When the entry was (re-)inserted.
	stamp: Instant,
}

/// Entries in insertion order, newest first, plus the expiry bound.
#[derive(Debug)]
struct TtlInner<K, V> {
	/// Entries, newest at the front, oldest at the back.
	entries: VecDeque<TtlEntry<K, V>>,
	/// Age after which an entry is purged; `None` disables expiry.
	ttl: Option<Duration>,
}

impl<K, V> TtlInner<K, V> {
	/// Remove expired entries, oldest first.
	///
	/// Because the deque is kept in insertion order the sweep can stop at
	/// the first non-expired tail entry; fresher entries can only sit
	/// closer to the front.
	fn purge(&mut self, now: Instant) {
		let Some(ttl) = self.ttl else {
			return;
		};
		while let Some(oldest) = self.entries.back() {
			if now.duration_since(oldest.stamp) > ttl {
				self.entries.pop_back();
			} else {
				break;
			}
		}
	}
}

/// Cache whose entries expire a fixed time after insertion.
///
/// A sweeper thread purges expired entries at a fixed interval,
/// independent of foreground calls, taking the same lock as they do. The
/// thread holds only a weak reference and exits within one interval of
/// the cache being dropped.
///
/// Unlike [`LruCache`](super::LruCache), `get` must not reorder entries:
/// the sweep relies on the deque staying in insertion order, so a touch
/// does not extend an entry's life. Re-`put`ting a key does.
pub struct TtlCache<K, V> {
	/// Shared state, also referenced by the sweeper thread.
	inner: Arc<Mutex<TtlInner<K, V>>>,
}

impl<K, V> TtlCache<K, V>
where
	K: Send + 'static,
	V: Send + 'static,
{
	/// Create a cache expiring entries older than `ttl` (`None` disables
	/// expiry), swept every `sweep_interval`.
	pub fn new(ttl: Option<Duration>, sweep_interval: Duration) -> Self {
		let inner = Arc::new(Mutex::new(TtlInner { entries: VecDeque::new(), ttl }));
		let weak = Arc::downgrade(&inner);
		let spawned = std::thread::Builder::new()
			.name("ttl-cache-sweep".to_owned())
			.spawn(move || Self::sweep(&weak, sweep_interval));
		if let Err(err) = spawned {
			warn!(error = %err, "Failed to spawn cache sweeper; entries will not expire");
		}
		TtlCache { inner }
	}

	/// Sweeper loop: purge on every tick until the cache is gone.
	fn sweep(weak: &Weak<Mutex<TtlInner<K, V>>>, interval: Duration) {
		loop {
			std::thread::sleep(interval);
			let Some(inner) = weak.upgrade() else {
				break;
			};
			let mut inner = inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
			inner.purge(Instant::now());
		}
	}
}

impl<K, V> TtlCache<K, V> {
	/// Lock the shared state, recovering from poisoning.
	fn lock(&self) -> MutexGuard<'_, TtlInner<K, V>> {
		self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// The configured expiry age.
	pub fn ttl(&self) -> Option<Duration> {
		self.lock().ttl
	}

	/// Change the expiry age. `None` disables expiry.
	pub fn set_ttl(&mut self, ttl: Option<Duration>) {
		self.lock().ttl = ttl;
	}
}

impl<K, V> std::fmt::Debug for TtlCache<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = self.lock();
		f.debug_struct("TtlCache")
			.field("len", &inner.entries.len())
			.field("ttl", &inner.ttl)
			.finish()
	}
}

impl<K, V> Cache<K, V> for TtlCache<K, V>
where
	K: Eq + Clone,
	V: Clone,
{
	fn contains_key(&self, key: &K) -> bool {
		self.lock().entries.iter().any(|entry| entry.key == *key)
	}

	fn put(&mut self, key: K, value: V) {
		let mut inner = self.lock();
		if let Some(index) = inner.entries.iter().position(|entry| entry.key == key) {
			inner.entries.remove(index);
		}
		inner.entries.push_front(TtlEntry { key, value, stamp: Instant::now() });
	}

	fn get(&mut self, key: &K) -> Option<V> {
		// No touch here: reordering would break the age ordering the
		// sweep depends on.
		self.lock().entries.iter().find(|entry| entry.key == *key).map(|entry| entry.value.clone())
	}

	fn remove(&mut self, key: &K) -> bool {
		let mut inner = self.lock();
		if let Some(index) = inner.entries.iter().position(|entry| entry.key == *key) {
			inner.entries.remove(index);
			true
		} else {
			false
		}
	}

	fn clear(&mut self) {
		self.lock().entries.clear();
	}

	fn len(&self) -> usize {
		self.lock().entries.len()
	}

	fn keys(&self) -> Vec<K> {
		self.lock().entries.iter().map(|entry| entry.key.clone()).collect()
	}

	fn entries(&self) -> Vec<(K, V)> {
		self.lock()
			.entries
			.iter()
			.map(|entry| (entry.key.clone(), entry.value.clone()))
			.collect()
	}
}
