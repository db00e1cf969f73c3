//! Least-recently-used cache.

use std::collections::VecDeque;

use super::Cache;

/// One key/value pair in recency order.
#[derive(Debug, Clone)]
struct CacheEntry<K, V> {
	/// The entry's key, unique within the cache.
	key: K,
	/// The cached value.
	value: V,
}

/// Cache that keeps its entries in recency order and evicts the least
/// recently used one when full.
///
/// The most recent entry sits at the front of the deque. A `get` counts
/// as a touch and re-promotes the entry; shrinking the bound with
/// [`LruCache::set_max_size`] evicts from the tail immediately.
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
	/// Entries, most recently used first.
	entries: VecDeque<CacheEntry<K, V>>,
	/// Capacity; `None` means unbounded.
	max_size: Option<usize>,
}

impl<K, V> LruCache<K, V> {
	/// Create an unbounded cache.
	pub fn new() -> Self {
		LruCache { entries: VecDeque::new(), max_size: None }
	}

	/// Create a cache that holds at most `max_size` entries.
	pub fn with_max_size(max_size: usize) -> Self {
		LruCache { entries: VecDeque::new(), max_size: Some(max_size) }
	}

	/// The current capacity.
	pub fn max_size(&self) -> Option<usize> {
		self.max_size
	}

	/// Change the capacity, evicting from the least recently used end
	/// until the new bound holds.
	pub fn set_max_size(&mut self, max_size: Option<usize>) {
		self.max_size = max_size;
		if let Some(max) = max_size {
			while self.entries.len() > max {
				self.entries.pop_back();
			}
		}
	}
}

impl<K, V> Default for LruCache<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V> Cache<K, V> for LruCache<K, V>
where
	K: Eq + Clone,
	V: Clone,
{
	fn contains_key(&self, key: &K) -> bool {
		self.entries.iter().any(|entry| entry.key == *key)
	}

	fn put(&mut self, key: K, value: V) {
		if let Some(index) = self.entries.iter().position(|entry| entry.key == key) {
			self.entries.remove(index);
		}
		if let Some(max) = self.max_size {
			if self.entries.len() >= max {
				self.entries.pop_back();
			}
			if self.entries.len() >= max {
				// A zero capacity stores nothing.
				return;
			}
		}
		self.entries.push_front(CacheEntry { key, value });
	}

	fn get(&mut self, key: &K) -> Option<V> {
		let index = self.entries.iter().position(|entry| entry.key == *key)?;
		let entry = self.entries.remove(index)?;
		let value = entry.value.clone();
		self.entries.push_front(entry);
		Some(value)
	}

	fn remove(&mut self, key: &K) -> bool {
		if let Some(index) = self.entries.iter().position(|entry| entry.key == *key) {
			self.entries.remove(index);
			true
		} else {
			false
		}
	}

	fn clear(&mut self) {
		self.entries.clear();
	}

	fn len(&self) -> usize {
		self.entries.len()
	}

	fn keys(&self) -> Vec<K> {
		self.entries.iter().map(|entry| entry.key.clone()).collect()
	}

	fn entries(&self) -> Vec<(K, V)> {
		self.entries.iter().map(|entry| (entry.key.clone(), entry.value.clone())).collect()
	}
}
