//! The entry manager: identity map plus directory operations.
//!
//! The manager guarantees that, while a DN stays in its cache, every
//! lookup of that DN yields the same shared [`DirectoryEntry`]. Searches
//! refresh a cached entry's attributes in place rather than replacing
//! the object, so records held elsewhere observe the update.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use ldap3::{ldap_escape, Scope, SearchEntry};
use tracing::{debug, info};

use crate::{
	cache::{Cache, CommitCache, LruCache, SimpleCache, TtlCache},
	config::{CacheConfig, Config},
	entry::{lock_entry, Attributes, DirectoryEntry, SharedEntry},
	error::Error,
	pool::{LdapPool, Pool},
	record::Record,
	schema::RecordDefinition,
};

/// The identity cache variant picked by the configuration.
type EntryCache = Box<dyn Cache<String, SharedEntry> + Send>;

/// Owns the identity map and the connection pool, and hands out records.
pub struct EntryManager {
	/// DN → shared entry identity map. Every access happens under this
	/// lock so racing threads converge on one entry per DN.
	cache: Mutex<EntryCache>,
	/// Pool the manager and its entries draw connections from.
	pool: Arc<LdapPool>,
	/// Search base for filter searches.
	base: String,
	/// Registered record types, consulted in registration order during
	/// polymorphic search.
	registry: RwLock<Vec<Arc<RecordDefinition>>>,
}

impl EntryManager {
	/// Build a manager, its pool and its identity cache from `config`.
	pub fn new(config: &Config) -> Arc<Self> {
		let cache = build_cache(&config.cache);
		info!(cache = cache_name(&config.cache), base = %config.base, "Directory manager ready");
		Arc::new(EntryManager {
			cache: Mutex::new(cache),
			pool: Pool::from_config(config),
			base: config.base.clone(),
			registry: RwLock::new(Vec::new()),
		})
	}

	/// The pool this manager draws connections from.
	pub fn pool(&self) -> &Arc<LdapPool> {
		&self.pool
	}

	/// Lock the identity cache, recovering from poisoning.
	fn cache(&self) -> MutexGuard<'_, EntryCache> {
		self.cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// Register a record type for polymorphic search and reference
	/// resolution, returning its shared handle.
	pub fn register(&self, definition: RecordDefinition) -> Arc<RecordDefinition> {
		let definition = Arc::new(definition);
		let mut registry =
			self.registry.write().unwrap_or_else(std::sync::PoisonError::into_inner);
		registry.push(definition.clone());
		definition
	}

	/// The registered definitions, in registration order.
	fn definitions(&self) -> Vec<Arc<RecordDefinition>> {
		self.registry.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
	}

	/// The shared entry for a DN.
	///
	/// Always succeeds: a DN never seen before gets a fresh, empty entry
	/// marked new. Cached entries are returned verbatim, without a remote
	/// refresh. Two threads racing on the same DN converge on one entry
	/// because lookup and insert happen under the cache lock.
	pub fn entry_by_dn(&self, dn: &str) -> SharedEntry {
		let mut cache = self.cache();
		if let Some(entry) = cache.get(&dn.to_owned()) {
			return entry;
		}
		let entry: SharedEntry =
			Arc::new(Mutex::new(DirectoryEntry::new(self.pool.clone(), dn, None)));
		cache.put(dn.to_owned(), entry.clone());
		entry
	}

	/// Insert or refresh an entry fetched from the directory.
	///
	/// When the DN is already cached its attributes are replaced in
	/// place, preserving identity for everyone holding the entry. The
	/// attribute swap happens after the cache lock is dropped so entry
	/// locks are never taken under it.
	pub(crate) fn adopt(&self, dn: &str, attributes: Attributes) -> SharedEntry {
		let (entry, fresh) = {
			let mut cache = self.cache();
			match cache.get(&dn.to_owned()) {
				Some(entry) => (entry, false),
				None => {
					let entry: SharedEntry = Arc::new(Mutex::new(DirectoryEntry::new(
						self.pool.clone(),
						dn,
						Some(attributes.clone()),
					)));
					cache.put(dn.to_owned(), entry.clone());
					(entry, true)
				}
			}
		};
		if !fresh {
			lock_entry(&entry).adopt_attributes(attributes);
		}
		entry
	}

	/// Search the directory, refreshing or inserting a cached entry per
	/// result.
	pub fn search(&self, filter: &str) -> Result<Vec<SharedEntry>, Error> {
		debug!(filter, base = %self.base, "Searching directory");
		let base = self.base.clone();
		let filter_owned = filter.to_owned();
		let results = self.pool.with_connection(move |conn| {
			let (entries, _) =
				conn.search(&base, Scope::Subtree, &filter_owned, vec!["*"])?.success()?;
			Ok(entries)
		})?;
		Ok(results
			.into_iter()
			.map(SearchEntry::construct)
			.map(|found| {
				let dn = found.dn.clone();
				self.adopt(&dn, found.into())
			})
			.collect())
	}

	/// The first search result, or `None` when nothing matches.
	pub fn search_first(&self, filter: &str) -> Result<Option<SharedEntry>, Error> {
		Ok(self.search(filter)?.into_iter().next())
	}

	/// The entry carrying the given uid, fetched fresh from the
	/// directory.
	pub fn entry_by_uid(&self, uid: &str) -> Result<Option<SharedEntry>, Error> {
		self.search_first(&format!("(uid={})", ldap_escape(uid)))
	}

	/// Save an entry.
	pub fn store_entry(&self, entry: &SharedEntry) -> Result<(), Error> {
		lock_entry(entry).store()
	}

	/// Reload an entry's attributes from the directory.
	pub fn restore_entry(&self, entry: &SharedEntry) -> Result<(), Error> {
		lock_entry(entry).restore()
	}

	/// Move an entry to a new DN and re-key it in the identity map. The
	/// old DN drops out of the cache, so looking it up afterwards finds
	/// nothing.
	pub fn move_entry(&self, entry: &SharedEntry, new_dn: &str) -> Result<(), Error> {
		let old_dn = {
			let mut guard = lock_entry(entry);
			let old_dn = guard.dn().to_owned();
			guard.move_to(new_dn)?;
			old_dn
		};
		let mut cache = self.cache();
		cache.remove(&old_dn);
		cache.put(new_dn.to_owned(), entry.clone());
		Ok(())
	}

	/// Delete an entry from the directory. It stays cached, marked new,
	/// and can be stored again.
	pub fn remove_entry(&self, entry: &SharedEntry) -> Result<(), Error> {
		lock_entry(entry).remove()
	}

	/// Drop every cached entry. Records created before this point keep
	/// working but lose identity-map sharing with later lookups.
	pub fn clear_cache(&self) {
		self.cache().clear();
	}

	/// Make sure a never-fetched entry actually exists remotely.
	///
	/// A fetch failure reports "absent": the entry stays cached as new,
	/// and `Ok(false)` is returned.
	fn ensure_fetched(&self, entry: &SharedEntry) -> bool {
		let mut guard = lock_entry(entry);
		if !guard.is_new() {
			return true;
		}
		match guard.restore() {
			Ok(()) => true,
			Err(err) => {
				debug!(dn = guard.dn(), error = %err, "Entry not present in the directory");
				false
			}
		}
	}

	/// Find the record under `dn`, validated against `definition`.
	///
	/// A cached entry is returned without a remote refresh; a DN never
	/// seen before is fetched once, and `None` is reported when the
	/// directory has nothing under it. A definition mismatch is an
	/// [`Error::Definition`].
	pub fn find_by_dn(
		self: &Arc<Self>,
		definition: &Arc<RecordDefinition>,
		dn: &str,
	) -> Result<Option<Record>, Error> {
		let entry = self.entry_by_dn(dn);
		if !self.ensure_fetched(&entry) {
			return Ok(None);
		}
		definition.object_classes().check(lock_entry(&entry).attributes())?;
		Ok(Some(Record::new(entry, self.clone(), definition.clone())))
	}

	/// The record under `dn`, created as a new entry when the directory
	/// has nothing there.
	pub fn get_by_dn(
		self: &Arc<Self>,
		definition: &Arc<RecordDefinition>,
		dn: &str,
	) -> Result<Record, Error> {
		match self.find_by_dn(definition, dn)? {
			Some(record) => Ok(record),
			None => self.create(definition, dn),
		}
	}

	/// A record for a new entry under `dn`, stamped with the
	/// definition's object classes.
	///
	/// When the directory already holds an object under the DN it is
	/// adopted instead and validated against the definition.
	pub fn create(
		self: &Arc<Self>,
		definition: &Arc<RecordDefinition>,
		dn: &str,
	) -> Result<Record, Error> {
		let entry = self.entry_by_dn(dn);
		if self.ensure_fetched(&entry) {
			definition.object_classes().check(lock_entry(&entry).attributes())?;
		} else {
			definition.object_classes().stamp(lock_entry(&entry).attributes_mut());
		}
		Ok(Record::new(entry, self.clone(), definition.clone()))
	}

	/// Find the record carrying the given uid, validated against
	/// `definition`. Attributes are always refreshed from the search
	/// result.
	pub fn find_by_uid(
		self: &Arc<Self>,
		definition: &Arc<RecordDefinition>,
		uid: &str,
	) -> Result<Option<Record>, Error> {
		let Some(entry) = self.entry_by_uid(uid)? else {
			return Ok(None);
		};
		definition.object_classes().check(lock_entry(&entry).attributes())?;
		Ok(Some(Record::new(entry, self.clone(), definition.clone())))
	}

	/// Search and bind every result to the first registered definition
	/// whose object classes it satisfies. Entries satisfying none are
	/// skipped; the mismatch is a filtering signal here, not an error.
	pub fn search_records(self: &Arc<Self>, filter: &str) -> Result<Vec<Record>, Error> {
		Ok(self
			.search(filter)?
			.into_iter()
			.filter_map(|entry| self.record_for(&entry))
			.collect())
	}

	/// Search with an explicit type, skipping results that do not
	/// satisfy it.
	pub fn search_as(
		self: &Arc<Self>,
		definition: &Arc<RecordDefinition>,
		filter: &str,
	) -> Result<Vec<Record>, Error> {
		Ok(self
			.search(filter)?
			.into_iter()
			.filter(|entry| {
				definition.object_classes().check(lock_entry(entry).attributes()).is_ok()
			})
			.map(|entry| Record::new(entry, self.clone(), definition.clone()))
			.collect())
	}

	/// The first registered definition the entry satisfies.
	pub(crate) fn record_for(self: &Arc<Self>, entry: &SharedEntry) -> Option<Record> {
		let definition = {
			let guard = lock_entry(entry);
			self.definitions()
				.into_iter()
				.find(|definition| definition.object_classes().check(guard.attributes()).is_ok())
		}?;
		Some(Record::new(entry.clone(), self.clone(), definition))
	}

	/// Like [`EntryManager::record_for`], falling back to an untyped
	/// record so the entry stays reachable.
	pub(crate) fn record_or_untyped(self: &Arc<Self>, entry: &SharedEntry) -> Record {
		self.record_for(entry).unwrap_or_else(|| {
			Record::new(entry.clone(), self.clone(), Arc::new(RecordDefinition::untyped()))
		})
	}

	/// Resolve a DN reference: the cached or remotely fetched entry,
	/// polymorphically bound, or `None` when the directory has nothing
	/// under the DN.
	pub(crate) fn find_record_by_dn(self: &Arc<Self>, dn: &str) -> Result<Option<Record>, Error> {
		let entry = self.entry_by_dn(dn);
		if !self.ensure_fetched(&entry) {
			return Ok(None);
		}
		Ok(Some(self.record_or_untyped(&entry)))
	}

	/// Resolve a filter reference: the first search result,
	/// polymorphically bound.
	pub(crate) fn search_first_record(
		self: &Arc<Self>,
		filter: &str,
	) -> Result<Option<Record>, Error> {
		Ok(self.search_first(filter)?.map(|entry| self.record_or_untyped(&entry)))
	}
}

impl std::fmt::Debug for EntryManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EntryManager")
			.field("base", &self.base)
			.field("cached", &self.cache().len())
			.field("definitions", &self.definitions().len())
			.finish()
	}
}

/// Build the cache variant the configuration asks for.
fn build_cache(config: &CacheConfig) -> EntryCache {
	match config {
		CacheConfig::Simple => Box::new(SimpleCache::new()),
		CacheConfig::Lru { max_size } => {
			let mut cache = LruCache::new();
			cache.set_max_size(*max_size);
			Box::new(cache)
		}
		CacheConfig::Ttl { ttl, sweep_interval } => {
			Box::new(TtlCache::new(Some(*ttl), *sweep_interval))
		}
		CacheConfig::Commit => Box::new(CommitCache::new()),
	}
}

/// Short cache variant name for startup logging.
fn cache_name(config: &CacheConfig) -> &'static str {
	match config {
		CacheConfig::Simple => "simple",
		CacheConfig::Lru { .. } => "lru",
		CacheConfig::Ttl { .. } => "ttl",
		CacheConfig::Commit => "commit",
	}
}
