//! Bounded pool of directory connections.
//!
//! The pool keeps two lists behind one mutex: connections currently
//! available and the ids of connections handed out to callers. Acquiring
//! pops available connections and validates each one, discarding those
//! that fail, and only creates a new connection while the total is under
//! the hard cap. After every acquire the pool replenishes itself back up
//! to its configured floor, so a burst of invalid connections does not
//! leave it permanently drained.

use std::{
	ops::{Deref, DerefMut},
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex, MutexGuard,
	},
};

use ldap3::{LdapConn, Scope};
use tracing::{debug, warn};

use crate::{
	config::{Config, ConnectionConfig, PoolConfig},
	error::Error,
};

/// Issues connection handle ids. Global so that a handle can never be
/// mistaken for one issued by another pool instance.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(0);

/// Creates and validates the connections managed by a [`Pool`].
pub trait ConnectionFactory {
	/// The connection type the pool hands out.
	type Connection;

	/// Open a new connection.
	fn create(&self) -> Result<Self::Connection, Error>;

	/// Check that a pooled connection is still usable before it is handed
	/// out. The default accepts every connection.
	fn validate(&self, _conn: &mut Self::Connection) -> Result<(), Error> {
		Ok(())
	}
}

/// A connection handle issued by [`Pool::acquire`].
///
/// The handle must be given back with [`Pool::release`]; dropping it
/// simply closes the connection.
pub struct Pooled<C> {
	/// Identity of this handle within its pool.
	id: u64,
	/// The underlying connection.
	conn: C,
}

impl<C> Deref for Pooled<C> {
	type Target = C;

	fn deref(&self) -> &C {
		&self.conn
	}
}

impl<C> DerefMut for Pooled<C> {
	fn deref_mut(&mut self) -> &mut C {
		&mut self.conn
	}
}

impl<C> std::fmt::Debug for Pooled<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Pooled").field("id", &self.id).finish_non_exhaustive()
	}
}

/// Lists of pooled connections, guarded by the pool mutex.
struct PoolState<C> {
	/// Connections ready to be handed out.
	available: Vec<Pooled<C>>,
	/// Ids of connections currently held by callers.
	used: Vec<u64>,
}

impl<C> PoolState<C> {
	/// Total number of connections the pool currently owns or has lent out.
	fn total(&self) -> usize {
		self.available.len() + self.used.len()
	}
}

/// Generic bounded connection pool.
pub struct Pool<F: ConnectionFactory> {
	/// Creates and validates connections.
	factory: F,
	/// Number of idle connections retained on release.
	optimal_size: usize,
	/// Floor the pool replenishes itself up to.
	min_size: usize,
	/// Hard cap on the total connection count, `None` for unbounded.
	max_size: Option<usize>,
	/// Available/used bookkeeping.
	state: Mutex<PoolState<F::Connection>>,
}

impl<F: ConnectionFactory> Pool<F> {
	/// Create a pool around `factory`, eagerly opening `min_size`
	/// connections. Connections that fail to open at startup are logged
	/// and skipped; the pool heals itself on later acquires.
	pub fn new(factory: F, optimal_size: usize, min_size: usize, max_size: Option<usize>) -> Self {
		let pool = Pool {
			factory,
			optimal_size,
			min_size,
			max_size,
			state: Mutex::new(PoolState { available: Vec::new(), used: Vec::new() }),
		};
		pool.replenish();
		pool
	}

	/// Lock the state, recovering from a poisoned mutex. Pool bookkeeping
	/// is consistent after every statement, so a panic while holding the
	/// lock cannot leave it half-updated.
	fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
		self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
	}

	/// Take a connection out of the pool.
	///
	/// Available connections are validated first and silently discarded on
	/// failure. When none survive, a new connection is created unless the
	/// pool is at its hard cap, in which case [`Error::NoMoreConnections`]
	/// is raised. Whatever the outcome, the pool tops itself back up to
	/// its floor before returning.
	pub fn acquire(&self) -> Result<Pooled<F::Connection>, Error> {
		let result = self.try_acquire();
		// Missing connections may need to be recreated, even when the
		// acquire itself failed.
		self.replenish();
		result
	}

	/// The acquire algorithm proper, without the trailing replenish.
	fn try_acquire(&self) -> Result<Pooled<F::Connection>, Error> {
		let mut state = self.lock();
		while let Some(mut pooled) = state.available.pop() {
			match self.factory.validate(&mut pooled.conn) {
				Ok(()) => {
					state.used.push(pooled.id);
					return Ok(pooled);
				}
				Err(err) => {
					debug!(error = %err, "Discarding pooled connection that failed validation");
				}
			}
		}
		if self.max_size.map_or(true, |max| state.total() < max) {
			let mut conn = self.factory.create()?;
			self.factory.validate(&mut conn)?;
			let pooled = Pooled { id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed), conn };
			state.used.push(pooled.id);
			Ok(pooled)
		} else {
			Err(Error::NoMoreConnections)
		}
	}

	/// Return a connection to the pool.
	///
	/// The connection is retained for reuse only while fewer than
	/// `optimal_size` connections are already idle; beyond that it is
	/// dropped. Returning a handle this pool did not issue fails with
	/// [`Error::NotPooled`].
	pub fn release(&self, pooled: Pooled<F::Connection>) -> Result<(), Error> {
		let mut state = self.lock();
		let Some(index) = state.used.iter().position(|&id| id == pooled.id) else {
			return Err(Error::NotPooled);
		};
		state.used.swap_remove(index);
		if state.available.len() < self.optimal_size {
			state.available.push(pooled);
		}
		Ok(())
	}

	/// Top the pool back up to `min_size` total connections. Creation
	/// failures are logged and abort the round; callers never observe
	/// them.
	fn replenish(&self) {
		let mut state = self.lock();
		while state.total() < self.min_size {
			match self.factory.create() {
				Ok(conn) => {
					let pooled =
						Pooled { id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed), conn };
					state.available.push(pooled);
				}
				Err(err) => {
					warn!(error = %err, "Failed to replenish pooled connection");
					break;
				}
			}
		}
	}

	/// Run `f` with a pooled connection, returning it afterwards.
	///
	/// The connection is released even when `f` fails; a release failure
	/// is logged rather than masking `f`'s result.
	pub fn with_connection<T>(
		&self,
		f: impl FnOnce(&mut F::Connection) -> Result<T, Error>,
	) -> Result<T, Error> {
		let mut pooled = self.acquire()?;
		let result = f(&mut pooled.conn);
		if let Err(err) = self.release(pooled) {
			warn!(error = %err, "Failed to return connection to pool");
		}
		result
	}

	/// Number of idle connections.
	pub fn available(&self) -> usize {
		self.lock().available.len()
	}

	/// Number of connections currently held by callers.
	pub fn used(&self) -> usize {
		self.lock().used.len()
	}

	/// Total number of connections the pool accounts for.
	pub fn len(&self) -> usize {
		self.lock().total()
	}

	/// Whether the pool currently owns no connections at all.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<F: ConnectionFactory> std::fmt::Debug for Pool<F> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.lock();
		f.debug_struct("Pool")
			.field("available", &state.available.len())
			.field("used", &state.used.len())
			.field("optimal_size", &self.optimal_size)
			.field("min_size", &self.min_size)
			.field("max_size", &self.max_size)
			.finish()
	}
}

/// Opens bound [`LdapConn`] handles and probes them for liveness.
#[derive(Clone, Debug)]
pub struct LdapConnectionFactory {
	/// Server URL.
	url: url::Url,
	/// DN to bind with.
	bind_dn: String,
	/// Password to bind with.
	bind_password: String,
	/// Connection/TLS settings source.
	connection: ConnectionConfig,
	/// Entry probed to validate pooled connections.
	probe_dn: Option<String>,
}

impl LdapConnectionFactory {
	/// Build a factory from the relevant parts of the configuration.
	pub fn new(config: &Config) -> Self {
		LdapConnectionFactory {
			url: config.url.clone(),
			bind_dn: config.bind_dn.clone(),
			bind_password: config.bind_password.clone(),
			connection: config.connection.clone(),
			probe_dn: config.pool.probe_dn.clone(),
		}
	}
}

impl ConnectionFactory for LdapConnectionFactory {
	type Connection = LdapConn;

	fn create(&self) -> Result<LdapConn, Error> {
		debug!(url = %self.url, "Opening directory connection");
		let settings = self.connection.to_settings()?;
		let mut conn = LdapConn::from_url_with_settings(settings, &self.url)?;
		conn.simple_bind(&self.bind_dn, &self.bind_password)?.success()?;
		Ok(conn)
	}

	/// Issue a cheap existence probe against the configured entry. Any
	/// failure, including transport errors, marks the connection invalid
	/// so a poisoned handle is never handed out twice.
	fn validate(&self, conn: &mut LdapConn) -> Result<(), Error> {
		let Some(probe_dn) = &self.probe_dn else {
			return Ok(());
		};
		let probe = conn
			.with_timeout(self.connection.operation_timeout)
			.search(probe_dn, Scope::Base, "(objectClass=*)", vec!["1.1"])
			.and_then(ldap3::SearchResult::success);
		match probe {
			Ok(_) => Ok(()),
			Err(err) => {
				debug!(error = %err, probe_dn = %probe_dn, "Connection failed validation probe");
				Err(Error::InvalidConnection)
			}
		}
	}
}

/// The connection pool used by every directory operation in this crate.
pub type LdapPool = Pool<LdapConnectionFactory>;

impl Pool<LdapConnectionFactory> {
	/// Build the pool described by `config`.
	pub fn from_config(config: &Config) -> Arc<Self> {
		let PoolConfig { optimal_size, min_size, max_size, .. } = config.pool;
		Arc::new(Pool::new(LdapConnectionFactory::new(config), optimal_size, min_size, max_size))
	}
}
