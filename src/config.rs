//! Config for the directory connection, pool and cache.
use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;

/// Configuration for a directory access layer.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	pub connection: ConnectionConfig,
	/// The DN to bind with when opening a connection
	pub bind_dn: String,
	/// The password to bind with
	pub bind_password: String,
	/// The search base every filter search starts from
	pub base: String,
	/// Bounds of the connection pool
	pub pool: PoolConfig,
	/// Which cache variant backs the identity map
	pub cache: CacheConfig,
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout, applied to the pool's validation probe.
	pub operation_timeout: Duration,

	/// TLS config
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		ConnectionConfig {
			timeout: 5,
			operation_timeout: Duration::from_secs(30),
			tls: TLSConfig::default(),
		}
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,
}

/// Size bounds of the connection pool
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
	/// Number of idle connections the pool retains. Connections released
	/// beyond this count are dropped.
	pub optimal_size: usize,
	/// Number of connections eagerly created at startup and replenished
	/// after every acquire.
	#[serde(default)]
	pub min_size: usize,
	/// Hard cap on the total number of connections. `None` means unbounded.
	#[serde(default)]
	pub max_size: Option<usize>,
	/// DN of an entry whose existence is probed to validate a pooled
	/// connection before it is handed out. `None` disables validation.
	#[serde(default)]
	pub probe_dn: Option<String>,
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig { optimal_size: 10, min_size: 0, max_size: None, probe_dn: None }
	}
}

/// Which cache variant backs the identity map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheConfig {
	/// Plain hash map, no eviction
	Simple,
	/// Least-recently-used eviction
	Lru {
		/// Maximum number of cached entries. `None` means unbounded.
		max_size: Option<usize>,
	},
	/// Age-based expiry
	Ttl {
		/// Age after which an entry is purged
		ttl: Duration,
		/// How often the sweeper thread runs
		#[serde(default = "default_sweep_interval")]
		sweep_interval: Duration,
	},
	/// Two-phase commit/rollback overlay
	Commit,
}

impl Default for CacheConfig {
	fn default() -> Self {
		CacheConfig::Simple
	}
}

/// The sweep period of the original expiring cache.
fn default_sweep_interval() -> Duration {
	Duration::from_millis(100)
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = rustls::RootCertStore::empty();
			let mut reader = BufReader::new(File::open(path)?);
			let certs = rustls_pemfile::certs(&mut reader)?;
			if certs.is_empty() {
				return Err(Error::Invalid(
					"No certificates found in root certificate file".to_owned(),
				));
			}
			for cert in certs {
				roots.add(&rustls::Certificate(cert)).map_err(|_| {
					Error::Invalid("Could not read root certificate".to_owned())
				})?;
			}
			let tls_config = rustls::ClientConfig::builder()
				.with_safe_defaults()
				.with_root_certificates(roots)
				.with_no_client_auth();
			settings = settings.set_config(Arc::new(tls_config));
		}
		Ok(settings)
	}
}

impl Config {
	/// Returns an example configuration pointing at a local test server
	#[allow(dead_code, clippy::expect_used)]
	pub(crate) fn example() -> Self {
		Config {
			url: Url::parse("ldap://localhost:1389").expect("static url is well formed"),
			connection: ConnectionConfig::default(),
			bind_dn: "cn=admin,dc=example,dc=org".to_owned(),
			bind_password: "adminpassword".to_owned(),
			base: "dc=example,dc=org".to_owned(),
			pool: PoolConfig::default(),
			cache: CacheConfig::Simple,
		}
	}
}
