//! Present LDAP directory entries as typed, attribute-mapped records.
//!
//! The library hides connection management behind a bounded pool and
//! keeps a per-process identity cache, so repeated lookups of a DN
//! observe the same in-memory entry. A record type is described once,
//! declaratively: the object classes it requires and a table mapping
//! accessor names to attribute descriptors. Reading and writing a
//! property then converts between typed values (booleans mapped through
//! token lists, numbers, collections, references to other entries) and
//! the entry's raw multi-valued attributes.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate
//! which is used here for interfacing with LDAP is an excellent
//! resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use ldap_records::{
//!     config::{CacheConfig, Config, ConnectionConfig, PoolConfig},
//!     manager::EntryManager,
//!     mapping::PropertyValue,
//!     schema::{ObjectClassDescriptor, PropertyDescriptor, RecordDefinition, TypeTag},
//! };
//! use url::Url;
//!
//! // Configuration can also be deserialized with serde. It's
//! // hand-constructed here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldap://localhost")?,
//!     connection: ConnectionConfig::default(),
//!     bind_dn: "cn=admin,dc=example,dc=org".to_owned(),
//!     bind_password: "verysecret".to_owned(),
//!     base: "dc=example,dc=org".to_owned(),
//!     pool: PoolConfig::default(),
//!     cache: CacheConfig::Simple,
//! };
//!
//! let manager = EntryManager::new(&config);
//! let person = manager.register(
//!     RecordDefinition::new("person", ObjectClassDescriptor::new(&["person"]))
//!         .property("name", PropertyDescriptor::new("cn"))
//!         .property(
//!             "active",
//!             PropertyDescriptor::new("employeeType")
//!                 .element(TypeTag::Bool)
//!                 .true_tokens(&["active"])
//!                 .false_tokens(&["retired"]),
//!         ),
//! );
//!
//! let record = manager.get_by_dn(&person, "cn=jdoe,ou=people,dc=example,dc=org")?;
//! record.set("active", Some(PropertyValue::Bool(true)))?;
//! record.store()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Schema awareness stops at the object-class consistency check; the
//!   library does not validate attribute syntaxes against the server's
//!   schema.
//! * Property access is name-based (`record.get("name")`); a typed
//!   wrapper struct per record type is the caller's to write.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod pool;
pub mod record;
pub mod schema;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	cache::{Cache, CommitCache, LruCache, SimpleCache, TtlCache},
	config::{CacheConfig, Config, ConnectionConfig, PoolConfig, TLSConfig},
	entry::{Attributes, DirectoryEntry, SharedEntry},
	error::Error,
	manager::EntryManager,
	mapping::{PropertyValue, WriteMode},
	pool::{ConnectionFactory, LdapConnectionFactory, LdapPool, Pool, Pooled},
	record::Record,
	schema::{ObjectClassDescriptor, PropertyDescriptor, RecordDefinition, TypeTag, ValueKind},
};
