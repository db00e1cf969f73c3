//! Error codes

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// The connection pool reached its hard cap and no pooled connection
	/// is available. The pool itself remains usable.
	#[error("No more connections available in the pool")]
	NoMoreConnections,
	/// A pooled connection failed its validation probe and was discarded.
	#[error("Pooled connection failed validation")]
	InvalidConnection,
	/// A connection handle was returned to a pool that never issued it.
	#[error("Connection was not issued by this pool")]
	NotPooled,
	/// An attribute value could not be converted to or from its typed form.
	#[error("Attribute conversion failed: {0}")]
	Conversion(String),
	/// An entry's object classes do not satisfy a record definition.
	#[error("Record definition mismatch: {0}")]
	Definition(String),
	/// The configuration or a directory entry was malformed.
	#[error("Invalid: {0}")]
	Invalid(String),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
	/// An I/O error occurred while reading configuration material.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}
