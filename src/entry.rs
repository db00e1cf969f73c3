//! Directory entries and their attribute sets.
use std::{
	collections::HashSet,
	sync::{Arc, Mutex},
};

use ldap3::{Mod, Scope, SearchEntry};
use tracing::debug;

use crate::{error::Error, pool::LdapPool};

/// A directory entry shared between every record bound to its DN.
pub type SharedEntry = Arc<Mutex<DirectoryEntry>>;

/// Lock a shared entry, recovering from a poisoned lock.
pub fn lock_entry(entry: &SharedEntry) -> std::sync::MutexGuard<'_, DirectoryEntry> {
	entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One named, multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attr {
	/// Attribute name as first written.
	name: String,
	/// The attribute's values, in insertion order.
	values: Vec<String>,
}

/// An entry's attribute set: a multimap that preserves the insertion
/// order of attributes and matches names case-insensitively, the way the
/// directory itself does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
	/// Attributes in insertion order.
	attrs: Vec<Attr>,
}

impl Attributes {
	/// Create an empty attribute set.
	pub fn new() -> Self {
		Attributes { attrs: Vec::new() }
	}

	/// Position of `name`, matched case-insensitively.
	fn position(&self, name: &str) -> Option<usize> {
		self.attrs.iter().position(|attr| attr.name.eq_ignore_ascii_case(name))
	}

	/// All values of an attribute.
	pub fn get(&self, name: &str) -> Option<&[String]> {
		self.position(name).map(|index| self.attrs[index].values.as_slice())
	}

	/// The first value of an attribute.
	pub fn first(&self, name: &str) -> Option<&str> {
		self.get(name)?.first().map(String::as_str)
	}

	/// Replace (or insert) an attribute with the given values, keeping
	/// its original position when it already exists.
	pub fn put(&mut self, name: &str, values: Vec<String>) {
		match self.position(name) {
			Some(index) => self.attrs[index].values = values,
			None => self.attrs.push(Attr { name: name.to_owned(), values }),
		}
	}

	/// Append one value to an attribute, creating it if needed.
	pub fn add_value(&mut self, name: &str, value: String) {
		match self.position(name) {
			Some(index) => self.attrs[index].values.push(value),
			None => self.attrs.push(Attr { name: name.to_owned(), values: vec![value] }),
		}
	}

	/// Delete an attribute entirely, reporting whether it existed.
	pub fn remove(&mut self, name: &str) -> bool {
		if let Some(index) = self.position(name) {
			self.attrs.remove(index);
			true
		} else {
			false
		}
	}

	/// Whether the attribute exists, even with no values.
	pub fn contains(&self, name: &str) -> bool {
		self.position(name).is_some()
	}

	/// Attribute names in insertion order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.attrs.iter().map(|attr| attr.name.as_str())
	}

	/// Number of attributes.
	pub fn len(&self) -> usize {
		self.attrs.len()
	}

	/// Whether the set holds no attributes at all.
	pub fn is_empty(&self) -> bool {
		self.attrs.is_empty()
	}

	/// The attribute list shaped for an add operation.
	pub(crate) fn to_add_attrs(&self) -> Vec<(String, HashSet<String>)> {
		self.attrs
			.iter()
			.map(|attr| (attr.name.clone(), attr.values.iter().cloned().collect()))
			.collect()
	}

	/// The attribute list shaped as replace modifications.
	pub(crate) fn to_replace_mods(&self) -> Vec<Mod<String>> {
		self.attrs
			.iter()
			.map(|attr| Mod::Replace(attr.name.clone(), attr.values.iter().cloned().collect()))
			.collect()
	}
}

impl From<SearchEntry> for Attributes {
	fn from(entry: SearchEntry) -> Self {
		let mut attributes = Attributes::new();
		for (name, values) in entry.attrs {
			attributes.put(&name, values);
		}
		attributes
	}
}

/// A DN plus its mutable attribute set.
///
/// An entry is `new` while the directory has no object under its DN: it
/// starts out that way when nothing was fetched, turns persistent on a
/// successful store or restore, and turns new again when removed.
pub struct DirectoryEntry {
	/// Whether the entry does not exist in the directory yet.
	is_new: bool,
	/// The pool lifecycle operations draw their connections from.
	pool: Arc<LdapPool>,
	/// The entry's attributes.
	attributes: Attributes,
	/// The entry's distinguished name.
	dn: String,
}

impl DirectoryEntry {
	/// Create an entry. With `attributes` of `None` the entry starts
	/// empty and new; otherwise it represents a fetched directory object.
	pub fn new(pool: Arc<LdapPool>, dn: &str, attributes: Option<Attributes>) -> Self {
		let (attributes, is_new) = match attributes {
			Some(attributes) => (attributes, false),
			None => (Attributes::new(), true),
		};
		DirectoryEntry { is_new, pool, attributes, dn: dn.to_owned() }
	}

	/// The entry's DN.
	pub fn dn(&self) -> &str {
		&self.dn
	}

	/// The entry's attributes.
	pub fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	/// Mutable access to the entry's attributes.
	pub fn attributes_mut(&mut self) -> &mut Attributes {
		&mut self.attributes
	}

	/// Replace the attribute set, marking the entry persistent.
	pub(crate) fn adopt_attributes(&mut self, attributes: Attributes) {
		self.attributes = attributes;
		self.is_new = false;
	}

	/// Whether the entry does not exist in the directory.
	pub fn is_new(&self) -> bool {
		self.is_new
	}

	/// Save the entry: create it when new, otherwise replace its
	/// attributes.
	pub fn store(&mut self) -> Result<(), Error> {
		let dn = self.dn.clone();
		if self.is_new {
			debug!(%dn, "Creating directory entry");
			let attrs = self.attributes.to_add_attrs();
			self.pool.with_connection(|conn| {
				conn.add(&dn, attrs)?.success()?;
				Ok(())
			})?;
			self.is_new = false;
		} else {
			debug!(%dn, "Replacing directory entry attributes");
			let mods = self.attributes.to_replace_mods();
			self.pool.with_connection(|conn| {
				conn.modify(&dn, mods)?.success()?;
				Ok(())
			})?;
		}
		Ok(())
	}

	/// Reload the entry's attributes from the directory, discarding local
	/// modifications.
	pub fn restore(&mut self) -> Result<(), Error> {
		let dn = self.dn.clone();
		let entry = self.pool.with_connection(|conn| {
			let (entries, _) =
				conn.search(&dn, Scope::Base, "(objectClass=*)", vec!["*"])?.success()?;
			entries
				.into_iter()
				.next()
				.map(SearchEntry::construct)
				.ok_or_else(|| Error::Invalid(format!("No entry at {dn}")))
		})?;
		self.attributes = entry.into();
		self.is_new = false;
		Ok(())
	}

	/// Move the entry to a new DN.
	pub fn move_to(&mut self, new_dn: &str) -> Result<(), Error> {
		let old_dn = self.dn.clone();
		let (rdn, superior) = split_dn(new_dn)?;
		debug!(%old_dn, new_dn, "Renaming directory entry");
		self.pool.with_connection(|conn| {
			conn.modifydn(&old_dn, rdn, true, superior)?.success()?;
			Ok(())
		})?;
		self.dn = new_dn.to_owned();
		// Some attributes change when moving, so the set is reloaded.
		self.restore()
	}

	/// Delete the entry from the directory. It is marked new afterwards
	/// and can be stored again.
	pub fn remove(&mut self) -> Result<(), Error> {
		let dn = self.dn.clone();
		debug!(%dn, "Deleting directory entry");
		self.pool.with_connection(|conn| {
			conn.delete(&dn)?.success()?;
			Ok(())
		})?;
		self.is_new = true;
		Ok(())
	}
}

impl std::fmt::Debug for DirectoryEntry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DirectoryEntry")
			.field("dn", &self.dn)
			.field("is_new", &self.is_new)
			.field("attributes", &self.attributes.len())
			.finish()
	}
}

/// Split a DN into its leading RDN and the remaining superior DN,
/// respecting backslash-escaped separators.
pub(crate) fn split_dn(dn: &str) -> Result<(&str, Option<&str>), Error> {
	let mut escaped = false;
	for (index, c) in dn.char_indices() {
		if escaped {
			escaped = false;
		} else if c == '\\' {
			escaped = true;
		} else if c == ',' {
			let rdn = dn[..index].trim();
			if rdn.is_empty() {
				return Err(Error::Invalid(format!("Malformed DN: {dn}")));
			}
			return Ok((rdn, Some(dn[index + 1..].trim())));
		}
	}
	if dn.trim().is_empty() {
		return Err(Error::Invalid("Malformed DN: empty".to_owned()));
	}
	Ok((dn.trim(), None))
}
