//! Typed record façade over one directory entry.

use std::sync::Arc;

use crate::{
	entry::{lock_entry, SharedEntry},
	error::Error,
	manager::EntryManager,
	mapping::{self, PropertyValue, WriteMode},
	schema::RecordDefinition,
};

/// A typed view of one directory entry.
///
/// Every record obtained for a DN shares the same underlying entry while
/// that DN stays in the manager's cache, so property mutations made
/// through one record are visible through every other. Cloning a record
/// clones the binding, not the entry.
#[derive(Clone)]
pub struct Record {
	/// The shared entry this record reads and writes.
	entry: SharedEntry,
	/// Manager used for lifecycle operations and reference resolution.
	manager: Arc<EntryManager>,
	/// The type this record is bound to.
	definition: Arc<RecordDefinition>,
}

impl Record {
	/// Bind an entry to a definition.
	pub(crate) fn new(
		entry: SharedEntry,
		manager: Arc<EntryManager>,
		definition: Arc<RecordDefinition>,
	) -> Self {
		Record { entry, manager, definition }
	}

	/// The entry's DN.
	pub fn dn(&self) -> String {
		lock_entry(&self.entry).dn().to_owned()
	}

	/// Whether the entry does not exist in the directory yet.
	pub fn is_new(&self) -> bool {
		lock_entry(&self.entry).is_new()
	}

	/// The definition this record is bound to.
	pub fn definition(&self) -> &Arc<RecordDefinition> {
		&self.definition
	}

	/// The shared entry behind this record.
	pub fn entry(&self) -> &SharedEntry {
		&self.entry
	}

	/// The descriptor behind an accessor name.
	fn descriptor(&self, accessor: &str) -> Result<&crate::schema::PropertyDescriptor, Error> {
		self.definition.get(accessor).ok_or_else(|| {
			Error::Definition(format!(
				"\"{}\" declares no property \"{accessor}\"",
				self.definition.name()
			))
		})
	}

	/// Read a property.
	pub fn get(&self, accessor: &str) -> Result<Option<PropertyValue>, Error> {
		mapping::read(&self.entry, self.descriptor(accessor)?, &self.manager)
	}

	/// Replace a property's values. `None` deletes the attribute.
	pub fn set(&self, accessor: &str, value: Option<PropertyValue>) -> Result<(), Error> {
		mapping::write(&self.entry, self.descriptor(accessor)?, value, WriteMode::Set)
	}

	/// Append to a property's values.
	pub fn add(&self, accessor: &str, value: PropertyValue) -> Result<(), Error> {
		mapping::write(&self.entry, self.descriptor(accessor)?, Some(value), WriteMode::Add)
	}

	/// Save the entry to the directory.
	pub fn store(&self) -> Result<(), Error> {
		self.manager.store_entry(&self.entry)
	}

	/// Reload the entry from the directory, discarding local
	/// modifications.
	pub fn restore(&self) -> Result<(), Error> {
		self.manager.restore_entry(&self.entry)
	}

	/// Move the entry to a new DN.
	pub fn move_to(&self, new_dn: &str) -> Result<(), Error> {
		self.manager.move_entry(&self.entry, new_dn)
	}

	/// Delete the entry from the directory.
	pub fn remove(&self) -> Result<(), Error> {
		self.manager.remove_entry(&self.entry)
	}
}

impl std::fmt::Debug for Record {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Record")
			.field("dn", &self.dn())
			.field("definition", &self.definition.name())
			.finish()
	}
}
