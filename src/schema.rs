//! Declarative metadata describing typed record types.
//!
//! Instead of discovering accessors at runtime, a record type is built
//! once, up front: an [`ObjectClassDescriptor`] naming the directory
//! object classes the type requires, and a [`RecordDefinition`] mapping
//! accessor names to [`PropertyDescriptor`]s. Property access then is a
//! table lookup followed by a call into the mapping engine.

use std::sync::Arc;

use crate::{entry::Attributes, error::Error};

/// The typed form a property's elements convert to and from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
	/// Raw attribute text.
	Text,
	/// Boolean, mapped through the descriptor's token lists.
	Bool,
	/// Signed integer, parsed decimally.
	Integer,
	/// Floating point number.
	Float,
	/// A typed reference to another directory entry.
	Reference,
}

/// The container shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
	/// A single value; extra attribute values are ignored on read.
	Simple,
	/// All attribute values, in order.
	List,
	/// All distinct attribute values.
	Set,
	/// All attribute values as a fixed-size slice.
	Array,
}

/// Declarative description of one mapped property.
///
/// Built once per accessor with the builder methods and never mutated
/// afterwards.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
	/// Name of the directory attribute the property maps onto.
	pub attribute: String,
	/// Container shape.
	pub kind: ValueKind,
	/// Element type.
	pub element: TypeTag,
	/// Raw values accepted as `true`, compared case-insensitively. The
	/// first one is written.
	pub true_tokens: Vec<String>,
	/// Raw values accepted as `false`, compared case-insensitively. The
	/// first one is written.
	pub false_tokens: Vec<String>,
	/// Positional `$i` pattern combining several parameters into one
	/// composite attribute value.
	pub composite_pattern: Option<String>,
	/// Search filter used to resolve a reference; without one the raw
	/// value is treated as a DN.
	pub search_filter: Option<String>,
	/// Regular expression whose capture groups feed `search_filter`'s
	/// `$i` placeholders.
	pub search_regexp: Option<String>,
}

impl PropertyDescriptor {
	/// A simple text property mapped onto `attribute`.
	pub fn new(attribute: &str) -> Self {
		PropertyDescriptor {
			attribute: attribute.to_owned(),
			kind: ValueKind::Simple,
			element: TypeTag::Text,
			true_tokens: vec!["true".to_owned()],
			false_tokens: vec!["false".to_owned()],
			composite_pattern: None,
			search_filter: None,
			search_regexp: None,
		}
	}

	/// Change the container shape.
	#[must_use]
	pub fn kind(mut self, kind: ValueKind) -> Self {
		self.kind = kind;
		self
	}

	/// Change the element type.
	#[must_use]
	pub fn element(mut self, element: TypeTag) -> Self {
		self.element = element;
		self
	}

	/// Replace the tokens accepted and written for `true`.
	#[must_use]
	pub fn true_tokens(mut self, tokens: &[&str]) -> Self {
		self.true_tokens = tokens.iter().map(|&token| token.to_owned()).collect();
		self
	}

	/// Replace the tokens accepted and written for `false`.
	#[must_use]
	pub fn false_tokens(mut self, tokens: &[&str]) -> Self {
		self.false_tokens = tokens.iter().map(|&token| token.to_owned()).collect();
		self
	}

	/// Store writes through a positional `$i` pattern.
	#[must_use]
	pub fn composite_pattern(mut self, pattern: &str) -> Self {
		self.composite_pattern = Some(pattern.to_owned());
		self
	}

	/// Resolve references through a search filter instead of a DN.
	#[must_use]
	pub fn search_filter(mut self, filter: &str) -> Self {
		self.search_filter = Some(filter.to_owned());
		self
	}

	/// Extract filter parameters from the raw value with a regular
	/// expression.
	#[must_use]
	pub fn search_regexp(mut self, regexp: &str) -> Self {
		self.search_regexp = Some(regexp.to_owned());
		self
	}
}

/// The directory object classes a record type requires, including those
/// of its ancestors.
#[derive(Debug, Clone, Default)]
pub struct ObjectClassDescriptor {
	/// Classes this type itself requires.
	classes: Vec<String>,
	/// Ancestor types whose requirements are inherited.
	parents: Vec<Arc<ObjectClassDescriptor>>,
}

impl ObjectClassDescriptor {
	/// Describe a type requiring the given object classes.
	pub fn new(classes: &[&str]) -> Self {
		ObjectClassDescriptor {
			classes: classes.iter().map(|&class| class.to_owned()).collect(),
			parents: Vec::new(),
		}
	}

	/// Inherit another type's requirements.
	#[must_use]
	pub fn with_parent(mut self, parent: Arc<ObjectClassDescriptor>) -> Self {
		self.parents.push(parent);
		self
	}

	/// Every required class, own ones first, ancestors after, without
	/// duplicates.
	pub fn all_classes(&self) -> Vec<String> {
		let mut all = Vec::new();
		self.collect_classes(&mut all);
		all
	}

	/// Depth-first collection behind [`ObjectClassDescriptor::all_classes`].
	fn collect_classes(&self, all: &mut Vec<String>) {
		for class in &self.classes {
			if !all.iter().any(|known| known.eq_ignore_ascii_case(class)) {
				all.push(class.clone());
			}
		}
		for parent in &self.parents {
			parent.collect_classes(all);
		}
	}

	/// Check that `attributes` carries every required class, recursively
	/// over the ancestry.
	pub fn check(&self, attributes: &Attributes) -> Result<(), Error> {
		let present = attributes.get("objectClass").unwrap_or(&[]);
		for class in self.all_classes() {
			if !present.iter().any(|value| value.eq_ignore_ascii_case(&class)) {
				return Err(Error::Definition(format!(
					"Entry does not carry the \"{class}\" object class"
				)));
			}
		}
		Ok(())
	}

	/// Add every required class to `attributes`, skipping those already
	/// present.
	pub fn stamp(&self, attributes: &mut Attributes) {
		for class in self.all_classes() {
			let already = attributes
				.get("objectClass")
				.is_some_and(|values| values.iter().any(|value| value.eq_ignore_ascii_case(&class)));
			if !already {
				attributes.add_value("objectClass", class);
			}
		}
	}
}

/// A complete record type: its object classes plus the ordered accessor
/// dispatch table.
#[derive(Debug, Clone)]
pub struct RecordDefinition {
	/// Name of the type, used in error messages.
	name: String,
	/// Object classes the type requires.
	object_classes: Arc<ObjectClassDescriptor>,
	/// Accessor name → property descriptor, in declaration order.
	properties: Vec<(String, PropertyDescriptor)>,
}

impl RecordDefinition {
	/// Start a definition for a type with the given object classes.
	pub fn new(name: &str, object_classes: ObjectClassDescriptor) -> Self {
		RecordDefinition {
			name: name.to_owned(),
			object_classes: Arc::new(object_classes),
			properties: Vec::new(),
		}
	}

	/// A definition with no requirements and no properties; DN references
	/// to entries matching no registered type bind to this.
	pub(crate) fn untyped() -> Self {
		RecordDefinition {
			name: "entry".to_owned(),
			object_classes: Arc::new(ObjectClassDescriptor::default()),
			properties: Vec::new(),
		}
	}

	/// Declare a property. Accessor names are unique; a duplicate
	/// replaces the earlier declaration.
	#[must_use]
	pub fn property(mut self, accessor: &str, descriptor: PropertyDescriptor) -> Self {
		if let Some(existing) =
			self.properties.iter_mut().find(|(name, _)| name.as_str() == accessor)
		{
			existing.1 = descriptor;
		} else {
			self.properties.push((accessor.to_owned(), descriptor));
		}
		self
	}

	/// The type's name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The type's object class requirements.
	pub fn object_classes(&self) -> &Arc<ObjectClassDescriptor> {
		&self.object_classes
	}

	/// Look up a property descriptor by accessor name.
	pub fn get(&self, accessor: &str) -> Option<&PropertyDescriptor> {
		self.properties
			.iter()
			.find(|(name, _)| name == accessor)
			.map(|(_, descriptor)| descriptor)
	}

	/// Accessor names in declaration order.
	pub fn accessors(&self) -> impl Iterator<Item = &str> {
		self.properties.iter().map(|(name, _)| name.as_str())
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::sync::Arc;

	use super::{ObjectClassDescriptor, PropertyDescriptor, RecordDefinition};
	use crate::entry::Attributes;

	/// Attributes carrying the given object classes.
	fn with_classes(classes: &[&str]) -> Attributes {
		let mut attributes = Attributes::new();
		attributes
			.put("objectClass", classes.iter().map(|&class| class.to_owned()).collect());
		attributes
	}

	#[test]
	fn check_walks_the_ancestry() {
		let top = Arc::new(ObjectClassDescriptor::new(&["top"]));
		let person = ObjectClassDescriptor::new(&["person"]).with_parent(top);

		person.check(&with_classes(&["top", "person", "inetOrgPerson"])).unwrap();
		assert!(person.check(&with_classes(&["top"])).is_err());
		assert!(person.check(&with_classes(&["person"])).is_err());
	}

	#[test]
	fn check_matches_classes_case_insensitively() {
		let person = ObjectClassDescriptor::new(&["person"]);
		person.check(&with_classes(&["Person"])).unwrap();
	}

	#[test]
	fn stamp_adds_missing_classes_once() {
		let top = Arc::new(ObjectClassDescriptor::new(&["top"]));
		let person = ObjectClassDescriptor::new(&["person"]).with_parent(top);

		let mut attributes = with_classes(&["top"]);
		person.stamp(&mut attributes);
		assert_eq!(attributes.get("objectClass").unwrap(), ["top", "person"]);

		// Stamping twice changes nothing.
		person.stamp(&mut attributes);
		assert_eq!(attributes.get("objectClass").unwrap().len(), 2);
	}

	#[test]
	fn definition_table_lookup() {
		let definition = RecordDefinition::new("person", ObjectClassDescriptor::new(&["person"]))
			.property("name", PropertyDescriptor::new("cn"))
			.property("surname", PropertyDescriptor::new("sn"));

		assert_eq!(definition.get("name").unwrap().attribute, "cn");
		assert!(definition.get("missing").is_none());
		let accessors: Vec<_> = definition.accessors().collect();
		assert_eq!(accessors, vec!["name", "surname"]);

		// A duplicate accessor replaces the earlier descriptor.
		let definition = definition.property("name", PropertyDescriptor::new("displayName"));
		assert_eq!(definition.get("name").unwrap().attribute, "displayName");
		assert_eq!(definition.accessors().count(), 2);
	}
}
