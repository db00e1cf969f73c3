//! Conversion between typed property values and raw attribute values.
//!
//! Reads look the descriptor's attribute up on the entry and convert the
//! raw values to the requested shape; writes convert typed values to
//! their string form and store them. References to other entries resolve
//! through the entry manager, either by treating the raw value as a DN
//! or by substituting regexp capture groups into a search filter.

use std::sync::Arc;

use regex::Regex;

use crate::{
	entry::{lock_entry, SharedEntry},
	error::Error,
	manager::EntryManager,
	record::Record,
	schema::{PropertyDescriptor, TypeTag, ValueKind},
};

/// How a write treats existing attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
	/// Replace all existing values.
	Set,
	/// Append to the existing values.
	Add,
}

/// A typed property value.
#[derive(Debug, Clone)]
pub enum PropertyValue {
	/// Raw attribute text.
	Text(String),
	/// A boolean mapped through the descriptor's token lists.
	Bool(bool),
	/// A signed integer.
	Integer(i64),
	/// A floating point number.
	Float(f64),
	/// A reference to another directory entry.
	Record(Record),
	/// An ordered collection.
	List(Vec<PropertyValue>),
	/// A collection of distinct values.
	Set(Vec<PropertyValue>),
	/// A fixed-size collection, one slot per attribute value.
	Array(Vec<PropertyValue>),
}

impl PartialEq for PropertyValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(PropertyValue::Text(a), PropertyValue::Text(b)) => a == b,
			(PropertyValue::Bool(a), PropertyValue::Bool(b)) => a == b,
			(PropertyValue::Integer(a), PropertyValue::Integer(b)) => a == b,
			(PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
			(PropertyValue::Record(a), PropertyValue::Record(b)) => a.dn() == b.dn(),
			(PropertyValue::List(a), PropertyValue::List(b))
			| (PropertyValue::Set(a), PropertyValue::Set(b))
			| (PropertyValue::Array(a), PropertyValue::Array(b)) => a == b,
			_ => false,
		}
	}
}

/// Read the property described by `descriptor` from `entry`.
///
/// An absent attribute reads as `None`. Reference elements that resolve
/// to no entry read as `None` too, and are skipped inside collections.
pub fn read(
	entry: &SharedEntry,
	descriptor: &PropertyDescriptor,
	manager: &Arc<EntryManager>,
) -> Result<Option<PropertyValue>, Error> {
	// Clone the raw values out so no entry lock is held while references
	// resolve through the manager.
	let raw = {
		let entry = lock_entry(entry);
		entry.attributes().get(&descriptor.attribute).map(<[String]>::to_vec)
	};
	let Some(raw) = raw else {
		return Ok(None);
	};
	match descriptor.kind {
		ValueKind::Simple => match raw.first() {
			Some(first) => convert_element(first, descriptor, manager),
			None => Ok(None),
		},
		ValueKind::List => {
			Ok(Some(PropertyValue::List(convert_elements(&raw, descriptor, manager)?)))
		}
		ValueKind::Set => {
			let mut elements = Vec::new();
			for element in convert_elements(&raw, descriptor, manager)? {
				if !elements.contains(&element) {
					elements.push(element);
				}
			}
			Ok(Some(PropertyValue::Set(elements)))
		}
		ValueKind::Array => {
			Ok(Some(PropertyValue::Array(convert_elements(&raw, descriptor, manager)?)))
		}
	}
}

/// Convert every raw value, skipping references that resolve to nothing.
fn convert_elements(
	raw: &[String],
	descriptor: &PropertyDescriptor,
	manager: &Arc<EntryManager>,
) -> Result<Vec<PropertyValue>, Error> {
	let mut elements = Vec::with_capacity(raw.len());
	for value in raw {
		if let Some(element) = convert_element(value, descriptor, manager)? {
			elements.push(element);
		}
	}
	Ok(elements)
}

/// Convert one raw attribute value to the descriptor's element type.
fn convert_element(
	raw: &str,
	descriptor: &PropertyDescriptor,
	manager: &Arc<EntryManager>,
) -> Result<Option<PropertyValue>, Error> {
	match descriptor.element {
		TypeTag::Text => Ok(Some(PropertyValue::Text(raw.to_owned()))),
		TypeTag::Bool => {
			if descriptor.true_tokens.iter().any(|token| token.eq_ignore_ascii_case(raw)) {
				Ok(Some(PropertyValue::Bool(true)))
			} else if descriptor.false_tokens.iter().any(|token| token.eq_ignore_ascii_case(raw))
			{
				Ok(Some(PropertyValue::Bool(false)))
			} else {
				Err(Error::Conversion(format!("\"{raw}\" cannot be converted into a boolean")))
			}
		}
		TypeTag::Integer => raw
			.parse()
			.map(|value| Some(PropertyValue::Integer(value)))
			.map_err(|_| Error::Conversion(format!("\"{raw}\" is not an integer"))),
		TypeTag::Float => raw
			.parse()
			.map(|value| Some(PropertyValue::Float(value)))
			.map_err(|_| Error::Conversion(format!("\"{raw}\" is not a number"))),
		TypeTag::Reference => resolve_reference(raw, descriptor, manager),
	}
}

/// Resolve a reference element to the entry it points at.
fn resolve_reference(
	raw: &str,
	descriptor: &PropertyDescriptor,
	manager: &Arc<EntryManager>,
) -> Result<Option<PropertyValue>, Error> {
	let filter = descriptor.search_filter.as_deref().filter(|filter| !filter.is_empty());
	let record = match filter {
		// Without a filter the raw value is the referenced entry's DN.
		None => manager.find_record_by_dn(raw)?,
		Some(filter) => {
			let groups = match descriptor.search_regexp.as_deref() {
				Some(regexp) => regexp_groups(raw, regexp)?,
				None => Some(vec![raw.to_owned()]),
			};
			let filter = match groups {
				Some(groups) => format_positional(filter, &groups),
				// No match leaves the filter's placeholders in place.
				None => filter.to_owned(),
			};
			manager.search_first_record(&filter)?
		}
	};
	Ok(record.map(PropertyValue::Record))
}

/// Write a property value onto `entry` as described by `descriptor`.
///
/// `Set` replaces the attribute's values; setting `None` deletes the
/// attribute entirely instead of storing an empty value. `Add` appends
/// and requires a value.
pub fn write(
	entry: &SharedEntry,
	descriptor: &PropertyDescriptor,
	value: Option<PropertyValue>,
	mode: WriteMode,
) -> Result<(), Error> {
	let Some(value) = value else {
		return match mode {
			WriteMode::Set => {
				lock_entry(entry).attributes_mut().remove(&descriptor.attribute);
				Ok(())
			}
			WriteMode::Add => {
				Err(Error::Conversion("A value is required when adding".to_owned()))
			}
		};
	};

	let params = flatten(value);
	let stored = if let Some(pattern) = &descriptor.composite_pattern {
		// Composite patterns combine all parameters into a single value.
		let strings = to_strings(&params, descriptor)?;
		vec![format_positional(pattern, &strings)]
	} else {
		to_strings(&params, descriptor)?
	};

	let mut entry = lock_entry(entry);
	let attributes = entry.attributes_mut();
	match mode {
		WriteMode::Set => attributes.put(&descriptor.attribute, stored),
		WriteMode::Add => {
			for value in stored {
				attributes.add_value(&descriptor.attribute, value);
			}
		}
	}
	Ok(())
}

/// Split a container value into its elements; plain values are a single
/// parameter.
fn flatten(value: PropertyValue) -> Vec<PropertyValue> {
	match value {
		PropertyValue::List(elements)
		| PropertyValue::Set(elements)
		| PropertyValue::Array(elements) => elements,
		other => vec![other],
	}
}

/// Convert each parameter to the string form stored in the directory.
fn to_strings(
	params: &[PropertyValue],
	descriptor: &PropertyDescriptor,
) -> Result<Vec<String>, Error> {
	params.iter().map(|param| value_to_string(param, descriptor)).collect()
}

/// The string form of one typed value.
fn value_to_string(value: &PropertyValue, descriptor: &PropertyDescriptor) -> Result<String, Error> {
	match value {
		PropertyValue::Text(text) => Ok(text.clone()),
		PropertyValue::Bool(value) => {
			let tokens =
				if *value { &descriptor.true_tokens } else { &descriptor.false_tokens };
			tokens.first().cloned().ok_or_else(|| {
				Error::Conversion(format!(
					"No token configured to store {value} in \"{}\"",
					descriptor.attribute
				))
			})
		}
		PropertyValue::Integer(value) => Ok(value.to_string()),
		PropertyValue::Float(value) => Ok(value.to_string()),
		PropertyValue::Record(record) => Ok(record.dn()),
		PropertyValue::List(_) | PropertyValue::Set(_) | PropertyValue::Array(_) => Err(
			Error::Conversion("Nested collections cannot be stored".to_owned()),
		),
	}
}

/// Replace positional `$i` placeholders with the corresponding
/// parameter. Higher indices are substituted first so `$1` does not eat
/// the prefix of `$10`.
pub(crate) fn format_positional(pattern: &str, params: &[String]) -> String {
	let mut result = pattern.to_owned();
	for (index, param) in params.iter().enumerate().rev() {
		result = result.replace(&format!("${index}"), param);
	}
	result
}

/// Capture groups of `regexp` applied to `source`, or `None` when it
/// does not match.
pub(crate) fn regexp_groups(source: &str, regexp: &str) -> Result<Option<Vec<String>>, Error> {
	let regexp = Regex::new(regexp)
		.map_err(|err| Error::Conversion(format!("Invalid reference expression: {err}")))?;
	let Some(captures) = regexp.captures(source) else {
		return Ok(None);
	};
	let groups = (1..captures.len())
		.map(|index| captures.get(index).map_or_else(String::new, |m| m.as_str().to_owned()))
		.collect();
	Ok(Some(groups))
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::sync::Arc;

	use super::{format_positional, read, regexp_groups, write, PropertyValue, WriteMode};
	use crate::{
		config::Config,
		entry::{lock_entry, Attributes, SharedEntry},
		error::Error,
		manager::EntryManager,
		schema::{ObjectClassDescriptor, PropertyDescriptor, RecordDefinition, TypeTag, ValueKind},
	};

	/// An offline manager; the pool opens no connection until a directory
	/// operation is attempted.
	fn manager() -> Arc<EntryManager> {
		EntryManager::new(&Config::example())
	}

	/// Adopt an entry with the given single-valued attributes into the
	/// manager's cache.
	fn seeded(manager: &Arc<EntryManager>, dn: &str, attrs: &[(&str, &str)]) -> SharedEntry {
		let mut attributes = Attributes::new();
		for (name, value) in attrs {
			attributes.add_value(name, (*value).to_owned());
		}
		manager.adopt(dn, attributes)
	}

	#[test]
	fn absent_attribute_reads_as_none() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[]);
		let descriptor = PropertyDescriptor::new("description");
		assert_eq!(read(&entry, &descriptor, &manager).unwrap(), None);
	}

	#[test]
	fn boolean_round_trip_through_tokens() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[]);
		let descriptor = PropertyDescriptor::new("active")
			.element(TypeTag::Bool)
			.true_tokens(&["yes"])
			.false_tokens(&["no"]);

		write(&entry, &descriptor, Some(PropertyValue::Bool(true)), WriteMode::Set).unwrap();
		assert_eq!(lock_entry(&entry).attributes().first("active"), Some("yes"));
		assert_eq!(
			read(&entry, &descriptor, &manager).unwrap(),
			Some(PropertyValue::Bool(true))
		);

		write(&entry, &descriptor, Some(PropertyValue::Bool(false)), WriteMode::Set).unwrap();
		assert_eq!(
			read(&entry, &descriptor, &manager).unwrap(),
			Some(PropertyValue::Bool(false))
		);
	}

	#[test]
	fn unmatched_boolean_token_is_a_conversion_error() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[("active", "maybe")]);
		let descriptor = PropertyDescriptor::new("active")
			.element(TypeTag::Bool)
			.true_tokens(&["yes"])
			.false_tokens(&["no"]);
		assert!(matches!(
			read(&entry, &descriptor, &manager).unwrap_err(),
			Error::Conversion(_)
		));
	}

	#[test]
	fn numbers_parse_and_fail_loudly() {
		let manager = manager();
		let entry = seeded(
			&manager,
			"cn=x,dc=example,dc=org",
			&[("uidNumber", "1234"), ("height", "1.75"), ("shoeSize", "tiny")],
		);

		let uid = PropertyDescriptor::new("uidNumber").element(TypeTag::Integer);
		assert_eq!(
			read(&entry, &uid, &manager).unwrap(),
			Some(PropertyValue::Integer(1234))
		);

		let height = PropertyDescriptor::new("height").element(TypeTag::Float);
		assert_eq!(
			read(&entry, &height, &manager).unwrap(),
			Some(PropertyValue::Float(1.75))
		);

		let shoe = PropertyDescriptor::new("shoeSize").element(TypeTag::Integer);
		assert!(matches!(read(&entry, &shoe, &manager).unwrap_err(), Error::Conversion(_)));
	}

	#[test]
	fn collections_convert_every_value() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[]);
		{
			let mut entry = lock_entry(&entry);
			let attributes = entry.attributes_mut();
			attributes.put(
				"memberUid",
				vec!["10".to_owned(), "20".to_owned(), "10".to_owned()],
			);
		}

		let list = PropertyDescriptor::new("memberUid")
			.kind(ValueKind::List)
			.element(TypeTag::Integer);
		assert_eq!(
			read(&entry, &list, &manager).unwrap(),
			Some(PropertyValue::List(vec![
				PropertyValue::Integer(10),
				PropertyValue::Integer(20),
				PropertyValue::Integer(10),
			]))
		);

		let set = list.clone().kind(ValueKind::Set);
		assert_eq!(
			read(&entry, &set, &manager).unwrap(),
			Some(PropertyValue::Set(vec![
				PropertyValue::Integer(10),
				PropertyValue::Integer(20),
			]))
		);

		let array = list.kind(ValueKind::Array);
		let Some(PropertyValue::Array(elements)) = read(&entry, &array, &manager).unwrap()
		else {
			panic!("expected an array");
		};
		assert_eq!(elements.len(), 3);
	}

	#[test]
	fn set_replaces_add_appends_none_deletes() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[("cn", "old")]);
		let descriptor = PropertyDescriptor::new("cn");

		write(
			&entry,
			&descriptor,
			Some(PropertyValue::Text("first".to_owned())),
			WriteMode::Set,
		)
		.unwrap();
		assert_eq!(lock_entry(&entry).attributes().get("cn").unwrap(), ["first"]);

		write(
			&entry,
			&descriptor,
			Some(PropertyValue::Text("second".to_owned())),
			WriteMode::Add,
		)
		.unwrap();
		assert_eq!(
			lock_entry(&entry).attributes().get("cn").unwrap(),
			["first", "second"]
		);

		write(&entry, &descriptor, None, WriteMode::Set).unwrap();
		assert!(!lock_entry(&entry).attributes().contains("cn"));

		assert!(matches!(
			write(&entry, &descriptor, None, WriteMode::Add).unwrap_err(),
			Error::Conversion(_)
		));
	}

	#[test]
	fn collection_writes_store_each_element() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[]);
		let descriptor = PropertyDescriptor::new("memberUid").kind(ValueKind::List);
		write(
			&entry,
			&descriptor,
			Some(PropertyValue::List(vec![
				PropertyValue::Integer(1),
				PropertyValue::Integer(2),
			])),
			WriteMode::Set,
		)
		.unwrap();
		assert_eq!(
			lock_entry(&entry).attributes().get("memberUid").unwrap(),
			["1", "2"]
		);
	}

	#[test]
	fn composite_pattern_stores_one_value() {
		let manager = manager();
		let entry = seeded(&manager, "cn=x,dc=example,dc=org", &[]);
		let descriptor = PropertyDescriptor::new("label").composite_pattern("$2-$0-$1");
		write(
			&entry,
			&descriptor,
			Some(PropertyValue::List(vec![
				PropertyValue::Integer(5),
				PropertyValue::Integer(7),
				PropertyValue::Text("U1".to_owned()),
			])),
			WriteMode::Set,
		)
		.unwrap();
		assert_eq!(
			lock_entry(&entry).attributes().get("label").unwrap(),
			["U1-5-7"]
		);
	}

	#[test]
	fn dn_reference_resolves_through_the_identity_map() {
		let manager = manager();
		let _referenced = seeded(
			&manager,
			"cn=boss,dc=example,dc=org",
			&[("objectClass", "person"), ("cn", "boss")],
		);
		let entry = seeded(
			&manager,
			"cn=worker,dc=example,dc=org",
			&[("manager", "cn=boss,dc=example,dc=org")],
		);

		let descriptor = PropertyDescriptor::new("manager").element(TypeTag::Reference);
		let Some(PropertyValue::Record(record)) =
			read(&entry, &descriptor, &manager).unwrap()
		else {
			panic!("expected a resolved reference");
		};
		assert_eq!(record.dn(), "cn=boss,dc=example,dc=org");

		// The resolved record is the same shared entry the cache holds.
		let resolved = manager.entry_by_dn("cn=boss,dc=example,dc=org");
		assert!(Arc::ptr_eq(record.entry(), &resolved));
	}

	#[test]
	fn reference_writes_store_the_dn() {
		let manager = manager();
		let referenced = seeded(
			&manager,
			"cn=boss,dc=example,dc=org",
			&[("objectClass", "person")],
		);
		let record = manager.record_or_untyped(&referenced);
		let entry = seeded(&manager, "cn=worker,dc=example,dc=org", &[]);

		let descriptor = PropertyDescriptor::new("manager").element(TypeTag::Reference);
		write(
			&entry,
			&descriptor,
			Some(PropertyValue::Record(record)),
			WriteMode::Set,
		)
		.unwrap();
		assert_eq!(
			lock_entry(&entry).attributes().first("manager"),
			Some("cn=boss,dc=example,dc=org")
		);
	}

	#[test]
	fn positional_formatting() {
		let params: Vec<String> =
			["a", "b", "c"].iter().map(|&s| s.to_owned()).collect();
		assert_eq!(format_positional("$2-$0-$1", &params), "c-a-b");
		assert_eq!(format_positional("no placeholders", &params), "no placeholders");

		// $10 is not eaten by $1.
		let many: Vec<String> = (0..11).map(|i| format!("p{i}")).collect();
		assert_eq!(format_positional("$10/$1", &many), "p10/p1");
	}

	#[test]
	fn regexp_group_extraction() {
		let groups = regexp_groups("uid=jdoe,ou=people", r"uid=([^,]+),ou=(\w+)")
			.unwrap()
			.unwrap();
		assert_eq!(groups, vec!["jdoe", "people"]);

		assert_eq!(regexp_groups("nothing here", r"uid=(\w+)").unwrap(), None);
		assert!(regexp_groups("x", "(unclosed").is_err());
	}

	#[test]
	fn records_route_property_access_through_the_table() {
		let manager = manager();
		let definition = manager.register(
			RecordDefinition::new("person", ObjectClassDescriptor::new(&["person"]))
				.property("name", PropertyDescriptor::new("cn"))
				.property(
					"active",
					PropertyDescriptor::new("active")
						.element(TypeTag::Bool)
						.true_tokens(&["yes"])
						.false_tokens(&["no"]),
				),
		);
		seeded(
			&manager,
			"cn=a,dc=example,dc=org",
			&[("objectClass", "person"), ("cn", "a")],
		);
		let record = manager.find_by_dn(&definition, "cn=a,dc=example,dc=org").unwrap().unwrap();

		assert_eq!(
			record.get("name").unwrap(),
			Some(PropertyValue::Text("a".to_owned()))
		);
		record.set("active", Some(PropertyValue::Bool(true))).unwrap();
		assert_eq!(record.get("active").unwrap(), Some(PropertyValue::Bool(true)));

		// Unknown accessors are definition errors.
		assert!(matches!(record.get("nope").unwrap_err(), Error::Definition(_)));
	}
}
