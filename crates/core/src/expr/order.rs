use std::cmp::Ordering;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::val::{Row, cmp_values};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	#[default]
	Asc,
	Desc,
}

/// An ordered list of fields to sort rows by.
///
/// Serialized as a JSON object whose key order is the sort priority,
/// for example `{"completed":"asc","title":"desc"}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderBy(pub Vec<(String, Direction)>);

impl OrderBy {
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Appends an ascending sort on the given field
	pub fn asc(mut self, field: &str) -> Self {
		self.0.push((field.to_owned(), Direction::Asc));
		self
	}

	/// Appends a descending sort on the given field
	pub fn desc(mut self, field: &str) -> Self {
		self.0.push((field.to_owned(), Direction::Desc));
		self
	}

	/// Compares two rows field by field
	pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
		for (field, dir) in &self.0 {
			let l = a.get(field).unwrap_or(&Value::Null);
			let r = b.get(field).unwrap_or(&Value::Null);
			let o = match dir {
				Direction::Asc => cmp_values(l, r),
				Direction::Desc => cmp_values(r, l),
			};
			if o != Ordering::Equal {
				return o;
			}
		}
		Ordering::Equal
	}
}

impl Serialize for OrderBy {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.0.len()))?;
		for (k, v) in &self.0 {
			map.serialize_entry(k, v)?;
		}
		map.end()
	}
}

struct OrderByVisitor;

impl<'de> Visitor<'de> for OrderByVisitor {
	type Value = OrderBy;

	fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str("a map of field names to \"asc\" or \"desc\"")
	}

	fn visit_unit<E: de::Error>(self) -> Result<OrderBy, E> {
		Ok(OrderBy::default())
	}

	fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OrderBy, A::Error> {
		let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
		while let Some((k, v)) = access.next_entry::<String, Direction>()? {
			out.push((k, v));
		}
		Ok(OrderBy(out))
	}
}

impl<'de> Deserialize<'de> for OrderBy {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		deserializer.deserialize_any(OrderByVisitor)
	}
}
