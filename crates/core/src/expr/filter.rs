use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::err::Error;
use crate::val::{Row, cmp_values, eq_values};

/// The most values an `$in` list may hold and still be sent in a URL
const MAX_URL_ARRAY_LEN: usize = 10;

/// A where clause in its JSON form.
///
/// A filter keeps the JSON it was created from, so that it is sent over
/// the wire exactly as the caller wrote it, alongside a parsed tree used
/// to evaluate rows on the server.
#[derive(Clone, Default)]
pub struct Filter {
	raw: Row,
	node: Node,
}

#[derive(Clone, Debug, Default, PartialEq)]
enum Node {
	#[default]
	All,
	And(Vec<Node>),
	Or(Vec<Node>),
	Not(Box<Node>),
	Field {
		field: String,
		op: Op,
		value: Value,
	},
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
	Eq,
	Ne,
	Gt,
	Gte,
	Lt,
	Lte,
	In,
	Nin,
	Contains,
	NotContains,
	StartsWith,
	EndsWith,
}

impl Op {
	fn parse(s: &str) -> Option<Op> {
		Some(match s {
			"$eq" => Op::Eq,
			"$ne" | "!=" => Op::Ne,
			"$gt" => Op::Gt,
			"$gte" => Op::Gte,
			"$lt" => Op::Lt,
			"$lte" => Op::Lte,
			"$in" => Op::In,
			"$nin" => Op::Nin,
			"$contains" => Op::Contains,
			"$notContains" => Op::NotContains,
			"$startsWith" => Op::StartsWith,
			"$endsWith" => Op::EndsWith,
			_ => return None,
		})
	}
}

impl Filter {
	/// A filter which matches every row
	pub fn all() -> Self {
		Self::default()
	}

	/// Parses a filter from a JSON object
	pub fn from_json(value: Value) -> Result<Self, Error> {
		match value {
			Value::Null => Ok(Self::all()),
			Value::Object(raw) => {
				let node = parse_object(&raw)?;
				Ok(Self {
					raw,
					node,
				})
			}
			v => Err(Error::InvalidFilter(format!("expected an object, found {v}"))),
		}
	}

	/// A filter matching rows where `field` equals `value`
	pub fn eq(field: &str, value: impl Into<Value>) -> Self {
		Self::single(field, value.into())
	}

	/// A filter matching rows where `field` contains `value`, ignoring case
	pub fn contains(field: &str, value: &str) -> Self {
		let mut op = Row::new();
		op.insert("$contains".to_owned(), Value::from(value));
		Self::single(field, Value::Object(op))
	}

	fn single(field: &str, value: Value) -> Self {
		let mut raw = Row::new();
		raw.insert(field.to_owned(), value);
		let node = parse_object(&raw).unwrap_or_default();
		Self {
			raw,
			node,
		}
	}

	/// Returns the JSON form of this filter
	pub fn to_json(&self) -> Value {
		Value::Object(self.raw.clone())
	}

	/// Whether this filter matches every row
	pub fn is_empty(&self) -> bool {
		self.raw.is_empty()
	}

	/// Evaluates this filter against a row
	pub fn matches(&self, row: &Row) -> bool {
		self.node.matches(row)
	}

	/// Whether this filter is simple enough to be sent as a URL query parameter
	pub fn fits_in_url(&self) -> bool {
		fits_in_url(&self.raw)
	}
}

fn fits_in_url(raw: &Row) -> bool {
	raw.iter().all(|(k, v)| {
		if k == "$and" || k == "$or" {
			return false;
		}
		match v {
			Value::Array(a) => a.len() <= MAX_URL_ARRAY_LEN && !a.iter().any(Value::is_object),
			Value::Object(o) => fits_in_url(o),
			_ => true,
		}
	})
}

fn parse_object(raw: &Row) -> Result<Node, Error> {
	let mut all = Vec::with_capacity(raw.len());
	for (key, value) in raw {
		match key.as_str() {
			"$and" | "$or" => {
				let Value::Array(items) = value else {
					return Err(Error::InvalidFilter(format!("{key} expects an array")));
				};
				let mut nodes = Vec::with_capacity(items.len());
				for item in items {
					match item {
						Value::Object(o) => nodes.push(parse_object(o)?),
						v => {
							return Err(Error::InvalidFilter(format!(
								"{key} expects objects, found {v}"
							)));
						}
					}
				}
				all.push(if key == "$and" {
					Node::And(nodes)
				} else {
					Node::Or(nodes)
				});
			}
			"$not" => match value {
				Value::Object(o) => all.push(Node::Not(Box::new(parse_object(o)?))),
				v => return Err(Error::InvalidFilter(format!("$not expects an object, found {v}"))),
			},
			k if k.starts_with('$') => {
				return Err(Error::InvalidFilter(format!("unknown operator {k}")));
			}
			field => parse_field(field, value, &mut all)?,
		}
	}
	Ok(match all.len() {
		0 => Node::All,
		1 => all.remove(0),
		_ => Node::And(all),
	})
}

fn parse_field(field: &str, value: &Value, out: &mut Vec<Node>) -> Result<(), Error> {
	let node = |op, value: &Value| Node::Field {
		field: field.to_owned(),
		op,
		value: value.clone(),
	};
	match value {
		Value::Array(_) => out.push(node(Op::In, value)),
		Value::Object(ops) if ops.keys().any(|k| k.starts_with('$') || k == "!=") => {
			for (k, v) in ops {
				if k == "$not" {
					// A field level negation is an inequality or an exclusion list
					out.push(match v {
						Value::Array(_) => node(Op::Nin, v),
						_ => node(Op::Ne, v),
					});
					continue;
				}
				let op = Op::parse(k)
					.ok_or_else(|| Error::InvalidFilter(format!("unknown operator {k}")))?;
				match (op, v) {
					(Op::In | Op::Nin, Value::Array(_)) => out.push(node(op, v)),
					(Op::In | Op::Nin, v) => {
						return Err(Error::InvalidFilter(format!("{k} expects an array, found {v}")));
					}
					(Op::Contains | Op::NotContains | Op::StartsWith | Op::EndsWith, Value::String(_)) => {
						out.push(node(op, v))
					}
					(Op::Contains | Op::NotContains | Op::StartsWith | Op::EndsWith, v) => {
						return Err(Error::InvalidFilter(format!("{k} expects a string, found {v}")));
					}
					(op, v) => out.push(node(op, v)),
				}
			}
		}
		v => out.push(node(Op::Eq, v)),
	}
	Ok(())
}

impl Node {
	fn matches(&self, row: &Row) -> bool {
		match self {
			Node::All => true,
			Node::And(v) => v.iter().all(|n| n.matches(row)),
			Node::Or(v) => v.iter().any(|n| n.matches(row)),
			Node::Not(n) => !n.matches(row),
			Node::Field {
				field,
				op,
				value,
			} => {
				let left = row.get(field).unwrap_or(&Value::Null);
				compare(left, *op, value)
			}
		}
	}
}

fn compare(left: &Value, op: Op, right: &Value) -> bool {
	use std::cmp::Ordering::*;
	let ordered = |accept: &[std::cmp::Ordering]| match (left, right) {
		(Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
			accept.contains(&cmp_values(left, right))
		}
		_ => false,
	};
	let text = |f: fn(&str, &str) -> bool| match (left, right) {
		(Value::String(l), Value::String(r)) => f(&l.to_lowercase(), &r.to_lowercase()),
		_ => false,
	};
	let listed = || match right {
		Value::Array(a) => a.iter().any(|v| eq_values(left, v)),
		_ => false,
	};
	match op {
		Op::Eq => eq_values(left, right),
		Op::Ne => !eq_values(left, right),
		Op::Gt => ordered(&[Greater]),
		Op::Gte => ordered(&[Greater, Equal]),
		Op::Lt => ordered(&[Less]),
		Op::Lte => ordered(&[Less, Equal]),
		Op::In => listed(),
		Op::Nin => !listed(),
		Op::Contains => text(|l, r| l.contains(r)),
		Op::NotContains => !text(|l, r| l.contains(r)),
		Op::StartsWith => text(|l, r| l.starts_with(r)),
		Op::EndsWith => text(|l, r| l.ends_with(r)),
	}
}

impl PartialEq for Filter {
	fn eq(&self, other: &Self) -> bool {
		self.raw == other.raw
	}
}

impl fmt::Debug for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Filter({})", Value::Object(self.raw.clone()))
	}
}

impl Serialize for Filter {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.raw.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Filter {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		Filter::from_json(value).map_err(D::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn row(v: Value) -> Row {
		match v {
			Value::Object(o) => o,
			_ => unreachable!(),
		}
	}

	fn filter(v: Value) -> Filter {
		Filter::from_json(v).unwrap()
	}

	#[test]
	fn empty_filter_matches_everything() {
		let f = Filter::all();
		assert!(f.is_empty());
		assert!(f.matches(&row(json!({"id": 1}))));
		assert!(filter(Value::Null).is_empty());
	}

	#[test]
	fn equality_and_lists() {
		let r = row(json!({"id": 1, "title": "a", "done": false}));
		assert!(filter(json!({"title": "a"})).matches(&r));
		assert!(!filter(json!({"title": "b"})).matches(&r));
		assert!(filter(json!({"id": [1, 2]})).matches(&r));
		assert!(!filter(json!({"id": {"$nin": [1, 2]}})).matches(&r));
		assert!(filter(json!({"title": {"$ne": "b"}})).matches(&r));
		assert!(filter(json!({"title": {"$not": "b"}})).matches(&r));
		assert!(!filter(json!({"title": {"$not": ["a"]}})).matches(&r));
		assert!(filter(json!({"done": false, "id": 1})).matches(&r));
		assert!(!filter(json!({"missing": 1})).matches(&r));
	}

	#[test]
	fn ordering_operators() {
		let r = row(json!({"n": 5, "s": "m"}));
		assert!(filter(json!({"n": {"$gt": 4, "$lte": 5}})).matches(&r));
		assert!(!filter(json!({"n": {"$lt": 5}})).matches(&r));
		assert!(filter(json!({"s": {"$gte": "a"}})).matches(&r));
		assert!(!filter(json!({"n": {"$gt": "4"}})).matches(&r));
	}

	#[test]
	fn text_operators_ignore_case() {
		let r = row(json!({"title": "Buy Milk"}));
		assert!(filter(json!({"title": {"$contains": "milk"}})).matches(&r));
		assert!(filter(json!({"title": {"$notContains": "eggs"}})).matches(&r));
		assert!(filter(json!({"title": {"$startsWith": "buy"}})).matches(&r));
		assert!(filter(json!({"title": {"$endsWith": "MILK"}})).matches(&r));
		assert!(!filter(json!({"title": {"$startsWith": "milk"}})).matches(&r));
	}

	#[test]
	fn logical_operators() {
		let r = row(json!({"a": 1, "b": 2}));
		assert!(filter(json!({"$or": [{"a": 2}, {"b": 2}]})).matches(&r));
		assert!(!filter(json!({"$and": [{"a": 1}, {"b": 3}]})).matches(&r));
		assert!(filter(json!({"$not": {"a": 2}})).matches(&r));
	}

	#[test]
	fn invalid_filters_are_rejected() {
		assert!(Filter::from_json(json!([1])).is_err());
		assert!(Filter::from_json(json!({"$or": {"a": 1}})).is_err());
		assert!(Filter::from_json(json!({"a": {"$bogus": 1}})).is_err());
		assert!(Filter::from_json(json!({"a": {"$in": 1}})).is_err());
		assert!(Filter::from_json(json!({"a": {"$contains": 1}})).is_err());
	}

	#[test]
	fn url_compatibility() {
		assert!(filter(json!({"title": {"$contains": "a"}})).fits_in_url());
		assert!(filter(json!({"id": [1, 2, 3]})).fits_in_url());
		assert!(!filter(json!({"id": (0..11).collect::<Vec<_>>()})).fits_in_url());
		assert!(!filter(json!({"$or": [{"a": 1}]})).fits_in_url());
		assert!(!filter(json!({"a": {"$in": [{"x": 1}]}})).fits_in_url());
	}

	#[test]
	fn serializes_as_written() {
		let f = filter(json!({"title": {"$contains": "a"}, "done": true}));
		assert_eq!(
			serde_json::to_string(&f).unwrap(),
			r#"{"title":{"$contains":"a"},"done":true}"#
		);
		let back: Filter = serde_json::from_value(f.to_json()).unwrap();
		assert_eq!(back, f);
	}
}
