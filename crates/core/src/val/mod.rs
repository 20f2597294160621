//! Row and id values exchanged between repositories, the registry and clients.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single row of an entity, as seen on the wire
pub type Row = serde_json::Map<String, Value>;

/// The identity of a row within its entity.
///
/// Ids are usually strings or integers. Two ids are equal when their
/// JSON representations are equal, so `1` and `"1"` are distinct.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub Value);

impl Id {
	/// Returns the inner JSON value
	pub fn as_value(&self) -> &Value {
		&self.0
	}
	/// Consumes the id and returns the inner JSON value
	pub fn into_value(self) -> Value {
		self.0
	}
	/// Whether this id can identify a row
	pub fn is_valid(&self) -> bool {
		match &self.0 {
			Value::String(s) => !s.is_empty(),
			Value::Number(_) => true,
			_ => false,
		}
	}
}

impl Hash for Id {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.to_string().hash(state)
	}
}

impl Display for Id {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		match &self.0 {
			Value::String(s) => f.write_str(s),
			v => write!(f, "{v}"),
		}
	}
}

impl From<&str> for Id {
	fn from(v: &str) -> Self {
		Id(Value::String(v.to_owned()))
	}
}

impl From<String> for Id {
	fn from(v: String) -> Self {
		Id(Value::String(v))
	}
}

impl From<i64> for Id {
	fn from(v: i64) -> Self {
		Id(Value::from(v))
	}
}

impl From<Value> for Id {
	fn from(v: Value) -> Self {
		Id(v)
	}
}

impl From<Id> for Value {
	fn from(v: Id) -> Self {
		v.0
	}
}

fn rank(v: &Value) -> u8 {
	match v {
		Value::Null => 0,
		Value::Bool(_) => 1,
		Value::Number(_) => 2,
		Value::String(_) => 3,
		Value::Array(_) => 4,
		Value::Object(_) => 5,
	}
}

/// Compares two JSON values.
///
/// Values of different kinds are ordered null, bool, number, string,
/// array and object. Arrays compare element-wise, objects by their
/// serialized form.
pub fn cmp_values(a: &Value, b: &Value) -> Ordering {
	match (a, b) {
		(Value::Null, Value::Null) => Ordering::Equal,
		(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
		(Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
			(Some(a), Some(b)) => a.cmp(&b),
			_ => {
				let a = a.as_f64().unwrap_or(f64::NAN);
				let b = b.as_f64().unwrap_or(f64::NAN);
				a.partial_cmp(&b).unwrap_or(Ordering::Equal)
			}
		},
		(Value::String(a), Value::String(b)) => a.cmp(b),
		(Value::Array(a), Value::Array(b)) => {
			for (a, b) in a.iter().zip(b.iter()) {
				match cmp_values(a, b) {
					Ordering::Equal => continue,
					o => return o,
				}
			}
			a.len().cmp(&b.len())
		}
		(Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
		(a, b) => rank(a).cmp(&rank(b)),
	}
}

/// Whether two JSON values are loosely equal, treating integers and
/// floats with the same magnitude as the same number
pub fn eq_values(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Number(_), Value::Number(_)) => cmp_values(a, b) == Ordering::Equal,
		_ => a == b,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn id_display_and_equality() {
		assert_eq!(Id::from("a").to_string(), "a");
		assert_eq!(Id::from(7).to_string(), "7");
		assert_ne!(Id::from(1), Id::from("1"));
		assert!(!Id(Value::Null).is_valid());
		assert!(!Id::from("").is_valid());
	}

	#[test]
	fn id_is_transparent() {
		let id: Id = serde_json::from_value(json!(12)).unwrap();
		assert_eq!(id, Id::from(12));
		assert_eq!(serde_json::to_value(Id::from("x")).unwrap(), json!("x"));
	}

	#[test]
	fn compare_mixed_values() {
		assert_eq!(cmp_values(&json!(null), &json!(false)), Ordering::Less);
		assert_eq!(cmp_values(&json!(2), &json!(10)), Ordering::Less);
		assert_eq!(cmp_values(&json!(2.5), &json!(2)), Ordering::Greater);
		assert_eq!(cmp_values(&json!("b"), &json!("a")), Ordering::Greater);
		assert_eq!(cmp_values(&json!(1), &json!("1")), Ordering::Less);
		assert_eq!(cmp_values(&json!([1, 2]), &json!([1, 3])), Ordering::Less);
		assert!(eq_values(&json!(1), &json!(1.0)));
	}
}
