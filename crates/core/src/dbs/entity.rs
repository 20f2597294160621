use std::cmp::Ordering;
use std::fmt::Debug;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::err::Error;
use crate::expr::OrderBy;
use crate::val::{Id, Row};

/// Describes an entity: its key, how rows are identified, and how raw
/// JSON rows are turned into rows ready to be handed to callers.
pub trait EntityMetadata: Debug + Send + Sync {
	/// The key this entity is registered and routed under
	fn key(&self) -> &str;

	/// The fields which make up the row id
	fn id_fields(&self) -> &[String];

	/// Extracts the id of a row.
	///
	/// A single id field yields that field's value. Several id fields
	/// yield their values joined with a comma.
	fn id_of(&self, row: &Row) -> Option<Id> {
		match self.id_fields() {
			[] => None,
			[field] => Some(Id(row.get(field)?.clone())).filter(Id::is_valid),
			fields => {
				let mut parts = Vec::with_capacity(fields.len());
				for field in fields {
					let id = Id(row.get(field)?.clone());
					if !id.is_valid() {
						return None;
					}
					parts.push(id.to_string());
				}
				Some(Id::from(parts.join(",")))
			}
		}
	}

	/// Converts a raw JSON row into a hydrated row
	fn from_json(&self, raw: Value) -> Result<Row, Error> {
		match raw {
			Value::Object(row) => Ok(row),
			v => Err(Error::InvalidRow(v.to_string())),
		}
	}

	/// Compares two hydrated rows for the given sort order
	fn compare(&self, order: &OrderBy, a: &Row, b: &Row) -> Ordering {
		order.compare(a, b)
	}
}

/// Entity metadata for plain JSON rows.
#[derive(Clone, Debug)]
pub struct JsonEntity {
	key: String,
	id_fields: Vec<String>,
	date_fields: Vec<String>,
}

impl JsonEntity {
	/// Creates metadata identified by a single `id` field
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			id_fields: vec!["id".to_owned()],
			date_fields: Vec::new(),
		}
	}

	pub fn with_id_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.id_fields = fields.into_iter().map(Into::into).collect();
		self
	}

	/// Fields holding dates, normalised to RFC 3339 on hydration
	pub fn with_date_fields<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.date_fields = fields.into_iter().map(Into::into).collect();
		self
	}
}

impl EntityMetadata for JsonEntity {
	fn key(&self) -> &str {
		&self.key
	}

	fn id_fields(&self) -> &[String] {
		&self.id_fields
	}

	fn from_json(&self, raw: Value) -> Result<Row, Error> {
		let mut row = match raw {
			Value::Object(row) => row,
			v => return Err(Error::InvalidRow(v.to_string())),
		};
		for field in &self.date_fields {
			if let Some(v) = row.get_mut(field) {
				*v = normalise_date(field, v)?;
			}
		}
		Ok(row)
	}
}

fn normalise_date(field: &str, v: &Value) -> Result<Value, Error> {
	let invalid = || Error::InvalidRow(format!("field '{field}' is not a valid date: {v}"));
	let date: DateTime<Utc> = match v {
		Value::Null => return Ok(Value::Null),
		Value::String(s) => match DateTime::parse_from_rfc3339(s) {
			Ok(d) => d.with_timezone(&Utc),
			Err(_) => {
				let d = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?;
				let d = d.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
				Utc.from_utc_datetime(&d)
			}
		},
		Value::Number(n) => {
			let ms = n.as_i64().ok_or_else(invalid)?;
			Utc.timestamp_millis_opt(ms).single().ok_or_else(invalid)?
		}
		_ => return Err(invalid()),
	};
	Ok(Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn extracts_ids() {
		let meta = JsonEntity::new("tasks");
		let row = meta.from_json(json!({"id": 3, "title": "a"})).unwrap();
		assert_eq!(meta.id_of(&row), Some(Id::from(3)));
		let row = meta.from_json(json!({"title": "a"})).unwrap();
		assert_eq!(meta.id_of(&row), None);
		let meta = JsonEntity::new("links").with_id_fields(["a", "b"]);
		let row = meta.from_json(json!({"a": 1, "b": "x"})).unwrap();
		assert_eq!(meta.id_of(&row), Some(Id::from("1,x")));
	}

	#[test]
	fn normalises_dates() {
		let meta = JsonEntity::new("tasks").with_date_fields(["due"]);
		let row = meta.from_json(json!({"id": 1, "due": "2024-03-01T10:00:00+02:00"})).unwrap();
		assert_eq!(row["due"], json!("2024-03-01T08:00:00.000Z"));
		let row = meta.from_json(json!({"id": 1, "due": "2024-03-01"})).unwrap();
		assert_eq!(row["due"], json!("2024-03-01T00:00:00.000Z"));
		let row = meta.from_json(json!({"id": 1, "due": 0})).unwrap();
		assert_eq!(row["due"], json!("1970-01-01T00:00:00.000Z"));
		assert!(meta.from_json(json!({"id": 1, "due": "soon"})).is_err());
		assert!(meta.from_json(json!([1])).is_err());
	}
}
