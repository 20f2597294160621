use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Filter, OrderBy};
use crate::err::Error;
use crate::val::Row;

/// The options a repository query is run with.
///
/// `page` is one based, and only applies when a `limit` is set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub limit: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page: Option<usize>,
	#[serde(default, rename = "where", skip_serializing_if = "Filter::is_empty")]
	pub filter: Filter,
	#[serde(default, skip_serializing_if = "OrderBy::is_empty")]
	pub order_by: OrderBy,
	/// Relations to eagerly load, passed through to the repository
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub load: Option<Vec<String>>,
}

impl FindOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_filter(mut self, filter: Filter) -> Self {
		self.filter = filter;
		self
	}

	pub fn with_order_by(mut self, order_by: OrderBy) -> Self {
		self.order_by = order_by;
		self
	}

	pub fn with_limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn with_page(mut self, page: usize) -> Self {
		self.page = Some(page);
		self
	}

	/// Returns the JSON form of these options
	pub fn to_json(&self) -> Value {
		serde_json::to_value(self).unwrap_or(Value::Null)
	}

	/// Parses options from their JSON form
	pub fn from_json(value: Value) -> Result<Self, Error> {
		match value {
			Value::Null => Ok(Self::default()),
			v => Ok(serde_json::from_value(v)?),
		}
	}

	/// Filters, sorts and paginates a set of rows
	pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
		let mut out: Vec<Row> = rows.into_iter().filter(|r| self.filter.matches(r)).collect();
		if !self.order_by.is_empty() {
			out.sort_by(|a, b| self.order_by.compare(a, b));
		}
		if let Some(limit) = self.limit {
			let page = self.page.unwrap_or(1).max(1);
			out = out.into_iter().skip((page - 1) * limit).take(limit).collect();
		}
		out
	}
}
