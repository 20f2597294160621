use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Change, EntityMetadata, EntityStore, Repository, Session};
use crate::err::Error;
use crate::expr::FindOptions;
use crate::val::{Id, Row};

/// Decides whether a session may see a row
pub type Permission = Arc<dyn Fn(&Session, &Row) -> bool + Send + Sync>;

/// An entity store holding its rows in memory, in insertion order.
pub struct MemoryRepository {
	meta: Arc<dyn EntityMetadata>,
	rows: RwLock<IndexMap<Id, Row>>,
	permission: Option<Permission>,
}

impl fmt::Debug for MemoryRepository {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryRepository")
			.field("meta", &self.meta)
			.field("rows", &self.rows.read().len())
			.finish()
	}
}

impl MemoryRepository {
	pub fn new(meta: impl EntityMetadata + 'static) -> Self {
		Self {
			meta: Arc::new(meta),
			rows: RwLock::new(IndexMap::new()),
			permission: None,
		}
	}

	/// Restricts which rows each session may read
	pub fn with_permission<F>(mut self, f: F) -> Self
	where
		F: Fn(&Session, &Row) -> bool + Send + Sync + 'static,
	{
		self.permission = Some(Arc::new(f));
		self
	}

	/// The number of rows currently stored
	pub fn len(&self) -> usize {
		self.rows.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.rows.read().is_empty()
	}

	fn hydrate(&self, row: Row) -> Result<(Id, Row), Error> {
		let row = self.meta.from_json(Value::Object(row))?;
		let id = self
			.meta
			.id_of(&row)
			.ok_or_else(|| Error::MissingId(self.meta.id_fields().join(",")))?;
		Ok((id, row))
	}

	fn visible(&self, session: &Session, row: &Row) -> bool {
		match &self.permission {
			Some(f) => f(session, row),
			None => true,
		}
	}
}

#[async_trait]
impl Repository for MemoryRepository {
	fn metadata(&self) -> Arc<dyn EntityMetadata> {
		self.meta.clone()
	}

	async fn find(&self, options: &FindOptions, session: &Session) -> Result<Vec<Row>, Error> {
		let rows: Vec<Row> =
			self.rows.read().values().filter(|r| self.visible(session, r)).cloned().collect();
		Ok(options.apply(rows))
	}
}

#[async_trait]
impl EntityStore for MemoryRepository {
	async fn insert(&self, row: Row, _: &Session) -> Result<Change, Error> {
		let (id, row) = self.hydrate(row)?;
		let mut rows = self.rows.write();
		if rows.contains_key(&id) {
			return Err(Error::RowAlreadyExists {
				entity: self.meta.key().to_owned(),
				id,
			});
		}
		rows.insert(id.clone(), row);
		Ok(Change::inserted(id))
	}

	async fn update(&self, id: &Id, patch: Row, _: &Session) -> Result<Change, Error> {
		let mut rows = self.rows.write();
		let Some((index, _, current)) = rows.get_full(id) else {
			return Err(Error::RowNotFound {
				entity: self.meta.key().to_owned(),
				id: id.clone(),
			});
		};
		let mut merged = current.clone();
		merged.extend(patch);
		let (new_id, merged) = self.hydrate(merged)?;
		if new_id == *id {
			rows.insert(new_id.clone(), merged);
		} else {
			if rows.contains_key(&new_id) {
				return Err(Error::RowAlreadyExists {
					entity: self.meta.key().to_owned(),
					id: new_id,
				});
			}
			// Keep the row where it was when the id changes
			rows.shift_remove(id);
			rows.shift_insert(index, new_id.clone(), merged);
		}
		Ok(Change::updated(id.clone(), new_id))
	}

	async fn delete(&self, id: &Id, _: &Session) -> Result<Change, Error> {
		match self.rows.write().shift_remove(id) {
			Some(_) => Ok(Change::deleted(id.clone())),
			None => Err(Error::RowNotFound {
				entity: self.meta.key().to_owned(),
				id: id.clone(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::dbs::JsonEntity;
	use crate::expr::Filter;

	fn row(v: Value) -> Row {
		serde_json::from_value(v).unwrap()
	}

	#[tokio::test]
	async fn insert_update_delete() {
		let repo = MemoryRepository::new(JsonEntity::new("tasks"));
		let s = Session::anonymous();
		assert_eq!(repo.insert(row(json!({"id": 1, "title": "a"})), &s).await.unwrap(), Change::inserted(1.into()));
		repo.insert(row(json!({"id": 2, "title": "b"})), &s).await.unwrap();
		assert!(repo.insert(row(json!({"id": 2})), &s).await.is_err());
		assert!(matches!(repo.insert(row(json!({"title": "x"})), &s).await, Err(Error::MissingId(_))));
		let change = repo.update(&1.into(), row(json!({"id": 9})), &s).await.unwrap();
		assert_eq!(change, Change::updated(1.into(), 9.into()));
		let all = repo.find(&FindOptions::default(), &s).await.unwrap();
		assert_eq!(all[0], row(json!({"id": 9, "title": "a"})));
		assert!(repo.update(&9.into(), row(json!({"id": 2})), &s).await.is_err());
		assert_eq!(repo.delete(&2.into(), &s).await.unwrap(), Change::deleted(2.into()));
		assert!(repo.delete(&2.into(), &s).await.is_err());
		assert_eq!(repo.len(), 1);
	}

	#[tokio::test]
	async fn find_respects_permissions() {
		let repo = MemoryRepository::new(JsonEntity::new("tasks"))
			.with_permission(|s, r| r.get("owner").and_then(Value::as_str) == s.user.as_deref());
		let s = Session::anonymous();
		repo.insert(row(json!({"id": 1, "owner": "tobie"})), &s).await.unwrap();
		repo.insert(row(json!({"id": 2, "owner": "jaime"})), &s).await.unwrap();
		let opts = FindOptions::new().with_filter(Filter::all());
		let seen = repo.find(&opts, &Session::for_user("jaime")).await.unwrap();
		assert_eq!(seen, vec![row(json!({"id": 2, "owner": "jaime"}))]);
		assert!(repo.find(&opts, &s).await.unwrap().is_empty());
	}
}
