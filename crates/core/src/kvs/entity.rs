use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Clock, LiveQueries, LiveQueryStorage, StoredQuery, StoredQueryData, SystemClock, default_stale_timeout};
use crate::dbs::{EntityStore, JsonEntity, Session};
use crate::err::Error;
use crate::expr::{Filter, FindOptions};
use crate::val::{Id, Row};

/// Live query storage persisted through an application entity store.
///
/// This allows several server processes sharing one database to see the
/// same live queries. The store must be registered with metadata from
/// [`EntityStorage::metadata`].
pub struct EntityStorage<S> {
	store: Arc<S>,
	clock: Arc<dyn Clock>,
	stale_timeout: Duration,
	session: Session,
}

impl<S: EntityStore> EntityStorage<S> {
	pub fn new(store: Arc<S>) -> Self {
		Self {
			store,
			clock: Arc::new(SystemClock),
			stale_timeout: default_stale_timeout(),
			session: Session::for_user("livesync").with_role("admin"),
		}
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
		self.stale_timeout = timeout;
		self
	}

	/// The metadata the backing entity store is expected to use
	pub fn metadata(key: impl Into<String>) -> JsonEntity {
		JsonEntity::new(key).with_date_fields(["lastUsed"])
	}

	async fn find(&self, filter: Filter) -> Result<Vec<StoredQuery>, Error> {
		let options = FindOptions::new().with_filter(filter);
		let rows = self.store.find(&options, &self.session).await?;
		rows.into_iter()
			.map(|r| serde_json::from_value(Value::Object(r)).map_err(Error::from))
			.collect()
	}

	async fn patch(&self, id: &str, patch: Value) -> Result<(), Error> {
		let Value::Object(patch) = patch else {
			return Err(Error::Unreachable("patch is not an object".to_owned()));
		};
		self.store.update(&Id::from(id), patch, &self.session).await?;
		Ok(())
	}
}

fn to_row(query: &StoredQuery) -> Result<Row, Error> {
	match serde_json::to_value(query)? {
		Value::Object(row) => Ok(row),
		v => Err(Error::InvalidRow(v.to_string())),
	}
}

#[async_trait]
impl<S: EntityStore + 'static> LiveQueryStorage for EntityStorage<S> {
	async fn add(&self, mut query: StoredQuery) -> Result<(), Error> {
		query.last_used = self.clock.now();
		self.store.insert(to_row(&query)?, &self.session).await?;
		Ok(())
	}

	async fn remove(&self, id: &str) -> Result<(), Error> {
		match self.store.delete(&Id::from(id), &self.session).await {
			Ok(_) | Err(Error::RowNotFound {
				..
			}) => Ok(()),
			Err(e) => Err(e),
		}
	}

	async fn get(&self, id: &str) -> Result<Option<StoredQuery>, Error> {
		Ok(self.find(Filter::eq("id", id)).await?.into_iter().next())
	}

	async fn live_queries(&self, entity_key: &str) -> Result<LiveQueries, Error> {
		let now = self.clock.now();
		let mut listed = LiveQueries::default();
		for q in self.find(Filter::eq("entityKey", entity_key)).await? {
			if q.is_stale(now, self.stale_timeout) {
				trace!("Removing stale live query {}", q.id);
				self.remove(&q.id).await?;
				listed.purged.push(q.id);
			} else {
				listed.live.push(q);
			}
		}
		Ok(listed)
	}

	async fn set_data(
		&self,
		id: &str,
		data: StoredQueryData,
		expected_version: u64,
	) -> Result<bool, Error> {
		match self.get(id).await? {
			Some(q) if q.version == expected_version => {
				self.patch(id, json!({"data": data, "version": expected_version + 1})).await?;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn keep_alive_and_return_unknown_query_ids(
		&self,
		ids: &[String],
	) -> Result<Vec<String>, Error> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let now = self.clock.now();
		let found = self.find(Filter::from_json(json!({"id": ids}))?).await?;
		for q in &found {
			self.patch(&q.id, json!({"lastUsed": now})).await?;
		}
		Ok(ids.iter().filter(|id| !found.iter().any(|q| &q.id == *id)).cloned().collect())
	}

	async fn purge_stale(&self) -> Result<Vec<String>, Error> {
		let now = self.clock.now();
		let mut purged = Vec::new();
		for q in self.find(Filter::all()).await? {
			if q.is_stale(now, self.stale_timeout) {
				self.remove(&q.id).await?;
				purged.push(q.id);
			}
		}
		Ok(purged)
	}
}
