//! Storage of the live queries registered by clients.

mod clock;
mod entity;
mod mem;
pub mod tasks;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use clock::{Clock, FakeClock, SystemClock};
pub use entity::EntityStorage;
pub use mem::MemoryStorage;

use crate::cnf::LIVE_QUERY_STALE_TIMEOUT_SECS;
use crate::dbs::Session;
use crate::err::Error;
use crate::val::Id;

/// The data needed to re-run and diff a live query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQueryData {
	/// The find options, in their JSON form
	#[serde(rename = "findOptionsJson")]
	pub find_options: Value,
	/// The session the query was registered with
	#[serde(rename = "requestJson")]
	pub session: Session,
	/// The ids the client currently holds
	pub last_ids: Vec<Id>,
}

/// A live query registered by a client.
///
/// The id doubles as the name of the channel changes are published on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuery {
	pub id: String,
	pub entity_key: String,
	pub data: StoredQueryData,
	pub last_used: DateTime<Utc>,
	/// Incremented on every successful data write
	#[serde(default)]
	pub version: u64,
}

impl StoredQuery {
	/// Whether this query has not been kept alive recently enough
	pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
		match chrono::Duration::from_std(timeout) {
			Ok(timeout) => self.last_used + timeout < now,
			Err(_) => false,
		}
	}
}

/// The live queries on an entity
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LiveQueries {
	/// The queries which are still kept alive
	pub live: Vec<StoredQuery>,
	/// The ids of stale queries which were deleted while listing
	pub purged: Vec<String>,
}

/// The default window after which an idle query is considered stale
pub fn default_stale_timeout() -> Duration {
	Duration::from_secs(*LIVE_QUERY_STALE_TIMEOUT_SECS)
}

/// A store of live queries.
///
/// Implementations may be backed by networked or eventually consistent
/// storage, so callers never assume a write is visible to a later call
/// from another process.
#[async_trait]
pub trait LiveQueryStorage: Send + Sync {
	/// Stores a new live query, marking it as used now
	async fn add(&self, query: StoredQuery) -> Result<(), Error>;

	/// Removes a live query, succeeding if it does not exist
	async fn remove(&self, id: &str) -> Result<(), Error>;

	async fn get(&self, id: &str) -> Result<Option<StoredQuery>, Error>;

	/// Returns every live query on an entity, deleting stale ones first
	async fn live_queries(&self, entity_key: &str) -> Result<LiveQueries, Error>;

	/// Replaces the data of a live query if its version is still
	/// `expected_version`, returning whether the write happened
	async fn set_data(
		&self,
		id: &str,
		data: StoredQueryData,
		expected_version: u64,
	) -> Result<bool, Error>;

	/// Marks the given queries as used now and returns the ids which
	/// are not known to this store
	async fn keep_alive_and_return_unknown_query_ids(
		&self,
		ids: &[String],
	) -> Result<Vec<String>, Error>;

	/// Deletes every stale query, returning the removed ids
	async fn purge_stale(&self) -> Result<Vec<String>, Error>;
}

#[cfg(test)]
pub(crate) mod test {
	use std::sync::Arc;

	use serde_json::json;

	use super::*;

	pub(crate) fn query(id: &str, entity_key: &str, clock: &dyn Clock) -> StoredQuery {
		StoredQuery {
			id: id.to_owned(),
			entity_key: entity_key.to_owned(),
			data: StoredQueryData {
				find_options: json!({}),
				session: Session::anonymous(),
				last_ids: vec![Id::from(1)],
			},
			last_used: clock.now(),
			version: 0,
		}
	}

	/// Exercises the storage contract against any implementation
	pub(crate) async fn storage_contract(store: &dyn LiveQueryStorage, clock: Arc<FakeClock>) {
		store.add(query("a", "tasks", clock.as_ref())).await.unwrap();
		store.add(query("b", "tasks", clock.as_ref())).await.unwrap();
		store.add(query("c", "users", clock.as_ref())).await.unwrap();
		// Listing is scoped to the entity
		let mut ids: Vec<_> =
			store.live_queries("tasks").await.unwrap().live.into_iter().map(|q| q.id).collect();
		ids.sort();
		assert_eq!(ids, vec!["a", "b"]);
		// Compare and set
		let q = store.get("a").await.unwrap().unwrap();
		let mut data = q.data.clone();
		data.last_ids = vec![Id::from(2)];
		assert!(store.set_data("a", data.clone(), q.version).await.unwrap());
		assert!(!store.set_data("a", data, q.version).await.unwrap());
		let q = store.get("a").await.unwrap().unwrap();
		assert_eq!(q.data.last_ids, vec![Id::from(2)]);
		assert_eq!(q.version, 1);
		// Keep alive reports unknown ids
		clock.advance(chrono::Duration::minutes(4));
		let unknown = store
			.keep_alive_and_return_unknown_query_ids(&["a".to_owned(), "zzz".to_owned()])
			.await
			.unwrap();
		assert_eq!(unknown, vec!["zzz".to_owned()]);
		// Only queries which were not kept alive go stale
		clock.advance(chrono::Duration::minutes(2));
		let listed = store.live_queries("tasks").await.unwrap();
		assert_eq!(listed.live.len(), 1);
		assert_eq!(listed.live[0].id, "a");
		assert_eq!(listed.purged, vec!["b".to_owned()]);
		assert!(store.get("b").await.unwrap().is_none());
		// Purge removes stale queries on all entities
		assert_eq!(store.purge_stale().await.unwrap(), vec!["c".to_owned()]);
		assert!(store.get("c").await.unwrap().is_none());
		// Removal is idempotent
		store.remove("a").await.unwrap();
		store.remove("a").await.unwrap();
		assert_eq!(store.live_queries("tasks").await.unwrap(), LiveQueries::default());
	}
}
