use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Publisher, diff};
use crate::cnf::LIVE_QUERY_MAX_RETRIES;
use crate::dbs::{Change, Repository, Session};
use crate::err::Error;
use crate::expr::FindOptions;
use crate::kvs::{LiveQueryStorage, StoredQuery, StoredQueryData};
use crate::proto::SubscribeResponse;

/// The server side registry of live queries.
///
/// A registry is created once per process and shared by reference. It
/// re-runs every affected live query when an entity changes and
/// publishes the difference to the query's channel.
pub struct LiveQueryRegistry {
	storage: Arc<dyn LiveQueryStorage>,
	publisher: Arc<dyn Publisher>,
	repositories: DashMap<String, Arc<dyn Repository>>,
	/// Serialises diffing of each stored query within this process
	locks: DashMap<String, Arc<Mutex<()>>>,
	max_retries: usize,
}

impl LiveQueryRegistry {
	pub fn new(storage: Arc<dyn LiveQueryStorage>, publisher: Arc<dyn Publisher>) -> Self {
		Self {
			storage,
			publisher,
			repositories: DashMap::new(),
			locks: DashMap::new(),
			max_retries: *LIVE_QUERY_MAX_RETRIES,
		}
	}

	pub fn with_max_retries(mut self, retries: usize) -> Self {
		self.max_retries = retries;
		self
	}

	pub fn storage(&self) -> &Arc<dyn LiveQueryStorage> {
		&self.storage
	}

	/// Makes an entity available for live queries
	pub fn register(&self, repo: Arc<dyn Repository>) {
		let key = repo.metadata().key().to_owned();
		debug!("Registering live query repository '{key}'");
		self.repositories.insert(key, repo);
	}

	pub fn repository(&self, entity_key: &str) -> Result<Arc<dyn Repository>, Error> {
		self.repositories
			.get(entity_key)
			.map(|r| r.value().clone())
			.ok_or_else(|| Error::EntityNotFound(entity_key.to_owned()))
	}

	/// Runs a query and registers it as a live query.
	///
	/// When a client id is given the new channel is attached to that
	/// client's connection before the query runs, so that no change
	/// published after the response is missed.
	pub async fn subscribe(
		&self,
		entity_key: &str,
		options: Value,
		session: &Session,
		client_id: Option<Uuid>,
	) -> Result<SubscribeResponse, Error> {
		let repo = self.repository(entity_key)?;
		let meta = repo.metadata();
		let options = FindOptions::from_json(options)?;
		let id = format!("live:{entity_key}:{}", Uuid::new_v4());
		if let Some(client_id) = client_id {
			self.publisher.attach(client_id, &id).await?;
		}
		let result = match repo.find(&options, session).await {
			Ok(rows) => rows,
			Err(e) => {
				self.release(&id).await;
				return Err(e);
			}
		};
		let last_ids = result.iter().filter_map(|r| meta.id_of(r)).collect();
		let query = StoredQuery {
			id: id.clone(),
			entity_key: entity_key.to_owned(),
			data: StoredQueryData {
				find_options: options.to_json(),
				session: session.clone(),
				last_ids,
			},
			last_used: chrono::Utc::now(),
			version: 0,
		};
		if let Err(e) = self.storage.add(query).await {
			self.release(&id).await;
			return Err(e);
		}
		trace!("Registered live query {id}");
		Ok(SubscribeResponse {
			result,
			query_channel: id,
		})
	}

	/// Drops a live query
	pub async fn end_live_query(&self, id: &str) -> Result<(), Error> {
		trace!("Ending live query {id}");
		self.storage.remove(id).await?;
		self.release(id).await;
		Ok(())
	}

	/// Keeps the given live queries alive, returning the unknown ids
	pub async fn keep_alive(&self, ids: &[String]) -> Result<Vec<String>, Error> {
		self.storage.keep_alive_and_return_unknown_query_ids(ids).await
	}

	/// Re-runs every live query on an entity after a batch of writes.
	///
	/// Failures are logged per query and never stop the other queries
	/// from being processed.
	pub async fn item_changed(&self, entity_key: &str, changes: &[Change]) -> Result<(), Error> {
		let Some(repo) = self.repositories.get(entity_key).map(|r| r.value().clone()) else {
			return Ok(());
		};
		let listed = self.storage.live_queries(entity_key).await?;
		for id in &listed.purged {
			self.release(id).await;
		}
		trace!(
			"Processing {} changes for {} live queries on '{entity_key}'",
			changes.len(),
			listed.live.len()
		);
		for query in listed.live {
			if let Err(e) = self.update_query(repo.as_ref(), &query.id, changes).await {
				warn!("Failed to update live query {}: {e}", query.id);
			}
		}
		Ok(())
	}

	/// Deletes stale live queries on every entity
	pub async fn run_gc(&self) -> Result<usize, Error> {
		let purged = self.storage.purge_stale().await?;
		for id in &purged {
			self.release(id).await;
		}
		if !purged.is_empty() {
			debug!("Removed {} stale live queries", purged.len());
		}
		Ok(purged.len())
	}

	async fn release(&self, id: &str) {
		self.locks.remove(id);
		if let Err(e) = self.publisher.release(id).await {
			warn!("Failed to release channel {id}: {e}");
		}
	}

	async fn update_query(
		&self,
		repo: &dyn Repository,
		id: &str,
		changes: &[Change],
	) -> Result<(), Error> {
		// Only one diff per stored query may run at a time
		let lock = self.locks.entry(id.to_owned()).or_default().clone();
		let _guard = lock.lock().await;
		let meta = repo.metadata();
		for _ in 0..=self.max_retries {
			// Read under the lock so the ids of an earlier diff are seen
			let Some(query) = self.storage.get(id).await? else {
				// The query ended while waiting for the lock
				self.locks.remove_if(id, |_, l| Arc::ptr_eq(l, &lock));
				return Ok(());
			};
			// Re-run the query as the subscriber
			let options = FindOptions::from_json(query.data.find_options.clone())?;
			let rows = repo.find(&options, &query.data.session).await?;
			// Compute the changes since the last run
			let (messages, last_ids) = diff(meta.as_ref(), &query.data.last_ids, rows, changes);
			if messages.is_empty() {
				// Another process may have moved the ids while diffing
				match self.storage.get(id).await? {
					Some(q) if q.version != query.version => continue,
					_ => return Ok(()),
				}
			}
			// Publish before recording what the client holds
			self.publisher.publish(id, serde_json::to_value(&messages)?).await?;
			let data = StoredQueryData {
				last_ids,
				..query.data
			};
			if self.storage.set_data(id, data, query.version).await? {
				return Ok(());
			}
			trace!("Live query {id} was updated concurrently, diffing again");
		}
		Err(Error::LiveQueryConflict(id.to_owned()))
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, Ordering};

	use serde_json::json;
	use tokio::sync::Notify;

	use super::*;
	use crate::dbs::{EntityMetadata, EntityStore, JsonEntity, MemoryRepository};
	use crate::kvs::{FakeClock, MemoryStorage};
	use crate::live::publisher::test::RecordingPublisher;
	use crate::rpc::Hub;
	use crate::val::{Id, Row};

	fn row(v: Value) -> Row {
		serde_json::from_value(v).unwrap()
	}

	async fn setup() -> (Arc<LiveQueryRegistry>, Arc<MemoryRepository>, Arc<RecordingPublisher>) {
		let publisher = Arc::new(RecordingPublisher::default());
		let registry =
			Arc::new(LiveQueryRegistry::new(Arc::new(MemoryStorage::new()), publisher.clone()));
		let repo = Arc::new(MemoryRepository::new(JsonEntity::new("tasks")));
		let s = Session::anonymous();
		for i in 1..=4 {
			repo.insert(row(json!({"id": i, "title": format!("a{i}")})), &s).await.unwrap();
		}
		registry.register(repo.clone());
		(registry, repo, publisher)
	}

	#[test_log::test(tokio::test)]
	async fn subscribe_stores_the_snapshot() {
		let (registry, _, _) = setup().await;
		let res = registry
			.subscribe("tasks", json!({"orderBy": {"id": "desc"}}), &Session::anonymous(), None)
			.await
			.unwrap();
		assert_eq!(res.result.len(), 4);
		assert_eq!(res.result[0]["id"], json!(4));
		assert!(res.query_channel.starts_with("live:tasks:"));
		let stored = registry.storage().get(&res.query_channel).await.unwrap().unwrap();
		assert_eq!(stored.data.last_ids.len(), 4);
		assert!(matches!(
			registry.subscribe("nope", json!({}), &Session::anonymous(), None).await,
			Err(Error::EntityNotFound(_))
		));
		assert!(registry.subscribe("tasks", json!({"where": 1}), &Session::anonymous(), None).await.is_err());
	}

	#[test_log::test(tokio::test)]
	async fn publishes_rename_and_delete() {
		let (registry, repo, publisher) = setup().await;
		let s = Session::anonymous();
		let res = registry.subscribe("tasks", json!({}), &s, None).await.unwrap();
		let a = repo.update(&1.into(), row(json!({"id": 99})), &s).await.unwrap();
		let b = repo.delete(&3.into(), &s).await.unwrap();
		registry.item_changed("tasks", &[a, b]).await.unwrap();
		let published = publisher.take();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].0, res.query_channel);
		assert_eq!(
			published[0].1,
			json!([
				{"type": "remove", "data": {"id": 3}},
				{"type": "replace", "data": {"oldId": 1, "item": {"id": 99, "title": "a1"}}},
			])
		);
		let stored = registry.storage().get(&res.query_channel).await.unwrap().unwrap();
		assert_eq!(stored.data.last_ids, vec![Id::from(99), Id::from(2), Id::from(4)]);
		assert_eq!(stored.version, 1);
	}

	#[test_log::test(tokio::test)]
	async fn only_matching_queries_are_notified() {
		let (registry, repo, publisher) = setup().await;
		let s = Session::anonymous();
		let a = registry
			.subscribe("tasks", json!({"where": {"title": {"$contains": "a"}}}), &s, None)
			.await
			.unwrap();
		let b = registry
			.subscribe("tasks", json!({"where": {"title": {"$contains": "b"}}}), &s, None)
			.await
			.unwrap();
		assert!(b.result.is_empty());
		let c = repo.insert(row(json!({"id": 5, "title": "a3"})), &s).await.unwrap();
		registry.item_changed("tasks", &[c]).await.unwrap();
		let published = publisher.take();
		assert_eq!(published.len(), 1);
		assert_eq!(published[0].0, a.query_channel);
		assert_eq!(published[0].1, json!([{"type": "add", "data": {"id": 5, "title": "a3"}}]));
	}

	#[test_log::test(tokio::test)]
	async fn queries_run_as_the_subscriber() {
		let publisher = Arc::new(RecordingPublisher::default());
		let registry = LiveQueryRegistry::new(Arc::new(MemoryStorage::new()), publisher.clone());
		let repo = Arc::new(
			MemoryRepository::new(JsonEntity::new("notes"))
				.with_permission(|s, r| r.get("owner").and_then(Value::as_str) == s.user.as_deref()),
		);
		registry.register(repo.clone());
		let owner = Session::for_user("tobie");
		registry.subscribe("notes", json!({}), &owner, None).await.unwrap();
		// Written by someone else, invisible to the subscriber
		let writer = Session::for_user("jaime");
		let c = repo.insert(row(json!({"id": 1, "owner": "jaime"})), &writer).await.unwrap();
		registry.item_changed("notes", &[c]).await.unwrap();
		assert!(publisher.take().is_empty());
		let c = repo.insert(row(json!({"id": 2, "owner": "tobie"})), &writer).await.unwrap();
		registry.item_changed("notes", &[c]).await.unwrap();
		assert_eq!(publisher.take().len(), 1);
	}

	#[test_log::test(tokio::test)]
	async fn failed_publish_keeps_last_ids() {
		let (registry, repo, publisher) = setup().await;
		let s = Session::anonymous();
		let res = registry.subscribe("tasks", json!({}), &s, None).await.unwrap();
		*publisher.fail.lock() = true;
		let c = repo.delete(&2.into(), &s).await.unwrap();
		registry.item_changed("tasks", &[c.clone()]).await.unwrap();
		let stored = registry.storage().get(&res.query_channel).await.unwrap().unwrap();
		assert_eq!(stored.data.last_ids.len(), 4);
		// The next pass catches up
		*publisher.fail.lock() = false;
		registry.item_changed("tasks", &[c]).await.unwrap();
		assert_eq!(publisher.take()[0].1, json!([{"type": "remove", "data": {"id": 2}}]));
	}

	#[test_log::test(tokio::test)]
	async fn end_and_keep_alive() {
		let (registry, repo, publisher) = setup().await;
		let s = Session::anonymous();
		let res = registry.subscribe("tasks", json!({}), &s, None).await.unwrap();
		let unknown = registry.keep_alive(&[res.query_channel.clone(), "gone".to_owned()]).await.unwrap();
		assert_eq!(unknown, vec!["gone".to_owned()]);
		registry.end_live_query(&res.query_channel).await.unwrap();
		registry.end_live_query(&res.query_channel).await.unwrap();
		let c = repo.delete(&1.into(), &s).await.unwrap();
		registry.item_changed("tasks", &[c]).await.unwrap();
		assert!(publisher.take().is_empty());
		assert_eq!(registry.run_gc().await.unwrap(), 0);
	}

	/// Reads its rows, then waits to be released before returning them
	struct StallingRepository {
		inner: Arc<MemoryRepository>,
		armed: AtomicBool,
		parked: Notify,
		release: Notify,
	}

	#[async_trait::async_trait]
	impl Repository for StallingRepository {
		fn metadata(&self) -> Arc<dyn EntityMetadata> {
			self.inner.metadata()
		}

		async fn find(&self, options: &FindOptions, session: &Session) -> Result<Vec<Row>, Error> {
			let rows = self.inner.find(options, session).await?;
			if self.armed.swap(false, Ordering::SeqCst) {
				self.parked.notify_one();
				self.release.notified().await;
			}
			Ok(rows)
		}
	}

	#[test_log::test(tokio::test)]
	async fn queued_diffs_see_the_ids_of_earlier_diffs() {
		let publisher = Arc::new(RecordingPublisher::default());
		let registry =
			Arc::new(LiveQueryRegistry::new(Arc::new(MemoryStorage::new()), publisher.clone()));
		let inner = Arc::new(MemoryRepository::new(JsonEntity::new("tasks")));
		let s = Session::anonymous();
		inner.insert(row(json!({"id": 1})), &s).await.unwrap();
		let repo = Arc::new(StallingRepository {
			inner: inner.clone(),
			armed: AtomicBool::new(false),
			parked: Notify::new(),
			release: Notify::new(),
		});
		registry.register(repo.clone());
		let res = registry.subscribe("tasks", json!({}), &s, None).await.unwrap();
		// The first diff stalls after reading the inserted row
		let added = inner.insert(row(json!({"id": 5})), &s).await.unwrap();
		repo.armed.store(true, Ordering::SeqCst);
		let first = tokio::spawn({
			let registry = registry.clone();
			async move { registry.item_changed("tasks", &[added]).await }
		});
		repo.parked.notified().await;
		// The second diff lists the query, then queues behind the first
		let deleted = inner.delete(&5.into(), &s).await.unwrap();
		let second = tokio::spawn({
			let registry = registry.clone();
			async move { registry.item_changed("tasks", &[deleted]).await }
		});
		for _ in 0..10 {
			tokio::task::yield_now().await;
		}
		repo.release.notify_one();
		first.await.unwrap().unwrap();
		second.await.unwrap().unwrap();
		let channel = res.query_channel;
		assert_eq!(
			publisher.take(),
			vec![
				(channel.clone(), json!([{"type": "add", "data": {"id": 5}}])),
				(channel.clone(), json!([{"type": "remove", "data": {"id": 5}}])),
			]
		);
		let stored = registry.storage().get(&channel).await.unwrap().unwrap();
		assert_eq!(stored.data.last_ids, vec![Id::from(1)]);
	}

	#[test_log::test(tokio::test)]
	async fn stale_and_ended_queries_are_released() {
		let clock = Arc::new(FakeClock::default());
		let hub = Arc::new(Hub::new());
		let registry =
			LiveQueryRegistry::new(Arc::new(MemoryStorage::with_clock(clock.clone())), hub.clone());
		let repo = Arc::new(MemoryRepository::new(JsonEntity::new("tasks")));
		registry.register(repo.clone());
		let s = Session::anonymous();
		let client = Uuid::new_v4();
		let (_, _rx) = hub.connect(client);
		let res = registry.subscribe("tasks", json!({}), &s, Some(client)).await.unwrap();
		let change = repo.insert(row(json!({"id": 1})), &s).await.unwrap();
		registry.item_changed("tasks", &[change.clone()]).await.unwrap();
		assert!(registry.locks.contains_key(&res.query_channel));
		// Listing skips the query once it went stale, and releases it
		clock.advance(chrono::Duration::minutes(6));
		registry.item_changed("tasks", &[change.clone()]).await.unwrap();
		assert!(registry.locks.is_empty());
		assert_eq!(hub.send(&res.query_channel, json!(1)).unwrap(), 0);
		assert!(registry.storage().get(&res.query_channel).await.unwrap().is_none());
		// A diff which was waiting when its query ended leaves nothing behind
		let res = registry.subscribe("tasks", json!({}), &s, Some(client)).await.unwrap();
		registry.end_live_query(&res.query_channel).await.unwrap();
		registry.update_query(repo.as_ref(), &res.query_channel, &[change]).await.unwrap();
		assert!(registry.locks.is_empty());
	}
}
