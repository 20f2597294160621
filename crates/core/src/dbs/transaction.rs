use std::sync::Arc;

use indexmap::IndexMap;

use super::{Change, Datastore, Session, coalesce};
use crate::err::Error;
use crate::live::LiveQueryRegistry;
use crate::val::{Id, Row};

/// A batch of writes whose live query updates are published together.
///
/// Writes are applied to the entity stores immediately. The changes they
/// produce are held back until the transaction ends, which runs a single
/// diff pass per affected entity. The stores cannot roll writes back, so
/// a cancelled or dropped transaction still publishes what it wrote.
#[must_use]
pub struct Transaction<'a> {
	ds: &'a Datastore,
	changes: IndexMap<String, Vec<Change>>,
	done: bool,
}

impl<'a> Transaction<'a> {
	pub(super) fn new(ds: &'a Datastore) -> Self {
		Self {
			ds,
			changes: IndexMap::new(),
			done: false,
		}
	}

	/// Check if the transaction is finished
	pub fn closed(&self) -> bool {
		self.done
	}

	fn record(&mut self, entity_key: &str, change: Change) -> Change {
		self.changes.entry(entity_key.to_owned()).or_default().push(change.clone());
		change
	}

	pub async fn insert(&mut self, entity_key: &str, row: Row, session: &Session) -> Result<Change, Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		let change = self.ds.store(entity_key)?.insert(row, session).await?;
		Ok(self.record(entity_key, change))
	}

	pub async fn update(
		&mut self,
		entity_key: &str,
		id: &Id,
		patch: Row,
		session: &Session,
	) -> Result<Change, Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		let change = self.ds.store(entity_key)?.update(id, patch, session).await?;
		Ok(self.record(entity_key, change))
	}

	pub async fn delete(&mut self, entity_key: &str, id: &Id, session: &Session) -> Result<Change, Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		let change = self.ds.store(entity_key)?.delete(id, session).await?;
		Ok(self.record(entity_key, change))
	}

	/// Publishes the changes, once per affected entity.
	///
	/// A failure to publish is logged and does not fail the commit.
	pub async fn commit(mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		self.done = true;
		publish(self.ds.live(), std::mem::take(&mut self.changes)).await;
		Ok(())
	}

	/// Ends the transaction without committing.
	///
	/// Writes already applied stay in the stores, so their changes are
	/// published to keep live queries in step with the stored rows.
	pub async fn cancel(mut self) {
		self.done = true;
		let changes = std::mem::take(&mut self.changes);
		if !changes.is_empty() {
			debug!("Cancelled a transaction, publishing the writes it applied");
		}
		publish(self.ds.live(), changes).await;
	}
}

async fn publish(live: &LiveQueryRegistry, changes: IndexMap<String, Vec<Change>>) {
	for (entity_key, changes) in changes {
		let changes = coalesce(changes);
		if let Err(e) = live.item_changed(&entity_key, &changes).await {
			error!("Failed to publish changes to '{entity_key}': {e}");
		}
	}
}

impl Drop for Transaction<'_> {
	fn drop(&mut self) {
		if self.done || self.changes.is_empty() {
			return;
		}
		warn!("A transaction was dropped without being committed, publishing its writes");
		let live: Arc<LiveQueryRegistry> = self.ds.live().clone();
		let changes = std::mem::take(&mut self.changes);
		match tokio::runtime::Handle::try_current() {
			Ok(handle) => {
				handle.spawn(async move { publish(&live, changes).await });
			}
			Err(_) => error!("No runtime to publish the writes of a dropped transaction"),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use serde_json::{Value, json};

	use super::*;
	use crate::dbs::{JsonEntity, MemoryRepository};
	use crate::kvs::MemoryStorage;
	use crate::live::LiveQueryRegistry;
	use crate::live::publisher::test::RecordingPublisher;

	fn row(v: Value) -> Row {
		serde_json::from_value(v).unwrap()
	}

	async fn setup() -> (Datastore, Arc<RecordingPublisher>, String) {
		let publisher = Arc::new(RecordingPublisher::default());
		let live = Arc::new(LiveQueryRegistry::new(Arc::new(MemoryStorage::new()), publisher.clone()));
		let ds = Datastore::new(live);
		ds.register(Arc::new(MemoryRepository::new(JsonEntity::new("tasks"))));
		let s = Session::anonymous();
		for i in 1..=4 {
			ds.insert("tasks", row(json!({"id": i})), &s).await.unwrap();
		}
		let res = ds.live().subscribe("tasks", json!({}), &s, None).await.unwrap();
		publisher.take();
		(ds, publisher, res.query_channel)
	}

	#[test_log::test(tokio::test)]
	async fn implicit_transactions_publish_each_write() {
		let (ds, publisher, channel) = setup().await;
		ds.insert("tasks", row(json!({"id": 5})), &Session::anonymous()).await.unwrap();
		let published = publisher.take();
		assert_eq!(published, vec![(channel, json!([{"type": "add", "data": {"id": 5}}]))]);
		assert!(ds.insert("users", row(json!({"id": 1})), &Session::anonymous()).await.is_err());
	}

	#[test_log::test(tokio::test)]
	async fn commit_publishes_once() {
		let (ds, publisher, _) = setup().await;
		let s = Session::anonymous();
		let mut tx = ds.transaction();
		tx.update("tasks", &1.into(), row(json!({"id": 50})), &s).await.unwrap();
		tx.update("tasks", &50.into(), row(json!({"id": 99})), &s).await.unwrap();
		tx.delete("tasks", &3.into(), &s).await.unwrap();
		assert!(publisher.take().is_empty());
		tx.commit().await.unwrap();
		let published = publisher.take();
		assert_eq!(published.len(), 1);
		assert_eq!(
			published[0].1,
			json!([
				{"type": "remove", "data": {"id": 3}},
				{"type": "replace", "data": {"oldId": 1, "item": {"id": 99}}},
			])
		);
	}

	#[test_log::test(tokio::test)]
	async fn cancel_publishes_applied_writes() {
		let (ds, publisher, channel) = setup().await;
		let s = Session::anonymous();
		let mut tx = ds.transaction();
		tx.delete("tasks", &2.into(), &s).await.unwrap();
		tx.update("tasks", &4.into(), row(json!({"id": 40})), &s).await.unwrap();
		assert!(tx.update("tasks", &9.into(), row(json!({"id": 90})), &s).await.is_err());
		tx.cancel().await;
		assert_eq!(
			publisher.take(),
			vec![(
				channel.clone(),
				json!([
					{"type": "remove", "data": {"id": 2}},
					{"type": "replace", "data": {"oldId": 4, "item": {"id": 40}}},
				])
			)]
		);
		// The client holds exactly what the store has
		let rows = ds.find("tasks", &Default::default(), &s).await.unwrap();
		let ids: Vec<Id> = rows.iter().map(|r| Id::from(r["id"].clone())).collect();
		let stored = ds.live().storage().get(&channel).await.unwrap().unwrap();
		assert_eq!(stored.data.last_ids, ids);
	}

	#[test_log::test(tokio::test)]
	async fn dropped_transactions_publish_applied_writes() {
		let (ds, publisher, channel) = setup().await;
		{
			let mut tx = ds.transaction();
			tx.delete("tasks", &3.into(), &Session::anonymous()).await.unwrap();
		}
		let mut published = Vec::new();
		for _ in 0..100 {
			published = publisher.take();
			if !published.is_empty() {
				break;
			}
			tokio::task::yield_now().await;
		}
		assert_eq!(published, vec![(channel, json!([{"type": "remove", "data": {"id": 3}}]))]);
	}

	#[test_log::test(tokio::test)]
	async fn empty_transactions_publish_nothing() {
		let (ds, publisher, _) = setup().await;
		ds.transaction().cancel().await;
		drop(ds.transaction());
		tokio::task::yield_now().await;
		assert!(publisher.take().is_empty());
	}
}
