use std::sync::Arc;

use dashmap::DashMap;

use super::{Change, EntityStore, Session, Transaction};
use crate::err::Error;
use crate::expr::FindOptions;
use crate::live::LiveQueryRegistry;
use crate::val::{Id, Row};

/// The set of writable entities served by this process, wired to the
/// live query registry so that every write is published.
pub struct Datastore {
	stores: DashMap<String, Arc<dyn EntityStore>>,
	live: Arc<LiveQueryRegistry>,
}

impl Datastore {
	pub fn new(live: Arc<LiveQueryRegistry>) -> Self {
		Self {
			stores: DashMap::new(),
			live,
		}
	}

	/// The live query registry writes are published to
	pub fn live(&self) -> &Arc<LiveQueryRegistry> {
		&self.live
	}

	/// Registers an entity store, making it available for live queries
	pub fn register<S: EntityStore + 'static>(&self, store: Arc<S>) {
		let key = store.metadata().key().to_owned();
		self.live.register(store.clone());
		self.stores.insert(key, store);
	}

	/// The keys of every registered entity
	pub fn entities(&self) -> Vec<String> {
		self.stores.iter().map(|s| s.key().clone()).collect()
	}

	pub fn store(&self, entity_key: &str) -> Result<Arc<dyn EntityStore>, Error> {
		self.stores
			.get(entity_key)
			.map(|s| s.value().clone())
			.ok_or_else(|| Error::EntityNotFound(entity_key.to_owned()))
	}

	/// Runs a plain query which is not kept live
	pub async fn find(
		&self,
		entity_key: &str,
		options: &FindOptions,
		session: &Session,
	) -> Result<Vec<Row>, Error> {
		self.store(entity_key)?.find(options, session).await
	}

	/// Opens a transaction whose changes are published on commit
	pub fn transaction(&self) -> Transaction<'_> {
		Transaction::new(self)
	}

	pub async fn insert(&self, entity_key: &str, row: Row, session: &Session) -> Result<Change, Error> {
		let mut tx = self.transaction();
		let change = tx.insert(entity_key, row, session).await?;
		tx.commit().await?;
		Ok(change)
	}

	pub async fn update(
		&self,
		entity_key: &str,
		id: &Id,
		patch: Row,
		session: &Session,
	) -> Result<Change, Error> {
		let mut tx = self.transaction();
		let change = tx.update(entity_key, id, patch, session).await?;
		tx.commit().await?;
		Ok(change)
	}

	pub async fn delete(&self, entity_key: &str, id: &Id, session: &Session) -> Result<Change, Error> {
		let mut tx = self.transaction();
		let change = tx.delete(entity_key, id, session).await?;
		tx.commit().await?;
		Ok(change)
	}
}
