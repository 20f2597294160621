use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use livesync_core::cnf::STREAM_KEEP_ALIVE_SECS;
use livesync_core::dbs::{Datastore, JsonEntity, MemoryRepository};
use livesync_core::kvs::tasks::{default_gc_interval, spawn_gc};
use livesync_core::kvs::{EntityStorage, LiveQueryStorage, MemoryStorage};
use livesync_core::live::LiveQueryRegistry;
use livesync_core::rpc::{Hub, spawn_keep_alive};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The entity stored live queries are kept in when persisted as rows
pub const LIVE_QUERY_ENTITY: &str = "livesync_live_queries";

/// An entity served by the server, written as `key` or `key:field,...`
/// where the fields make up the id of a row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityDefinition {
	pub key: String,
	pub id_fields: Vec<String>,
}

impl FromStr for EntityDefinition {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (key, fields) = match s.split_once(':') {
			Some((key, fields)) => (key.trim(), fields),
			None => (s.trim(), "id"),
		};
		if key.is_empty() || key.starts_with('_') || key.contains('/') {
			return Err(format!("'{key}' is not a valid entity name"));
		}
		let id_fields: Vec<String> =
			fields.split(',').map(str::trim).filter(|f| !f.is_empty()).map(str::to_owned).collect();
		if id_fields.is_empty() {
			return Err(format!("The entity '{key}' needs at least one id field"));
		}
		Ok(Self {
			key: key.to_owned(),
			id_fields,
		})
	}
}

impl fmt::Display for EntityDefinition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.key, self.id_fields.join(","))
	}
}

impl EntityDefinition {
	pub fn metadata(&self) -> JsonEntity {
		JsonEntity::new(&self.key).with_id_fields(self.id_fields.iter())
	}
}

/// Where registered live queries are kept
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
	/// In the memory of this process
	#[default]
	Memory,
	/// As rows of an entity store
	Entity,
}

/// Creates the datastore serving the given entities, publishing live
/// query changes through the hub
pub fn init(entities: &[EntityDefinition], storage: StorageKind, hub: Arc<Hub>) -> Arc<Datastore> {
	debug!("Storing live queries in {storage:?} storage");
	let storage: Arc<dyn LiveQueryStorage> = match storage {
		StorageKind::Memory => Arc::new(MemoryStorage::new()),
		StorageKind::Entity => {
			let meta = EntityStorage::<MemoryRepository>::metadata(LIVE_QUERY_ENTITY);
			Arc::new(EntityStorage::new(Arc::new(MemoryRepository::new(meta))))
		}
	};
	let registry = Arc::new(LiveQueryRegistry::new(storage, hub));
	let datastore = Arc::new(Datastore::new(registry));
	for entity in entities {
		info!("Serving entity {entity}");
		datastore.register(Arc::new(MemoryRepository::new(entity.metadata())));
	}
	datastore
}

/// Starts the background tasks of the server, which stop when the
/// canceller is triggered
pub fn start_tasks(
	datastore: &Datastore,
	hub: &Arc<Hub>,
	canceller: &CancellationToken,
) -> Vec<JoinHandle<()>> {
	vec![
		spawn_gc(datastore.live().clone(), default_gc_interval(), canceller.clone()),
		spawn_keep_alive(hub.clone(), Duration::from_secs(*STREAM_KEEP_ALIVE_SECS), canceller.clone()),
	]
}
