use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Clock, LiveQueries, LiveQueryStorage, StoredQuery, StoredQueryData, SystemClock, default_stale_timeout};
use crate::err::Error;

/// Live query storage held in the memory of a single process
#[derive(Debug)]
pub struct MemoryStorage {
	queries: DashMap<String, StoredQuery>,
	clock: Arc<dyn Clock>,
	stale_timeout: Duration,
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock))
	}

	pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
		Self {
			queries: DashMap::new(),
			clock,
			stale_timeout: default_stale_timeout(),
		}
	}

	pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
		self.stale_timeout = timeout;
		self
	}

	pub fn len(&self) -> usize {
		self.queries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.queries.is_empty()
	}
}

#[async_trait]
impl LiveQueryStorage for MemoryStorage {
	async fn add(&self, mut query: StoredQuery) -> Result<(), Error> {
		query.last_used = self.clock.now();
		self.queries.insert(query.id.clone(), query);
		Ok(())
	}

	async fn remove(&self, id: &str) -> Result<(), Error> {
		self.queries.remove(id);
		Ok(())
	}

	async fn get(&self, id: &str) -> Result<Option<StoredQuery>, Error> {
		Ok(self.queries.get(id).map(|q| q.value().clone()))
	}

	async fn live_queries(&self, entity_key: &str) -> Result<LiveQueries, Error> {
		let now = self.clock.now();
		let mut stale = Vec::new();
		let mut live = Vec::new();
		for q in self.queries.iter().filter(|q| q.entity_key == entity_key) {
			if q.is_stale(now, self.stale_timeout) {
				stale.push(q.id.clone());
			} else {
				live.push(q.value().clone());
			}
		}
		// Remove outside of the iteration to avoid holding shard locks
		let mut purged = Vec::with_capacity(stale.len());
		for id in stale {
			trace!("Removing stale live query {id}");
			if self.queries.remove_if(&id, |_, q| q.is_stale(now, self.stale_timeout)).is_some() {
				purged.push(id);
			}
		}
		Ok(LiveQueries {
			live,
			purged,
		})
	}

	async fn set_data(
		&self,
		id: &str,
		data: StoredQueryData,
		expected_version: u64,
	) -> Result<bool, Error> {
		match self.queries.get_mut(id) {
			Some(mut q) if q.version == expected_version => {
				q.data = data;
				q.version += 1;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn keep_alive_and_return_unknown_query_ids(
		&self,
		ids: &[String],
	) -> Result<Vec<String>, Error> {
		let now = self.clock.now();
		let mut unknown = Vec::new();
		for id in ids {
			match self.queries.get_mut(id) {
				Some(mut q) => q.last_used = now,
				None => unknown.push(id.clone()),
			}
		}
		Ok(unknown)
	}

	async fn purge_stale(&self) -> Result<Vec<String>, Error> {
		let now = self.clock.now();
		let mut purged = Vec::new();
		self.queries.retain(|id, q| {
			let stale = q.is_stale(now, self.stale_timeout);
			if stale {
				purged.push(id.clone());
			}
			!stale
		});
		Ok(purged)
	}
}
