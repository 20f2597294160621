use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use livesync_core::dbs::EntityMetadata;
use livesync_core::expr::{FindOptions, OrderBy};
use livesync_core::proto::{LiveQueryChange, decode_changes};
use livesync_core::val::{Id, Row};
use parking_lot::Mutex;
use serde_json::Value;

use crate::api::err::Error;

type Next<T> = Arc<dyn Fn(T) + Send + Sync>;
type OnError = Arc<dyn Fn(Arc<Error>) + Send + Sync>;

/// The callbacks of one listener.
///
/// `next` receives every update. `error` is called at most once, when
/// the subscription fails, after which the listener receives nothing.
pub struct Observer<T> {
	next: Next<T>,
	error: Option<OnError>,
}

impl<T> Clone for Observer<T> {
	fn clone(&self) -> Self {
		Self {
			next: self.next.clone(),
			error: self.error.clone(),
		}
	}
}

impl<T> Observer<T> {
	pub fn new<F>(next: F) -> Self
	where
		F: Fn(T) + Send + Sync + 'static,
	{
		Self {
			next: Arc::new(next),
			error: None,
		}
	}

	pub fn with_error<F>(mut self, error: F) -> Self
	where
		F: Fn(Arc<Error>) + Send + Sync + 'static,
	{
		self.error = Some(Arc::new(error));
		self
	}

	pub(crate) fn next(&self, value: T) {
		(self.next)(value)
	}

	pub(crate) fn error(&self, error: Arc<Error>) {
		match &self.error {
			Some(f) => f(error),
			None => warn!("Unhandled subscription error: {error}"),
		}
	}
}

/// An update of a live query result, as handed to its listeners.
#[derive(Clone)]
pub struct LiveQueryChangeInfo {
	/// The complete result after the changes were applied
	pub items: Vec<Row>,
	/// The changes which produced this update
	pub changes: Vec<LiveQueryChange>,
	meta: Arc<dyn EntityMetadata>,
	order: OrderBy,
}

impl fmt::Debug for LiveQueryChangeInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LiveQueryChangeInfo")
			.field("items", &self.items)
			.field("changes", &self.changes)
			.finish()
	}
}

impl LiveQueryChangeInfo {
	/// Applies the changes of this update to a result held elsewhere,
	/// leaving it untouched and returning the new result
	pub fn apply_changes(&self, prev: &[Row]) -> Vec<Row> {
		let mut items = prev.to_vec();
		apply(self.meta.as_ref(), &self.order, &mut items, &self.changes);
		items
	}
}

fn position(meta: &dyn EntityMetadata, items: &[Row], id: &Id) -> Option<usize> {
	items.iter().position(|r| meta.id_of(r).as_ref() == Some(id))
}

/// Applies hydrated changes to a result set
pub(crate) fn apply(
	meta: &dyn EntityMetadata,
	order: &OrderBy,
	items: &mut Vec<Row>,
	changes: &[LiveQueryChange],
) {
	let mut sort = false;
	for change in changes {
		match change {
			LiveQueryChange::All(rows) => {
				*items = rows.clone();
			}
			LiveQueryChange::Add(row) => {
				// An add can race with a snapshot which already holds the row
				match meta.id_of(row).and_then(|id| position(meta, items, &id)) {
					Some(pos) => items[pos] = row.clone(),
					None => items.push(row.clone()),
				}
				sort = true;
			}
			LiveQueryChange::Replace {
				old_id,
				item,
			} => {
				let pos = position(meta, items, old_id)
					.or_else(|| meta.id_of(item).and_then(|id| position(meta, items, &id)));
				match pos {
					Some(pos) => items[pos] = item.clone(),
					// The row was not held yet, so treat it as an add
					None => items.push(item.clone()),
				}
				sort = true;
			}
			LiveQueryChange::Remove {
				id,
			} => {
				items.retain(|r| meta.id_of(r).as_ref() != Some(id));
			}
		}
	}
	if sort && !order.is_empty() {
		items.sort_by(|a, b| meta.compare(order, a, b));
	}
}

#[derive(Default)]
struct State {
	items: Vec<Row>,
	query_channel: Option<String>,
	listeners: IndexMap<u64, Observer<LiveQueryChangeInfo>>,
	seeded: bool,
	generation: u64,
	removed: bool,
}

/// The client side state of one live query, shared by every listener
/// subscribed to an identical query.
pub(crate) struct QuerySubscriber {
	pub(crate) entity_key: String,
	pub(crate) options: FindOptions,
	meta: Arc<dyn EntityMetadata>,
	state: Mutex<State>,
}

impl QuerySubscriber {
	pub(crate) fn new(meta: Arc<dyn EntityMetadata>, options: FindOptions) -> Self {
		Self {
			entity_key: meta.key().to_owned(),
			options,
			meta,
			state: Mutex::new(State::default()),
		}
	}

	fn info(&self, items: Vec<Row>, changes: Vec<LiveQueryChange>) -> LiveQueryChangeInfo {
		LiveQueryChangeInfo {
			items,
			changes,
			meta: self.meta.clone(),
			order: self.options.order_by.clone(),
		}
	}

	fn hydrate(&self, row: Row) -> Option<Row> {
		match self.meta.from_json(Value::Object(row)) {
			Ok(row) => Some(row),
			Err(error) => {
				warn!("Ignoring a row of {} which could not be read: {error}", self.entity_key);
				None
			}
		}
	}

	fn hydrate_change(&self, change: LiveQueryChange) -> Option<LiveQueryChange> {
		Some(match change {
			LiveQueryChange::All(rows) => {
				LiveQueryChange::All(rows.into_iter().filter_map(|r| self.hydrate(r)).collect())
			}
			LiveQueryChange::Add(row) => LiveQueryChange::Add(self.hydrate(row)?),
			LiveQueryChange::Replace {
				old_id,
				item,
			} => LiveQueryChange::Replace {
				old_id,
				item: self.hydrate(item)?,
			},
			remove @ LiveQueryChange::Remove {
				..
			} => remove,
		})
	}

	fn notify(&self, listeners: Vec<Observer<LiveQueryChangeInfo>>, info: LiveQueryChangeInfo) {
		for listener in listeners {
			listener.next(info.clone());
		}
	}

	/// Adds a listener, returning the current snapshot if there is one
	pub(crate) fn add_listener(
		&self,
		id: u64,
		observer: Observer<LiveQueryChangeInfo>,
	) -> Option<LiveQueryChangeInfo> {
		let mut state = self.state.lock();
		state.listeners.insert(id, observer);
		state.seeded.then(|| {
			let items = state.items.clone();
			self.info(items.clone(), vec![LiveQueryChange::All(items)])
		})
	}

	/// Removes a listener, returning how many remain, or `None` if the
	/// listener was not registered
	pub(crate) fn remove_listener(&self, id: u64) -> Option<usize> {
		let mut state = self.state.lock();
		state.listeners.shift_remove(&id)?;
		Some(state.listeners.len())
	}

	/// Starts a new subscription round, returning its generation and
	/// the channel of the previous round
	pub(crate) fn begin(&self) -> (u64, Option<String>) {
		let mut state = self.state.lock();
		state.generation += 1;
		(state.generation, state.query_channel.take())
	}

	/// Whether the given round is still the one that counts
	pub(crate) fn is_current(&self, generation: u64) -> bool {
		let state = self.state.lock();
		!state.removed && state.generation == generation
	}

	pub(crate) fn query_channel(&self) -> Option<String> {
		self.state.lock().query_channel.clone()
	}

	pub(crate) fn items(&self) -> Vec<Row> {
		self.state.lock().items.clone()
	}

	/// Seeds the result of a subscription round, unless the round has
	/// been superseded
	pub(crate) fn seed(&self, generation: u64, rows: Vec<Row>, channel: String) -> bool {
		let rows: Vec<Row> = rows.into_iter().filter_map(|r| self.hydrate(r)).collect();
		let (listeners, info) = {
			let mut state = self.state.lock();
			if state.removed || state.generation != generation {
				return false;
			}
			state.query_channel = Some(channel);
			state.seeded = true;
			state.items = rows.clone();
			(state.listeners.values().cloned().collect(), self.info(rows.clone(), vec![LiveQueryChange::All(rows)]))
		};
		self.notify(listeners, info);
		true
	}

	/// Replaces the result with a fresh snapshot
	pub(crate) fn set_all_items(&self, rows: Vec<Row>) {
		self.handle(vec![LiveQueryChange::All(rows)]);
	}

	/// Applies the changes received on the query channel
	pub(crate) fn handle(&self, changes: Vec<LiveQueryChange>) {
		let changes: Vec<LiveQueryChange> =
			changes.into_iter().filter_map(|c| self.hydrate_change(c)).collect();
		if changes.is_empty() {
			return;
		}
		let (listeners, info) = {
			let mut state = self.state.lock();
			if state.removed {
				return;
			}
			let mut items = std::mem::take(&mut state.items);
			apply(self.meta.as_ref(), &self.options.order_by, &mut items, &changes);
			state.items = items.clone();
			state.seeded = true;
			(state.listeners.values().cloned().collect(), self.info(items, changes))
		};
		self.notify(listeners, info);
	}

	/// Handles the raw data of a channel message
	pub(crate) fn handle_message(&self, data: Value) {
		match decode_changes(data) {
			Ok(changes) => self.handle(changes),
			Err(error) => warn!("Received an invalid message for {}: {error}", self.entity_key),
		}
	}

	/// Marks this subscriber as released, returning its channel
	pub(crate) fn close(&self) -> Option<String> {
		let mut state = self.state.lock();
		state.removed = true;
		state.listeners.clear();
		state.query_channel.take()
	}

	/// Fails every listener, returning the channel of this subscriber
	pub(crate) fn fail(&self, error: Arc<Error>) -> Option<String> {
		let (listeners, channel) = {
			let mut state = self.state.lock();
			state.removed = true;
			let listeners: Vec<_> = state.listeners.drain(..).map(|(_, l)| l).collect();
			(listeners, state.query_channel.take())
		};
		for listener in listeners {
			listener.error(error.clone());
		}
		channel
	}
}
