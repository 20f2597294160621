use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use livesync_core::dbs::EntityMetadata;
use livesync_core::expr::FindOptions;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::channel::MessageChannel;
use super::subscriber::{LiveQueryChangeInfo, Observer, QuerySubscriber};
use crate::api::conn::{Connection, MessageHandler, ReconnectHook, Transport};
use crate::api::engine::remote::http::ApiClient;
use crate::api::err::Error;
use crate::api::opt::ClientConfig;

type PendingConnection = Shared<BoxFuture<'static, Result<Arc<dyn Connection>, Arc<Error>>>>;

#[derive(Default)]
struct State {
	connection: Option<PendingConnection>,
	queries: HashMap<String, Arc<QuerySubscriber>>,
	channels: HashMap<String, Arc<MessageChannel>>,
	close_timer: Option<CancellationToken>,
	keep_alive: Option<CancellationToken>,
}

struct Inner {
	transport: Arc<dyn Transport>,
	api: Arc<dyn ApiClient>,
	config: ClientConfig,
	state: Mutex<State>,
	tasks: TaskTracker,
	flushing: tokio::sync::Mutex<()>,
	next_listener: AtomicU64,
}

/// Identical queries share a subscriber, so the key only depends on
/// what is being asked for
fn query_key(entity_key: &str, options: &FindOptions) -> String {
	json!({ "url": entity_key, "options": options.to_json() }).to_string()
}

/// Spawns a task which is not waited for by [`SubscriptionManager::flush`]
fn spawn_detached<F>(fut: F)
where
	F: Future<Output = ()> + Send + 'static,
{
	match Handle::try_current() {
		Ok(handle) => {
			handle.spawn(fut);
		}
		Err(_) => warn!("No async runtime is running, a background task was not started"),
	}
}

impl Inner {
	fn spawn<F>(&self, fut: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		match Handle::try_current() {
			Ok(handle) => {
				self.tasks.spawn_on(fut, &handle);
			}
			Err(_) => warn!("No async runtime is running, a subscription task was not started"),
		}
	}

	fn ready_connection(&self) -> Option<Arc<dyn Connection>> {
		let state = self.state.lock();
		state.connection.as_ref()?.peek()?.as_ref().ok().cloned()
	}

	/// Returns the shared connection, opening it if needed
	async fn connection(self: &Arc<Self>) -> Result<Arc<dyn Connection>, Arc<Error>> {
		let pending = {
			let mut state = self.state.lock();
			if let Some(timer) = state.close_timer.take() {
				timer.cancel();
			}
			match &state.connection {
				Some(pending) => pending.clone(),
				None => {
					let weak = Arc::downgrade(self);
					let on_reconnect: ReconnectHook = Arc::new(move || {
						if let Some(inner) = weak.upgrade() {
							inner.resubscribe_all();
						}
					});
					let transport = self.transport.clone();
					let pending = async move { transport.open_connection(on_reconnect).await.map_err(Arc::new) }
						.boxed()
						.shared();
					state.connection = Some(pending.clone());
					pending
				}
			}
		};
		let result = pending.clone().await;
		if result.is_err() {
			// Allow a later subscription to try again
			let mut state = self.state.lock();
			if state.connection.as_ref().is_some_and(|c| c.ptr_eq(&pending)) {
				state.connection = None;
			}
		}
		result
	}

	async fn end_quietly(&self, entity_key: &str, channel: &str) {
		if let Err(error) = self.api.end_live_query(entity_key, channel).await {
			trace!("Failed to end live query {channel}: {error}");
		}
	}

	/// Runs a query, registers it on the server and binds its channel
	async fn run_subscribe(self: Arc<Self>, sub: Arc<QuerySubscriber>) {
		let (generation, prior) = sub.begin();
		let conn = match self.connection().await {
			Ok(conn) => conn,
			Err(error) => {
				warn!("Failed to open a connection: {error}");
				self.fail_all(error);
				return;
			}
		};
		// Stop listening to the channel of the previous round
		if let Some(prior) = prior {
			if let Err(error) = conn.unsubscribe(&prior).await {
				trace!("Failed to unsubscribe from {prior}: {error}");
			}
			self.end_quietly(&sub.entity_key, &prior).await;
		}
		let response = match self.api.live_query(&sub.entity_key, &sub.options).await {
			Ok(response) => response,
			Err(error) => {
				warn!("Live query on {} failed: {error}", sub.entity_key);
				self.fail_query(&sub, Arc::new(error));
				return;
			}
		};
		let channel = response.query_channel;
		if !sub.seed(generation, response.result, channel.clone()) {
			trace!("Ending superseded live query {channel}");
			self.end_quietly(&sub.entity_key, &channel).await;
			self.schedule_close();
			return;
		}
		let weak = Arc::downgrade(&sub);
		let handler: MessageHandler = Arc::new(move |data| {
			if let Some(sub) = weak.upgrade() {
				sub.handle_message(data);
			}
		});
		if let Err(error) = conn.subscribe(&channel, handler).await {
			warn!("Failed to subscribe to {channel}: {error}");
			let _ = conn.unsubscribe(&channel).await;
			if let Some(channel) = self.fail_query(&sub, Arc::new(error)) {
				self.end_quietly(&sub.entity_key, &channel).await;
			}
			return;
		}
		// Released or superseded while binding
		if !sub.is_current(generation) {
			let _ = conn.unsubscribe(&channel).await;
		}
	}

	/// Fails every listener of every query and channel
	fn fail_all(self: &Arc<Self>, error: Arc<Error>) {
		let (queries, channels) = {
			let mut state = self.state.lock();
			(std::mem::take(&mut state.queries), std::mem::take(&mut state.channels))
		};
		for sub in queries.into_values() {
			sub.fail(error.clone());
		}
		for channel in channels.into_values() {
			channel.fail(error.clone());
		}
		self.schedule_close();
	}

	/// Fails the listeners of one query, returning its channel
	fn fail_query(self: &Arc<Self>, sub: &Arc<QuerySubscriber>, error: Arc<Error>) -> Option<String> {
		self.state.lock().queries.retain(|_, s| !Arc::ptr_eq(s, sub));
		let channel = sub.fail(error);
		self.schedule_close();
		channel
	}

	fn resubscribe_all(self: &Arc<Self>) {
		let queries: Vec<_> = self.state.lock().queries.values().cloned().collect();
		debug!("Connection restored, running {} live queries again", queries.len());
		for sub in queries {
			self.spawn(self.clone().run_subscribe(sub));
		}
	}

	fn release(self: &Arc<Self>, target: Target) {
		match target {
			Target::Query {
				key,
				listener,
			} => {
				let (sub, channel) = {
					let mut state = self.state.lock();
					let Some(sub) = state.queries.get(&key).cloned() else {
						return;
					};
					if sub.remove_listener(listener) != Some(0) {
						return;
					}
					state.queries.remove(&key);
					let channel = sub.close();
					(sub, channel)
				};
				trace!("Last listener of a live query on {} is gone", sub.entity_key);
				if let Some(channel) = channel {
					let inner = self.clone();
					self.spawn(async move {
						if let Some(conn) = inner.ready_connection() {
							let _ = conn.unsubscribe(&channel).await;
						}
						inner.end_quietly(&sub.entity_key, &channel).await;
					});
				}
			}
			Target::Channel {
				name,
				listener,
			} => {
				let channel = {
					let mut state = self.state.lock();
					let Some(channel) = state.channels.get(&name).cloned() else {
						return;
					};
					if channel.remove_listener(listener) != Some(0) {
						return;
					}
					state.channels.remove(&name);
					channel
				};
				channel.close();
				let inner = self.clone();
				self.spawn(async move {
					if let Some(conn) = inner.ready_connection() {
						let _ = conn.unsubscribe(&channel.name).await;
					}
				});
			}
		}
		self.schedule_close();
	}

	/// Closes the connection once nothing has used it for a while
	fn schedule_close(self: &Arc<Self>) {
		let token = {
			let mut state = self.state.lock();
			if state.queries.is_empty() {
				if let Some(keep_alive) = state.keep_alive.take() {
					keep_alive.cancel();
				}
			}
			if !state.queries.is_empty() || !state.channels.is_empty() || state.connection.is_none() {
				return;
			}
			if state.close_timer.is_some() {
				return;
			}
			let token = CancellationToken::new();
			state.close_timer = Some(token.clone());
			token
		};
		let weak = Arc::downgrade(self);
		let delay = self.config.close_delay;
		spawn_detached(async move {
			tokio::select! {
				biased;
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}
			let Some(inner) = weak.upgrade() else {
				return;
			};
			let pending = {
				let mut state = inner.state.lock();
				if token.is_cancelled() || !state.queries.is_empty() || !state.channels.is_empty() {
					return;
				}
				state.close_timer = None;
				state.connection.take()
			};
			if let Some(pending) = pending {
				debug!("Closing the unused connection");
				if let Ok(conn) = pending.await {
					conn.close().await;
				}
			}
		});
	}

	/// Starts sending the ids of the active live queries periodically
	fn ensure_keep_alive(self: &Arc<Self>) {
		let token = {
			let mut state = self.state.lock();
			if state.keep_alive.is_some() {
				return;
			}
			let token = CancellationToken::new();
			state.keep_alive = Some(token.clone());
			token
		};
		let weak = Arc::downgrade(self);
		let period = self.config.keep_alive_interval;
		spawn_detached(async move {
			// Create a new time-based interval ticker
			let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
			interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					biased;
					_ = token.cancelled() => break,
					_ = interval.tick() => {
						let Some(inner) = weak.upgrade() else {
							break;
						};
						inner.keep_alive().await;
					}
				}
			}
			trace!("Live query keep-alive task stopped");
		});
	}

	/// Keeps the active live queries alive, subscribing again to those
	/// the server no longer knows
	async fn keep_alive(self: &Arc<Self>) {
		let active: Vec<(String, Arc<QuerySubscriber>)> = {
			let state = self.state.lock();
			state.queries.values().filter_map(|s| Some((s.query_channel()?, s.clone()))).collect()
		};
		if active.is_empty() {
			return;
		}
		let ids: Vec<String> = active.iter().map(|(id, _)| id.clone()).collect();
		match self.api.keep_alive(&ids).await {
			Ok(unknown) => {
				for (id, sub) in active {
					if unknown.contains(&id) {
						debug!("Live query {id} is unknown to the server, subscribing again");
						self.spawn(self.clone().run_subscribe(sub));
					}
				}
			}
			Err(error) => warn!("Failed to keep live queries alive: {error}"),
		}
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		let state = self.state.get_mut();
		for token in [state.close_timer.take(), state.keep_alive.take()].into_iter().flatten() {
			token.cancel();
		}
		if let Some(Ok(conn)) = state.connection.take().and_then(|c| c.peek().cloned()) {
			spawn_detached(async move { conn.close().await });
		}
	}
}

/// Multiplexes the live queries and channels of a client over one
/// connection.
///
/// Listeners of identical queries share a single server side live
/// query. The connection is opened on the first subscription and closed
/// once the last subscription has been released for the configured
/// close delay.
#[derive(Clone)]
pub struct SubscriptionManager {
	inner: Arc<Inner>,
}

impl SubscriptionManager {
	pub fn new(transport: Arc<dyn Transport>, api: Arc<dyn ApiClient>, config: ClientConfig) -> Self {
		Self {
			inner: Arc::new(Inner {
				transport,
				api,
				config,
				state: Mutex::new(State::default()),
				tasks: TaskTracker::new(),
				flushing: tokio::sync::Mutex::new(()),
				next_listener: AtomicU64::new(1),
			}),
		}
	}

	/// Subscribes to the result of a query.
	///
	/// The observer first receives the complete result, then every
	/// update. Must be called within a Tokio runtime.
	pub fn subscribe(
		&self,
		meta: Arc<dyn EntityMetadata>,
		options: FindOptions,
		observer: Observer<LiveQueryChangeInfo>,
	) -> Unsubscribe {
		let inner = &self.inner;
		let key = query_key(meta.key(), &options);
		let listener = inner.next_listener.fetch_add(1, Ordering::Relaxed);
		let (sub, snapshot, created) = {
			let mut state = inner.state.lock();
			if let Some(timer) = state.close_timer.take() {
				timer.cancel();
			}
			let (sub, created) = match state.queries.get(&key) {
				Some(sub) => (sub.clone(), false),
				None => {
					let sub = Arc::new(QuerySubscriber::new(meta, options));
					state.queries.insert(key.clone(), sub.clone());
					(sub, true)
				}
			};
			let snapshot = sub.add_listener(listener, observer.clone());
			(sub, snapshot, created)
		};
		// A late joiner starts from the current result
		if let Some(snapshot) = snapshot {
			observer.next(snapshot);
		}
		if created {
			trace!("Starting a live query on {}", sub.entity_key);
			inner.ensure_keep_alive();
			inner.spawn(inner.clone().run_subscribe(sub));
		}
		Unsubscribe::new(inner, Target::Query {
			key,
			listener,
		})
	}

	/// Subscribes to the messages published on a named channel
	pub fn subscribe_channel(&self, name: &str, observer: Observer<Value>) -> Unsubscribe {
		let inner = &self.inner;
		let listener = inner.next_listener.fetch_add(1, Ordering::Relaxed);
		let (channel, created) = {
			let mut state = inner.state.lock();
			if let Some(timer) = state.close_timer.take() {
				timer.cancel();
			}
			let (channel, created) = match state.channels.get(name) {
				Some(channel) => (channel.clone(), false),
				None => {
					let channel = Arc::new(MessageChannel::new(name));
					state.channels.insert(name.to_owned(), channel.clone());
					(channel, true)
				}
			};
			channel.add_listener(listener, observer);
			(channel, created)
		};
		if created {
			let this = inner.clone();
			inner.spawn(async move {
				let conn = match this.connection().await {
					Ok(conn) => conn,
					Err(error) => {
						warn!("Failed to open a connection: {error}");
						this.fail_all(error);
						return;
					}
				};
				let weak = Arc::downgrade(&channel);
				let handler: MessageHandler = Arc::new(move |data| {
					if let Some(channel) = weak.upgrade() {
						channel.deliver(data);
					}
				});
				if let Err(error) = conn.subscribe(&channel.name, handler).await {
					warn!("Failed to subscribe to {}: {error}", channel.name);
					this.state.lock().channels.retain(|_, c| !Arc::ptr_eq(c, &channel));
					channel.fail(Arc::new(error));
					this.schedule_close();
				}
			});
		}
		Unsubscribe::new(inner, Target::Channel {
			name: name.to_owned(),
			listener,
		})
	}

	/// Sends the ids of the active live queries to the server now,
	/// instead of waiting for the next keep-alive tick
	pub async fn send_keep_alive(&self) {
		self.inner.keep_alive().await;
	}

	/// Waits until every pending subscribe and unsubscribe completed
	pub async fn flush(&self) {
		let _guard = self.inner.flushing.lock().await;
		self.inner.tasks.close();
		self.inner.tasks.wait().await;
		self.inner.tasks.reopen();
	}

	/// Releases every subscription and closes the connection
	pub async fn close(&self) {
		let (queries, channels, pending) = {
			let mut state = self.inner.state.lock();
			for token in [state.close_timer.take(), state.keep_alive.take()].into_iter().flatten() {
				token.cancel();
			}
			(
				std::mem::take(&mut state.queries),
				std::mem::take(&mut state.channels),
				state.connection.take(),
			)
		};
		for sub in queries.into_values() {
			if let Some(channel) = sub.close() {
				let inner = self.inner.clone();
				self.inner.spawn(async move { inner.end_quietly(&sub.entity_key, &channel).await });
			}
		}
		for channel in channels.into_values() {
			channel.close();
		}
		self.flush().await;
		if let Some(pending) = pending {
			if let Ok(conn) = pending.await {
				conn.close().await;
			}
		}
	}

	/// The number of distinct live queries
	pub fn query_count(&self) -> usize {
		self.inner.state.lock().queries.len()
	}

	/// Whether a connection is open or being opened
	pub fn is_connected(&self) -> bool {
		self.inner.state.lock().connection.is_some()
	}

	/// The close delay in use
	pub fn close_delay(&self) -> Duration {
		self.inner.config.close_delay
	}
}

enum Target {
	Query {
		key: String,
		listener: u64,
	},
	Channel {
		name: String,
		listener: u64,
	},
}

/// Releases a listener when called or dropped.
#[must_use = "the subscription is released as soon as this is dropped"]
pub struct Unsubscribe {
	inner: Weak<Inner>,
	target: Option<Target>,
}

impl Unsubscribe {
	fn new(inner: &Arc<Inner>, target: Target) -> Self {
		Self {
			inner: Arc::downgrade(inner),
			target: Some(target),
		}
	}

	/// Releases the listener. The server side live query is ended once
	/// its last listener is released.
	pub fn unsubscribe(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let (Some(target), Some(inner)) = (self.target.take(), self.inner.upgrade()) {
			inner.release(target);
		}
	}
}

impl Drop for Unsubscribe {
	fn drop(&mut self) {
		self.release();
	}
}
