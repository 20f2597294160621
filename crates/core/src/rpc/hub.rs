use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cnf::CONNECTION_CHANNEL_SIZE;
use crate::err::Error;
use crate::live::Publisher;
use crate::proto::{Envelope, KEEP_ALIVE_EVENT};

#[derive(Default)]
struct Client {
	sender: Option<Sender<Envelope>>,
	generation: u64,
	channels: HashSet<String>,
}

/// Multiplexes the channels each client listens on over one connection
/// per client.
///
/// Every envelope sent through the hub carries an id which increases
/// for the lifetime of the process.
pub struct Hub {
	clients: DashMap<Uuid, Client>,
	channels: DashMap<String, HashSet<Uuid>>,
	last_id: AtomicU64,
	generation: AtomicU64,
	capacity: usize,
}

impl Default for Hub {
	fn default() -> Self {
		Self::new()
	}
}

impl Hub {
	pub fn new() -> Self {
		Self::with_capacity(*CONNECTION_CHANNEL_SIZE)
	}

	/// Creates a hub queueing at most `capacity` envelopes per connection
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			clients: DashMap::new(),
			channels: DashMap::new(),
			last_id: AtomicU64::new(0),
			generation: AtomicU64::new(0),
			capacity: capacity.max(1),
		}
	}

	/// Opens the connection of a client, replacing any previous one.
	///
	/// Returns the connection generation, to be passed to
	/// [`Hub::disconnect`], and the receiving end of the connection.
	pub fn connect(&self, client_id: Uuid) -> (u64, Receiver<Envelope>) {
		let (tx, rx) = channel(self.capacity);
		let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
		let mut client = self.clients.entry(client_id).or_default();
		client.sender = Some(tx);
		client.generation = generation;
		debug!("Client {client_id} connected");
		(generation, rx)
	}

	/// Closes the connection of a client, unless it has since reconnected
	pub fn disconnect(&self, client_id: Uuid, generation: u64) {
		let removed = self.clients.remove_if(&client_id, |_, c| c.generation == generation);
		if let Some((_, client)) = removed {
			for channel in client.channels {
				self.remove_member(&channel, client_id);
			}
			debug!("Client {client_id} disconnected");
		}
	}

	pub fn is_connected(&self, client_id: Uuid) -> bool {
		self.clients.get(&client_id).is_some_and(|c| c.sender.is_some())
	}

	/// Routes a channel to a client
	pub fn subscribe(&self, client_id: Uuid, channel: &str) {
		trace!("Client {client_id} subscribed to {channel}");
		self.clients.entry(client_id).or_default().channels.insert(channel.to_owned());
		self.channels.entry(channel.to_owned()).or_default().insert(client_id);
	}

	/// Stops routing a channel to a client
	pub fn unsubscribe(&self, client_id: Uuid, channel: &str) {
		trace!("Client {client_id} unsubscribed from {channel}");
		if let Some(mut client) = self.clients.get_mut(&client_id) {
			client.channels.remove(channel);
		}
		self.remove_member(channel, client_id);
	}

	/// Stops routing a channel to every client
	pub fn release(&self, channel: &str) {
		if let Some((_, members)) = self.channels.remove(channel) {
			for client_id in members {
				if let Some(mut client) = self.clients.get_mut(&client_id) {
					client.channels.remove(channel);
				}
			}
		}
	}

	fn remove_member(&self, channel: &str, client_id: Uuid) {
		self.channels.remove_if_mut(channel, |_, members| {
			members.remove(&client_id);
			members.is_empty()
		});
	}

	fn next_id(&self) -> u64 {
		self.last_id.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Sends a message to every client listening on a channel, returning
	/// how many connections it was queued on.
	///
	/// A connection whose queue is full is closed, so that its client
	/// reconnects and runs its queries again, and the send fails.
	pub fn send(&self, channel: &str, data: Value) -> Result<usize, Error> {
		let members: Vec<Uuid> = match self.channels.get(channel) {
			Some(m) => m.iter().copied().collect(),
			None => return Ok(0),
		};
		let envelope = Envelope {
			id: self.next_id(),
			event: channel.to_owned(),
			data,
		};
		let mut sent = 0;
		let mut overflowed = Vec::new();
		for client_id in members {
			match self.deliver(client_id, envelope.clone()) {
				Delivery::Sent => sent += 1,
				Delivery::Skipped => {}
				Delivery::Full => overflowed.push(client_id),
			}
		}
		if overflowed.is_empty() {
			return Ok(sent);
		}
		Err(Error::Publish {
			channel: channel.to_owned(),
			message: format!("the connections of {} clients were full", overflowed.len()),
		})
	}

	/// Sends a keep-alive envelope on every open connection
	pub fn keep_alive(&self) {
		let clients: Vec<Uuid> =
			self.clients.iter().filter(|c| c.sender.is_some()).map(|c| *c.key()).collect();
		for client_id in clients {
			let envelope = Envelope {
				id: self.next_id(),
				event: KEEP_ALIVE_EVENT.to_owned(),
				data: Value::Null,
			};
			self.deliver(client_id, envelope);
		}
	}

	fn deliver(&self, client_id: Uuid, envelope: Envelope) -> Delivery {
		let Some(sender) = self.clients.get(&client_id).and_then(|c| c.sender.clone()) else {
			trace!("Client {client_id} is not connected, dropping message {}", envelope.id);
			return Delivery::Skipped;
		};
		match sender.try_send(envelope) {
			Ok(()) => Delivery::Sent,
			Err(TrySendError::Full(e)) => {
				warn!("Connection of client {client_id} is full at message {}, closing it", e.id);
				self.close_connection(client_id, &sender);
				Delivery::Full
			}
			Err(TrySendError::Closed(_)) => {
				trace!("Connection of client {client_id} is closed");
				Delivery::Skipped
			}
		}
	}

	/// Drops the sending end of a connection, which ends its stream once
	/// the queued envelopes are read
	fn close_connection(&self, client_id: Uuid, sender: &Sender<Envelope>) {
		if let Some(mut client) = self.clients.get_mut(&client_id) {
			if client.sender.as_ref().is_some_and(|s| s.same_channel(sender)) {
				client.sender = None;
			}
		}
	}
}

/// The outcome of delivering an envelope to one client
enum Delivery {
	Sent,
	/// The client is not connected
	Skipped,
	/// The connection queue is full
	Full,
}

#[async_trait]
impl Publisher for Hub {
	async fn publish(&self, channel: &str, message: Value) -> Result<(), Error> {
		let sent = self.send(channel, message)?;
		trace!("Published to {channel} on {sent} connections");
		Ok(())
	}

	async fn attach(&self, client_id: Uuid, channel: &str) -> Result<(), Error> {
		self.subscribe(client_id, channel);
		Ok(())
	}

	async fn release(&self, channel: &str) -> Result<(), Error> {
		Hub::release(self, channel);
		Ok(())
	}
}

/// Spawns a background task which sends keep-alive envelopes on every
/// open connection, until the canceller is triggered.
pub fn spawn_keep_alive(
	hub: Arc<Hub>,
	delay: Duration,
	canceller: CancellationToken,
) -> JoinHandle<()> {
	tokio::spawn(async move {
		trace!("Sending connection keep-alives every {delay:?}");
		let mut interval = tokio::time::interval(delay);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		interval.tick().await;
		loop {
			tokio::select! {
				biased;
				_ = canceller.cancelled() => break,
				_ = interval.tick() => hub.keep_alive(),
			}
		}
		trace!("Background task exited: Sending connection keep-alives");
	})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn routes_channels_to_clients() {
		let hub = Hub::new();
		let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
		let (_, mut ra) = hub.connect(a);
		let (_, mut rb) = hub.connect(b);
		hub.subscribe(a, "one");
		hub.subscribe(b, "two");
		assert_eq!(hub.send("one", json!(1)).unwrap(), 1);
		assert_eq!(hub.send("two", json!(2)).unwrap(), 1);
		assert_eq!(hub.send("three", json!(3)).unwrap(), 0);
		let m1 = ra.recv().await.unwrap();
		let m2 = rb.recv().await.unwrap();
		assert_eq!((m1.event.as_str(), m1.data), ("one", json!(1)));
		assert_eq!((m2.event.as_str(), m2.data), ("two", json!(2)));
		assert!(m2.id > m1.id);
		assert!(ra.try_recv().is_err());
	}

	#[tokio::test]
	async fn unsubscribe_and_release() {
		let hub = Hub::new();
		let a = Uuid::new_v4();
		let (_, mut ra) = hub.connect(a);
		hub.attach(a, "q").await.unwrap();
		hub.unsubscribe(a, "q");
		assert_eq!(hub.send("q", json!(1)).unwrap(), 0);
		hub.subscribe(a, "q");
		Publisher::release(&hub, "q").await.unwrap();
		hub.publish("q", json!(1)).await.unwrap();
		hub.keep_alive();
		assert!(ra.recv().await.unwrap().is_keep_alive());
	}

	#[tokio::test]
	async fn stale_disconnect_keeps_new_connection() {
		let hub = Hub::new();
		let a = Uuid::new_v4();
		// Subscriptions made before the connection opens are kept
		hub.subscribe(a, "q");
		let (old, _) = hub.connect(a);
		let (new, mut rx) = hub.connect(a);
		hub.disconnect(a, old);
		assert!(hub.is_connected(a));
		assert_eq!(hub.send("q", json!(1)).unwrap(), 1);
		assert_eq!(rx.recv().await.unwrap().data, json!(1));
		hub.disconnect(a, new);
		assert!(!hub.is_connected(a));
		assert_eq!(hub.send("q", json!(2)).unwrap(), 0);
	}

	#[tokio::test]
	async fn full_connections_fail_and_close() {
		let hub = Hub::with_capacity(1);
		let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
		let (_, mut ra) = hub.connect(a);
		let (_, mut rb) = hub.connect(b);
		hub.subscribe(a, "q");
		hub.subscribe(b, "q");
		assert_eq!(hub.send("q", json!(1)).unwrap(), 2);
		assert_eq!(rb.recv().await.unwrap().data, json!(1));
		// The first client fell behind, the second one kept up
		assert!(matches!(hub.publish("q", json!(2)).await, Err(Error::Publish { .. })));
		assert_eq!(rb.recv().await.unwrap().data, json!(2));
		assert!(!hub.is_connected(a));
		assert!(hub.is_connected(b));
		// The queued envelope is still read before the stream ends
		assert_eq!(ra.recv().await.unwrap().data, json!(1));
		assert!(ra.recv().await.is_none());
		// Reconnecting restores delivery
		let (_, mut ra) = hub.connect(a);
		assert_eq!(hub.send("q", json!(3)).unwrap(), 2);
		assert_eq!(ra.recv().await.unwrap().data, json!(3));
	}
}
