//! The capabilities a transport provides to the subscription manager.

mod router;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

pub(crate) use router::Router;

/// Receives the data of every message published on a channel
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Invoked by a transport after it re-established a lost connection
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

/// Opens connections to the server.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Opens a connection, resolving once the server accepted it.
	///
	/// The connection reconnects on its own when it is lost, replays its
	/// channel subscriptions and then calls `on_reconnect`.
	async fn open_connection(&self, on_reconnect: ReconnectHook) -> Result<Arc<dyn Connection>>;
}

/// One open connection, multiplexing any number of channels.
#[async_trait]
pub trait Connection: Send + Sync {
	/// Starts delivering the messages of a channel to a handler.
	///
	/// Messages which arrived on the channel before it was subscribed
	/// to are delivered first.
	async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()>;

	/// Stops delivering the messages of a channel
	async fn unsubscribe(&self, channel: &str) -> Result<()>;

	/// Closes the connection, ending any reconnection attempts
	async fn close(&self);
}
