use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use livesync_core::dbs::EntityMetadata;
use livesync_core::expr::FindOptions;
use serde_json::Value;
use uuid::Uuid;

use crate::Result;
use crate::api::conn::Transport;
use crate::api::engine::remote::http::{ApiClient, HttpApi};
use crate::api::engine::remote::sse::SseTransport;
use crate::api::engine::remote::ws::WsTransport;
use crate::api::err::Error;
use crate::api::live::{LiveQueryChangeInfo, Observer, SubscriptionManager, Unsubscribe};
use crate::api::opt::{ClientConfig, TransportKind};

/// A client connected to a livesync server.
///
/// Cloning the client is cheap, and clones share their connection and
/// subscriptions.
#[derive(Clone)]
pub struct LiveClient {
	manager: SubscriptionManager,
	client_id: Uuid,
	config: ClientConfig,
}

impl LiveClient {
	/// Creates a client for the configured server. No connection is
	/// made until the first subscription.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let client_id = Uuid::new_v4();
		let http = reqwest::Client::builder().build()?;
		let api = Arc::new(HttpApi::new(http.clone(), config.clone(), client_id));
		let transport: Arc<dyn Transport> = match config.transport() {
			TransportKind::Sse => Arc::new(SseTransport::new(http, config.clone(), client_id)),
			TransportKind::Ws => Arc::new(WsTransport::new(config.clone(), client_id)),
		};
		debug!("Created client {client_id} for {}", config.url());
		Ok(Self::with_parts(transport, api, config, client_id))
	}

	/// Creates a client from its parts
	pub fn with_parts(
		transport: Arc<dyn Transport>,
		api: Arc<dyn ApiClient>,
		config: ClientConfig,
		client_id: Uuid,
	) -> Self {
		Self {
			manager: SubscriptionManager::new(transport, api, config.clone()),
			client_id,
			config,
		}
	}

	/// The id this client identifies its connection with
	pub fn client_id(&self) -> Uuid {
		self.client_id
	}

	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	pub fn manager(&self) -> &SubscriptionManager {
		&self.manager
	}

	/// Subscribes to the result of a query, see
	/// [`SubscriptionManager::subscribe`]
	pub fn subscribe(
		&self,
		meta: Arc<dyn EntityMetadata>,
		options: FindOptions,
		observer: Observer<LiveQueryChangeInfo>,
	) -> Unsubscribe {
		self.manager.subscribe(meta, options, observer)
	}

	/// Subscribes to the messages published on a channel
	pub fn subscribe_channel(&self, name: &str, observer: Observer<Value>) -> Unsubscribe {
		self.manager.subscribe_channel(name, observer)
	}

	/// Subscribes to the result of a query as a stream of updates.
	///
	/// The stream ends after yielding an error, and the subscription is
	/// released when the stream is dropped.
	pub fn stream(&self, meta: Arc<dyn EntityMetadata>, options: FindOptions) -> LiveStream {
		let (tx, rx) = async_channel::unbounded();
		let errors = tx.clone();
		let observer = Observer::new(move |info: LiveQueryChangeInfo| {
			let _ = tx.try_send(Ok(info));
		})
		.with_error(move |error: Arc<Error>| {
			let _ = errors.try_send(Err(error));
			errors.close();
		});
		LiveStream {
			rx: Box::pin(rx),
			_subscription: self.manager.subscribe(meta, options, observer),
		}
	}

	/// Waits until every pending subscribe and unsubscribe completed
	pub async fn flush(&self) {
		self.manager.flush().await
	}

	/// Releases every subscription and closes the connection
	pub async fn close(&self) {
		self.manager.close().await
	}
}

/// A stream of live query updates.
#[must_use = "streams do nothing unless you poll them"]
pub struct LiveStream {
	rx: Pin<Box<async_channel::Receiver<std::result::Result<LiveQueryChangeInfo, Arc<Error>>>>>,
	_subscription: Unsubscribe,
}

impl Stream for LiveStream {
	type Item = std::result::Result<LiveQueryChangeInfo, Arc<Error>>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.rx.as_mut().poll_next(cx)
	}
}
