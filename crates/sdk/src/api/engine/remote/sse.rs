//! A transport receiving channel messages over a `text/event-stream`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use livesync_core::proto::{
	CLIENT_ID_HEADER, ChannelRequest, Envelope, STREAM_ROUTE, STREAM_SUBSCRIBE_ROUTE,
	STREAM_UNSUBSCRIBE_ROUTE,
};
use reqwest::Response;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::send;
use crate::Result;
use crate::api::conn::{Connection, MessageHandler, ReconnectHook, Router, Transport};
use crate::api::opt::ClientConfig;

/// A [`Transport`] reading an event stream, with channel subscriptions
/// made over plain HTTP requests.
#[derive(Clone, Debug)]
pub struct SseTransport {
	http: reqwest::Client,
	config: ClientConfig,
	client_id: Uuid,
}

impl SseTransport {
	pub fn new(http: reqwest::Client, config: ClientConfig, client_id: Uuid) -> Self {
		Self {
			http,
			config,
			client_id,
		}
	}

	async fn open_stream(&self) -> Result<Response> {
		let request = self
			.http
			.get(self.config.api_url(STREAM_ROUTE)?)
			.header(ACCEPT, "text/event-stream")
			.header(CLIENT_ID_HEADER, self.client_id.to_string());
		send(request).await
	}

	async fn channel_request(&self, route: &str, channel: &str) -> Result<()> {
		let request = self
			.http
			.post(self.config.api_url(route)?)
			.header(CLIENT_ID_HEADER, self.client_id.to_string())
			.json(&ChannelRequest {
				channel: channel.to_owned(),
			});
		send(request).await?;
		Ok(())
	}
}

#[async_trait]
impl Transport for SseTransport {
	async fn open_connection(&self, on_reconnect: ReconnectHook) -> Result<Arc<dyn Connection>> {
		let response = self.open_stream().await?;
		debug!("Opened event stream for client {}", self.client_id);
		let connection = Arc::new(SseConnection {
			transport: self.clone(),
			router: Arc::new(Router::new(self.config.message_id_tolerance)),
			canceller: CancellationToken::new(),
		});
		tokio::spawn(run(connection.clone(), response, on_reconnect));
		Ok(connection)
	}
}

struct SseConnection {
	transport: SseTransport,
	router: Arc<Router>,
	canceller: CancellationToken,
}

#[async_trait]
impl Connection for SseConnection {
	async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
		self.transport.channel_request(STREAM_SUBSCRIBE_ROUTE, channel).await?;
		self.router.bind(channel, handler);
		Ok(())
	}

	async fn unsubscribe(&self, channel: &str) -> Result<()> {
		self.router.unbind(channel);
		if self.canceller.is_cancelled() {
			return Ok(());
		}
		self.transport.channel_request(STREAM_UNSUBSCRIBE_ROUTE, channel).await
	}

	async fn close(&self) {
		trace!("Closing event stream");
		self.canceller.cancel();
	}
}

async fn run(connection: Arc<SseConnection>, mut response: Response, on_reconnect: ReconnectHook) {
	let transport = &connection.transport;
	let delay = transport.config.reconnect_delay;
	'stream: loop {
		let mut parser = EventParser::default();
		let mut body = response.bytes_stream();
		loop {
			tokio::select! {
				biased;
				_ = connection.canceller.cancelled() => break 'stream,
				chunk = body.next() => match chunk {
					Some(Ok(bytes)) => {
						for envelope in parser.feed(&bytes) {
							connection.router.dispatch(envelope);
						}
					}
					Some(Err(error)) => {
						trace!("Event stream failed; {error}");
						break;
					}
					None => {
						trace!("Event stream ended");
						break;
					}
				}
			}
		}
		'reconnect: loop {
			trace!("Reconnecting...");
			tokio::select! {
				biased;
				_ = connection.canceller.cancelled() => break 'stream,
				_ = time::sleep(delay) => {}
			}
			match transport.open_stream().await {
				Ok(r) => {
					response = r;
					for channel in connection.router.channels() {
						if let Err(error) =
							transport.channel_request(STREAM_SUBSCRIBE_ROUTE, &channel).await
						{
							trace!("{error}");
							continue 'reconnect;
						}
					}
					trace!("Reconnected successfully");
					on_reconnect();
					break;
				}
				Err(error) => {
					trace!("Failed to reconnect; {error}");
				}
			}
		}
	}
	trace!("Event stream closed");
}

/// An incremental parser for the `text/event-stream` format
#[derive(Default)]
pub(crate) struct EventParser {
	buffer: Vec<u8>,
	id: Option<String>,
	event: Option<String>,
	data: Vec<String>,
}

impl EventParser {
	/// Feeds a chunk of the stream, returning the completed events
	pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<Envelope> {
		self.buffer.extend_from_slice(chunk);
		let mut out = Vec::new();
		while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
			let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
			line.pop();
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			let line = String::from_utf8_lossy(&line);
			if let Some(envelope) = self.line(&line) {
				out.push(envelope);
			}
		}
		out
	}

	fn line(&mut self, line: &str) -> Option<Envelope> {
		if line.is_empty() {
			return self.dispatch();
		}
		if line.starts_with(':') {
			return None;
		}
		let (field, value) = match line.split_once(':') {
			Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
			None => (line, ""),
		};
		match field {
			"id" => self.id = Some(value.to_owned()),
			"event" => self.event = Some(value.to_owned()),
			"data" => self.data.push(value.to_owned()),
			_ => {}
		}
		None
	}

	fn dispatch(&mut self) -> Option<Envelope> {
		let id = self.id.take();
		let event = self.event.take();
		if self.data.is_empty() && event.is_none() {
			return None;
		}
		let data = self.data.drain(..).collect::<Vec<_>>().join("\n");
		let data = if data.is_empty() {
			Value::Null
		} else {
			match serde_json::from_str(&data) {
				Ok(v) => v,
				Err(_) => Value::String(data),
			}
		};
		Some(Envelope {
			id: id.and_then(|id| id.parse().ok()).unwrap_or_default(),
			event: event.unwrap_or_else(|| "message".to_owned()),
			data,
		})
	}
}
