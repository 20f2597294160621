//! Options for configuring the client.

use std::time::Duration;

use url::Url;

use crate::Result;
use crate::api::err::Error;

/// How often the ids of active live queries are sent to the server
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
/// How long an unused connection stays open before it is closed
pub const DEFAULT_CLOSE_DELAY: Duration = Duration::from_millis(1000);
/// How far behind the last seen message id a message is still considered
/// a duplicate
pub const DEFAULT_MESSAGE_ID_TOLERANCE: u64 = 10;
/// How long to wait between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// The transport used to receive channel messages
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportKind {
	/// A `text/event-stream` response, with subscriptions made over HTTP
	#[default]
	Sse,
	/// A websocket, with subscriptions made over the socket
	Ws,
}

/// The configuration of a client
#[derive(Clone, Debug)]
pub struct ClientConfig {
	url: Url,
	pub(crate) transport: TransportKind,
	pub(crate) keep_alive_interval: Duration,
	pub(crate) close_delay: Duration,
	pub(crate) message_id_tolerance: u64,
	pub(crate) reconnect_delay: Duration,
}

impl ClientConfig {
	/// Creates a configuration for the API root at the given URL, for
	/// example `http://127.0.0.1:8000/api`
	pub fn new(url: &str) -> Result<Self> {
		let mut url = Url::parse(url)?;
		match url.scheme() {
			"http" | "https" => {}
			scheme => return Err(Error::InvalidUrl(format!("unsupported scheme `{scheme}`"))),
		}
		// Relative joins only keep the last path segment with a trailing slash
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());
			url.set_path(&path);
		}
		Ok(Self {
			url,
			transport: TransportKind::default(),
			keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
			close_delay: DEFAULT_CLOSE_DELAY,
			message_id_tolerance: DEFAULT_MESSAGE_ID_TOLERANCE,
			reconnect_delay: DEFAULT_RECONNECT_DELAY,
		})
	}

	pub fn with_transport(mut self, transport: TransportKind) -> Self {
		self.transport = transport;
		self
	}

	pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
		self.keep_alive_interval = interval;
		self
	}

	pub fn with_close_delay(mut self, delay: Duration) -> Self {
		self.close_delay = delay;
		self
	}

	pub fn with_message_id_tolerance(mut self, tolerance: u64) -> Self {
		self.message_id_tolerance = tolerance;
		self
	}

	pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
		self.reconnect_delay = delay;
		self
	}

	pub fn transport(&self) -> TransportKind {
		self.transport
	}

	/// The API root
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Resolves a route relative to the API root
	pub fn api_url(&self, route: &str) -> Result<Url> {
		Ok(self.url.join(route)?)
	}

	/// Resolves a route relative to the API root as a websocket URL
	pub fn ws_url(&self, route: &str) -> Result<Url> {
		let mut url = self.api_url(route)?;
		let scheme = match url.scheme() {
			"https" => "wss",
			_ => "ws",
		};
		url.set_scheme(scheme).map_err(|_| Error::InvalidUrl(url.to_string()))?;
		Ok(url)
	}
}
