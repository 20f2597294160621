//! A transport multiplexing channels over a websocket.

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use livesync_core::proto::{CLIENT_ID_HEADER, ClientFrame, Envelope, WS_ROUTE};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Result;
use crate::api::conn::{Connection, MessageHandler, ReconnectHook, Router, Transport};
use crate::api::err::Error;
use crate::api::opt::ClientConfig;

pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(5);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
	Subscribe(String),
	Unsubscribe(String),
}

impl Command {
	fn frame(self) -> ClientFrame {
		match self {
			Command::Subscribe(channel) => ClientFrame::Subscribe {
				channel,
			},
			Command::Unsubscribe(channel) => ClientFrame::Unsubscribe {
				channel,
			},
		}
	}
}

fn encode(frame: &ClientFrame) -> Result<Message> {
	Ok(Message::text(serde_json::to_string(frame)?))
}

/// A [`Transport`] over a single websocket
#[derive(Clone, Debug)]
pub struct WsTransport {
	config: ClientConfig,
	client_id: Uuid,
}

impl WsTransport {
	pub fn new(config: ClientConfig, client_id: Uuid) -> Self {
		Self {
			config,
			client_id,
		}
	}

	async fn connect(&self) -> Result<Socket> {
		let mut request = self.config.ws_url(WS_ROUTE)?.as_str().into_client_request()?;
		let client_id = HeaderValue::from_str(&self.client_id.to_string())
			.map_err(|error| Error::Ws(error.to_string()))?;
		request.headers_mut().insert(CLIENT_ID_HEADER, client_id);
		let (socket, _) = tokio_tungstenite::connect_async(request).await?;
		Ok(socket)
	}
}

#[async_trait]
impl Transport for WsTransport {
	async fn open_connection(&self, on_reconnect: ReconnectHook) -> Result<Arc<dyn Connection>> {
		let socket = self.connect().await?;
		debug!("Opened websocket for client {}", self.client_id);
		let (commands, command_rx) = async_channel::unbounded();
		let connection = Arc::new(WsConnection {
			commands,
			router: Arc::new(Router::new(self.config.message_id_tolerance)),
			canceller: CancellationToken::new(),
		});
		tokio::spawn(run(
			self.clone(),
			socket,
			connection.router.clone(),
			command_rx,
			connection.canceller.clone(),
			on_reconnect,
		));
		Ok(connection)
	}
}

struct WsConnection {
	commands: Sender<Command>,
	router: Arc<Router>,
	canceller: CancellationToken,
}

#[async_trait]
impl Connection for WsConnection {
	async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<()> {
		self.router.bind(channel, handler);
		self.commands.send(Command::Subscribe(channel.to_owned())).await.map_err(|_| Error::Closed)
	}

	async fn unsubscribe(&self, channel: &str) -> Result<()> {
		self.router.unbind(channel);
		self.commands.send(Command::Unsubscribe(channel.to_owned())).await.map_err(|_| Error::Closed)
	}

	async fn close(&self) {
		self.canceller.cancel();
		self.commands.close();
	}
}

async fn run(
	transport: WsTransport,
	mut socket: Socket,
	router: Arc<Router>,
	commands: Receiver<Command>,
	canceller: CancellationToken,
	on_reconnect: ReconnectHook,
) {
	let delay = transport.config.reconnect_delay;
	'router: loop {
		let (mut socket_sink, mut socket_stream) = socket.split();
		let mut interval = time::interval(PING_INTERVAL);
		// don't bombard the server with pings if we miss some ticks
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		interval.tick().await;
		let mut last_activity = Instant::now();
		loop {
			tokio::select! {
				biased;
				_ = canceller.cancelled() => {
					match socket_sink.send(Message::Close(None)).await {
						Ok(..) => trace!("Connection closed successfully"),
						Err(error) => trace!("Failed to close the connection; {error}"),
					}
					break 'router;
				}
				command = commands.recv() => {
					let Ok(command) = command else {
						let _ = socket_sink.send(Message::Close(None)).await;
						break 'router;
					};
					let message = match encode(&command.frame()) {
						Ok(message) => message,
						Err(error) => {
							warn!("Failed to encode a channel request; {error}");
							continue;
						}
					};
					if let Err(error) = socket_sink.send(message).await {
						trace!("Failed to send a channel request; {error}");
						break;
					}
					last_activity = Instant::now();
				}
				message = socket_stream.next() => match message {
					Some(Ok(Message::Text(text))) => {
						last_activity = Instant::now();
						match serde_json::from_str::<Envelope>(text.as_str()) {
							Ok(envelope) => {
								router.dispatch(envelope);
							}
							Err(error) => warn!("Received an invalid message; {error}"),
						}
					}
					Some(Ok(Message::Binary(..))) => trace!("Received an unexpected binary message"),
					Some(Ok(Message::Ping(..))) => trace!("Received a ping from the server"),
					Some(Ok(Message::Pong(..))) => {
						last_activity = Instant::now();
						trace!("Received a pong from the server");
					}
					Some(Ok(Message::Frame(..))) => trace!("Received an unexpected raw frame"),
					Some(Ok(Message::Close(..))) => {
						trace!("Connection closed by the server");
						break;
					}
					Some(Err(error)) => {
						trace!("{error}");
						break;
					}
					None => break,
				},
				_ = interval.tick() => {
					// only ping if we haven't talked to the server recently
					if last_activity.elapsed() >= PING_INTERVAL {
						trace!("Pinging the server");
						if let Err(error) = socket_sink.send(Message::Ping(Default::default())).await {
							trace!("failed to ping the server; {error:?}");
							break;
						}
					}
				}
			}
		}

		'reconnect: loop {
			trace!("Reconnecting...");
			tokio::select! {
				biased;
				_ = canceller.cancelled() => break 'router,
				_ = time::sleep(delay) => {}
			}
			match transport.connect().await {
				Ok(s) => {
					socket = s;
					for channel in router.channels() {
						let frame = ClientFrame::Subscribe {
							channel,
						};
						let sent = match encode(&frame) {
							Ok(message) => socket.send(message).await.map_err(Error::from),
							Err(error) => Err(error),
						};
						if let Err(error) = sent {
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
	trace!("Websocket closed");
}
