use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use livesync_core::proto::{ClientFrame, Envelope, WS_ROUTE};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::AppState;
use super::extract::ClientId;
use crate::cnf::WEBSOCKET_PING_FREQUENCY;

pub(super) fn router() -> Router<AppState> {
	Router::new().route(&format!("/{WS_ROUTE}"), get(upgrade))
}

async fn upgrade(
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
	ClientId(client_id): ClientId,
) -> Response {
	let client_id = client_id.unwrap_or_else(Uuid::new_v4);
	ws.on_upgrade(move |socket| serve(socket, state, client_id))
}

/// Serves a websocket connection until either side closes it
async fn serve(socket: WebSocket, state: AppState, client_id: Uuid) {
	let (generation, envelopes) = state.hub.connect(client_id);
	let canceller = state.shutdown.child_token();
	let (sender, receiver) = socket.split();
	let mut tasks = JoinSet::new();
	tasks.spawn(write(sender, envelopes, canceller.clone()));
	tasks.spawn(read(receiver, state.clone(), client_id, canceller));
	while tasks.join_next().await.is_some() {}
	state.hub.disconnect(client_id, generation);
	trace!("Websocket of client {client_id} closed");
}

async fn write(
	mut sender: SplitSink<WebSocket, Message>,
	mut envelopes: Receiver<Envelope>,
	canceller: CancellationToken,
) {
	let mut interval = tokio::time::interval(WEBSOCKET_PING_FREQUENCY);
	// Skip the first tick, which completes immediately
	interval.tick().await;
	loop {
		tokio::select! {
			biased;
			_ = canceller.cancelled() => break,
			envelope = envelopes.recv() => {
				let Some(envelope) = envelope else {
					break;
				};
				let text = match serde_json::to_string(&envelope) {
					Ok(text) => text,
					Err(e) => {
						error!("Failed to serialize envelope {}: {e}", envelope.id);
						continue;
					}
				};
				if let Err(e) = sender.send(Message::Text(text.into())).await {
					trace!("Error sending websocket message: {e}");
					break;
				}
			}
			_ = interval.tick() => {
				if sender.send(Message::Ping(Bytes::new())).await.is_err() {
					break;
				}
			}
		}
	}
	canceller.cancel();
	let _ = sender.close().await;
}

async fn read(
	mut receiver: SplitStream<WebSocket>,
	state: AppState,
	client_id: Uuid,
	canceller: CancellationToken,
) {
	loop {
		let msg = tokio::select! {
			biased;
			_ = canceller.cancelled() => break,
			msg = receiver.next() => msg,
		};
		match msg {
			Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
				Ok(ClientFrame::Subscribe {
					channel,
				}) => state.hub.subscribe(client_id, &channel),
				Ok(ClientFrame::Unsubscribe {
					channel,
				}) => state.hub.unsubscribe(client_id, &channel),
				Err(e) => debug!("Ignoring invalid websocket frame: {e}"),
			},
			Some(Ok(Message::Close(_))) | None => break,
			Some(Ok(_)) => {}
			Some(Err(e)) => {
				trace!("Error receiving websocket message: {e}");
				break;
			}
		}
	}
	canceller.cancel();
}
