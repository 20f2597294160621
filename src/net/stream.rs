use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use http::StatusCode;
use livesync_core::proto::{
	ChannelRequest, Envelope, STREAM_ROUTE, STREAM_SUBSCRIBE_ROUTE, STREAM_UNSUBSCRIBE_ROUTE,
};
use livesync_core::rpc::Hub;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use super::AppState;
use super::extract::ClientId;
use crate::err::Error;

pub(super) fn router() -> axum::Router<AppState> {
	Router::new()
		.route(&format!("/{STREAM_ROUTE}"), get(open))
		.route(&format!("/{STREAM_SUBSCRIBE_ROUTE}"), post(subscribe))
		.route(&format!("/{STREAM_UNSUBSCRIBE_ROUTE}"), post(unsubscribe))
}

/// Disconnects a client once its event stream is dropped
struct Connection {
	hub: Arc<Hub>,
	client_id: Uuid,
	generation: u64,
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.hub.disconnect(self.client_id, self.generation);
	}
}

fn event(envelope: Envelope) -> Event {
	Event::default().id(envelope.id.to_string()).event(envelope.event).data(envelope.data.to_string())
}

async fn open(
	State(state): State<AppState>,
	ClientId(client_id): ClientId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let client_id = client_id.unwrap_or_else(Uuid::new_v4);
	let (generation, envelopes) = state.hub.connect(client_id);
	let connection = Connection {
		hub: state.hub.clone(),
		client_id,
		generation,
	};
	let stream = ReceiverStream::new(envelopes)
		.take_until(state.shutdown.clone().cancelled_owned())
		.map(move |envelope| {
			let _ = &connection;
			Ok(event(envelope))
		});
	Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn subscribe(
	State(state): State<AppState>,
	client_id: ClientId,
	Json(request): Json<ChannelRequest>,
) -> Result<StatusCode, Error> {
	state.hub.subscribe(client_id.required()?, &request.channel);
	Ok(StatusCode::OK)
}

async fn unsubscribe(
	State(state): State<AppState>,
	client_id: ClientId,
	Json(request): Json<ChannelRequest>,
) -> Result<StatusCode, Error> {
	state.hub.unsubscribe(client_id.required()?, &request.channel);
	Ok(StatusCode::OK)
}
