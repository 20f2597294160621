//! The wire protocol shared by the server and the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::val::{Id, Row};

/// The query string parameter carrying the requested action
pub const ACTION_PARAM: &str = "__action";
/// Run a query and register it as a live query
pub const LIVE_QUERY_ACTION: &str = "liveQuery";
/// Drop a previously registered live query
pub const END_LIVE_QUERY_ACTION: &str = "endLiveQuery";
/// The route, relative to the API root, live query ids are kept alive on
pub const KEEP_ALIVE_ROUTE: &str = "_liveQueryKeepAlive";
/// The route, relative to the API root, event streams are opened on
pub const STREAM_ROUTE: &str = "stream";
/// The route, relative to the API root, a stream is subscribed to a channel on
pub const STREAM_SUBSCRIBE_ROUTE: &str = "stream/subscribe";
/// The route, relative to the API root, a stream is unsubscribed from a channel on
pub const STREAM_UNSUBSCRIBE_ROUTE: &str = "stream/unsubscribe";
/// The route, relative to the API root, websocket connections are upgraded on
pub const WS_ROUTE: &str = "ws";
/// The header identifying a client connection
pub const CLIENT_ID_HEADER: &str = "client-id";
/// The event name of periodic keep-alive envelopes
pub const KEEP_ALIVE_EVENT: &str = "keep-alive";

/// A change to the result set of a live query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum LiveQueryChange {
	/// The complete result set
	All(Vec<Row>),
	/// A row which now matches the query
	Add(Row),
	/// A row the client already has was changed, possibly including its id
	Replace {
		#[serde(rename = "oldId")]
		old_id: Id,
		item: Row,
	},
	/// A row which no longer matches the query
	Remove {
		id: Id,
	},
}

/// A message delivered on a client connection.
///
/// `event` is either a channel name or [`KEEP_ALIVE_EVENT`]. Ids increase
/// monotonically for the lifetime of the server process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	pub id: u64,
	pub event: String,
	#[serde(default)]
	pub data: Value,
}

impl Envelope {
	pub fn is_keep_alive(&self) -> bool {
		self.event == KEEP_ALIVE_EVENT
	}
}

/// The response to a live query registration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
	pub result: Vec<Row>,
	pub query_channel: String,
}

/// The body of an end of life notification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndLiveQuery {
	pub id: String,
}

/// The body of a stream subscribe or unsubscribe request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
	pub channel: String,
}

/// A frame sent by the client over a websocket connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
	Subscribe {
		channel: String,
	},
	Unsubscribe {
		channel: String,
	},
}

/// Decodes the data of a channel envelope into live query changes.
///
/// The server sends batches, but a single change is also accepted.
pub fn decode_changes(data: Value) -> Result<Vec<LiveQueryChange>, serde_json::Error> {
	match data {
		Value::Array(_) => serde_json::from_value(data),
		v => Ok(vec![serde_json::from_value(v)?]),
	}
}
