use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// An error originating from the client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// There was an error processing a remote HTTP request
	#[error("There was an error processing a remote HTTP request: {0}")]
	Http(#[from] reqwest::Error),

	/// There was an error on a websocket connection
	#[error("There was an error processing a remote WS request: {0}")]
	Ws(String),

	/// There was an error on an event stream connection
	#[error("There was an error processing a remote event stream: {0}")]
	Sse(String),

	/// The connection to the server could not be opened
	#[error("Unable to connect to the server: {0}")]
	Connection(String),

	/// The server rejected a request
	#[error("The server responded with status {status}: {message}")]
	Api {
		status: u16,
		message: String,
	},

	/// The supplied URL could not be used
	#[error("Invalid URL: {0}")]
	InvalidUrl(String),

	/// Represents an underlying error with JSON encoding / decoding
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// The connection has already been closed
	#[error("The connection has been closed")]
	Closed,

	/// An error raised by the shared live query model
	#[error(transparent)]
	Core(#[from] livesync_core::err::Error),
}

impl From<WsError> for Error {
	fn from(e: WsError) -> Self {
		Error::Ws(e.to_string())
	}
}

impl From<url::ParseError> for Error {
	fn from(e: url::ParseError) -> Self {
		Error::InvalidUrl(e.to_string())
	}
}
