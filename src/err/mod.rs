use axum::response::{IntoResponse, Response};
use http::StatusCode;
use livesync_core::err::Error as CoreError;
use thiserror::Error;

/// An error returned by the server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// An error from the live query engine
	#[error("{0}")]
	Core(#[from] CoreError),

	/// The request body could not be parsed
	#[error("The request body could not be parsed: {0}")]
	Json(#[from] serde_json::Error),

	/// A query string parameter could not be parsed
	#[error("Invalid request: {0}")]
	Request(String),

	/// The action is not supported on the requested route
	#[error("The action '{0}' is not supported on this route")]
	UnsupportedAction(String),

	/// The client id header does not hold a UUID
	#[error("The client id '{0}' is not valid")]
	InvalidClientId(String),

	/// The client id header is required on this route
	#[error("The '{0}' header is required on this route")]
	MissingClientId(&'static str),

	/// The logging subscriber could not be installed
	#[error("Failed to set up logging: {0}")]
	Telemetry(String),

	/// There was a problem with the network or the operating system
	#[error("There was a problem with the network: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// The HTTP status this error is reported with
	pub fn status(&self) -> StatusCode {
		match self {
			Error::Core(
				CoreError::EntityNotFound(_)
				| CoreError::RowNotFound {
					..
				}
				| CoreError::LiveQueryNotFound(_),
			) => StatusCode::NOT_FOUND,
			Error::Core(CoreError::NotAllowed) => StatusCode::FORBIDDEN,
			Error::Core(CoreError::RowAlreadyExists {
				..
			}) => StatusCode::CONFLICT,
			Error::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
			Error::Json(_)
			| Error::Request(_)
			| Error::UnsupportedAction(_)
			| Error::InvalidClientId(_)
			| Error::MissingClientId(_) => StatusCode::BAD_REQUEST,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			error!("Request failed: {self}");
		} else {
			debug!("Request rejected: {self}");
		}
		(status, self.to_string()).into_response()
	}
}
