use serde_json::Error as JsonError;
use thiserror::Error;

use crate::val::Id;

/// An error originating from the live query engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The engine encountered unreachable logic
	#[error("The engine encountered unreachable logic: {0}")]
	Unreachable(String),

	/// No repository has been registered under the requested entity key
	#[error("The entity '{0}' does not exist")]
	EntityNotFound(String),

	/// The requested row does not exist
	#[error("The row '{id}' does not exist in '{entity}'")]
	RowNotFound {
		entity: String,
		id: Id,
	},

	/// A row with the same id already exists
	#[error("A row with id '{id}' already exists in '{entity}'")]
	RowAlreadyExists {
		entity: String,
		id: Id,
	},

	/// A row was supplied without a usable id
	#[error("The row has no valid id field '{0}'")]
	MissingId(String),

	/// The session is not allowed to perform the operation
	#[error("Not enough permissions to perform this action")]
	NotAllowed,

	/// The supplied value was not a JSON object
	#[error("Expected an object but found {0}")]
	InvalidRow(String),

	/// The where clause could not be parsed
	#[error("Invalid filter: {0}")]
	InvalidFilter(String),

	/// The order clause could not be parsed
	#[error("Invalid order: {0}")]
	InvalidOrder(String),

	/// The request was missing a parameter or contained an unusable one
	#[error("Invalid request: {0}")]
	InvalidRequest(String),

	/// The requested live query is unknown to the storage
	#[error("The live query '{0}' does not exist")]
	LiveQueryNotFound(String),

	/// A live query could not be updated after repeated concurrent writes
	#[error("Gave up updating live query '{0}' after too many conflicting writes")]
	LiveQueryConflict(String),

	/// There was a problem with the live query storage
	#[error("There was a problem with the live query storage: {0}")]
	Storage(String),

	/// The transaction was already committed
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// A notification could not be delivered to a channel
	#[error("Failed to publish to channel '{channel}': {message}")]
	Publish {
		channel: String,
		message: String,
	},

	/// Represents an underlying error with JSON encoding / decoding
	#[error("JSON error: {0}")]
	Json(#[from] JsonError),
}

impl Error {
	/// Whether this error was caused by the caller rather than the engine
	pub fn is_client_error(&self) -> bool {
		matches!(
			self,
			Error::EntityNotFound(_)
				| Error::RowNotFound { .. }
				| Error::RowAlreadyExists { .. }
				| Error::MissingId(_)
				| Error::NotAllowed
				| Error::InvalidRow(_)
				| Error::InvalidFilter(_)
				| Error::InvalidOrder(_)
				| Error::InvalidRequest(_)
				| Error::Json(_)
		)
	}
}

impl From<Error> for String {
	fn from(e: Error) -> String {
		e.to_string()
	}
}
