use std::convert::Infallible;

use axum::extract::FromRequestParts;
use http::request::Parts;
use livesync_core::dbs::Session;
use livesync_core::proto::CLIENT_ID_HEADER;
use uuid::Uuid;

use crate::err::Error;

/// The header naming the user a request is made for
pub const USER_HEADER: &str = "x-livesync-user";
/// The header listing the roles of the user, separated by commas
pub const ROLES_HEADER: &str = "x-livesync-roles";

/// The connection id a client sends with its requests, if any
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientId(pub Option<Uuid>);

impl ClientId {
	pub fn required(self) -> Result<Uuid, Error> {
		self.0.ok_or(Error::MissingClientId(CLIENT_ID_HEADER))
	}
}

impl<S: Send + Sync> FromRequestParts<S> for ClientId {
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
		let Some(value) = parts.headers.get(CLIENT_ID_HEADER) else {
			return Ok(ClientId(None));
		};
		let value = String::from_utf8_lossy(value.as_bytes());
		match Uuid::parse_str(value.trim()) {
			Ok(id) => Ok(ClientId(Some(id))),
			Err(_) => Err(Error::InvalidClientId(value.into_owned())),
		}
	}
}

/// The session a request runs as.
///
/// The user and roles are taken from request headers as they were
/// established by whatever authenticates requests in front of the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSession(pub Session);

impl<S: Send + Sync> FromRequestParts<S> for RequestSession {
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, _: &S) -> Result<Self, Self::Rejection> {
		let header = |name: &str| {
			parts.headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
		};
		let mut session = match header(USER_HEADER) {
			Some(user) => Session::for_user(user),
			None => Session::anonymous(),
		};
		if let Some(roles) = header(ROLES_HEADER) {
			for role in roles.split(',').map(str::trim).filter(|r| !r.is_empty()) {
				session = session.with_role(role);
			}
		}
		Ok(RequestSession(session))
	}
}
