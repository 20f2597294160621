use serde::{Deserialize, Serialize};

/// The context a request is made in.
///
/// A session is captured when a live query is registered and restored
/// whenever that query is re-run, so that row visibility is always
/// evaluated as the subscriber rather than as the writer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// The authenticated user, if any
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
	/// The roles granted to this session
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub roles: Vec<String>,
}

impl Session {
	/// Create an unauthenticated session
	pub fn anonymous() -> Session {
		Session::default()
	}

	/// Create a session for a named user
	pub fn for_user(user: impl Into<String>) -> Session {
		Session {
			user: Some(user.into()),
			roles: Vec::new(),
		}
	}

	/// Grant a role to this session
	pub fn with_role(mut self, role: impl Into<String>) -> Session {
		self.roles.push(role.into());
		self
	}

	pub fn has_role(&self, role: &str) -> bool {
		self.roles.iter().any(|r| r == role)
	}
}
