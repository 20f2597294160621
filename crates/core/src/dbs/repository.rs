use std::sync::Arc;

use async_trait::async_trait;

use super::{Change, EntityMetadata, Session};
use crate::err::Error;
use crate::expr::FindOptions;
use crate::val::{Id, Row};

/// A source of rows which can run a filtered, sorted query.
#[async_trait]
pub trait Repository: Send + Sync {
	fn metadata(&self) -> Arc<dyn EntityMetadata>;

	/// Runs a query as the given session
	async fn find(&self, options: &FindOptions, session: &Session) -> Result<Vec<Row>, Error>;
}

/// A repository which can also be written to.
///
/// Every write returns the [`Change`] it made, which is what the live
/// query registry diffs against.
#[async_trait]
pub trait EntityStore: Repository {
	async fn insert(&self, row: Row, session: &Session) -> Result<Change, Error>;

	/// Merges `patch` into the row with the given id
	async fn update(&self, id: &Id, patch: Row, session: &Session) -> Result<Change, Error>;

	async fn delete(&self, id: &Id, session: &Session) -> Result<Change, Error>;
}
