//! A client for livesync.
//!
//! A [`LiveClient`] runs queries against a livesync server and keeps
//! their results up to date as rows are written, without polling. All
//! live queries and channels of one client share a single connection,
//! either an event stream or a websocket, which is opened on the first
//! subscription and closed shortly after the last one ends.
//!
//! ```no_run
//! use livesync::opt::ClientConfig;
//! use livesync::{FindOptions, JsonEntity, LiveClient, Observer};
//! use std::sync::Arc;
//!
//! # async fn run() -> livesync::Result<()> {
//! let client = LiveClient::new(ClientConfig::new("http://127.0.0.1:8000/api")?)?;
//! let tasks = Arc::new(JsonEntity::new("tasks"));
//! let subscription = client.subscribe(
//! 	tasks,
//! 	FindOptions::default(),
//! 	Observer::new(|info: livesync::LiveQueryChangeInfo| println!("{} tasks", info.items.len())),
//! );
//! // ...
//! subscription.unsubscribe();
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate tracing;

mod api;

/// Connection capabilities implemented by the transports
pub use crate::api::conn;
/// The transports and HTTP client talking to a livesync server
pub use crate::api::engine;
/// Client configuration
pub use crate::api::opt;

/// The error type of the client
pub mod error {
	pub use crate::api::err::Error;
}

#[doc(inline)]
pub use crate::api::{
	LiveClient, LiveStream,
	live::{LiveQueryChangeInfo, Observer, SubscriptionManager, Unsubscribe},
};
#[doc(inline)]
pub use livesync_core::{
	dbs::{EntityMetadata, JsonEntity},
	expr::{Direction, Filter, FindOptions, OrderBy},
	proto::LiveQueryChange,
	val::{Id, Row},
};

pub use crate::error::Error;

/// A specialized `Result` type
pub type Result<T> = std::result::Result<T, Error>;
