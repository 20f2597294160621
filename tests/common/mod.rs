#![allow(dead_code)]
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use livesync_core::rpc::Hub;
use livesync_server::dbs::{self, StorageKind};
use livesync_server::net::{self, AppState};
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// A server running on an ephemeral port, stopped when dropped
pub struct Server {
	pub addr: SocketAddr,
	pub state: AppState,
}

impl Server {
	pub fn api_url(&self) -> String {
		format!("http://{}/api", self.addr)
	}

	pub fn url(&self, path: &str) -> String {
		format!("http://{}/api/{path}", self.addr)
	}

	/// Writes a row straight to the datastore, publishing its changes
	pub async fn insert(&self, entity: &str, row: Value) {
		let Value::Object(row) = row else {
			panic!("rows are objects");
		};
		self.state.datastore.insert(entity, row, &Default::default()).await.unwrap();
	}
}

impl Drop for Server {
	fn drop(&mut self) {
		self.state.shutdown.cancel();
	}
}

/// Starts a server serving the `tasks` entity
pub async fn start_server(storage: StorageKind) -> Server {
	let hub = Arc::new(Hub::new());
	let entities = vec!["tasks".parse().unwrap()];
	let datastore = dbs::init(&entities, storage, hub.clone());
	let state = AppState::new(datastore, hub);
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(net::serve(listener, state.clone()));
	let server = Server {
		addr,
		state,
	};
	server.insert("tasks", json!({"id": 1, "title": "a1"})).await;
	server.insert("tasks", json!({"id": 2, "title": "b1"})).await;
	server
}

/// How long to wait for a message which is expected to arrive
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait before concluding a message will never arrive
pub const SILENCE_TIMEOUT: Duration = Duration::from_millis(300);
