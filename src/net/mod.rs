mod entity;
mod extract;
mod signals;
mod stream;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use livesync_core::dbs::Datastore;
use livesync_core::rpc::Hub;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use extract::{ClientId, RequestSession, ROLES_HEADER, USER_HEADER};

use crate::cnf::{API_PREFIX, HTTP_MAX_BODY_SIZE};
use crate::err::Error;

/// The state shared by every request handler
#[derive(Clone)]
pub struct AppState {
	pub datastore: Arc<Datastore>,
	pub hub: Arc<Hub>,
	/// Cancelled when the server shuts down, ending open streams
	pub shutdown: CancellationToken,
}

impl AppState {
	pub fn new(datastore: Arc<Datastore>, hub: Arc<Hub>) -> Self {
		Self {
			datastore,
			hub,
			shutdown: CancellationToken::new(),
		}
	}
}

/// The routes of the server, nested under the API prefix
pub fn router(state: AppState) -> Router {
	let api = Router::new()
		.merge(stream::router())
		.merge(ws::router())
		.merge(entity::router())
		.layer(DefaultBodyLimit::max(*HTTP_MAX_BODY_SIZE));
	Router::new().nest(API_PREFIX, api).with_state(state)
}

/// Binds the server and serves requests until a shutdown signal arrives
pub async fn init(bind: SocketAddr, state: AppState) -> Result<(), Error> {
	let listener = TcpListener::bind(bind).await?;
	signals::graceful_shutdown(state.shutdown.clone());
	serve(listener, state).await
}

/// Serves requests on a bound listener until the shutdown token of the
/// state is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), Error> {
	let addr = listener.local_addr()?;
	let shutdown = state.shutdown.clone();
	info!("Started web server on {addr}");
	axum::serve(listener, router(state)).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
	info!("Web server stopped");
	Ok(())
}
