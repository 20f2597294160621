use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use livesync_core::rpc::Hub;

use crate::dbs::{self, EntityDefinition, StorageKind};
use crate::net::{self, AppState};

#[derive(Args, Debug)]
pub struct StartCommandArguments {
	#[arg(help = "The hostname or IP address to listen for connections on")]
	#[arg(env = "LIVESYNC_BIND", short = 'b', long = "bind")]
	#[arg(default_value = "127.0.0.1:8000")]
	pub listen_address: SocketAddr,
	#[arg(help = "The logging level for the command-line tool")]
	#[arg(env = "LIVESYNC_LOG_LEVEL", short = 'l', long = "log")]
	#[arg(default_value = "info")]
	#[arg(value_parser = ["none", "full", "error", "warn", "info", "debug", "trace"])]
	pub log: String,
	#[arg(help = "An entity to serve, as `key` or `key:id,fields`")]
	#[arg(env = "LIVESYNC_ENTITIES", short = 'e', long = "entity", value_delimiter = ' ')]
	#[arg(required = true)]
	pub entities: Vec<EntityDefinition>,
	#[arg(help = "Where registered live queries are stored")]
	#[arg(env = "LIVESYNC_LIVE_QUERY_STORAGE", long = "live-query-storage")]
	#[arg(value_enum, default_value_t = StorageKind::Memory)]
	pub storage: StorageKind,
}

pub fn init(args: StartCommandArguments) -> anyhow::Result<()> {
	// Initialize logging
	crate::telemetry::builder().with_log_level(&args.log).init().context("Failed to set up logging")?;
	// Start the async runtime
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.thread_name("livesync-worker")
		.build()
		.context("Failed to start the async runtime")?;
	runtime.block_on(run(args))
}

async fn run(args: StartCommandArguments) -> anyhow::Result<()> {
	let hub = Arc::new(Hub::new());
	// Start the datastore
	let datastore = dbs::init(&args.entities, args.storage, hub.clone());
	let state = AppState::new(datastore.clone(), hub.clone());
	// Start the background tasks
	let tasks = dbs::start_tasks(&datastore, &hub, &state.shutdown);
	// Start the web server
	let result = net::init(args.listen_address, state.clone()).await;
	// Stop the background tasks
	state.shutdown.cancel();
	for task in tasks {
		if let Err(e) = task.await {
			warn!("Background task failed: {e}");
		}
	}
	result.context("The web server failed")
}
