//! The livesync server.
//!
//! Serves the entities given on the command line over HTTP, registers
//! live queries on them and pushes result changes to clients over an
//! event stream or a websocket.

#[macro_use]
extern crate tracing;

pub mod cli;
pub mod cnf;
pub mod dbs;
pub mod err;
pub mod net;
pub mod telemetry;

pub use cli::init;
