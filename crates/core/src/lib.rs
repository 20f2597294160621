//! The live query engine behind livesync.
//!
//! This crate holds everything which runs on the server: entity
//! repositories, the storage of registered live queries, the registry
//! which diffs and publishes query results as rows change, and the hub
//! multiplexing channels over client connections. The wire model in
//! [`proto`], [`val`] and [`expr`] is shared with the client crate.

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod dbs;
pub mod err;
pub mod expr;
pub mod kvs;
pub mod live;
pub mod proto;
pub mod rpc;
pub mod val;
