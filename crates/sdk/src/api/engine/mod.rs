//! The engines connecting a client to a livesync server.

pub mod remote;
