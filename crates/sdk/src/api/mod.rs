//! The client API.

pub mod conn;
pub mod engine;
pub mod err;
pub mod live;
pub mod opt;

mod client;

pub use client::{LiveClient, LiveStream};
