//! The connection hub shared by the event stream and websocket endpoints.

mod hub;

pub use hub::{Hub, spawn_keep_alive};
