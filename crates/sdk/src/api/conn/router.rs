use std::collections::HashMap;

use indexmap::{IndexMap, IndexSet};
use livesync_core::proto::Envelope;
use parking_lot::Mutex;
use serde_json::Value;

use super::MessageHandler;

/// How many channels without a handler messages are held for
const MAX_PENDING_CHANNELS: usize = 64;
/// How many messages are held for a channel without a handler
const MAX_PENDING_MESSAGES: usize = 256;
/// How many recently unbound channels are remembered
const MAX_UNBOUND_CHANNELS: usize = 64;

/// Routes the envelopes of a connection to channel handlers.
///
/// Envelopes whose id is at or slightly below the last accepted id are
/// dropped as duplicates. An id far below it means the server restarted
/// and its ids started over, so it is accepted.
pub(crate) struct Router {
	tolerance: u64,
	state: Mutex<State>,
}

#[derive(Default)]
struct State {
	handlers: HashMap<String, MessageHandler>,
	pending: IndexMap<String, Vec<Value>>,
	/// Channels which were unbound, whose messages are dropped
	unbound: IndexSet<String>,
	last_id: Option<u64>,
}

impl Router {
	pub(crate) fn new(tolerance: u64) -> Self {
		Self {
			tolerance,
			state: Mutex::new(State::default()),
		}
	}

	/// Binds a handler to a channel, then hands it anything held for it
	pub(crate) fn bind(&self, channel: &str, handler: MessageHandler) {
		let pending = {
			let mut state = self.state.lock();
			state.unbound.shift_remove(channel);
			state.handlers.insert(channel.to_owned(), handler.clone());
			state.pending.shift_remove(channel).unwrap_or_default()
		};
		if !pending.is_empty() {
			trace!("Delivering {} held messages on {channel}", pending.len());
		}
		for data in pending {
			handler(data);
		}
	}

	pub(crate) fn unbind(&self, channel: &str) {
		let mut state = self.state.lock();
		state.handlers.remove(channel);
		state.pending.shift_remove(channel);
		if state.unbound.len() >= MAX_UNBOUND_CHANNELS {
			state.unbound.shift_remove_index(0);
		}
		state.unbound.insert(channel.to_owned());
	}

	/// The channels which currently have a handler
	pub(crate) fn channels(&self) -> Vec<String> {
		self.state.lock().handlers.keys().cloned().collect()
	}

	/// Routes an envelope, returning whether it was accepted
	pub(crate) fn dispatch(&self, envelope: Envelope) -> bool {
		let handler = {
			let mut state = self.state.lock();
			if let Some(last) = state.last_id {
				if envelope.id <= last && last - envelope.id <= self.tolerance {
					trace!("Dropping duplicate message {} (last seen {last})", envelope.id);
					return false;
				}
			}
			state.last_id = Some(envelope.id);
			if envelope.is_keep_alive() {
				return true;
			}
			match state.handlers.get(&envelope.event) {
				Some(handler) => handler.clone(),
				None if state.unbound.contains(&envelope.event) => {
					trace!("Dropping message {} on unbound channel {}", envelope.id, envelope.event);
					return true;
				}
				None => {
					// Hold the message until the channel is bound
					if !state.pending.contains_key(&envelope.event)
						&& state.pending.len() >= MAX_PENDING_CHANNELS
					{
						state.pending.shift_remove_index(0);
					}
					let held = state.pending.entry(envelope.event).or_default();
					if held.len() < MAX_PENDING_MESSAGES {
						held.push(envelope.data);
					}
					return true;
				}
			}
		};
		handler(envelope.data);
		true
	}
}
