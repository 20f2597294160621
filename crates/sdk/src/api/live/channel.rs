use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::Observer;
use crate::api::err::Error;

#[derive(Default)]
struct State {
	listeners: IndexMap<u64, Observer<Value>>,
	removed: bool,
}

/// A named channel on the shared connection, with its listeners.
pub(crate) struct MessageChannel {
	pub(crate) name: String,
	state: Mutex<State>,
}

impl MessageChannel {
	pub(crate) fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			state: Mutex::new(State::default()),
		}
	}

	pub(crate) fn add_listener(&self, id: u64, observer: Observer<Value>) {
		self.state.lock().listeners.insert(id, observer);
	}

	/// Removes a listener, returning how many remain, or `None` if the
	/// listener was not registered
	pub(crate) fn remove_listener(&self, id: u64) -> Option<usize> {
		let mut state = self.state.lock();
		state.listeners.shift_remove(&id)?;
		Some(state.listeners.len())
	}

	/// Delivers the data of a message to every listener
	pub(crate) fn deliver(&self, data: Value) {
		let listeners: Vec<_> = {
			let state = self.state.lock();
			if state.removed {
				return;
			}
			state.listeners.values().cloned().collect()
		};
		for listener in listeners {
			listener.next(data.clone());
		}
	}

	pub(crate) fn close(&self) {
		let mut state = self.state.lock();
		state.removed = true;
		state.listeners.clear();
	}

	pub(crate) fn fail(&self, error: Arc<Error>) {
		let listeners: Vec<_> = {
			let mut state = self.state.lock();
			state.removed = true;
			state.listeners.drain(..).map(|(_, l)| l).collect()
		};
		for listener in listeners {
			listener.error(error.clone());
		}
	}
}
