use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// A source of the current time for staleness checks
pub trait Clock: Debug + Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock which only moves when told to
#[derive(Debug)]
pub struct FakeClock {
	now: Mutex<DateTime<Utc>>,
}

impl Default for FakeClock {
	fn default() -> Self {
		Self::new(Utc::now())
	}
}

impl FakeClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn advance(&self, by: Duration) {
		*self.now.lock() += by;
	}
}

impl Clock for FakeClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock()
	}
}
