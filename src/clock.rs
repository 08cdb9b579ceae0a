//! Wall-clock abstraction so backoff and link-expiry logic can run against controlled time.

// std
use std::{
	fmt::Debug,
	sync::atomic::{AtomicI64, Ordering},
};
// self
use crate::_prelude::*;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + Debug {
	/// Current UTC time.
	fn now(&self) -> DateTime<Utc>;

	/// Current time as whole Unix seconds.
	fn unix_timestamp(&self) -> i64 {
		self.now().timestamp()
	}
}

/// Clock backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Settable clock for deterministic tests and replay tooling.
///
/// Clones share the same underlying instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
	millis: Arc<AtomicI64>,
}
impl ManualClock {
	/// Create a clock frozen at `start`.
	pub fn new(start: DateTime<Utc>) -> Self {
		Self { millis: Arc::new(AtomicI64::new(start.timestamp_millis())) }
	}

	/// Create a clock frozen at the given Unix timestamp (seconds).
	pub fn at_unix(seconds: i64) -> Self {
		Self { millis: Arc::new(AtomicI64::new(seconds.saturating_mul(1_000))) }
	}

	/// Move the clock forward.
	pub fn advance(&self, by: Duration) {
		let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);

		self.millis.fetch_add(delta, Ordering::AcqRel);
	}

	/// Jump to an absolute time; may move backwards.
	pub fn set(&self, to: DateTime<Utc>) {
		self.millis.store(to.timestamp_millis(), Ordering::Release);
	}
}
impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		let millis = self.millis.load(Ordering::Acquire);

		DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
	}
}
