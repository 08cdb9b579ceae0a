//! Retry scheduling: the exponential backoff policy and the per-customer retry state it governs.
//!
//! State transitions happen only inside [`DurableQueue::drain_and_push`](crate::DurableQueue);
//! nothing else mutates a persisted [`RetryState`].

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Default delay after the first failed drain.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(120);
/// Default ceiling for the backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(3_600);

const FIELD_PUSH_RETRIES: &str = "push_retries";
const FIELD_LATEST_PUSH_TS: &str = "latest_push_ts";
const FIELD_NEXT_PUSH_TS: &str = "next_push_ts";

/// Exponential backoff without jitter: attempt `k` waits `min(base * 2^(k-1), max)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
	/// Delay imposed after the first failed attempt.
	pub base: Duration,
	/// Upper bound applied to exponential growth.
	pub max: Duration,
}
impl BackoffPolicy {
	/// Validate invariants for the policy.
	pub fn validate(&self) -> Result<()> {
		if self.base.is_zero() {
			return Err(Error::Validation {
				field: "backoff.base",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max < self.base {
			return Err(Error::Validation {
				field: "backoff.max",
				reason: "Must be greater than or equal to backoff.base.".into(),
			});
		}

		Ok(())
	}

	/// Delay that follows failed attempt number `attempt` (1-based).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		if attempt == 0 {
			return Duration::ZERO;
		}

		let exponent = (attempt - 1).min(31);
		let delay = self.base.checked_mul(1u32 << exponent).unwrap_or(self.max);

		delay.min(self.max)
	}
}
impl Default for BackoffPolicy {
	fn default() -> Self {
		Self { base: DEFAULT_BASE_BACKOFF, max: DEFAULT_MAX_BACKOFF }
	}
}

/// Persisted retry bookkeeping for one customer; timestamps are Unix seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
	/// Drain attempts made since the queue was last fully emptied.
	pub push_retries: u32,
	/// Timestamp of the most recent drain attempt.
	pub latest_push_ts: i64,
	/// A drain may run only once `now` is strictly past this timestamp.
	pub next_push_ts: i64,
}
impl RetryState {
	/// Whether enough backoff time has elapsed to attempt another drain.
	pub fn due_for_retry(&self, now: i64) -> bool {
		now > self.next_push_ts
	}

	/// Count an attempt before it runs.
	///
	/// The increment is optimistic: it stands even if the attempt then succeeds, in which case the
	/// whole state is reset afterwards.
	pub fn record_attempt(&mut self, now: i64) {
		self.push_retries = self.push_retries.saturating_add(1);
		self.latest_push_ts = now;
	}

	/// Schedule the next permitted attempt after the current one failed.
	pub fn schedule_retry(&mut self, policy: &BackoffPolicy) {
		let delay = policy.delay_for(self.push_retries);
		let delay = i64::try_from(delay.as_secs()).unwrap_or(i64::MAX);

		self.next_push_ts = self.latest_push_ts.saturating_add(delay);
	}

	/// Decode from a stored hash; absent fields read as zero.
	pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
		Ok(Self {
			push_retries: parse_field(fields, FIELD_PUSH_RETRIES)?,
			latest_push_ts: parse_field(fields, FIELD_LATEST_PUSH_TS)?,
			next_push_ts: parse_field(fields, FIELD_NEXT_PUSH_TS)?,
		})
	}

	/// Encode as hash fields for storage.
	pub fn to_fields(&self) -> Vec<(&'static str, String)> {
		vec![
			(FIELD_PUSH_RETRIES, self.push_retries.to_string()),
			(FIELD_LATEST_PUSH_TS, self.latest_push_ts.to_string()),
			(FIELD_NEXT_PUSH_TS, self.next_push_ts.to_string()),
		]
	}
}

fn parse_field<T>(fields: &HashMap<String, String>, name: &'static str) -> Result<T>
where
	T: std::str::FromStr + Default,
{
	match fields.get(name) {
		None => Ok(T::default()),
		Some(raw) => raw
			.trim()
			.parse()
			.map_err(|_| Error::Store(format!("Retry field {name} holds non-numeric value {raw:?}."))),
	}
}
