//! Durable storage substrate: the primitive operations every component is built on.
//!
//! Shared state (queues, customer records, retry state, stats, leases) lives entirely in the store,
//! never in process memory, so cross-process correctness rests on the atomicity of these
//! primitives: single-item moves between lists, create-if-absent with TTL, and owner-checked TTL
//! refresh.

pub mod memory;
pub mod reconnect;
pub mod redis;

// std
use std::{collections::HashMap, future::Future};
// crates.io
use chrono::NaiveDate;
// self
use crate::_prelude::*;

/// End of a list. Head is where new items land; tail is where the oldest items wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListEnd {
	/// Most recently pushed end (`LEFT` in Redis terms).
	Head,
	/// Oldest end (`RIGHT` in Redis terms).
	Tail,
}

/// Result of an owner-checked lease refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseRefresh {
	/// The lease belonged to the caller and its TTL was extended.
	Refreshed,
	/// No lease exists; it expired or was never taken.
	Absent,
	/// Another holder owns the lease.
	HeldByOther,
}

/// Storage primitives with Redis-like semantics.
///
/// Ranges use Redis indexing: `0` is the head, `-1` the tail, both bounds inclusive.
pub trait Store: Send + Sync + 'static {
	/// Push `value` at the head of the list; returns the new length.
	fn push_head(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<u64>> + Send;

	/// Push `value` at the tail of the list; returns the new length.
	fn push_tail(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<u64>> + Send;

	/// Atomically pop one item from `from` on `src` and push it onto `to` on `dst`.
	///
	/// A crash leaves the item in exactly one of the two lists.
	fn move_item(
		&self,
		src: &str,
		from: ListEnd,
		dst: &str,
		to: ListEnd,
	) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

	/// Remove the first occurrence of `value` scanning from the head; returns removed count.
	fn remove_item(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<u64>> + Send;

	/// Items between `start` and `stop`, inclusive.
	fn range(
		&self,
		key: &str,
		start: isize,
		stop: isize,
	) -> impl Future<Output = Result<Vec<Vec<u8>>>> + Send;

	/// List length; zero for a missing key.
	fn len(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

	/// Keep only the items between `start` and `stop`, inclusive.
	fn trim(&self, key: &str, start: isize, stop: isize) -> impl Future<Output = Result<()>> + Send;

	/// Whether the key exists.
	fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

	/// Delete the key if present.
	fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

	/// Serialized snapshot of the key's value; `None` for a missing key.
	///
	/// Snapshots carry no expiry and are only meaningful to the same backend.
	fn dump(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

	/// Recreate `key` from a [`dump`](Self::dump) snapshot, without expiry.
	///
	/// Fails with [`Error::KeyBusy`] when the key already exists.
	fn restore(&self, key: &str, snapshot: &[u8]) -> impl Future<Output = Result<()>> + Send;

	/// Set the key's time-to-live; a no-op for a missing key.
	fn expire(&self, key: &str, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

	/// Remaining time-to-live; `None` when the key is missing or never expires.
	fn ttl(&self, key: &str) -> impl Future<Output = Result<Option<Duration>>> + Send;

	/// All fields of a hash; empty for a missing key.
	fn hash_get_all(&self, key: &str)
	-> impl Future<Output = Result<HashMap<String, String>>> + Send;

	/// Set the given hash fields, leaving others untouched.
	fn hash_set(
		&self,
		key: &str,
		fields: &[(&str, String)],
	) -> impl Future<Output = Result<()>> + Send;

	/// Atomically add `delta` to an integer hash field; returns the new value.
	fn hash_incr(
		&self,
		key: &str,
		field: &str,
		delta: i64,
	) -> impl Future<Output = Result<i64>> + Send;

	/// Add a member to a set.
	fn set_add(&self, key: &str, member: &str) -> impl Future<Output = Result<()>> + Send;

	/// All members of a set.
	fn set_members(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

	/// Create `key = token` with `ttl` only if the key is absent; returns whether it was created.
	fn set_if_absent(
		&self,
		key: &str,
		token: &str,
		ttl: Duration,
	) -> impl Future<Output = Result<bool>> + Send;

	/// Extend the TTL of `key` only if it currently holds `token`.
	fn refresh_if_owner(
		&self,
		key: &str,
		token: &str,
		ttl: Duration,
	) -> impl Future<Output = Result<LeaseRefresh>> + Send;
}

/// Deterministic key names, scoped under a namespace.
#[derive(Clone, Debug)]
pub struct KeyLayout {
	namespace: Arc<str>,
}
impl KeyLayout {
	/// Create a layout rooted at `namespace`.
	pub fn new(namespace: impl AsRef<str>) -> Self {
		Self { namespace: Arc::from(namespace.as_ref()) }
	}

	/// Namespace prefix shared by every key.
	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// Per-customer data queue.
	pub fn data(&self, customer: &str) -> String {
		format!("{}:{customer}#datas", self.namespace)
	}

	/// Per-customer staging list used while a drain is in flight.
	pub fn backup(&self, customer: &str) -> String {
		format!("{}:{customer}#datas_tmp", self.namespace)
	}

	/// Per-customer info record.
	pub fn info(&self, customer: &str) -> String {
		format!("{}:{customer}#infos", self.namespace)
	}

	/// Per-customer retry state.
	pub fn retries(&self, customer: &str) -> String {
		format!("{}:{customer}#retries", self.namespace)
	}

	/// Set of every known customer id.
	pub fn customers(&self) -> String {
		format!("{}:customers", self.namespace)
	}

	/// Stats record for one UTC day.
	pub fn stats_day(&self, day: NaiveDate) -> String {
		format!("{}:{}_push_info", self.namespace, day.format("%Y%m%d"))
	}

	/// Set of days that have a stats record.
	pub fn stats_days(&self) -> String {
		format!("{}:push_info_days", self.namespace)
	}

	/// Leader lease flag for a role.
	pub fn lease(&self, role: &str) -> String {
		format!("{}:{role}_master", self.namespace)
	}
}
impl Default for KeyLayout {
	fn default() -> Self {
		Self::new(crate::config::DEFAULT_NAMESPACE)
	}
}
