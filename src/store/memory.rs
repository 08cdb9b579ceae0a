//! In-process store with the same semantics as the Redis backend.
//!
//! Suited to tests and single-process development; it offers no durability across restarts.
//! Expiry runs on tokio time, so paused-clock tests can fast-forward lease TTLs.

// std
use std::{
	collections::{BTreeSet, HashMap, VecDeque},
	sync::{
		Mutex, MutexGuard, PoisonError,
		atomic::{AtomicU32, Ordering},
	},
};
// crates.io
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	store::{LeaseRefresh, ListEnd, Store},
};

#[derive(Debug, Serialize, Deserialize)]
enum Value {
	List(VecDeque<Vec<u8>>),
	Hash(HashMap<String, String>),
	Set(BTreeSet<String>),
	Flag(String),
}

#[derive(Debug)]
struct Slot {
	value: Value,
	expires_at: Option<Instant>,
}

/// Thread-safe in-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
	slots: Mutex<HashMap<String, Slot>>,
	injected_failures: AtomicU32,
}
impl MemoryStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `count` operations fail with [`Error::TransientStore`].
	pub fn fail_next(&self, count: u32) {
		self.injected_failures.store(count, Ordering::SeqCst);
	}

	fn guard(&self, op: &'static str) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
		let injected = self
			.injected_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();

		if injected {
			return Err(Error::TransientStore { op, reason: "injected failure".into() });
		}

		let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
		let now = Instant::now();

		slots.retain(|_, slot| slot.expires_at.is_none_or(|at| at > now));

		Ok(slots)
	}
}
impl Store for MemoryStore {
	async fn push_head(&self, key: &str, value: &[u8]) -> Result<u64> {
		let mut slots = self.guard("LPUSH")?;
		let list = list_entry(&mut slots, key)?;

		list.push_front(value.to_vec());

		Ok(list.len() as u64)
	}

	async fn push_tail(&self, key: &str, value: &[u8]) -> Result<u64> {
		let mut slots = self.guard("RPUSH")?;
		let list = list_entry(&mut slots, key)?;

		list.push_back(value.to_vec());

		Ok(list.len() as u64)
	}

	async fn move_item(
		&self,
		src: &str,
		from: ListEnd,
		dst: &str,
		to: ListEnd,
	) -> Result<Option<Vec<u8>>> {
		let mut slots = self.guard("LMOVE")?;

		// Type-check the destination before touching the source.
		if let Some(slot) = slots.get(dst)
			&& !matches!(slot.value, Value::List(_))
		{
			return Err(wrong_type(dst));
		}

		let item = match slots.get_mut(src) {
			None => return Ok(None),
			Some(Slot { value: Value::List(list), .. }) => match from {
				ListEnd::Head => list.pop_front(),
				ListEnd::Tail => list.pop_back(),
			},
			Some(_) => return Err(wrong_type(src)),
		};
		let Some(item) = item else {
			return Ok(None);
		};

		drop_if_empty(&mut slots, src);

		let list = list_entry(&mut slots, dst)?;

		match to {
			ListEnd::Head => list.push_front(item.clone()),
			ListEnd::Tail => list.push_back(item.clone()),
		}

		Ok(Some(item))
	}

	async fn remove_item(&self, key: &str, value: &[u8]) -> Result<u64> {
		let mut slots = self.guard("LREM")?;
		let removed = match list_mut(&mut slots, key)? {
			None => 0,
			Some(list) => match list.iter().position(|item| item == value) {
				Some(index) => {
					list.remove(index);

					1
				},
				None => 0,
			},
		};

		drop_if_empty(&mut slots, key);

		Ok(removed)
	}

	async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
		let mut slots = self.guard("LRANGE")?;
		let Some(list) = list_mut(&mut slots, key)? else {
			return Ok(Vec::new());
		};

		Ok(match resolve_range(list.len(), start, stop) {
			Some((first, last)) => list.range(first..=last).cloned().collect(),
			None => Vec::new(),
		})
	}

	async fn len(&self, key: &str) -> Result<u64> {
		let mut slots = self.guard("LLEN")?;

		Ok(list_mut(&mut slots, key)?.map_or(0, |list| list.len() as u64))
	}

	async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
		let mut slots = self.guard("LTRIM")?;

		if let Some(list) = list_mut(&mut slots, key)? {
			match resolve_range(list.len(), start, stop) {
				Some((first, last)) => {
					list.truncate(last + 1);
					list.drain(..first);
				},
				None => list.clear(),
			}
		}

		drop_if_empty(&mut slots, key);

		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		Ok(self.guard("EXISTS")?.contains_key(key))
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.guard("DEL")?.remove(key);

		Ok(())
	}

	async fn dump(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let slots = self.guard("DUMP")?;

		slots.get(key).map(|slot| serde_json::to_vec(&slot.value).map_err(Error::from)).transpose()
	}

	async fn restore(&self, key: &str, snapshot: &[u8]) -> Result<()> {
		let value = serde_json::from_slice::<Value>(snapshot)
			.map_err(|_| Error::Store("DUMP payload version or checksum are wrong.".into()))?;
		let mut slots = self.guard("RESTORE")?;

		if slots.contains_key(key) {
			return Err(Error::KeyBusy { key: key.to_owned() });
		}

		slots.insert(key.to_string(), Slot { value, expires_at: None });

		Ok(())
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
		if let Some(slot) = self.guard("EXPIRE")?.get_mut(key) {
			slot.expires_at = Some(Instant::now() + ttl);
		}

		Ok(())
	}

	async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
		let slots = self.guard("TTL")?;

		Ok(slots
			.get(key)
			.and_then(|slot| slot.expires_at)
			.map(|at| at.saturating_duration_since(Instant::now())))
	}

	async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
		let slots = self.guard("HGETALL")?;

		match slots.get(key) {
			None => Ok(HashMap::new()),
			Some(Slot { value: Value::Hash(hash), .. }) => Ok(hash.clone()),
			Some(_) => Err(wrong_type(key)),
		}
	}

	async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
		let mut slots = self.guard("HSET")?;
		let hash = hash_entry(&mut slots, key)?;

		for (field, value) in fields {
			hash.insert((*field).to_string(), value.clone());
		}

		Ok(())
	}

	async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
		let mut slots = self.guard("HINCRBY")?;
		let hash = hash_entry(&mut slots, key)?;
		let current = match hash.get(field) {
			None => 0,
			Some(raw) => raw
				.parse::<i64>()
				.map_err(|_| Error::Store(format!("Hash field {field} is not an integer.")))?,
		};
		let next = current.saturating_add(delta);

		hash.insert(field.to_string(), next.to_string());

		Ok(next)
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<()> {
		let mut slots = self.guard("SADD")?;
		let slot = slots
			.entry(key.to_string())
			.or_insert_with(|| Slot { value: Value::Set(BTreeSet::new()), expires_at: None });

		match &mut slot.value {
			Value::Set(set) => {
				set.insert(member.to_string());

				Ok(())
			},
			_ => Err(wrong_type(key)),
		}
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>> {
		let slots = self.guard("SMEMBERS")?;

		match slots.get(key) {
			None => Ok(Vec::new()),
			Some(Slot { value: Value::Set(set), .. }) => Ok(set.iter().cloned().collect()),
			Some(_) => Err(wrong_type(key)),
		}
	}

	async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
		let mut slots = self.guard("SET NX")?;

		if slots.contains_key(key) {
			return Ok(false);
		}

		slots.insert(
			key.to_string(),
			Slot { value: Value::Flag(token.to_string()), expires_at: Some(Instant::now() + ttl) },
		);

		Ok(true)
	}

	async fn refresh_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<LeaseRefresh> {
		let mut slots = self.guard("LEASE REFRESH")?;

		match slots.get_mut(key) {
			None => Ok(LeaseRefresh::Absent),
			Some(slot) => match &slot.value {
				Value::Flag(holder) if holder == token => {
					slot.expires_at = Some(Instant::now() + ttl);

					Ok(LeaseRefresh::Refreshed)
				},
				_ => Ok(LeaseRefresh::HeldByOther),
			},
		}
	}
}

fn wrong_type(key: &str) -> Error {
	Error::Store(format!("WRONGTYPE operation against key {key} holding the wrong kind of value."))
}

fn list_entry<'a>(
	slots: &'a mut HashMap<String, Slot>,
	key: &str,
) -> Result<&'a mut VecDeque<Vec<u8>>> {
	let slot = slots
		.entry(key.to_string())
		.or_insert_with(|| Slot { value: Value::List(VecDeque::new()), expires_at: None });

	match &mut slot.value {
		Value::List(list) => Ok(list),
		_ => Err(wrong_type(key)),
	}
}

fn list_mut<'a>(
	slots: &'a mut HashMap<String, Slot>,
	key: &str,
) -> Result<Option<&'a mut VecDeque<Vec<u8>>>> {
	match slots.get_mut(key) {
		None => Ok(None),
		Some(Slot { value: Value::List(list), .. }) => Ok(Some(list)),
		Some(_) => Err(wrong_type(key)),
	}
}

fn hash_entry<'a>(
	slots: &'a mut HashMap<String, Slot>,
	key: &str,
) -> Result<&'a mut HashMap<String, String>> {
	let slot = slots
		.entry(key.to_string())
		.or_insert_with(|| Slot { value: Value::Hash(HashMap::new()), expires_at: None });

	match &mut slot.value {
		Value::Hash(hash) => Ok(hash),
		_ => Err(wrong_type(key)),
	}
}

// Redis drops a list once its last item is gone, TTL included.
fn drop_if_empty(slots: &mut HashMap<String, Slot>, key: &str) {
	if let Some(Slot { value: Value::List(list), .. }) = slots.get(key)
		&& list.is_empty()
	{
		slots.remove(key);
	}
}

fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
	let len = len as isize;
	let start = if start < 0 { (len + start).max(0) } else { start };
	let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

	if len == 0 || start > stop || start >= len || stop < 0 {
		None
	} else {
		Some((start as usize, stop as usize))
	}
}
