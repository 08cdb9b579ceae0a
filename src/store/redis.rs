//! Redis-backed [`Store`] with one automatic reconnect per operation.
//!
//! Requires Redis 6.2 or newer: merging staged items back onto the drain end uses `LMOVE`.
//! Draining itself uses `RPOPLPUSH`.

// std
use std::{
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
};
// crates.io
use redis::{
	AsyncCommands, Client, Direction, ErrorKind, RedisError, Script, aio::MultiplexedConnection,
};
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	store::{LeaseRefresh, ListEnd, Store, reconnect},
};

/// Default pause before rebuilding the client after a transient failure.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

const REFRESH_IF_OWNER: &str = r#"
local holder = redis.call('GET', KEYS[1])
if not holder then
	return 0
end
if holder == ARGV[1] then
	redis.call('PEXPIRE', KEYS[1], ARGV[2])
	return 1
end
return -1
"#;

/// [`Store`] implementation over a multiplexed Redis connection.
///
/// Connection loss and read-only replica redirects are retried once after the client and
/// connection are discarded and rebuilt from the original URL.
pub struct RedisStore {
	url: String,
	reconnect_delay: Duration,
	handle: Mutex<Handle>,
	refresh_script: Script,
}
impl RedisStore {
	/// Connect to the Redis server at `url`.
	pub async fn connect(url: impl Into<String>) -> Result<Self> {
		Self::connect_with_delay(url, DEFAULT_RECONNECT_DELAY).await
	}

	/// Connect with a custom pause before reconnect attempts.
	pub async fn connect_with_delay(
		url: impl Into<String>,
		reconnect_delay: Duration,
	) -> Result<Self> {
		let url = url.into();
		let handle = Handle::open(&url).await?;

		tracing::info!(reconnect_delay = ?reconnect_delay, "connected to redis");

		Ok(Self {
			url,
			reconnect_delay,
			handle: Mutex::new(handle),
			refresh_script: Script::new(REFRESH_IF_OWNER),
		})
	}

	async fn connection(&self) -> MultiplexedConnection {
		self.handle.lock().await.connection.clone()
	}

	async fn reset(&self) -> Result<()> {
		let fresh = Handle::open(&self.url).await?;

		*self.handle.lock().await = fresh;

		tracing::info!("redis client rebuilt");

		Ok(())
	}

	async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
	where
		F: Fn(MultiplexedConnection) -> Fut,
		Fut: Future<Output = redis::RedisResult<T>>,
	{
		let this = self;
		let f = &f;

		reconnect::retry_transient(
			op,
			self.reconnect_delay,
			move || async move {
				let conn = this.connection().await;

				f(conn).await.map_err(|err| classify(op, err))
			},
			move || this.reset(),
		)
		.await
	}
}
impl Debug for RedisStore {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("RedisStore")
			.field("reconnect_delay", &self.reconnect_delay)
			.finish_non_exhaustive()
	}
}
impl Store for RedisStore {
	async fn push_head(&self, key: &str, value: &[u8]) -> Result<u64> {
		self.call("LPUSH", |mut conn| async move { conn.lpush(key, value).await }).await
	}

	async fn push_tail(&self, key: &str, value: &[u8]) -> Result<u64> {
		self.call("RPUSH", |mut conn| async move { conn.rpush(key, value).await }).await
	}

	async fn move_item(
		&self,
		src: &str,
		from: ListEnd,
		dst: &str,
		to: ListEnd,
	) -> Result<Option<Vec<u8>>> {
		if move_command(from, to) == "RPOPLPUSH" {
			return self
				.call("RPOPLPUSH", |mut conn| async move { conn.rpoplpush(src, dst).await })
				.await;
		}

		self.call("LMOVE", |mut conn| async move {
			conn.lmove(src, dst, direction(from), direction(to)).await
		})
		.await
	}

	async fn remove_item(&self, key: &str, value: &[u8]) -> Result<u64> {
		self.call("LREM", |mut conn| async move { conn.lrem(key, 1, value).await }).await
	}

	async fn range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
		self.call("LRANGE", |mut conn| async move { conn.lrange(key, start, stop).await }).await
	}

	async fn len(&self, key: &str) -> Result<u64> {
		self.call("LLEN", |mut conn| async move { conn.llen(key).await }).await
	}

	async fn trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
		self.call("LTRIM", |mut conn| async move { conn.ltrim(key, start, stop).await }).await
	}

	async fn exists(&self, key: &str) -> Result<bool> {
		self.call("EXISTS", |mut conn| async move { conn.exists(key).await }).await
	}

	async fn delete(&self, key: &str) -> Result<()> {
		self.call("DEL", |mut conn| async move { conn.del(key).await }).await
	}

	async fn dump(&self, key: &str) -> Result<Option<Vec<u8>>> {
		self.call("DUMP", |mut conn| async move {
			redis::cmd("DUMP").arg(key).query_async(&mut conn).await
		})
		.await
	}

	async fn restore(&self, key: &str, snapshot: &[u8]) -> Result<()> {
		self.call("RESTORE", |mut conn| async move {
			redis::cmd("RESTORE").arg(key).arg(0).arg(snapshot).query_async(&mut conn).await
		})
		.await
		.map_err(|err| match err {
			Error::Redis(inner) if inner.code() == Some("BUSYKEY") =>
				Error::KeyBusy { key: key.to_owned() },
			err => err,
		})
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
		let seconds = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);

		self.call("EXPIRE", |mut conn| async move { conn.expire(key, seconds).await }).await
	}

	async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
		let seconds: i64 =
			self.call("TTL", |mut conn| async move { conn.ttl(key).await }).await?;

		// -2: missing key, -1: no expiry.
		Ok(u64::try_from(seconds).ok().map(Duration::from_secs))
	}

	async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
		self.call("HGETALL", |mut conn| async move { conn.hgetall(key).await }).await
	}

	async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
		if fields.is_empty() {
			return Ok(());
		}

		self.call("HSET", |mut conn| async move { conn.hset_multiple(key, fields).await }).await
	}

	async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
		self.call("HINCRBY", |mut conn| async move { conn.hincr(key, field, delta).await }).await
	}

	async fn set_add(&self, key: &str, member: &str) -> Result<()> {
		self.call("SADD", |mut conn| async move { conn.sadd(key, member).await }).await
	}

	async fn set_members(&self, key: &str) -> Result<Vec<String>> {
		self.call("SMEMBERS", |mut conn| async move { conn.smembers(key).await }).await
	}

	async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
		let millis = ttl_millis(ttl);
		let reply: Option<String> = self
			.call("SET NX", |mut conn| async move {
				redis::cmd("SET")
					.arg(key)
					.arg(token)
					.arg("NX")
					.arg("PX")
					.arg(millis)
					.query_async(&mut conn)
					.await
			})
			.await?;

		Ok(reply.is_some())
	}

	async fn refresh_if_owner(&self, key: &str, token: &str, ttl: Duration) -> Result<LeaseRefresh> {
		let millis = ttl_millis(ttl);
		let script = &self.refresh_script;
		let reply: i64 = self
			.call("LEASE REFRESH", |mut conn| async move {
				script.key(key).arg(token).arg(millis).invoke_async(&mut conn).await
			})
			.await?;

		Ok(match reply {
			1 => LeaseRefresh::Refreshed,
			0 => LeaseRefresh::Absent,
			_ => LeaseRefresh::HeldByOther,
		})
	}
}

struct Handle {
	// Held so the client is dropped together with its connection on reset.
	_client: Client,
	connection: MultiplexedConnection,
}
impl Handle {
	async fn open(url: &str) -> Result<Self> {
		let client = Client::open(url)?;
		let connection = client
			.get_multiplexed_async_connection()
			.await
			.map_err(|err| classify("CONNECT", err))?;

		Ok(Self { _client: client, connection })
	}
}

fn classify(op: &'static str, err: RedisError) -> Error {
	if err.is_connection_dropped()
		|| err.is_connection_refusal()
		|| err.is_io_error()
		|| err.kind() == ErrorKind::IoError
		|| err.is_timeout()
		|| err.kind() == ErrorKind::ReadOnly
	{
		Error::TransientStore { op, reason: err.to_string() }
	} else {
		Error::Redis(err)
	}
}

fn direction(end: ListEnd) -> Direction {
	match end {
		ListEnd::Head => Direction::Left,
		ListEnd::Tail => Direction::Right,
	}
}

// RPOPLPUSH predates LMOVE and covers the drain direction.
fn move_command(from: ListEnd, to: ListEnd) -> &'static str {
	match (from, to) {
		(ListEnd::Tail, ListEnd::Head) => "RPOPLPUSH",
		_ => "LMOVE",
	}
}

fn ttl_millis(ttl: Duration) -> u64 {
	u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
