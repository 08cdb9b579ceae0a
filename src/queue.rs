//! Durable per-customer queue and the crash-safe drain that empties it.
//!
//! New tasks land at the head of a customer's data list; drains take from the tail. During a drain,
//! each item is moved atomically into a staging list before the push is attempted and removed only
//! after the endpoint confirms it, so a crash at any point leaves every unconfirmed item in exactly
//! one of the two lists. The next drain merges the staging list back before doing anything else.

// std
use std::path::{Path, PathBuf};
// self
use crate::{
	_prelude::*,
	backoff::{BackoffPolicy, RetryState},
	clock::Clock,
	customer::{CustomerDirectory, CustomerInfo},
	metrics,
	push::{PushBody, client::PushClient},
	stats::DailyStats,
	store::{KeyLayout, ListEnd, Store},
};

/// Default retention applied to a data queue on enqueue and after a full drain.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(8 * 24 * 60 * 60);

/// Result of one drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
	/// The data queue was empty.
	NoData,
	/// The customer is still backing off; nothing was touched.
	Skipped,
	/// Every queued item was delivered; carries how many.
	Pushed(u64),
}
impl DrainOutcome {
	/// Short label for logs and metrics.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::NoData => "no_data",
			Self::Skipped => "skipped",
			Self::Pushed(_) => "pushed",
		}
	}
}

/// Per-customer durable queue with backoff-governed draining.
#[derive(Debug)]
pub struct DurableQueue<S> {
	store: Arc<S>,
	keys: KeyLayout,
	directory: CustomerDirectory<S>,
	stats: DailyStats<S>,
	client: PushClient,
	clock: Arc<dyn Clock>,
	backoff: BackoffPolicy,
	retention: Duration,
}
impl<S> DurableQueue<S>
where
	S: Store,
{
	/// Create a queue with default backoff and retention.
	pub fn new(store: Arc<S>, keys: KeyLayout, client: PushClient, clock: Arc<dyn Clock>) -> Self {
		let directory = CustomerDirectory::new(store.clone(), keys.clone());
		let stats = DailyStats::new(store.clone(), keys.clone(), clock.clone());

		Self {
			store,
			keys,
			directory,
			stats,
			client,
			clock,
			backoff: BackoffPolicy::default(),
			retention: DEFAULT_RETENTION,
		}
	}

	/// Override the retry backoff policy.
	pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
		self.backoff = backoff;

		self
	}

	/// Override the data queue retention.
	pub fn with_retention(mut self, retention: Duration) -> Self {
		self.retention = retention;

		self
	}

	/// Customer records sharing this queue's store.
	pub fn directory(&self) -> &CustomerDirectory<S> {
		&self.directory
	}

	/// Daily counters sharing this queue's store.
	pub fn stats(&self) -> &DailyStats<S> {
		&self.stats
	}

	/// Client used for deliveries.
	pub fn client(&self) -> &PushClient {
		&self.client
	}

	/// Persist `payload` at the head of the customer's queue and refresh its retention.
	pub async fn enqueue(&self, customer: &str, payload: &[u8]) -> Result<()> {
		let key = self.keys.data(customer);
		let len = self.store.push_head(&key, payload).await?;

		self.store.expire(&key, self.retention).await?;

		tracing::debug!(customer, len, "task queued");

		Ok(())
	}

	/// Items waiting in the data queue.
	pub async fn size(&self, customer: &str) -> Result<u64> {
		self.store.len(&self.keys.data(customer)).await
	}

	/// Remaining retention of the data queue; `None` when it is missing or never expires.
	pub async fn retention_ttl(&self, customer: &str) -> Result<Option<Duration>> {
		self.store.ttl(&self.keys.data(customer)).await
	}

	/// The `n` items at the drain end, in list order (newest of them first). Read-only.
	pub async fn peek_tail(&self, customer: &str, n: usize) -> Result<Vec<Vec<u8>>> {
		if n == 0 {
			return Ok(Vec::new());
		}

		let start = -isize::try_from(n).unwrap_or(isize::MAX);

		self.store.range(&self.keys.data(customer), start, -1).await
	}

	/// Drop the `n` items at the drain end.
	///
	/// Pair with [`peek_tail`](Self::peek_tail); removing more than was inspected discards
	/// unseen items.
	pub async fn remove_tail(&self, customer: &str, n: usize) -> Result<()> {
		if n == 0 {
			return Ok(());
		}

		let stop = -1 - isize::try_from(n).unwrap_or(isize::MAX - 1);

		self.store.trim(&self.keys.data(customer), 0, stop).await
	}

	/// Opaque snapshot of the data queue; `None` when the customer has nothing queued.
	pub async fn snapshot(&self, customer: &str) -> Result<Option<Vec<u8>>> {
		self.store.dump(&self.keys.data(customer)).await
	}

	/// Recreate the data queue from a [`snapshot`](Self::snapshot) and reapply retention.
	///
	/// Fails with [`Error::KeyBusy`] while the customer still has queued items; callers wait for
	/// the queue to drain and retry.
	pub async fn restore(&self, customer: &str, snapshot: &[u8]) -> Result<()> {
		let key = self.keys.data(customer);

		self.store.restore(&key, snapshot).await?;
		self.store.expire(&key, self.retention).await?;

		tracing::info!(customer, "data queue restored");

		Ok(())
	}

	/// Write the data queue snapshot to `path` before the queue is freed.
	///
	/// Returns the path written, or `None` (and writes nothing) when the queue is empty.
	pub async fn dump_to_file(
		&self,
		customer: &str,
		path: impl AsRef<Path>,
	) -> Result<Option<PathBuf>> {
		let Some(snapshot) = self.snapshot(customer).await? else {
			return Ok(None);
		};
		let path = path.as_ref();

		tokio::fs::write(path, &snapshot).await?;

		tracing::info!(
			customer,
			path = %path.display(),
			bytes = snapshot.len(),
			"data queue dumped"
		);

		Ok(Some(path.to_path_buf()))
	}

	/// Restore the data queue from a file written by [`dump_to_file`](Self::dump_to_file).
	pub async fn restore_from_file(&self, customer: &str, path: impl AsRef<Path>) -> Result<()> {
		let snapshot = tokio::fs::read(path).await?;

		self.restore(customer, &snapshot).await
	}

	/// Merge staged items back onto the drain end of the data queue; returns how many moved.
	///
	/// Each item moves atomically, so the step is idempotent and safe to repeat after a crash.
	pub async fn recover_staged(&self, customer: &str) -> Result<u64> {
		let data = self.keys.data(customer);
		let backup = self.keys.backup(customer);
		let mut moved = 0;

		while self.store.move_item(&backup, ListEnd::Head, &data, ListEnd::Tail).await?.is_some() {
			moved += 1;
		}

		if moved > 0 {
			if self.store.ttl(&data).await?.is_none() {
				self.store.expire(&data, self.retention).await?;
			}

			tracing::info!(customer, moved, "staged items merged back");
		}

		Ok(moved)
	}

	/// Deliver every queued item for `customer`, stopping at the first push failure.
	///
	/// Returns [`Error::DaoUnavailable`] when the customer has no readable info record, so the
	/// caller can fall back to a direct push. On a push failure the customer is marked unreachable,
	/// the next retry is scheduled, and the push error is returned. The retry state is persisted
	/// and staged items are merged back on every path past the backoff check.
	#[tracing::instrument(skip(self, customer), fields(customer = %customer))]
	pub async fn drain_and_push(&self, customer: &str, timeout: Duration) -> Result<DrainOutcome> {
		let result = self.drain(customer, timeout).await;

		metrics::record_drain(match &result {
			Ok(outcome) => outcome.as_str(),
			Err(err) if err.is_push_failure() => "push_failed",
			Err(_) => "error",
		});

		result
	}

	async fn drain(&self, customer: &str, timeout: Duration) -> Result<DrainOutcome> {
		self.recover_staged(customer).await?;

		let Some(info) = self.directory.info(customer).await? else {
			return Err(Error::DaoUnavailable { customer: customer.to_owned() });
		};

		if self.size(customer).await? == 0 {
			return Ok(DrainOutcome::NoData);
		}

		let mut state = self.directory.retry_state(customer).await?;
		let now = self.clock.unix_timestamp();

		if !state.due_for_retry(now) {
			tracing::debug!(next_push_ts = state.next_push_ts, now, "backoff not elapsed");

			return Ok(DrainOutcome::Skipped);
		}

		state.record_attempt(now);

		let mut pushed = 0;
		let attempt = self.push_staged(customer, &info, timeout, &mut pushed).await;
		let mut result = self.settle(customer, &mut state, attempt).await.map(|()| {
			tracing::info!(pushed, "queue drained");

			DrainOutcome::Pushed(pushed)
		});
		let persisted = self.directory.store_retry_state(customer, &state).await;
		let recovered = self.recover_staged(customer).await.map(|_| ());

		for (step, cleanup) in [("persist_retry_state", persisted), ("recover_staged", recovered)] {
			let Err(err) = cleanup else { continue };

			if result.is_ok() {
				result = Err(err);
			} else {
				tracing::error!(alert = "redis_error", step, error = %err, "drain cleanup failed");
			}
		}

		result
	}

	async fn push_staged(
		&self,
		customer: &str,
		info: &CustomerInfo,
		timeout: Duration,
		pushed: &mut u64,
	) -> Result<()> {
		let data = self.keys.data(customer);
		let backup = self.keys.backup(customer);

		while let Some(item) =
			self.store.move_item(&data, ListEnd::Tail, &backup, ListEnd::Head).await?
		{
			self.client.push(info, &PushBody::Raw(item.clone()), timeout).await?;
			self.store.remove_item(&backup, &item).await?;

			*pushed += 1;

			self.stats.incr_pushed_today().await?;
		}

		Ok(())
	}

	async fn settle(
		&self,
		customer: &str,
		state: &mut RetryState,
		attempt: Result<()>,
	) -> Result<()> {
		match attempt {
			Ok(()) => {
				*state = RetryState::default();

				self.store.expire(&self.keys.data(customer), self.retention).await?;
				self.directory.set_reachable(customer, true).await
			},
			Err(err) if err.is_push_failure() => {
				state.schedule_retry(&self.backoff);

				tracing::warn!(
					alert = "push_failed",
					push_retries = state.push_retries,
					next_push_ts = state.next_push_ts,
					error = %err,
					"drain aborted"
				);

				if let Err(mark) = self.directory.set_reachable(customer, false).await {
					tracing::error!(alert = "redis_error", error = %mark, "failed to mark unreachable");
				}

				Err(err)
			},
			Err(err) => Err(err),
		}
	}
}
