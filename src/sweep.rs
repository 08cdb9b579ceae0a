//! Retry sweeps: drain every known customer through a bounded worker pool while leading.

// crates.io
use tokio::{
	sync::Semaphore,
	task::{JoinError, JoinSet},
	time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config,
	leader::LeadershipSignal,
	metrics,
	queue::{DrainOutcome, DurableQueue},
	store::Store,
};

/// Per-sweep tally, aggregated after every dispatched drain has finished.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
	/// Customers listed in the registry.
	pub customers: usize,
	/// Items delivered across all drains.
	pub pushed: u64,
	/// Drains that found nothing queued.
	pub idle: usize,
	/// Drains skipped because the customer is still backing off.
	pub backed_off: usize,
	/// Customers not dispatched because leadership was lost mid-sweep.
	pub undispatched: usize,
	/// Customers whose drain failed or panicked, with the error text.
	pub failures: Vec<(String, String)>,
	/// Wall time of the sweep.
	pub elapsed: Duration,
}
impl SweepReport {
	fn record(
		&mut self,
		customer: String,
		joined: std::result::Result<Result<DrainOutcome>, JoinError>,
	) {
		match joined {
			Ok(Ok(outcome)) => {
				tracing::debug!(customer, outcome = outcome.as_str(), "drain finished");

				match outcome {
					DrainOutcome::Pushed(count) => self.pushed += count,
					DrainOutcome::NoData => self.idle += 1,
					DrainOutcome::Skipped => self.backed_off += 1,
				}
			},
			Ok(Err(err)) => {
				if err.is_push_failure() {
					tracing::warn!(alert = "push_failed", customer, error = %err, "drain failed");
				} else if matches!(err, Error::DaoUnavailable { .. }) {
					tracing::warn!(customer, error = %err, "customer has no usable info record");
				} else {
					tracing::error!(alert = "redis_error", customer, error = %err, "drain failed");
				}

				self.failures.push((customer, err.to_string()));
			},
			Err(join_err) => {
				tracing::error!(
					alert = "repush_exception",
					customer,
					error = %join_err,
					"drain task crashed"
				);

				self.failures.push((customer, join_err.to_string()));
			},
		}
	}
}

/// Fans drains out over a fixed-size pool, one sweep at a time.
#[derive(Debug)]
pub struct SweepCoordinator<S> {
	queue: Arc<DurableQueue<S>>,
	pool_size: usize,
	interval: Duration,
	push_timeout: Duration,
}
impl<S> SweepCoordinator<S>
where
	S: Store,
{
	/// Create a coordinator with default pool size, interval, and push timeout.
	pub fn new(queue: Arc<DurableQueue<S>>) -> Self {
		Self {
			queue,
			pool_size: config::DEFAULT_POOL_SIZE,
			interval: config::DEFAULT_SWEEP_INTERVAL,
			push_timeout: config::DEFAULT_PUSH_TIMEOUT,
		}
	}

	/// Override the number of concurrent drains, clamped to `1..=MAX_POOL_SIZE`.
	pub fn with_pool_size(mut self, pool_size: usize) -> Self {
		self.pool_size = pool_size.clamp(1, config::MAX_POOL_SIZE);

		self
	}

	/// Override the pause between sweeps.
	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;

		self
	}

	/// Override the timeout passed to every drain.
	pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
		self.push_timeout = push_timeout;

		self
	}

	/// Drain every known customer once, regardless of leadership.
	pub async fn sweep(&self) -> Result<SweepReport> {
		self.sweep_inner(None).await
	}

	/// Drain every known customer once, dispatching only while `signal` reports leadership.
	pub async fn sweep_while_leading(&self, signal: &LeadershipSignal) -> Result<SweepReport> {
		self.sweep_inner(Some(signal)).await
	}

	/// Sweep whenever leading, pausing between sweeps, until `shutdown` fires.
	///
	/// A sweep in progress always runs to completion.
	pub async fn run(&self, mut signal: LeadershipSignal, shutdown: CancellationToken) {
		loop {
			let leading = tokio::select! {
				_ = shutdown.cancelled() => break,
				leading = signal.wait_for_leadership() => leading,
			};

			if !leading {
				tracing::warn!("leadership signal closed; sweeper stopping");

				break;
			}
			if let Err(err) = self.sweep_while_leading(&signal).await {
				tracing::error!(alert = "redis_error", error = %err, "sweep failed");
			}

			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = time::sleep(self.interval) => {},
			}
		}

		tracing::debug!("sweeper stopped");
	}

	#[tracing::instrument(skip_all, fields(pool_size = self.pool_size))]
	async fn sweep_inner(&self, signal: Option<&LeadershipSignal>) -> Result<SweepReport> {
		let started = Instant::now();
		let customers = self.queue.directory().customers().await?;
		let permits = Arc::new(Semaphore::new(self.pool_size));
		let mut tasks = JoinSet::new();
		let mut report = SweepReport { customers: customers.len(), ..Default::default() };

		for customer in customers {
			let Ok(permit) = permits.clone().acquire_owned().await else { break };

			if signal.is_some_and(|signal| !signal.is_leader()) {
				report.undispatched += 1;

				continue;
			}

			let queue = self.queue.clone();
			let timeout = self.push_timeout;

			tasks.spawn(async move {
				let drain = {
					let customer = customer.clone();

					tokio::spawn(async move { queue.drain_and_push(&customer, timeout).await })
				};
				let joined = drain.await;

				drop(permit);

				(customer, joined)
			});
		}

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((customer, outcome)) => report.record(customer, outcome),
				Err(err) => tracing::error!(
					alert = "repush_exception",
					error = %err,
					"sweep worker crashed"
				),
			}
		}

		if report.undispatched > 0 {
			tracing::warn!(undispatched = report.undispatched, "leadership lost mid-sweep");
		}

		report.elapsed = started.elapsed();

		metrics::record_sweep(report.elapsed);

		tracing::info!(
			customers = report.customers,
			pushed = report.pushed,
			idle = report.idle,
			backed_off = report.backed_off,
			failures = report.failures.len(),
			elapsed = ?report.elapsed,
			"sweep finished"
		);

		Ok(report)
	}
}
