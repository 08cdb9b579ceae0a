// crates.io
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	config::RelayConfig,
	customer::CustomerDirectory,
	intake::Intake,
	leader::{LeaderElector, LeadershipSignal},
	push::client::PushClient,
	queue::DurableQueue,
	stats::DailyStats,
	store::{KeyLayout, Store, redis::RedisStore},
	sweep::SweepCoordinator,
};

/// Builder for [`Relay`].
#[derive(Debug)]
pub struct RelayBuilder<S> {
	store: Arc<S>,
	config: RelayConfig,
	clock: Option<Arc<dyn Clock>>,
	http: Option<Client>,
}
impl<S> RelayBuilder<S>
where
	S: Store,
{
	/// Replace the whole configuration.
	pub fn config(mut self, config: RelayConfig) -> Self {
		self.config = config;

		self
	}

	/// Read time from `clock` instead of the system clock.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Deliver pushes through an existing HTTP client.
	pub fn http_client(mut self, http: Client) -> Self {
		self.http = Some(http);

		self
	}

	/// Validate the configuration and wire every component.
	pub fn build(self) -> Result<Relay<S>> {
		let Self { store, config, clock, http } = self;

		config.validate()?;

		let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
		let http = match http {
			Some(http) => http,
			None => Client::builder().build()?,
		};
		let keys = KeyLayout::new(&config.namespace);
		let client =
			PushClient::new(http, clock.clone()).with_link_ttl_slack(config.link_ttl_slack);
		let queue = Arc::new(
			DurableQueue::new(store.clone(), keys.clone(), client, clock)
				.with_backoff(config.backoff)
				.with_retention(config.retention),
		);
		let intake = Intake::new(queue.clone()).with_push_timeout(config.push_timeout);

		tracing::debug!(namespace = %config.namespace, role = %config.role, "relay built");

		Ok(Relay { store, keys, config, queue, intake })
	}
}

/// Fully wired relay: intake, queue, and the repusher runtime over one store.
#[derive(Debug)]
pub struct Relay<S> {
	store: Arc<S>,
	keys: KeyLayout,
	config: RelayConfig,
	queue: Arc<DurableQueue<S>>,
	intake: Intake<S>,
}
impl<S> Relay<S>
where
	S: Store,
{
	/// Start building a relay over `store` with default configuration.
	pub fn builder(store: Arc<S>) -> RelayBuilder<S> {
		RelayBuilder { store, config: RelayConfig::default(), clock: None, http: None }
	}

	/// Effective configuration.
	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	/// Underlying store.
	pub fn store(&self) -> &Arc<S> {
		&self.store
	}

	/// Key layout under the configured namespace.
	pub fn keys(&self) -> &KeyLayout {
		&self.keys
	}

	/// Durable per-customer queue.
	pub fn queue(&self) -> &Arc<DurableQueue<S>> {
		&self.queue
	}

	/// Customer records.
	pub fn directory(&self) -> &CustomerDirectory<S> {
		self.queue.directory()
	}

	/// Daily counters.
	pub fn stats(&self) -> &DailyStats<S> {
		self.queue.stats()
	}

	/// First-attempt path for inbound tasks.
	pub fn intake(&self) -> &Intake<S> {
		&self.intake
	}

	/// A fresh elector for the configured role.
	pub fn elector(&self) -> LeaderElector<S> {
		LeaderElector::new(
			self.store.clone(),
			&self.keys,
			self.config.role.clone(),
			self.config.lease_ttl,
			self.config.lease_poll_interval,
		)
	}

	/// A sweep coordinator using the configured pool size, interval, and timeout.
	pub fn coordinator(&self) -> SweepCoordinator<S> {
		SweepCoordinator::new(self.queue.clone())
			.with_pool_size(self.config.pool_size)
			.with_interval(self.config.sweep_interval)
			.with_push_timeout(self.config.push_timeout)
	}

	/// Start the elector and sweeper loops on the current tokio runtime.
	pub fn spawn_repusher(&self) -> RepusherHandle {
		let elector = self.elector();
		let instance_id = elector.instance_id().to_owned();
		let signal = elector.signal();
		let coordinator = self.coordinator();
		let shutdown = CancellationToken::new();

		tracing::info!(role = %self.config.role, instance = %instance_id, "repusher starting");

		let elector = tokio::spawn(elector.run(shutdown.clone()));
		let sweeper = {
			let signal = signal.clone();
			let shutdown = shutdown.clone();

			tokio::spawn(async move { coordinator.run(signal, shutdown).await })
		};

		RepusherHandle { instance_id, signal, shutdown, elector, sweeper }
	}
}
impl Relay<RedisStore> {
	/// Connect to Redis at `url` and build a relay with `config`.
	pub async fn connect(url: &str, config: RelayConfig) -> Result<Self> {
		config.validate()?;

		let store = RedisStore::connect_with_delay(url, config.reconnect_delay).await?;

		Relay::builder(Arc::new(store)).config(config).build()
	}
}

/// Control handle for a running repusher.
#[derive(Debug)]
pub struct RepusherHandle {
	instance_id: String,
	signal: LeadershipSignal,
	shutdown: CancellationToken,
	elector: JoinHandle<()>,
	sweeper: JoinHandle<()>,
}
impl RepusherHandle {
	/// Lease token of this process.
	pub fn instance_id(&self) -> &str {
		&self.instance_id
	}

	/// Whether this process currently leads.
	pub fn is_leader(&self) -> bool {
		self.signal.is_leader()
	}

	/// A subscription to leadership changes.
	pub fn signal(&self) -> LeadershipSignal {
		self.signal.clone()
	}

	/// Stop both loops, letting an in-flight sweep finish first.
	pub async fn shutdown(self) {
		self.shutdown.cancel();

		if let Err(err) = self.sweeper.await {
			tracing::error!(alert = "repush_exception", error = %err, "sweeper task crashed");
		}
		if let Err(err) = self.elector.await {
			tracing::error!(alert = "repush_exception", error = %err, "elector task crashed");
		}

		tracing::info!(instance = %self.instance_id, "repusher stopped");
	}
}
