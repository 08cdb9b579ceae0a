//! Relay configuration: defaults, environment overlay, and validation.

// crates.io
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
// self
use crate::{_prelude::*, backoff::BackoffPolicy, push::client, queue, store::redis};

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "pusher";
/// Default lease role for the retry sweeper.
pub const DEFAULT_ROLE: &str = "repusher";
/// Default per-push HTTP timeout.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30);
/// Default worker pool size for a sweep.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Largest sweep pool a semaphore can back.
pub const MAX_POOL_SIZE: usize = Semaphore::MAX_PERMITS;
/// Default pause between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
/// Default leader lease lifetime.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(10);
/// Default leader poll interval; must stay below the lease TTL.
pub const DEFAULT_LEASE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Smallest accepted push timeout.
pub const MIN_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

const ENV_PREFIX: &str = "PUSH_RELAY_";

/// Tunables shared by intake, drains, sweeps, and leader election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
	/// Prefix applied to every store key.
	pub namespace: String,
	/// Lease role contested by sweeper processes.
	pub role: String,
	/// Timeout for one HTTP push.
	pub push_timeout: Duration,
	/// Added to the push timeout to get the signed URL's lifetime.
	pub link_ttl_slack: Duration,
	/// Retention applied to data queues.
	pub retention: Duration,
	/// Backoff between failed drains.
	pub backoff: BackoffPolicy,
	/// Concurrent drains per sweep.
	pub pool_size: usize,
	/// Pause between sweeps.
	pub sweep_interval: Duration,
	/// Lifetime of the leader lease.
	pub lease_ttl: Duration,
	/// How often the elector renews or contests the lease.
	pub lease_poll_interval: Duration,
	/// Pause before rebuilding a store connection after a transient failure.
	pub reconnect_delay: Duration,
}
impl RelayConfig {
	/// Defaults overlaid with `PUSH_RELAY_*` environment variables, then validated.
	///
	/// Durations are read as whole seconds, e.g. `PUSH_RELAY_PUSH_TIMEOUT_SECS=15`.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Like [`from_env`](Self::from_env) with a custom variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let env = Overlay { lookup };
		let mut config = Self::default();

		env.string("NAMESPACE", &mut config.namespace);
		env.string("ROLE", &mut config.role);
		env.seconds("PUSH_TIMEOUT_SECS", &mut config.push_timeout)?;
		env.seconds("LINK_TTL_SLACK_SECS", &mut config.link_ttl_slack)?;
		env.seconds("RETENTION_SECS", &mut config.retention)?;
		env.seconds("BACKOFF_BASE_SECS", &mut config.backoff.base)?;
		env.seconds("BACKOFF_MAX_SECS", &mut config.backoff.max)?;
		env.number("POOL_SIZE", &mut config.pool_size)?;
		env.seconds("SWEEP_INTERVAL_SECS", &mut config.sweep_interval)?;
		env.seconds("LEASE_TTL_SECS", &mut config.lease_ttl)?;
		env.seconds("LEASE_POLL_INTERVAL_SECS", &mut config.lease_poll_interval)?;
		env.seconds("RECONNECT_DELAY_SECS", &mut config.reconnect_delay)?;

		config.validate()?;

		Ok(config)
	}

	/// Validate invariants for the configuration.
	pub fn validate(&self) -> Result<()> {
		if self.namespace.trim().is_empty() {
			return Err(Error::Validation {
				field: "namespace",
				reason: "Must not be empty.".into(),
			});
		}
		if self.role.trim().is_empty() {
			return Err(Error::Validation { field: "role", reason: "Must not be empty.".into() });
		}
		if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
			return Err(Error::Validation {
				field: "pool_size",
				reason: format!("Must be between 1 and {MAX_POOL_SIZE}."),
			});
		}
		if self.lease_poll_interval.is_zero() || self.lease_poll_interval >= self.lease_ttl {
			return Err(Error::Validation {
				field: "lease_poll_interval",
				reason: "Must be non-zero and shorter than lease_ttl.".into(),
			});
		}
		if self.push_timeout < MIN_PUSH_TIMEOUT {
			return Err(Error::Validation {
				field: "push_timeout",
				reason: "Must be at least 100ms.".into(),
			});
		}
		if self.sweep_interval.is_zero() {
			return Err(Error::Validation {
				field: "sweep_interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.backoff.validate()
	}
}
impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			namespace: DEFAULT_NAMESPACE.into(),
			role: DEFAULT_ROLE.into(),
			push_timeout: DEFAULT_PUSH_TIMEOUT,
			link_ttl_slack: client::DEFAULT_LINK_TTL_SLACK,
			retention: queue::DEFAULT_RETENTION,
			backoff: BackoffPolicy::default(),
			pool_size: DEFAULT_POOL_SIZE,
			sweep_interval: DEFAULT_SWEEP_INTERVAL,
			lease_ttl: DEFAULT_LEASE_TTL,
			lease_poll_interval: DEFAULT_LEASE_POLL_INTERVAL,
			reconnect_delay: redis::DEFAULT_RECONNECT_DELAY,
		}
	}
}

struct Overlay<F> {
	lookup: F,
}
impl<F> Overlay<F>
where
	F: Fn(&str) -> Option<String>,
{
	fn get(&self, suffix: &str) -> Option<String> {
		(self.lookup)(&format!("{ENV_PREFIX}{suffix}")).filter(|value| !value.trim().is_empty())
	}

	fn string(&self, suffix: &str, slot: &mut String) {
		if let Some(value) = self.get(suffix) {
			*slot = value.trim().to_owned();
		}
	}

	fn number<T>(&self, suffix: &'static str, slot: &mut T) -> Result<()>
	where
		T: std::str::FromStr,
	{
		if let Some(value) = self.get(suffix) {
			*slot = value.trim().parse().map_err(|_| Error::Validation {
				field: suffix,
				reason: format!("Expected an unsigned integer, got {value:?}."),
			})?;
		}

		Ok(())
	}

	fn seconds(&self, suffix: &'static str, slot: &mut Duration) -> Result<()> {
		let mut secs = slot.as_secs();

		self.number(suffix, &mut secs)?;

		*slot = Duration::from_secs(secs);

		Ok(())
	}
}
