//! Lease-based leader election among redundant sweeper processes.
//!
//! The lease is a store key holding the leader's instance id with a TTL. Followers contest it with
//! create-if-absent; the leader extends it with an owner-checked refresh on every poll. Any store
//! error demotes the process to follower until a later poll succeeds.

// crates.io
use tokio::{
	sync::watch,
	time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	metrics,
	store::{KeyLayout, LeaseRefresh, Store},
};

/// Election state of one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaderState {
	/// No poll has completed yet.
	Unelected,
	/// This process holds the lease.
	Leader,
	/// Another process holds the lease, or the store could not be reached.
	Follower,
}

/// Read side of the leadership flag; true only while the elector believes it leads.
#[derive(Clone, Debug)]
pub struct LeadershipSignal {
	rx: watch::Receiver<bool>,
}
impl LeadershipSignal {
	/// Whether this process currently leads.
	pub fn is_leader(&self) -> bool {
		*self.rx.borrow()
	}

	/// Wait until this process leads; `false` if the elector is gone.
	pub async fn wait_for_leadership(&mut self) -> bool {
		self.rx.wait_for(|leader| *leader).await.is_ok()
	}
}

/// Contests and holds the lease for one role.
#[derive(Debug)]
pub struct LeaderElector<S> {
	store: Arc<S>,
	key: String,
	role: String,
	instance_id: String,
	lease_ttl: Duration,
	poll_interval: Duration,
	state: LeaderState,
	// Set after a failed poll; our own lease may still be live.
	recovering: bool,
	tx: watch::Sender<bool>,
}
impl<S> LeaderElector<S>
where
	S: Store,
{
	/// Create an elector for `role` with a random instance id.
	pub fn new(
		store: Arc<S>,
		keys: &KeyLayout,
		role: impl Into<String>,
		lease_ttl: Duration,
		poll_interval: Duration,
	) -> Self {
		let role = role.into();
		let (tx, _) = watch::channel(false);

		Self {
			store,
			key: keys.lease(&role),
			role,
			instance_id: format!("{:016x}", rand::random::<u64>()),
			lease_ttl,
			poll_interval,
			state: LeaderState::Unelected,
			recovering: false,
			tx,
		}
	}

	/// Use a fixed instance id as the lease token.
	pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
		self.instance_id = instance_id.into();

		self
	}

	/// Token written into the lease while this instance holds it.
	pub fn instance_id(&self) -> &str {
		&self.instance_id
	}

	/// Current election state.
	pub fn state(&self) -> LeaderState {
		self.state
	}

	/// Subscribe to leadership changes.
	pub fn signal(&self) -> LeadershipSignal {
		LeadershipSignal { rx: self.tx.subscribe() }
	}

	/// Take the lease if nobody holds it.
	pub async fn try_acquire(&mut self) -> Result<bool> {
		let acquired = self.store.set_if_absent(&self.key, &self.instance_id, self.lease_ttl).await?;

		self.transition(if acquired { LeaderState::Leader } else { LeaderState::Follower });

		Ok(acquired)
	}

	/// Extend a lease this instance holds; contest it again if it already expired.
	pub async fn renew(&mut self) -> Result<bool> {
		match self.store.refresh_if_owner(&self.key, &self.instance_id, self.lease_ttl).await? {
			LeaseRefresh::Refreshed => {
				self.transition(LeaderState::Leader);

				Ok(true)
			},
			LeaseRefresh::Absent => {
				tracing::info!(
					role = %self.role,
					instance = %self.instance_id,
					"lease lapsed before renewal"
				);

				self.try_acquire().await
			},
			LeaseRefresh::HeldByOther => {
				self.transition(LeaderState::Follower);

				Ok(false)
			},
		}
	}

	/// One poll: renew while leading, contest otherwise. Store errors demote to follower.
	pub async fn tick(&mut self) -> LeaderState {
		let outcome = if self.state == LeaderState::Leader || self.recovering {
			self.renew().await
		} else {
			self.try_acquire().await
		};

		self.recovering = outcome.is_err();

		if let Err(err) = outcome {
			tracing::error!(
				alert = "redis_error",
				role = %self.role,
				instance = %self.instance_id,
				error = %err,
				"lease poll failed; stepping down"
			);

			self.transition(LeaderState::Follower);
		}

		self.state
	}

	/// Poll every interval until `shutdown` fires; leadership is dropped on exit.
	pub async fn run(mut self, shutdown: CancellationToken) {
		let mut interval = time::interval(self.poll_interval);

		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = interval.tick() => {
					self.tick().await;
				},
			}
		}

		self.transition(LeaderState::Follower);

		tracing::debug!(role = %self.role, instance = %self.instance_id, "elector stopped");
	}

	fn transition(&mut self, next: LeaderState) {
		if self.state == next {
			return;
		}

		tracing::info!(
			role = %self.role,
			instance = %self.instance_id,
			from = ?self.state,
			to = ?next,
			"leadership changed"
		);

		self.state = next;

		let leader = next == LeaderState::Leader;

		metrics::set_leader(leader);
		self.tx.send_replace(leader);
	}
}
