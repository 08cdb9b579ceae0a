//! Reliable push-notification relay: a crash-safe per-customer queue, exponential backoff retries,
//! and lease-based leader election so exactly one of several redundant workers drives retries.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod backoff;
pub mod clock;
pub mod config;
pub mod customer;
pub mod intake;
pub mod leader;
pub mod metrics;
pub mod push;
pub mod queue;
pub mod stats;
pub mod store;
pub mod sweep;

mod error;
mod relay;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};

	pub use crate::{Error, Result};
}

pub use crate::{
	backoff::{BackoffPolicy, RetryState},
	clock::{Clock, ManualClock, SystemClock},
	config::RelayConfig,
	customer::{CustomerDirectory, CustomerInfo},
	error::{Error, Result},
	intake::{Disposition, Intake, PushTask},
	leader::{LeaderElector, LeaderState, LeadershipSignal},
	push::{PushBody, client::PushClient, signing::AuthRejection},
	queue::{DrainOutcome, DurableQueue},
	relay::{Relay, RelayBuilder, RepusherHandle},
	stats::{DailyStats, PushSummary},
	store::{KeyLayout, ListEnd, Store, memory::MemoryStore, redis::RedisStore},
	sweep::{SweepCoordinator, SweepReport},
};
#[cfg(feature = "prometheus")]
pub use crate::metrics::install_default_exporter;
