//! Daily delivery accounting keyed by UTC date.

// crates.io
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	clock::Clock,
	store::{KeyLayout, Store},
};

const FIELD_REQUIRED: &str = "required_pushing_cnt";
const FIELD_PUSHED: &str = "pushed_cnt";
const DAY_FORMAT: &str = "%Y%m%d";

/// Required/pushed counters and the derived delivery rate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PushSummary {
	/// Tasks that entered the relay.
	pub required: u64,
	/// Tasks confirmed delivered.
	pub pushed: u64,
	/// `pushed / required`, or `0.0` when nothing was required.
	pub rate: f64,
}
impl PushSummary {
	/// Build a summary, deriving the rate.
	pub fn new(required: u64, pushed: u64) -> Self {
		let rate = if required > 0 { pushed as f64 / required as f64 } else { 0.0 };

		Self { required, pushed, rate }
	}
}

/// Monotonic per-day counters.
#[derive(Debug)]
pub struct DailyStats<S> {
	store: Arc<S>,
	keys: KeyLayout,
	clock: Arc<dyn Clock>,
}
impl<S> Clone for DailyStats<S> {
	fn clone(&self) -> Self {
		Self { store: self.store.clone(), keys: self.keys.clone(), clock: self.clock.clone() }
	}
}
impl<S> DailyStats<S>
where
	S: Store,
{
	/// Create counters over `store`; "today" is read from `clock`.
	pub fn new(store: Arc<S>, keys: KeyLayout, clock: Arc<dyn Clock>) -> Self {
		Self { store, keys, clock }
	}

	/// Current UTC date according to the injected clock.
	pub fn today(&self) -> NaiveDate {
		self.clock.now().date_naive()
	}

	/// Count a task entering the relay on `day`.
	pub async fn incr_required(&self, day: NaiveDate) -> Result<()> {
		self.incr(day, FIELD_REQUIRED).await
	}

	/// Count a confirmed delivery on `day`.
	pub async fn incr_pushed(&self, day: NaiveDate) -> Result<()> {
		self.incr(day, FIELD_PUSHED).await
	}

	/// Count a task entering the relay today.
	pub async fn incr_required_today(&self) -> Result<()> {
		self.incr_required(self.today()).await
	}

	/// Count a confirmed delivery today.
	pub async fn incr_pushed_today(&self) -> Result<()> {
		self.incr_pushed(self.today()).await
	}

	/// Counters for one day; zero when nothing was recorded.
	pub async fn get(&self, day: NaiveDate) -> Result<PushSummary> {
		let fields = self.store.hash_get_all(&self.keys.stats_day(day)).await?;
		let read = |name: &str| fields.get(name).and_then(|raw| raw.parse::<u64>().ok()).unwrap_or(0);

		Ok(PushSummary::new(read(FIELD_REQUIRED), read(FIELD_PUSHED)))
	}

	/// Sum counters over `[start, end]`; a missing bound leaves that side open.
	pub async fn aggregate(
		&self,
		start: Option<NaiveDate>,
		end: Option<NaiveDate>,
	) -> Result<PushSummary> {
		let mut required = 0u64;
		let mut pushed = 0u64;

		for raw in self.store.set_members(&self.keys.stats_days()).await? {
			let Ok(day) = NaiveDate::parse_from_str(&raw, DAY_FORMAT) else {
				tracing::warn!(day = %raw, "ignoring unparseable stats day");

				continue;
			};

			if start.is_some_and(|start| day < start) || end.is_some_and(|end| day > end) {
				continue;
			}

			let summary = self.get(day).await?;

			required = required.saturating_add(summary.required);
			pushed = pushed.saturating_add(summary.pushed);
		}

		Ok(PushSummary::new(required, pushed))
	}

	async fn incr(&self, day: NaiveDate, field: &str) -> Result<()> {
		self.store.hash_incr(&self.keys.stats_day(day), field, 1).await?;
		self.store.set_add(&self.keys.stats_days(), &day.format(DAY_FORMAT).to_string()).await
	}
}
