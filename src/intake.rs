//! First-attempt path for inbound push tasks.
//!
//! Tasks are validated at the boundary, recorded against their customer, and pushed right away when
//! the customer is reachable. Anything that cannot be delivered now is queued for the sweeper.

// crates.io
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*,
	config,
	customer::CustomerInfo,
	metrics,
	push::PushBody,
	queue::DurableQueue,
	store::Store,
};

/// Inbound task record.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PushTask {
	/// Customer id; JSON strings and integers are both accepted.
	#[serde(deserialize_with = "customer_id")]
	pub customer_id: String,
	/// Endpoint receiving the push.
	pub push_url: Url,
	/// Shared secret used to sign the push URL.
	pub apikey: String,
	/// Payload; a JSON string is sent as raw text, anything else as a JSON body.
	pub push_data: PushBody,
}
impl PushTask {
	/// Decode and validate a raw record.
	pub fn parse(raw: &[u8]) -> Result<Self> {
		let task: Self =
			serde_json::from_slice(raw).map_err(|err| Error::MalformedTask(err.to_string()))?;

		task.validate()?;

		Ok(task)
	}

	/// Reject records the relay cannot act on.
	pub fn validate(&self) -> Result<()> {
		if self.customer_id.trim().is_empty() {
			return Err(Error::MalformedTask("customer_id is empty".into()));
		}
		if self.apikey.is_empty() {
			return Err(Error::MalformedTask("apikey is empty".into()));
		}
		if !matches!(self.push_url.scheme(), "http" | "https") {
			return Err(Error::MalformedTask(format!(
				"push_url scheme {} is not http(s)",
				self.push_url.scheme()
			)));
		}
		if self.push_data == PushBody::Json(Value::Null) {
			return Err(Error::MalformedTask("push_data is null".into()));
		}

		Ok(())
	}
}

/// How an inbound task was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
	/// Pushed to the endpoint; acknowledge.
	Delivered,
	/// Persisted for a later retry sweep; acknowledge.
	Queued,
	/// Malformed and dropped; acknowledge.
	Discarded,
}
impl Disposition {
	/// Short label for logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Delivered => "delivered",
			Self::Queued => "queued",
			Self::Discarded => "discarded",
		}
	}
}

/// Routes inbound tasks to an immediate push or the durable queue.
///
/// An `Err` from [`handle`](Self::handle) or [`accept`](Self::accept) means the task is neither
/// delivered nor queued; the source must requeue it.
#[derive(Debug)]
pub struct Intake<S> {
	queue: Arc<DurableQueue<S>>,
	push_timeout: Duration,
}
impl<S> Intake<S>
where
	S: Store,
{
	/// Create an intake over `queue` with the default push timeout.
	pub fn new(queue: Arc<DurableQueue<S>>) -> Self {
		Self { queue, push_timeout: config::DEFAULT_PUSH_TIMEOUT }
	}

	/// Override the timeout for immediate pushes.
	pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
		self.push_timeout = push_timeout;

		self
	}

	/// Decode a raw record and settle it. Malformed records are discarded, not failed.
	pub async fn handle(&self, raw: &[u8]) -> Result<Disposition> {
		match PushTask::parse(raw) {
			Ok(task) => self.accept(&task).await,
			Err(err) => {
				tracing::warn!(error = %err, "discarding malformed task");

				metrics::record_intake(Disposition::Discarded.as_str());

				Ok(Disposition::Discarded)
			},
		}
	}

	/// Settle an already validated task.
	pub async fn accept(&self, task: &PushTask) -> Result<Disposition> {
		let result = self.route(task).await;

		metrics::record_intake(match &result {
			Ok(disposition) => disposition.as_str(),
			Err(_) => "requeue",
		});

		result
	}

	async fn route(&self, task: &PushTask) -> Result<Disposition> {
		let customer = task.customer_id.as_str();
		let stats = self.queue.stats();
		let reachable = match self
			.queue
			.directory()
			.register(customer, &task.push_url, &task.apikey)
			.await
		{
			Ok(reachable) => reachable,
			Err(err) => {
				tracing::warn!(
					alert = "redis_error",
					customer,
					error = %err,
					"store unavailable; pushing directly"
				);

				self.push(task).await?;

				return Ok(Disposition::Delivered);
			},
		};

		if let Err(err) = stats.incr_required_today().await {
			tracing::warn!(customer, error = %err, "failed to count required push");
		}

		if reachable {
			match self.push(task).await {
				Ok(()) => {
					if let Err(err) = stats.incr_pushed_today().await {
						tracing::warn!(customer, error = %err, "failed to count delivered push");
					}

					return Ok(Disposition::Delivered);
				},
				Err(err) if err.is_push_failure() => {
					tracing::info!(customer, error = %err, "push failed; queueing");
				},
				Err(err) => return Err(err),
			}
		} else {
			tracing::info!(customer, "customer unreachable; queueing");
		}

		self.enqueue(task).await?;

		Ok(Disposition::Queued)
	}

	async fn push(&self, task: &PushTask) -> Result<()> {
		let info = CustomerInfo::new(task.push_url.clone(), task.apikey.clone());

		self.queue.client().push(&info, &task.push_data, self.push_timeout).await
	}

	async fn enqueue(&self, task: &PushTask) -> Result<()> {
		let customer = task.customer_id.as_str();

		self.queue.enqueue(customer, &task.push_data.to_bytes()).await.map_err(|source| {
			tracing::error!(
				alert = "enqueue_failed",
				customer,
				error = %source,
				"task lost from both source and queue unless requeued"
			);

			Error::Enqueue { customer: customer.to_owned(), source: Box::new(source) }
		})
	}
}

fn customer_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Id {
		Text(String),
		Signed(i64),
		Unsigned(u64),
	}

	Ok(match Id::deserialize(deserializer)? {
		Id::Text(text) => text.trim().to_owned(),
		Id::Signed(number) => number.to_string(),
		Id::Unsigned(number) => number.to_string(),
	})
}
