//! Customer records: endpoint info, reachability, retry state, and the registry of known ids.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{
	_prelude::*,
	backoff::RetryState,
	store::{KeyLayout, Store},
};

const FIELD_PUSH_URL: &str = "push_url";
const FIELD_APIKEY: &str = "apikey";
const FIELD_REACHABLE: &str = "reachable";

/// Where and how to deliver a customer's pushes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
	/// Endpoint receiving push POSTs.
	pub push_url: Url,
	/// Shared secret used to sign push URLs.
	pub apikey: String,
	/// Whether the most recent drain reached the endpoint.
	pub reachable: bool,
}
impl CustomerInfo {
	/// Build a reachable record.
	pub fn new(push_url: Url, apikey: impl Into<String>) -> Self {
		Self { push_url, apikey: apikey.into(), reachable: true }
	}

	/// Decode from a stored hash.
	///
	/// Returns `None` when the record is missing or unreadable. An absent reachability flag reads
	/// as reachable.
	pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
		let push_url = Url::parse(fields.get(FIELD_PUSH_URL)?).ok()?;
		let apikey = fields.get(FIELD_APIKEY)?.clone();
		let reachable = fields.get(FIELD_REACHABLE).is_none_or(|flag| flag_is_set(flag));

		Some(Self { push_url, apikey, reachable })
	}
}

/// Customer-scoped reads and writes over a [`Store`].
#[derive(Debug)]
pub struct CustomerDirectory<S> {
	store: Arc<S>,
	keys: KeyLayout,
}
impl<S> Clone for CustomerDirectory<S> {
	fn clone(&self) -> Self {
		Self { store: self.store.clone(), keys: self.keys.clone() }
	}
}
impl<S> CustomerDirectory<S>
where
	S: Store,
{
	/// Create a directory over `store`.
	pub fn new(store: Arc<S>, keys: KeyLayout) -> Self {
		Self { store, keys }
	}

	/// Upsert endpoint and apikey, add the id to the registry, and report current reachability.
	///
	/// The reachability flag is left as it is, so a backed-off customer stays unreachable.
	pub async fn register(&self, customer: &str, push_url: &Url, apikey: &str) -> Result<bool> {
		self.store
			.hash_set(&self.keys.info(customer), &[
				(FIELD_PUSH_URL, push_url.to_string()),
				(FIELD_APIKEY, apikey.to_string()),
			])
			.await?;
		self.store.set_add(&self.keys.customers(), customer).await?;

		tracing::debug!(customer, push_url = %push_url, "customer info recorded");

		self.reachable(customer).await
	}

	/// Read the customer's info; `None` when absent or unreadable.
	pub async fn info(&self, customer: &str) -> Result<Option<CustomerInfo>> {
		let fields = self.store.hash_get_all(&self.keys.info(customer)).await?;

		Ok(CustomerInfo::from_fields(&fields))
	}

	/// Whether the customer is currently reachable; unknown customers are.
	pub async fn reachable(&self, customer: &str) -> Result<bool> {
		let fields = self.store.hash_get_all(&self.keys.info(customer)).await?;

		Ok(fields.get(FIELD_REACHABLE).is_none_or(|flag| flag_is_set(flag)))
	}

	/// Record the outcome of the latest delivery attempt.
	pub async fn set_reachable(&self, customer: &str, reachable: bool) -> Result<()> {
		let flag = if reachable { "1" } else { "0" };

		self.store.hash_set(&self.keys.info(customer), &[(FIELD_REACHABLE, flag.into())]).await
	}

	/// Read the customer's retry state; absent state reads as zero.
	pub async fn retry_state(&self, customer: &str) -> Result<RetryState> {
		let fields = self.store.hash_get_all(&self.keys.retries(customer)).await?;

		RetryState::from_fields(&fields)
	}

	/// Persist the customer's retry state.
	pub(crate) async fn store_retry_state(&self, customer: &str, state: &RetryState) -> Result<()> {
		self.store.hash_set(&self.keys.retries(customer), &state.to_fields()).await
	}

	/// Every customer id seen so far.
	pub async fn customers(&self) -> Result<Vec<String>> {
		self.store.set_members(&self.keys.customers()).await
	}
}

fn flag_is_set(flag: &str) -> bool {
	!matches!(flag.trim(), "0" | "" | "false")
}
