//! HTTP delivery of pushes to customer endpoints.

// crates.io
use http::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*,
	clock::Clock,
	customer::CustomerInfo,
	metrics,
	push::{PushBody, signing},
};

/// Default slack added to the push timeout when computing a signed URL's expiry.
pub const DEFAULT_LINK_TTL_SLACK: Duration = Duration::from_secs(10);

/// Signs and POSTs pushes; any non-2xx answer or transport failure is a push error.
#[derive(Clone, Debug)]
pub struct PushClient {
	http: Client,
	clock: Arc<dyn Clock>,
	link_ttl_slack: Duration,
}
impl PushClient {
	/// Create a client over an existing `reqwest` client.
	pub fn new(http: Client, clock: Arc<dyn Clock>) -> Self {
		Self { http, clock, link_ttl_slack: DEFAULT_LINK_TTL_SLACK }
	}

	/// Override the slack added to the timeout for the signed URL's lifetime.
	pub fn with_link_ttl_slack(mut self, slack: Duration) -> Self {
		self.link_ttl_slack = slack;

		self
	}

	/// Sign `info.push_url` so it outlives the attempt, then deliver `body`.
	pub async fn push(&self, info: &CustomerInfo, body: &PushBody, timeout: Duration) -> Result<()> {
		let ttl = timeout.saturating_add(self.link_ttl_slack);
		let signed = self.sign(&info.push_url, &info.apikey, ttl);

		self.deliver(&signed, body, timeout).await
	}

	/// Append `ts = now + ttl` and the matching access token to `url`.
	pub fn sign(&self, url: &Url, apikey: &str, ttl: Duration) -> Url {
		let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

		signing::sign(url, apikey, self.clock.unix_timestamp().saturating_add(ttl))
	}

	/// POST `body` to an already signed URL, bounded by `timeout`.
	///
	/// Errors carry the URL without its query string, so access tokens stay out of logs.
	pub async fn deliver(&self, signed: &Url, body: &PushBody, timeout: Duration) -> Result<()> {
		let mut request = self.http.post(signed.clone()).header(ACCEPT, "*/*").timeout(timeout);

		request = match body {
			PushBody::Json(value) => request.json(value),
			PushBody::Raw(bytes) => request.body(bytes.clone()),
		};

		let response = match request.send().await {
			Ok(response) => response,
			Err(source) => {
				metrics::record_delivery("transport_error");

				return Err(Error::PushTransport { url: redacted(signed), source });
			},
		};
		let status = response.status();

		if !status.is_success() {
			let msg = response
				.text()
				.await
				.ok()
				.and_then(|text| serde_json::from_str::<Value>(&text).ok())
				.and_then(|json| json.get("msg").and_then(Value::as_str).map(ToOwned::to_owned));

			metrics::record_delivery("rejected");

			return Err(Error::PushStatus { status, url: redacted(signed), msg });
		}

		metrics::record_delivery("success");

		tracing::debug!(url = %redacted(signed), status = %status, "push delivered");

		Ok(())
	}
}

fn redacted(url: &Url) -> Url {
	let mut url = url.clone();

	url.set_query(None);

	url
}
