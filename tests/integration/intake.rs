//! First-attempt routing of inbound tasks.

// std
use std::sync::Arc;
// crates.io
use push_relay::{Disposition, Error, MemoryStore, Result};
use serde_json::json;
use wiremock::{
	Mock, Request, Respond, ResponseTemplate,
	matchers::{body_json, method, path},
};
// self
use crate::Harness;

// Rejects the push, then takes the store down for its next operation.
struct StoreOutageAfterRejection {
	store: Arc<MemoryStore>,
}
impl Respond for StoreOutageAfterRejection {
	fn respond(&self, _: &Request) -> ResponseTemplate {
		self.store.fail_next(1);

		ResponseTemplate::new(500)
	}
}

fn task(harness: &Harness, customer: serde_json::Value) -> Vec<u8> {
	json!({
		"customer_id": customer,
		"push_url": harness.endpoint().as_str(),
		"apikey": "K",
		"push_data": { "matches": ["m1"] },
	})
	.to_string()
	.into_bytes()
}

#[tokio::test]
async fn reachable_customer_is_pushed_immediately() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.and(path("/mw/matches"))
		.and(body_json(json!({ "matches": ["m1"] })))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&harness.server)
		.await;

	let relay = &harness.relay;

	assert_eq!(relay.intake().handle(&task(&harness, json!(42))).await?, Disposition::Delivered);
	assert_eq!(relay.directory().customers().await?, vec!["42".to_string()]);
	assert_eq!(relay.queue().size("42").await?, 0);

	let summary = relay.stats().get(relay.stats().today()).await?;

	assert_eq!((summary.required, summary.pushed), (1, 1));

	Ok(())
}

#[tokio::test]
async fn failed_first_attempt_is_queued() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(502))
		.expect(1)
		.mount(&harness.server)
		.await;

	let relay = &harness.relay;

	assert_eq!(relay.intake().handle(&task(&harness, json!("7"))).await?, Disposition::Queued);
	assert_eq!(relay.queue().peek_tail("7", 1).await?, vec![br#"{"matches":["m1"]}"#.to_vec()]);

	let summary = relay.stats().get(relay.stats().today()).await?;

	assert_eq!((summary.required, summary.pushed), (1, 0));

	Ok(())
}

#[tokio::test]
async fn unreachable_customer_is_queued_without_a_push() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&harness.server)
		.await;
	harness.register("7").await?;
	harness.relay.directory().set_reachable("7", false).await?;

	assert_eq!(
		harness.relay.intake().handle(&task(&harness, json!(7))).await?,
		Disposition::Queued
	);
	assert_eq!(harness.relay.queue().size("7").await?, 1);

	Ok(())
}

#[tokio::test]
async fn malformed_records_are_discarded() -> Result<()> {
	let harness = Harness::new().await?;

	assert_eq!(harness.relay.intake().handle(b"{\"customer_id\": 1}").await?, Disposition::Discarded);
	assert!(harness.relay.directory().customers().await?.is_empty());

	Ok(())
}

#[tokio::test]
async fn store_outage_falls_back_to_a_direct_push() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&harness.server)
		.await;
	harness.relay.store().fail_next(1);

	assert_eq!(
		harness.relay.intake().handle(&task(&harness, json!(3))).await?,
		Disposition::Delivered
	);

	Ok(())
}

#[tokio::test]
async fn store_outage_with_a_failing_endpoint_asks_for_requeue() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&harness.server)
		.await;
	harness.relay.store().fail_next(1);

	let err = harness.relay.intake().handle(&task(&harness, json!(3))).await.unwrap_err();

	assert!(err.is_push_failure());

	Ok(())
}

#[tokio::test]
async fn failed_push_that_cannot_be_queued_is_an_enqueue_error() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(StoreOutageAfterRejection { store: harness.relay.store().clone() })
		.expect(1)
		.mount(&harness.server)
		.await;

	let err = harness.relay.intake().handle(&task(&harness, json!(9))).await.unwrap_err();

	assert_eq!(err.kind(), "enqueue");
	assert!(!err.is_push_failure());

	let Error::Enqueue { customer, source } = err else { panic!("expected an enqueue error") };

	assert_eq!(customer, "9");
	assert!(source.is_transient_store());
	assert_eq!(harness.relay.queue().size("9").await?, 0);

	Ok(())
}
