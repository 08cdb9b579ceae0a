//! Drain behaviour: delivery order, backoff bookkeeping, and crash recovery.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use push_relay::{DrainOutcome, ListEnd, MemoryStore, Result, RetryState, Store};
use wiremock::{
	Mock, Request, Respond, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{Harness, START};

const PUSH_DATA: &str = r#"{"data": [{"_id": "m1", "title": "first"}], "customer_id": 1}"#;
const PUSH_DATA1: &str = r#"{"data": [{"_id": "m2", "title": "second"}], "customer_id": 1}"#;
const TIMEOUT: Duration = Duration::from_secs(5);

// Accepts the first `accepted` pushes, then rejects every later one.
struct AcceptFirst {
	accepted: usize,
	served: AtomicUsize,
}
impl Respond for AcceptFirst {
	fn respond(&self, _: &Request) -> ResponseTemplate {
		if self.served.fetch_add(1, Ordering::SeqCst) < self.accepted {
			ResponseTemplate::new(200)
		} else {
			ResponseTemplate::new(500)
		}
	}
}

// Accepts the push, then takes the store down for its next operation.
struct StoreOutageAfterDelivery {
	store: Arc<MemoryStore>,
}
impl Respond for StoreOutageAfterDelivery {
	fn respond(&self, _: &Request) -> ResponseTemplate {
		self.store.fail_next(1);

		ResponseTemplate::new(200)
	}
}

async fn seeded(status: u16) -> Result<Harness> {
	seeded_with(ResponseTemplate::new(status)).await
}

async fn seeded_with(responder: impl Respond + 'static) -> Result<Harness> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.and(path("/mw/matches"))
		.respond_with(responder)
		.mount(&harness.server)
		.await;

	harness.register("1").await?;

	for payload in [PUSH_DATA, PUSH_DATA1] {
		harness.relay.stats().incr_required_today().await?;
		harness.relay.queue().enqueue("1", payload.as_bytes()).await?;
	}

	Ok(harness)
}

#[tokio::test]
async fn reachable_endpoint_receives_everything_oldest_first() -> Result<()> {
	let harness = seeded(200).await?;
	let relay = &harness.relay;

	assert_eq!(relay.queue().drain_and_push("1", TIMEOUT).await?, DrainOutcome::Pushed(2));

	let summary = relay.stats().get(relay.stats().today()).await?;

	assert_eq!((summary.required, summary.pushed), (2, 2));
	assert!(relay.directory().reachable("1").await?);
	assert_eq!(relay.directory().retry_state("1").await?, RetryState::default());
	assert_eq!(relay.queue().size("1").await?, 0);

	let bodies: Vec<Vec<u8>> = harness
		.server
		.received_requests()
		.await
		.expect("recording enabled")
		.into_iter()
		.map(|request| request.body)
		.collect();

	assert_eq!(bodies, vec![PUSH_DATA.as_bytes().to_vec(), PUSH_DATA1.as_bytes().to_vec()]);

	Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_keeps_items_and_schedules_backoff() -> Result<()> {
	let harness = seeded(500).await?;
	let relay = &harness.relay;
	let err = relay.queue().drain_and_push("1", TIMEOUT).await.unwrap_err();

	assert!(err.is_push_failure());
	assert!(!relay.directory().reachable("1").await?);
	assert_eq!(relay.queue().size("1").await?, 2);
	assert_eq!(relay.queue().peek_tail("1", 2).await?, vec![
		PUSH_DATA1.as_bytes().to_vec(),
		PUSH_DATA.as_bytes().to_vec()
	]);
	assert!(!relay.store().exists(&relay.keys().backup("1")).await?);

	let state = relay.directory().retry_state("1").await?;

	assert_eq!(state.push_retries, 1);
	assert_eq!(state.latest_push_ts, START);
	assert_eq!(state.next_push_ts, START + 120);

	let summary = relay.stats().get(relay.stats().today()).await?;

	assert_eq!((summary.required, summary.pushed), (2, 0));

	Ok(())
}

#[tokio::test]
async fn drain_before_backoff_elapses_is_skipped_without_side_effects() -> Result<()> {
	let harness = seeded(500).await?;
	let relay = &harness.relay;

	assert!(relay.queue().drain_and_push("1", TIMEOUT).await.is_err());

	let before = relay.directory().retry_state("1").await?;

	// `next_push_ts` itself is not yet due.
	harness.clock.advance(Duration::from_secs(120));

	assert_eq!(relay.queue().drain_and_push("1", TIMEOUT).await?, DrainOutcome::Skipped);
	assert_eq!(relay.directory().retry_state("1").await?, before);
	assert_eq!(relay.queue().size("1").await?, 2);
	assert_eq!(harness.server.received_requests().await.map(|r| r.len()), Some(1));

	Ok(())
}

#[tokio::test]
async fn consecutive_failures_double_the_delay_until_capped() -> Result<()> {
	let harness = seeded(503).await?;
	let relay = &harness.relay;
	let mut delays = Vec::new();

	for _ in 0..8 {
		assert!(relay.queue().drain_and_push("1", TIMEOUT).await.is_err());

		let state = relay.directory().retry_state("1").await?;

		delays.push(state.next_push_ts - state.latest_push_ts);
		harness.clock.set(
			chrono::DateTime::from_timestamp(state.next_push_ts + 1, 0).expect("valid timestamp"),
		);
	}

	assert_eq!(delays, vec![120, 240, 480, 960, 1920, 3600, 3600, 3600]);
	assert_eq!(relay.directory().retry_state("1").await?.push_retries, 8);

	Ok(())
}

#[tokio::test]
async fn recovery_after_backoff_resets_state() -> Result<()> {
	let harness = seeded(500).await?;
	let relay = &harness.relay;

	assert!(relay.queue().drain_and_push("1", TIMEOUT).await.is_err());

	harness.server.reset().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(2)
		.mount(&harness.server)
		.await;
	harness.clock.advance(Duration::from_secs(121));

	assert_eq!(relay.queue().drain_and_push("1", TIMEOUT).await?, DrainOutcome::Pushed(2));
	assert!(relay.directory().reachable("1").await?);
	assert_eq!(relay.directory().retry_state("1").await?, RetryState::default());

	Ok(())
}

#[tokio::test]
async fn items_staged_by_a_crashed_drain_are_delivered_once() -> Result<()> {
	let harness = seeded(200).await?;
	let relay = &harness.relay;
	let data = relay.keys().data("1");
	let backup = relay.keys().backup("1");

	// A drain that died right after staging the oldest item.
	let staged = relay.store().move_item(&data, ListEnd::Tail, &backup, ListEnd::Head).await?;

	assert_eq!(staged.as_deref(), Some(PUSH_DATA.as_bytes()));

	relay.queue().enqueue("1", b"late").await?;

	assert_eq!(relay.queue().drain_and_push("1", TIMEOUT).await?, DrainOutcome::Pushed(3));

	let requests = harness.server.received_requests().await.expect("recording enabled");
	let bodies: Vec<&[u8]> = requests.iter().map(|request| request.body.as_slice()).collect();

	// The merged-back item keeps its place at the front of the line.
	assert_eq!(bodies, vec![PUSH_DATA.as_bytes(), PUSH_DATA1.as_bytes(), b"late".as_slice()]);
	assert_eq!(relay.queue().size("1").await?, 0);

	Ok(())
}

#[tokio::test]
async fn empty_queue_is_no_data_and_leaves_retry_state_alone() -> Result<()> {
	let harness = Harness::new().await?;

	harness.register("1").await?;

	assert_eq!(
		harness.relay.queue().drain_and_push("1", TIMEOUT).await?,
		DrainOutcome::NoData
	);
	assert_eq!(harness.relay.directory().retry_state("1").await?, RetryState::default());

	Ok(())
}

#[tokio::test]
async fn partial_drain_keeps_the_undelivered_rest() -> Result<()> {
	let harness = seeded_with(AcceptFirst { accepted: 1, served: AtomicUsize::new(0) }).await?;
	let relay = &harness.relay;
	let err = relay.queue().drain_and_push("1", TIMEOUT).await.unwrap_err();

	assert!(err.is_push_failure());
	assert_eq!(relay.queue().size("1").await?, 1);
	assert_eq!(relay.queue().peek_tail("1", 1).await?, vec![PUSH_DATA1.as_bytes().to_vec()]);
	assert!(!relay.store().exists(&relay.keys().backup("1")).await?);
	assert!(!relay.directory().reachable("1").await?);

	let state = relay.directory().retry_state("1").await?;

	assert_eq!(state.push_retries, 1);
	assert_eq!(state.next_push_ts - state.latest_push_ts, 120);

	let summary = relay.stats().get(relay.stats().today()).await?;

	assert_eq!((summary.required, summary.pushed), (2, 1));

	Ok(())
}

#[tokio::test]
async fn store_failure_mid_drain_keeps_items_and_leaves_the_schedule() -> Result<()> {
	let harness = Harness::new().await?;

	Mock::given(method("POST"))
		.respond_with(StoreOutageAfterDelivery { store: harness.relay.store().clone() })
		.mount(&harness.server)
		.await;
	harness.register("1").await?;

	for payload in [PUSH_DATA, PUSH_DATA1] {
		harness.relay.queue().enqueue("1", payload.as_bytes()).await?;
	}

	let relay = &harness.relay;
	let err = relay.queue().drain_and_push("1", TIMEOUT).await.unwrap_err();

	assert!(err.is_transient_store());
	assert!(!err.is_push_failure());
	// The confirmed item could not be removed from staging, so it is delivered again later.
	assert_eq!(relay.queue().size("1").await?, 2);
	assert_eq!(relay.queue().peek_tail("1", 2).await?, vec![
		PUSH_DATA1.as_bytes().to_vec(),
		PUSH_DATA.as_bytes().to_vec()
	]);
	assert!(!relay.store().exists(&relay.keys().backup("1")).await?);
	assert!(relay.directory().reachable("1").await?);

	let state = relay.directory().retry_state("1").await?;

	assert_eq!(state.push_retries, 1);
	assert_eq!(state.latest_push_ts, START);
	assert_eq!(state.next_push_ts, 0);

	Ok(())
}
