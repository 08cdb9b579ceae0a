//! Sweeps across many customers and the full repusher runtime.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use push_relay::{MemoryStore, Relay, RelayConfig, Result, Store};
use tokio::time;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::{Harness, endpoint};

#[tokio::test]
async fn one_failing_customer_does_not_block_the_others() -> Result<()> {
	let harness = Harness::new().await?;
	let relay = &harness.relay;
	let broken = MockServer::start().await;

	Mock::given(method("POST"))
		.and(path("/mw/matches"))
		.respond_with(ResponseTemplate::new(200))
		.expect(2)
		.mount(&harness.server)
		.await;
	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(500))
		.expect(1)
		.mount(&broken)
		.await;

	harness.register("healthy").await?;
	harness.register("idle").await?;
	relay.directory().register("broken", &endpoint(&broken), "K").await?;
	// Listed but without an info record.
	relay.store().set_add(&relay.keys().customers(), "ghost").await?;

	for customer in ["healthy", "healthy", "broken", "ghost"] {
		relay.queue().enqueue(customer, b"payload").await?;
	}

	let report = relay.coordinator().sweep().await?;

	assert_eq!(report.customers, 4);
	assert_eq!(report.pushed, 2);
	assert_eq!(report.idle, 1);
	assert_eq!(report.backed_off, 0);

	let mut failed: Vec<&str> = report.failures.iter().map(|(c, _)| c.as_str()).collect();

	failed.sort_unstable();

	assert_eq!(failed, vec!["broken", "ghost"]);

	let again = relay.coordinator().sweep().await?;

	assert_eq!((again.pushed, again.idle, again.backed_off), (0, 2, 1));
	assert_eq!(relay.queue().size("broken").await?, 1);

	Ok(())
}

#[tokio::test]
async fn nothing_is_dispatched_without_leadership() -> Result<()> {
	let harness = Harness::new().await?;
	let relay = &harness.relay;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&harness.server)
		.await;
	harness.register("1").await?;
	relay.queue().enqueue("1", b"payload").await?;

	// Never ticked, so it does not lead.
	let elector = relay.elector();
	let report = relay.coordinator().sweep_while_leading(&elector.signal()).await?;

	assert_eq!(report.undispatched, 1);
	assert_eq!(relay.queue().size("1").await?, 1);

	Ok(())
}

#[tokio::test]
async fn redundant_repushers_elect_one_leader_and_drain_the_backlog() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("POST"))
		.respond_with(ResponseTemplate::new(200))
		.expect(3)
		.mount(&server)
		.await;

	let config = RelayConfig {
		push_timeout: Duration::from_secs(2),
		sweep_interval: Duration::from_millis(100),
		lease_ttl: Duration::from_secs(2),
		lease_poll_interval: Duration::from_millis(100),
		..Default::default()
	};
	let store = Arc::new(MemoryStore::new());
	let first = Relay::builder(store.clone()).config(config.clone()).build()?;
	let second = Relay::builder(store).config(config).build()?;

	first.directory().register("1", &endpoint(&server), "K").await?;

	for payload in ["a", "b", "c"] {
		first.queue().enqueue("1", payload.as_bytes()).await?;
	}

	let handles = [first.spawn_repusher(), second.spawn_repusher()];

	for _ in 0..50 {
		if first.queue().size("1").await? == 0 {
			break;
		}

		time::sleep(Duration::from_millis(100)).await;
	}

	assert_eq!(first.queue().size("1").await?, 0);
	assert_eq!(handles.iter().filter(|handle| handle.is_leader()).count(), 1);

	for handle in handles {
		handle.shutdown().await;
	}

	Ok(())
}
