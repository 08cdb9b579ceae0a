//! Integration tests for the push relay.

mod drain;
mod intake;
mod leader;
mod signing;
mod sweep;

// std
use std::sync::Arc;
// crates.io
use push_relay::{ManualClock, MemoryStore, Relay, RelayConfig, Result};
use url::Url;
use wiremock::MockServer;

pub const START: i64 = 1_700_000_000;

pub struct Harness {
	pub relay: Relay<MemoryStore>,
	pub clock: ManualClock,
	pub server: MockServer,
}
impl Harness {
	pub async fn new() -> Result<Self> {
		Self::with_config(RelayConfig::default()).await
	}

	pub async fn with_config(config: RelayConfig) -> Result<Self> {
		let _ = tracing_subscriber::fmt::try_init();

		let clock = ManualClock::at_unix(START);
		let relay = Relay::builder(Arc::new(MemoryStore::new()))
			.config(config)
			.clock(Arc::new(clock.clone()))
			.build()?;
		let server = MockServer::start().await;

		Ok(Self { relay, clock, server })
	}

	pub fn endpoint(&self) -> Url {
		endpoint(&self.server)
	}

	pub async fn register(&self, customer: &str) -> Result<()> {
		self.relay.directory().register(customer, &self.endpoint(), "K").await?;

		Ok(())
	}
}

pub fn endpoint(server: &MockServer) -> Url {
	Url::parse(&format!("{}/mw/matches", server.uri())).expect("mock server uri")
}
