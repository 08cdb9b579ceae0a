//! Lease exclusivity across simulated processes sharing one store.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use push_relay::{KeyLayout, LeaderElector, LeaderState, MemoryStore, Result};
use tokio::{task::JoinSet, time};

fn contender(store: &Arc<MemoryStore>) -> LeaderElector<MemoryStore> {
	LeaderElector::new(
		store.clone(),
		&KeyLayout::new("pusher"),
		"repusher",
		Duration::from_secs(10),
		Duration::from_secs(5),
	)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_concurrent_acquire_wins() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let store = Arc::new(MemoryStore::new());
	let mut contenders = JoinSet::new();

	for _ in 0..16 {
		let mut elector = contender(&store);

		contenders.spawn(async move { elector.try_acquire().await });
	}

	let mut winners = 0;

	while let Some(joined) = contenders.join_next().await {
		if joined.expect("contender task")? {
			winners += 1;
		}
	}

	assert_eq!(winners, 1);

	Ok(())
}

#[tokio::test(start_paused = true)]
async fn lapsed_lease_passes_to_exactly_one_follower() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let store = Arc::new(MemoryStore::new());
	let mut holder = contender(&store);
	let mut followers: Vec<_> = (0..3).map(|_| contender(&store)).collect();

	assert!(holder.try_acquire().await?);

	// The holder stops renewing; its lease lives 10s.
	for _ in 0..2 {
		for follower in &mut followers {
			assert_eq!(follower.tick().await, LeaderState::Follower);
		}

		time::advance(Duration::from_secs(5)).await;
	}

	for _ in 0..3 {
		let mut leaders = 0;

		for follower in &mut followers {
			if follower.tick().await == LeaderState::Leader {
				leaders += 1;
			}
		}

		assert_eq!(leaders, 1);

		time::advance(Duration::from_secs(5)).await;
	}

	assert!(!holder.renew().await?);
	assert_eq!(holder.state(), LeaderState::Follower);

	Ok(())
}
