//! Single reconnect-and-retry policy for transient store failures.

// std
use std::future::Future;
// crates.io
use tokio::time;
// self
use crate::{_prelude::*, metrics};

/// Run `call`; on a transient store failure, wait `delay`, rebuild the client via `reset`, and
/// run `call` exactly once more.
///
/// Non-transient errors, a failing `reset`, and a second failure all propagate unchanged.
pub async fn retry_transient<T, C, CFut, R, RFut>(
	op: &'static str,
	delay: Duration,
	call: C,
	reset: R,
) -> Result<T>
where
	C: Fn() -> CFut,
	CFut: Future<Output = Result<T>>,
	R: FnOnce() -> RFut,
	RFut: Future<Output = Result<()>>,
{
	match call().await {
		Err(err) if err.is_transient_store() => {
			tracing::warn!(op, error = %err, ?delay, "transient store failure; reconnecting");

			metrics::record_store_reconnect(op);

			if !delay.is_zero() {
				time::sleep(delay).await;
			}

			reset().await?;

			call().await
		},
		result => result,
	}
}
