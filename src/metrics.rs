//! Metrics emitted through the `metrics` facade, plus the optional Prometheus exporter.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
// crates.io
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
// self
use crate::_prelude::*;

const METRIC_DELIVERIES_TOTAL: &str = "push_relay_deliveries_total";
const METRIC_DRAINS_TOTAL: &str = "push_relay_drains_total";
const METRIC_SWEEPS_TOTAL: &str = "push_relay_sweeps_total";
const METRIC_SWEEP_DURATION: &str = "push_relay_sweep_duration_seconds";
const METRIC_LEADER: &str = "push_relay_leader";
const METRIC_STORE_RECONNECTS: &str = "push_relay_store_reconnects_total";
const METRIC_INTAKE_TOTAL: &str = "push_relay_intake_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record one HTTP delivery attempt by outcome (`success`, `rejected`, `transport_error`).
pub fn record_delivery(outcome: &'static str) {
	metrics::counter!(METRIC_DELIVERIES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record one drain by outcome.
pub fn record_drain(outcome: &'static str) {
	metrics::counter!(METRIC_DRAINS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a completed sweep and its wall time.
pub fn record_sweep(duration: Duration) {
	metrics::counter!(METRIC_SWEEPS_TOTAL).increment(1);
	metrics::histogram!(METRIC_SWEEP_DURATION).record(duration.as_secs_f64());
}

/// Publish whether this process currently holds the lease.
pub fn set_leader(leader: bool) {
	metrics::gauge!(METRIC_LEADER).set(if leader { 1.0 } else { 0.0 });
}

/// Record a reconnect triggered by a transient store failure.
pub fn record_store_reconnect(op: &'static str) {
	metrics::counter!(METRIC_STORE_RECONNECTS, "op" => op).increment(1);
}

/// Record how an inbound task was handled.
pub fn record_intake(disposition: &'static str) {
	metrics::counter!(METRIC_INTAKE_TOTAL, "disposition" => disposition).increment(1);
}
