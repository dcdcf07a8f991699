#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters emitted by the gateway core.
///
/// Injected as `Arc<dyn MetricsSink>` so tests can observe counts without a global recorder.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
	fn connection_opened(&self);
	fn connection_closed(&self);
	fn frame_read(&self);
	fn frame_sent(&self);
	/// Binary frame that failed to decode.
	fn protocol_error(&self);
	/// Delivery frame not enqueued for one recipient.
	fn delivery_dropped(&self);
	fn auth_rejected(&self);
}

/// Forwards to the `metrics` facade (exported by the Prometheus recorder in the binary).
#[derive(Debug, Default, Clone, Copy)]
pub struct RecorderMetrics;

impl MetricsSink for RecorderMetrics {
	fn connection_opened(&self) {
		::metrics::gauge!("imgate_ws_connections").increment(1.0);
		::metrics::counter!("imgate_ws_connections_total").increment(1);
	}

	fn connection_closed(&self) {
		::metrics::gauge!("imgate_ws_connections").decrement(1.0);
	}

	fn frame_read(&self) {
		::metrics::counter!("imgate_ws_read_frames_total").increment(1);
	}

	fn frame_sent(&self) {
		::metrics::counter!("imgate_ws_sent_frames_total").increment(1);
	}

	fn protocol_error(&self) {
		::metrics::counter!("imgate_ws_bad_proto_total").increment(1);
	}

	fn delivery_dropped(&self) {
		::metrics::counter!("imgate_delivery_dropped_total").increment(1);
	}

	fn auth_rejected(&self) {
		::metrics::counter!("imgate_auth_rejected_total").increment(1);
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
	fn connection_opened(&self) {}
	fn connection_closed(&self) {}
	fn frame_read(&self) {}
	fn frame_sent(&self) {}
	fn protocol_error(&self) {}
	fn delivery_dropped(&self) {}
	fn auth_rejected(&self) {}
}

/// In-memory counters.
#[derive(Debug, Default)]
pub struct CountingMetrics {
	active: AtomicI64,
	opened: AtomicU64,
	read: AtomicU64,
	sent: AtomicU64,
	bad_proto: AtomicU64,
	dropped: AtomicU64,
	auth_rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
	pub active_connections: i64,
	pub connections_total: u64,
	pub read_frames: u64,
	pub sent_frames: u64,
	pub bad_proto: u64,
	pub delivery_dropped: u64,
	pub auth_rejected: u64,
}

impl CountingMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			active_connections: self.active.load(Ordering::Relaxed),
			connections_total: self.opened.load(Ordering::Relaxed),
			read_frames: self.read.load(Ordering::Relaxed),
			sent_frames: self.sent.load(Ordering::Relaxed),
			bad_proto: self.bad_proto.load(Ordering::Relaxed),
			delivery_dropped: self.dropped.load(Ordering::Relaxed),
			auth_rejected: self.auth_rejected.load(Ordering::Relaxed),
		}
	}
}

impl MetricsSink for CountingMetrics {
	fn connection_opened(&self) {
		self.active.fetch_add(1, Ordering::Relaxed);
		self.opened.fetch_add(1, Ordering::Relaxed);
	}

	fn connection_closed(&self) {
		self.active.fetch_sub(1, Ordering::Relaxed);
	}

	fn frame_read(&self) {
		self.read.fetch_add(1, Ordering::Relaxed);
	}

	fn frame_sent(&self) {
		self.sent.fetch_add(1, Ordering::Relaxed);
	}

	fn protocol_error(&self) {
		self.bad_proto.fetch_add(1, Ordering::Relaxed);
	}

	fn delivery_dropped(&self) {
		self.dropped.fetch_add(1, Ordering::Relaxed);
	}

	fn auth_rejected(&self) {
		self.auth_rejected.fetch_add(1, Ordering::Relaxed);
	}
}
