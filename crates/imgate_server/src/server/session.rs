#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use imgate_domain::{DeviceId, NodeId, Principal, UserId};
use imgate_protocol::DEFAULT_MAX_FRAME_SIZE;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
	/// Outbound queue is full; the frame was dropped.
	#[error("outbound queue full")]
	Backpressure,

	#[error("session closed")]
	Closed,
}

/// Upper bound for session timers; deadlines are computed as `now + timer`.
pub const MAX_SESSION_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

/// Liveness and buffering parameters applied to every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
	/// Interval between server pings.
	pub heartbeat_interval: Duration,
	/// Read deadline, re-armed by every pong.
	pub pong_wait: Duration,
	/// Deadline for a single frame write.
	pub write_timeout: Duration,
	/// Outbound queue capacity (frames).
	pub send_queue_capacity: usize,
	/// Largest inbound or outbound envelope.
	pub max_frame_bytes: usize,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			heartbeat_interval: Duration::from_secs(25),
			pong_wait: Duration::from_secs(60),
			write_timeout: Duration::from_secs(10),
			send_queue_capacity: 100,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

/// Outbound side of one authenticated connection.
///
/// Frames handed to [`Session::send`] are drained by the connection's write loop.
/// The cancellation token ties the read and write loops together.
#[derive(Debug)]
pub struct Session {
	id: u64,
	principal: Principal,
	node_id: NodeId,
	tx: mpsc::Sender<Bytes>,
	capacity: usize,
	max_frame_bytes: usize,
	cancel: CancellationToken,
	closed: AtomicBool,
}

impl Session {
	/// Create a session and the receiver its write loop drains.
	pub fn new(
		id: u64,
		principal: Principal,
		node_id: NodeId,
		settings: &SessionSettings,
	) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
		let capacity = settings.send_queue_capacity.max(1);
		let (tx, rx) = mpsc::channel(capacity);

		let session = Arc::new(Self {
			id,
			principal,
			node_id,
			tx,
			capacity,
			max_frame_bytes: settings.max_frame_bytes,
			cancel: CancellationToken::new(),
			closed: AtomicBool::new(false),
		});

		(session, rx)
	}

	/// Enqueue one serialized frame without waiting.
	pub fn send(&self, frame: Bytes) -> Result<(), SessionError> {
		if self.is_closed() {
			return Err(SessionError::Closed);
		}

		match self.tx.try_send(frame) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(_)) => Err(SessionError::Backpressure),
			Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Closed),
		}
	}

	/// Close the session. Returns `true` only for the call that closed it.
	pub fn close(&self) -> bool {
		if self.closed.swap(true, Ordering::AcqRel) {
			return false;
		}
		self.cancel.cancel();
		true
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn principal(&self) -> &Principal {
		&self.principal
	}

	pub fn user_id(&self) -> &UserId {
		&self.principal.user_id
	}

	pub fn device_id(&self) -> &DeviceId {
		&self.principal.device_id
	}

	pub fn node_id(&self) -> &NodeId {
		&self.node_id
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Encoding limit for frames addressed to this session.
	pub fn max_frame_bytes(&self) -> usize {
		self.max_frame_bytes
	}

	/// Token cancelled when the session closes or either connection loop exits.
	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::time::timeout;

	fn session(capacity: usize) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
		Session::new(
			7,
			Principal::parse("u1", "d1").expect("principal"),
			NodeId::new("node-test").expect("node id"),
			&SessionSettings {
				send_queue_capacity: capacity,
				..SessionSettings::default()
			},
		)
	}

	#[tokio::test]
	async fn send_reports_backpressure_at_capacity_without_blocking() {
		let (s, _rx) = session(2);

		let res = timeout(Duration::from_millis(100), async {
			let a = s.send(Bytes::from_static(b"a"));
			let b = s.send(Bytes::from_static(b"b"));
			let c = s.send(Bytes::from_static(b"c"));
			(a, b, c)
		})
		.await
		.expect("send must not block");

		assert_eq!(res.0, Ok(()));
		assert_eq!(res.1, Ok(()));
		assert_eq!(res.2, Err(SessionError::Backpressure));
	}

	#[tokio::test]
	async fn frames_drain_in_fifo_order() {
		let (s, mut rx) = session(4);
		s.send(Bytes::from_static(b"1")).unwrap();
		s.send(Bytes::from_static(b"2")).unwrap();

		assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"1"));
		assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"2"));
	}

	#[test]
	fn zero_capacity_is_clamped() {
		let (s, _rx) = session(0);
		assert_eq!(s.capacity(), 1);
		assert_eq!(s.send(Bytes::from_static(b"x")), Ok(()));
		assert_eq!(s.send(Bytes::from_static(b"y")), Err(SessionError::Backpressure));
	}

	#[test]
	fn close_is_idempotent_and_cancels() {
		let (s, _rx) = session(1);
		assert!(!s.cancel_token().is_cancelled());

		assert!(s.close());
		assert!(!s.close());
		assert!(s.is_closed());
		assert!(s.cancel_token().is_cancelled());
		assert_eq!(s.send(Bytes::from_static(b"x")), Err(SessionError::Closed));
	}

	#[test]
	fn send_after_receiver_dropped_is_closed() {
		let (s, rx) = session(1);
		drop(rx);
		assert_eq!(s.send(Bytes::from_static(b"x")), Err(SessionError::Closed));
	}
}
