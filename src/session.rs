//! Mutable state tracked across a connection's lifetime.
//!
//! [`SessionState`] outlives any single WebSocket connection: it is
//! constructed once per [`Shard`][crate::Shard] and survives reconnect
//! attempts, only being discarded wholesale on a fatal error. The zlib
//! dictionary and the ping/heartbeat latency trackers, in contrast, are
//! connection-scoped and reset on every reconnect.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::sync::Notify;

/// Identity held across reconnects.
#[derive(Debug, Default)]
struct Inner {
    session_id: Option<String>,
    seq: Option<u64>,
    connected_at: Option<Instant>,
}

/// Session continuity state for one [`Shard`][crate::Shard].
///
/// Guarded internally by a plain [`Mutex`] rather than atomics per
/// field: assignments only ever race between the poll, heartbeat, and
/// ping tasks of a single shard, and none of the critical sections do
/// more than a handful of comparisons, so lock contention is a
/// non-issue.
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<Inner>,
    close: CloseHandle,
}

impl SessionState {
    /// Create a new, disconnected session with no identity yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently active session id, if the shard has completed a
    /// handshake.
    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Set the session id, e.g. upon receiving READY.
    pub fn set_session_id(&self, session_id: Option<String>) {
        self.lock().session_id = session_id;
    }

    /// Last inbound dispatch sequence number observed this session.
    pub fn seq(&self) -> Option<u64> {
        self.lock().seq
    }

    /// Record an inbound dispatch sequence number.
    ///
    /// Returns the previous value, so callers can detect a sequence
    /// gap indicating a missed dispatch.
    pub fn set_seq(&self, seq: u64) -> Option<u64> {
        let mut inner = self.lock();
        inner.seq.replace(seq)
    }

    /// Whether a prior handshake has set a session id, i.e. whether
    /// the next connect should RESUME rather than IDENTIFY.
    pub fn can_resume(&self) -> bool {
        self.lock().session_id.is_some()
    }

    /// How long the current connection has been up, `None` while
    /// disconnected.
    pub fn uptime(&self) -> Option<Duration> {
        self.lock().connected_at.map(|instant| instant.elapsed())
    }

    /// Mark the connection as freshly established.
    pub fn mark_connected(&self) {
        self.lock().connected_at = Some(Instant::now());
    }

    /// Reset the per-connection `connected_at` sample. Called on every
    /// reconnect; `session_id` and `seq` are left untouched.
    pub fn reset_timing(&self) {
        self.lock().connected_at = None;
    }

    /// Discard the session identity. Called on fatal errors and
    /// non-resumable invalidations.
    pub fn clear_session(&self) {
        let mut inner = self.lock();
        inner.session_id = None;
        inner.seq = None;
    }

    /// The signal-once latch shared by the keepalive and poll tasks.
    pub fn close_handle(&self) -> &CloseHandle {
        &self.close
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Single-setter, multi-waiter close latch.
///
/// Every task spawned during `Listening` holds a clone-free reference
/// to the same handle; any one of them calling [`close`][Self::close]
/// is observed by [`wait`][Self::wait] in all the others, unblocking
/// them promptly instead of relying on a poll interval.
#[derive(Debug, Default)]
pub struct CloseHandle {
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl CloseHandle {
    /// Whether the latch has already been set.
    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Set the latch, waking every current and future waiter.
    ///
    /// Idempotent: setting an already-closed latch has no additional
    /// effect.
    pub fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolve once [`close`][Self::close] has been called.
    ///
    /// Resolves immediately if the latch is already set.
    pub async fn wait(&self) {
        if self.is_closed() {
            return;
        }

        // `notified` must be constructed before the recheck to avoid
        // missing a concurrent `close` between the check above and
        // subscribing.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_closed() {
            return;
        }

        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState;
    use static_assertions::assert_impl_all;
    use std::{fmt::Debug, time::Duration};

    assert_impl_all!(SessionState: Debug, Default, Send, Sync);

    #[test]
    fn resume_vs_identify_depends_on_session_id() {
        let session = SessionState::new();
        assert!(!session.can_resume());

        session.set_session_id(Some("abc".to_owned()));
        assert!(session.can_resume());
    }

    #[test]
    fn seq_set_returns_previous_value() {
        let session = SessionState::new();
        assert_eq!(session.set_seq(1), None);
        assert_eq!(session.set_seq(2), Some(1));
        assert_eq!(session.seq(), Some(2));
    }

    #[test]
    fn uptime_is_none_until_connected() {
        let session = SessionState::new();
        assert!(session.uptime().is_none());

        session.mark_connected();
        assert!(session.uptime().is_some());

        session.reset_timing();
        assert!(session.uptime().is_none());
    }

    #[test]
    fn reset_timing_preserves_identity() {
        let session = SessionState::new();
        session.set_session_id(Some("abc".to_owned()));
        session.set_seq(7);
        session.mark_connected();

        session.reset_timing();

        assert_eq!(session.session_id().as_deref(), Some("abc"));
        assert_eq!(session.seq(), Some(7));
        assert!(session.uptime().is_none());
    }

    #[test]
    fn clear_session_drops_identity_and_seq() {
        let session = SessionState::new();
        session.set_session_id(Some("abc".to_owned()));
        session.set_seq(7);

        session.clear_session();

        assert!(session.session_id().is_none());
        assert!(session.seq().is_none());
    }

    #[tokio::test]
    async fn close_latch_wakes_existing_waiter() {
        let session = std::sync::Arc::new(SessionState::new());
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.close_handle().wait().await })
        };

        tokio::task::yield_now().await;
        session.close_handle().close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("latch should wake the waiter")
            .unwrap();
    }

    #[tokio::test]
    async fn close_latch_resolves_immediately_once_set() {
        let session = SessionState::new();
        session.close_handle().close();

        tokio::time::timeout(Duration::from_millis(50), session.close_handle().wait())
            .await
            .expect("already-closed latch resolves immediately");
    }
}
