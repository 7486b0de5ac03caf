//! Session counters
//!
//! Lock-free counters shared by the acceptor and every session task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct SessionStats {
    accepted: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
    directory_sessions: AtomicU64,
    handles_sent: AtomicU64,
    failures: AtomicU64,
    idle: Notify,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted since start
    pub accepted: u64,
    /// Sessions currently running
    pub active: u64,
    /// Peers turned away by the peer policy
    pub rejected: u64,
    pub directory_sessions: u64,
    /// Device descriptors handed out
    pub handles_sent: u64,
    /// Sessions that ended with a reported error
    pub failures: u64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count a new session; the guard marks it finished when dropped
    pub fn session_started(self: &Arc<Self>) -> ActiveSession {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveSession {
            stats: Arc::clone(self),
        }
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_directory(&self) {
        self.directory_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handle_sent(&self) {
        self.handles_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Resolve once no session is running
    ///
    /// Sessions left running by a detaching shutdown still need the runtime
    /// and the device backend; the daemon waits here before tearing them down.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            directory_sessions: self.directory_sessions.load(Ordering::Relaxed),
            handles_sent: self.handles_sent.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Held by a running session
#[derive(Debug)]
pub struct ActiveSession {
    stats: Arc<SessionStats>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        if self.stats.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stats.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_tracks_guards() {
        let stats = SessionStats::new();
        let first = stats.session_started();
        let second = stats.session_started();
        assert_eq!(stats.active(), 2);

        drop(first);
        assert_eq!(stats.active(), 1);
        drop(second);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.active, 0);
    }

    #[test]
    fn test_counters() {
        let stats = SessionStats::new();
        stats.record_rejected();
        stats.record_directory();
        stats.record_handle_sent();
        stats.record_handle_sent();
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.directory_sessions, 1);
        assert_eq!(snapshot.handles_sent, 2);
        assert_eq!(snapshot.failures, 1);
    }

    #[tokio::test]
    async fn test_wait_idle_follows_last_session() {
        let stats = SessionStats::new();
        stats.wait_idle().await;

        let first = stats.session_started();
        let second = stats.session_started();
        let waiter = tokio::spawn({
            let stats = stats.clone();
            async move { stats.wait_idle().await }
        });

        drop(first);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(second);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
