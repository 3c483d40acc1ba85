//! Open stream-connection accounting.
//!
//! Each stream connection holds a [`ConnectionGuard`] for its whole life; the
//! guard decrements the count on drop, so a panicking or cancelled handler
//! never leaks a slot.
//!
//! Connections started through [`ConnectionTracker::run`] are also tracked as
//! tasks, so shutdown can wait for them and force the stragglers closed.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::metrics::record_open_connections;

/// Counts open and total stream connections.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    open: AtomicUsize,
    total: AtomicU64,
    tasks: TaskTracker,
    force_close: CancellationToken,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. Keep the guard alive while it is open.
    pub fn connect(self: &Arc<Self>) -> ConnectionGuard {
        let open = self.open.fetch_add(1, Ordering::Relaxed) + 1;
        let id = self.total.fetch_add(1, Ordering::Relaxed) + 1;
        record_open_connections(open);
        ConnectionGuard {
            id,
            tracker: Arc::clone(self),
        }
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Connections accepted since start.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Drive one connection until it finishes or is force-closed.
    ///
    /// `conn` receives the connection id. Its future is dropped, together with
    /// the socket it owns, when [`close_within`](Self::close_within) gives up.
    pub async fn run<F, Fut>(self: &Arc<Self>, conn: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let guard = self.connect();
        let conn_id = guard.id();
        let force_close = self.force_close.clone();
        let fut = conn(conn_id);
        self.tasks
            .track_future(async move {
                tokio::select! {
                    _ = fut => {}
                    _ = force_close.cancelled() => {
                        tracing::warn!(conn_id, "connection force-closed");
                    }
                }
                drop(guard);
            })
            .await
    }

    /// Wait up to `grace` for running connections to finish, then force the
    /// rest closed. Returns how many had to be forced.
    pub async fn close_within(&self, grace: Duration) -> usize {
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_ok() {
            return 0;
        }
        let forced = self.open();
        self.force_close.cancel();
        self.tasks.wait().await;
        forced
    }
}

/// RAII registration of one open connection.
pub struct ConnectionGuard {
    id: u64,
    tracker: Arc<ConnectionTracker>,
}

impl ConnectionGuard {
    /// Sequence number of this connection, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let open = self.tracker.open.fetch_sub(1, Ordering::Relaxed) - 1;
        record_open_connections(open);
        tracing::debug!(conn_id = self.id, open, "connection guard dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_counts_open_connections() {
        let tracker = Arc::new(ConnectionTracker::new());
        let a = tracker.connect();
        let b = tracker.connect();
        assert_eq!(tracker.open(), 2);
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);

        drop(a);
        assert_eq!(tracker.open(), 1);
        drop(b);
        assert_eq!(tracker.open(), 0);
        assert_eq!(tracker.total(), 2);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let tracker = Arc::new(ConnectionTracker::new());
        let t = Arc::clone(&tracker);
        let result = std::thread::spawn(move || {
            let _guard = t.connect();
            panic!("handler blew up");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(tracker.open(), 0);
    }

    async fn wait_until_open(tracker: &ConnectionTracker, n: usize) {
        for _ in 0..200 {
            if tracker.open() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} open connections, have {}", tracker.open());
    }

    #[tokio::test]
    async fn test_close_within_forces_stuck_connection() {
        let tracker = Arc::new(ConnectionTracker::new());
        let t = Arc::clone(&tracker);
        let task = tokio::spawn(async move {
            t.run(|_| std::future::pending::<()>()).await;
        });
        wait_until_open(&tracker, 1).await;

        let forced = tracker.close_within(Duration::from_millis(20)).await;
        assert_eq!(forced, 1);
        assert_eq!(tracker.open(), 0);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection task should end")
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_within_lets_finishing_connection_complete() {
        let tracker = Arc::new(ConnectionTracker::new());
        let t = Arc::clone(&tracker);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(async move {
            t.run(|_| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let _ = done_tx.send(());
            })
            .await;
        });
        wait_until_open(&tracker, 1).await;

        let forced = tracker.close_within(Duration::from_secs(5)).await;
        assert_eq!(forced, 0);
        assert!(done_rx.await.is_ok());
        assert_eq!(tracker.open(), 0);
        task.await.unwrap();
    }
}
