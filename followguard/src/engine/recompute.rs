// followguard/src/engine/recompute.rs
//
// Deduplicating recompute queue fed by event ingestion.
//
// A user already waiting in the queue is not enqueued again; a burst of
// follows on one account collapses into a single pass. The pending mark is
// dropped when the consumer picks the user up, so events arriving during the
// pass schedule one more.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::engine::analysis::UserAnalyzer;

pub struct RecomputeQueue {
    tx:      mpsc::Sender<String>,
    pending: DashSet<String>,
}

impl RecomputeQueue {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Arc::new(Self { tx, pending: DashSet::new() }), rx)
    }

    /// Schedule `user_id`. Returns false when it was already pending or the
    /// queue is full (the next batch job picks it up).
    pub fn request(&self, user_id: &str) -> bool {
        if !self.pending.insert(user_id.to_string()) {
            return false;
        }
        match self.tx.try_send(user_id.to_string()) {
            Ok(()) => true,
            Err(e) => {
                self.pending.remove(user_id);
                warn!(user_id, error = %e, "Recompute queue rejected user");
                false
            }
        }
    }

    pub fn pending(&self) -> usize { self.pending.len() }

    fn take(&self, user_id: &str) {
        self.pending.remove(user_id);
    }
}

/// Consume the queue until cancelled or every sender is gone.
pub async fn run_consumer(
    queue:    Arc<RecomputeQueue>,
    mut rx:   mpsc::Receiver<String>,
    analyzer: Arc<UserAnalyzer>,
    clock:    Arc<dyn Clock>,
    token:    CancellationToken,
) {
    let mut processed = 0u64;
    loop {
        let user_id = tokio::select! {
            _ = token.cancelled() => break,
            next = rx.recv() => match next {
                Some(u) => u,
                None    => break,
            },
        };
        queue.take(&user_id);

        let analyzer = analyzer.clone();
        let as_of    = clock.now();
        let uid      = user_id.clone();
        let result = tokio::task::spawn_blocking(move || analyzer.analyze_user(&uid, as_of)).await;
        match result {
            Ok(Ok(o)) => {
                processed += 1;
                debug!(
                    user_id = %user_id,
                    new_signals = o.new_signals,
                    overall = o.score.overall_score,
                    "Live recompute done"
                );
            }
            Ok(Err(e)) => warn!(user_id = %user_id, stage = e.stage, error = %e.error, "Live recompute failed"),
            Err(e)     => warn!(user_id = %user_id, error = %e, "Live recompute task panicked"),
        }
    }
    info!(processed, "Recompute consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_users_are_not_queued_twice() {
        let (q, mut rx) = RecomputeQueue::new(8);
        assert!(q.request("alice"));
        assert!(!q.request("alice"));
        assert!(q.request("bob"));
        assert_eq!(q.pending(), 2);

        assert_eq!(rx.recv().await.as_deref(), Some("alice"));
        q.take("alice");
        assert!(q.request("alice"));
    }

    #[tokio::test]
    async fn full_queue_drops_and_clears_mark() {
        let (q, _rx) = RecomputeQueue::new(1);
        assert!(q.request("a"));
        assert!(!q.request("b"));
        assert_eq!(q.pending(), 1);
    }
}
