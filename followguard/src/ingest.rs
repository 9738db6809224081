// followguard/src/ingest.rs
//
// Follower event ingestion.
//
// Events are validated (non-empty ids, no self-follows, no timestamps beyond
// the allowed clock skew, no going back in time on one follow edge),
// deduplicated on their natural key and appended to the ledger. Every new
// event schedules its followed user for recomputation.
//
// Sources: a JSONL file tailed like a log, or read once for batch runs.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::IngestConfig;
use crate::engine::recompute::RecomputeQueue;
use crate::error::{FraudError, Result};
use crate::events::FollowerEvent;
use crate::state::{FraudStore, InsertOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted { event_id: String },
    Duplicate,
}

pub struct EventIngestor {
    store: Arc<dyn FraudStore>,
    clock: Arc<dyn Clock>,
    cfg:   IngestConfig,
    queue: Option<Arc<RecomputeQueue>>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn FraudStore>, clock: Arc<dyn Clock>, cfg: IngestConfig) -> Self {
        Self { store, clock, cfg, queue: None }
    }

    pub fn with_queue(mut self, queue: Arc<RecomputeQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn ingest(&self, mut event: FollowerEvent) -> Result<IngestOutcome> {
        event.follower_user_id = event.follower_user_id.trim().to_string();
        event.followed_user_id = event.followed_user_id.trim().to_string();
        if event.follower_user_id.is_empty() || event.followed_user_id.is_empty() {
            return Err(FraudError::Validation("follower and followed ids are required".into()));
        }
        if event.follower_user_id == event.followed_user_id {
            return Err(FraudError::Validation(format!(
                "{} cannot follow themselves",
                event.follower_user_id
            )));
        }
        let horizon = self.clock.now() + Duration::seconds(self.cfg.max_clock_skew_secs);
        if event.occurred_at > horizon {
            return Err(FraudError::Validation(format!(
                "event at {} is in the future",
                event.occurred_at.to_rfc3339()
            )));
        }

        let key = event.natural_key(self.cfg.dedup_bucket_secs);
        if self.store.has_event_key(&key)? {
            return Ok(IngestOutcome::Duplicate);
        }
        if let Some(last) = self.store.latest_edge_event(&event.follower_user_id, &event.followed_user_id)? {
            if event.occurred_at < last.occurred_at {
                return Err(FraudError::Validation(format!(
                    "{} → {} at {} predates the edge's last event at {}",
                    event.follower_user_id,
                    event.followed_user_id,
                    event.occurred_at.to_rfc3339(),
                    last.occurred_at.to_rfc3339()
                )));
            }
        }

        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }
        let event_id = event.id.clone();
        let followed = event.followed_user_id.clone();
        match self.store.append_event(event, &key)? {
            InsertOutcome::Duplicate => Ok(IngestOutcome::Duplicate),
            InsertOutcome::Inserted  => {
                if let Some(q) = &self.queue {
                    q.request(&followed);
                }
                Ok(IngestOutcome::Inserted { event_id })
            }
        }
    }

    /// Drain a channel of events until every sender is gone.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<FollowerEvent>) {
        let (mut inserted, mut duplicates, mut rejected) = (0u64, 0u64, 0u64);
        while let Some(event) = rx.recv().await {
            match self.ingest(event) {
                Ok(IngestOutcome::Inserted { event_id }) => {
                    inserted += 1;
                    debug!(event_id = %event_id, "Event ingested");
                }
                Ok(IngestOutcome::Duplicate) => duplicates += 1,
                Err(e) => {
                    rejected += 1;
                    warn!(stage = "ingest", error = %e, "Event rejected");
                }
            }
        }
        info!(inserted, duplicates, rejected, "Ingestion stopped");
    }
}

/// Follow a JSONL file, forwarding each parsed event. With `seek_end`,
/// existing lines are skipped first.
pub async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<FollowerEvent>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {}
    }

    info!(path = %path.display(), "Tailing follower events");
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() { continue; }
                match serde_json::from_str::<FollowerEvent>(line) {
                    Ok(ev) => { if tx.send(ev).await.is_err() { break; } }
                    Err(e) => warn!(error = %e, "Event parse error"),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

/// Read a whole JSONL file, oldest event first. Unparseable lines are skipped.
pub async fn read_jsonl(path: PathBuf) -> Result<Vec<FollowerEvent>> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut events = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() { continue; }
        match serde_json::from_str::<FollowerEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(e) => warn!(line = n + 1, error = %e, "Event parse error"),
        }
    }
    events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
    Ok(events)
}
