// followguard/src/engine/dispatcher.rs
//
// Bot-follower alerts.
//
// A newly flagged account with confidence strictly above the alert threshold
// produces one notification per affected user: everyone it currently follows
// and everyone currently following it. Records are deduplicated on
// (recipient, bot, signal type), so re-detection and job retries never alert
// twice. Stored records are the source of truth; the outbox feeds a writer
// that appends them to `bot_follower_notifications.jsonl` for whatever
// delivers them downstream.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{FraudError, Result};
use crate::events::{BotDetectionSignal, BotFollowerNotification};
use crate::state::graph::{current_followees, current_followers};
use crate::state::{FraudStore, InsertOutcome};

pub const NOTIFICATION_FILE: &str = "bot_follower_notifications.jsonl";

pub struct NotificationDispatcher {
    store:     Arc<dyn FraudStore>,
    clock:     Arc<dyn Clock>,
    threshold: f64,
    outbox:    Option<mpsc::Sender<BotFollowerNotification>>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn FraudStore>, clock: Arc<dyn Clock>, threshold: f64) -> Self {
        Self { store, clock, threshold, outbox: None }
    }

    pub fn with_outbox(mut self, tx: mpsc::Sender<BotFollowerNotification>) -> Self {
        self.outbox = Some(tx);
        self
    }

    /// Users affected by `bot_id`: accounts it follows plus accounts following
    /// it, deduplicated, never the bot itself.
    pub fn recipients(&self, bot_id: &str) -> Result<Vec<String>> {
        let outbound = self.store.events_by_follower(bot_id)?;
        let inbound  = self.store.events_for_followed(bot_id)?;
        let set: BTreeSet<String> = current_followees(&outbound, None)
            .into_iter()
            .chain(current_followers(&inbound, None))
            .filter(|u| u != bot_id)
            .collect();
        Ok(set.into_iter().collect())
    }

    /// Create notifications for one persisted signal. Returns how many new
    /// records were written.
    pub fn notify(&self, signal: &BotDetectionSignal) -> Result<usize> {
        if signal.confidence_score <= self.threshold {
            return Ok(0);
        }
        let now = self.clock.now();
        let mut created = 0;
        for recipient in self.recipients(&signal.subject_user_id)? {
            let n = BotFollowerNotification {
                id:                uuid::Uuid::new_v4().to_string(),
                recipient_user_id: recipient,
                bot_follower_id:   signal.subject_user_id.clone(),
                signal_type:       signal.signal_type.clone(),
                confidence_score:  signal.confidence_score,
                sent_at:           now,
                read_at:           None,
            };
            if self.store.insert_notification(n.clone())? == InsertOutcome::Duplicate {
                continue;
            }
            created += 1;
            if let Some(tx) = &self.outbox {
                if let Err(e) = tx.try_send(n) {
                    warn!(bot = %signal.subject_user_id, error = %e, "Notification outbox full, record kept in store");
                }
            }
        }
        if created > 0 {
            debug!(
                bot        = %signal.subject_user_id,
                signal     = %signal.signal_type,
                confidence = signal.confidence_score,
                created,
                "Bot-follower notifications created"
            );
        }
        Ok(created)
    }

    /// Newest first.
    pub fn list(&self, user_id: &str, unread_only: bool) -> Result<Vec<BotFollowerNotification>> {
        self.store.notifications_for(user_id, unread_only)
    }

    /// Sets `read_at` once; repeated calls keep the first timestamp.
    pub fn mark_as_read(&self, notification_id: &str) -> Result<BotFollowerNotification> {
        if notification_id.trim().is_empty() {
            return Err(FraudError::Validation("notification id must not be empty".into()));
        }
        self.store.mark_notification_read(notification_id, self.clock.now())
    }
}

/// Appends notifications from the outbox to a JSONL file.
pub struct NotificationWriter {
    out: PathBuf,
}

impl NotificationWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let out: PathBuf = output_dir.into();
        std::fs::create_dir_all(&out)?;
        Ok(Self { out })
    }

    pub async fn run(self, mut rx: mpsc::Receiver<BotFollowerNotification>) {
        let mut written = 0u64;
        while let Some(n) = rx.recv().await {
            let line = match serde_json::to_string(&n) {
                Ok(l)  => l + "\n",
                Err(e) => { warn!(error = %e, "Notification encode failed"); continue; }
            };
            if let Err(e) = self.write(NOTIFICATION_FILE, &line).await {
                warn!(recipient = %n.recipient_user_id, error = %e, "Notification write failed");
                continue;
            }
            written += 1;
        }
        info!(written, "Notification writer stopped");
    }

    async fn write(&self, file: &str, content: &str) -> Result<()> {
        let mut f = OpenOptions::new().create(true).append(true)
            .open(self.out.join(file)).await?;
        f.write_all(content.as_bytes()).await?;
        Ok(())
    }
}
