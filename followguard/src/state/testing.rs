// followguard/src/state/testing.rs
//
// FraudStore wrapper that injects failures around a MemoryStore.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{FraudError, Result};
use crate::events::{
    AdminReview, BatchAnalysisJob, BotDetectionSignal, BotFollowerNotification, FollowerEvent,
    UserBadgeStatus, UserRiskScore,
};
use crate::state::{EventCursor, FraudStore, InsertOutcome, MemoryStore, UserState};

type CommitHook = Box<dyn FnOnce(&MemoryStore) + Send>;

#[derive(Default)]
pub struct FaultyStore {
    pub inner:           MemoryStore,
    ledger_down:         bool,
    flaky_follower:      Option<String>,
    failures_left:       AtomicU32,
    follower_reads:      AtomicU32,
    before_score_commit: Mutex<Option<CommitHook>>,
}

impl FaultyStore {
    pub fn new() -> Self { Self::default() }

    /// Every event page read fails.
    pub fn ledger_down(mut self) -> Self {
        self.ledger_down = true;
        self
    }

    /// Outbound reads for `follower` fail `times` times, then succeed.
    /// `u32::MAX` never recovers.
    pub fn flaky_follower(mut self, follower: &str, times: u32) -> Self {
        self.flaky_follower = Some(follower.to_string());
        self.failures_left  = AtomicU32::new(times);
        self
    }

    /// Outbound reads attempted for the flaky follower so far.
    pub fn follower_reads(&self) -> u32 { self.follower_reads.load(Ordering::SeqCst) }

    /// Run `hook` against the inner store right before the next score commit.
    pub fn before_score_commit(&self, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        *self.before_score_commit.lock() = Some(Box::new(hook));
    }
}

impl FraudStore for FaultyStore {
    fn append_event(&self, e: FollowerEvent, k: &str) -> Result<InsertOutcome> { self.inner.append_event(e, k) }
    fn has_event_key(&self, k: &str) -> Result<bool> { self.inner.has_event_key(k) }
    fn latest_edge_event(&self, a: &str, b: &str) -> Result<Option<FollowerEvent>> { self.inner.latest_edge_event(a, b) }

    fn events_page(
        &self,
        from:  DateTime<Utc>,
        to:    DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<FollowerEvent>> {
        if self.ledger_down {
            return Err(FraudError::TransientStore("ledger offline".into()));
        }
        self.inner.events_page(from, to, after, limit)
    }

    fn events_for_followed(&self, u: &str) -> Result<Vec<FollowerEvent>> { self.inner.events_for_followed(u) }

    fn events_by_follower(&self, follower_id: &str) -> Result<Vec<FollowerEvent>> {
        if self.flaky_follower.as_deref() == Some(follower_id) {
            self.follower_reads.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                if left != u32::MAX {
                    self.failures_left.fetch_sub(1, Ordering::SeqCst);
                }
                return Err(FraudError::TransientStore(format!("outbound read for {follower_id} timed out")));
            }
        }
        self.inner.events_by_follower(follower_id)
    }

    fn insert_signal(&self, s: BotDetectionSignal) -> Result<InsertOutcome> { self.inner.insert_signal(s) }
    fn signals_for_subject(&self, u: &str) -> Result<Vec<BotDetectionSignal>> { self.inner.signals_for_subject(u) }
    fn signals_between(&self, f: Option<DateTime<Utc>>, t: DateTime<Utc>) -> Result<Vec<BotDetectionSignal>> { self.inner.signals_between(f, t) }
    fn risk_score(&self, u: &str) -> Result<Option<UserRiskScore>> { self.inner.risk_score(u) }
    fn all_risk_scores(&self) -> Result<Vec<UserRiskScore>> { self.inner.all_risk_scores() }
    fn badge(&self, u: &str) -> Result<Option<UserBadgeStatus>> { self.inner.badge(u) }
    fn user_state(&self, u: &str) -> Result<UserState> { self.inner.user_state(u) }

    fn commit_score(&self, s: UserRiskScore, b: UserBadgeStatus, rev: u64) -> Result<UserRiskScore> {
        let hook = self.before_score_commit.lock().take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.commit_score(s, b, rev)
    }

    fn commit_review(&self, r: AdminReview, b: Option<UserBadgeStatus>) -> Result<()> { self.inner.commit_review(r, b) }
    fn commit_badge(&self, b: UserBadgeStatus) -> Result<()> { self.inner.commit_badge(b) }
    fn reviews_for_user(&self, u: &str) -> Result<Vec<AdminReview>> { self.inner.reviews_for_user(u) }
    fn reviews_between(&self, f: DateTime<Utc>, t: DateTime<Utc>) -> Result<Vec<AdminReview>> { self.inner.reviews_between(f, t) }
    fn insert_notification(&self, n: BotFollowerNotification) -> Result<InsertOutcome> { self.inner.insert_notification(n) }
    fn notifications_for(&self, u: &str, unread: bool) -> Result<Vec<BotFollowerNotification>> { self.inner.notifications_for(u, unread) }
    fn mark_notification_read(&self, id: &str, at: DateTime<Utc>) -> Result<BotFollowerNotification> { self.inner.mark_notification_read(id, at) }
    fn insert_job(&self, j: BatchAnalysisJob) -> Result<()> { self.inner.insert_job(j) }
    fn update_job(&self, j: BatchAnalysisJob) -> Result<()> { self.inner.update_job(j) }
    fn job(&self, id: &str) -> Result<Option<BatchAnalysisJob>> { self.inner.job(id) }
    fn jobs(&self) -> Result<Vec<BatchAnalysisJob>> { self.inner.jobs() }
}
