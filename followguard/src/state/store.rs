// followguard/src/state/store.rs
//
// Durable-store interface plus the in-memory implementation the daemon runs on.
//
// Tables (logical schema):
//   follower_events            : append-only, idempotent on natural key
//   bot_detection_signals      : append-only, idempotent on fingerprint
//   user_risk_scores           : upsert per user, compare-and-set on version
//   user_badge_statuses        : upsert per user, written with the score row
//   admin_reviews              : append-only, written with the badge row
//   bot_follower_notifications : append-only, `read_at` is the one mutation
//   batch_analysis_jobs        : one row per job, frozen once terminal
//
// Score, badge and review history for one user live in a single DashMap
// entry, so multi-row commits for a user become visible all at once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{FraudError, Result};
use crate::events::{
    AdminReview, BatchAnalysisJob, BotDetectionSignal, BotFollowerNotification, FollowerEvent,
    UserBadgeStatus, UserRiskScore,
};

/// Keyset position in the event ledger: (occurred_at, event id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventCursor {
    pub occurred_at: DateTime<Utc>,
    pub event_id:    String,
}

impl EventCursor {
    pub fn of(event: &FollowerEvent) -> Self {
        Self { occurred_at: event.occurred_at, event_id: event.id.clone() }
    }
}

/// Consistent read of one user's score and badge rows. `revision` counts
/// every committed write to either row; zero means nothing was written yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
    pub score:    Option<UserRiskScore>,
    pub badge:    Option<UserBadgeStatus>,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

pub trait FraudStore: Send + Sync {
    // follower_events
    fn append_event(&self, event: FollowerEvent, natural_key: &str) -> Result<InsertOutcome>;
    fn has_event_key(&self, natural_key: &str) -> Result<bool>;
    /// Most recent event on the (follower → followed) edge.
    fn latest_edge_event(&self, follower_id: &str, followed_id: &str) -> Result<Option<FollowerEvent>>;
    /// Events with `from <= occurred_at <= to`, ordered by (occurred_at, id),
    /// strictly after `after` when given.
    fn events_page(
        &self,
        from:  DateTime<Utc>,
        to:    DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<FollowerEvent>>;
    /// Full inbound history of a followed user, ordered by time.
    fn events_for_followed(&self, user_id: &str) -> Result<Vec<FollowerEvent>>;
    /// Full outbound history of a follower account, ordered by time.
    fn events_by_follower(&self, follower_id: &str) -> Result<Vec<FollowerEvent>>;

    // bot_detection_signals
    fn insert_signal(&self, signal: BotDetectionSignal) -> Result<InsertOutcome>;
    fn signals_for_subject(&self, subject_id: &str) -> Result<Vec<BotDetectionSignal>>;
    /// Signals detected in `[from, to]`; `from = None` means since the beginning.
    fn signals_between(&self, from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Result<Vec<BotDetectionSignal>>;

    // user_risk_scores + user_badge_statuses + admin_reviews
    fn risk_score(&self, user_id: &str) -> Result<Option<UserRiskScore>>;
    fn all_risk_scores(&self) -> Result<Vec<UserRiskScore>>;
    fn badge(&self, user_id: &str) -> Result<Option<UserBadgeStatus>>;
    fn user_state(&self, user_id: &str) -> Result<UserState>;
    /// Upsert score and badge together. `expected_revision` is the
    /// `UserState::revision` the caller read; a mismatch is a `Conflict`.
    /// The committed score carries the new revision as its `version`.
    fn commit_score(
        &self,
        score:             UserRiskScore,
        badge:             UserBadgeStatus,
        expected_revision: u64,
    ) -> Result<UserRiskScore>;
    /// Append a review and, when given, overwrite the badge in one unit.
    /// A badge write bumps the revision.
    fn commit_review(&self, review: AdminReview, badge: Option<UserBadgeStatus>) -> Result<()>;
    /// Badge-only write (user activation). Bumps the revision.
    fn commit_badge(&self, badge: UserBadgeStatus) -> Result<()>;
    fn reviews_for_user(&self, user_id: &str) -> Result<Vec<AdminReview>>;
    fn reviews_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AdminReview>>;

    // bot_follower_notifications
    /// Dedupes on (recipient, bot follower, signal type).
    fn insert_notification(&self, n: BotFollowerNotification) -> Result<InsertOutcome>;
    fn notifications_for(&self, recipient_id: &str, unread_only: bool) -> Result<Vec<BotFollowerNotification>>;
    fn mark_notification_read(&self, id: &str, at: DateTime<Utc>) -> Result<BotFollowerNotification>;

    // batch_analysis_jobs
    fn insert_job(&self, job: BatchAnalysisJob) -> Result<()>;
    /// Rejects writes to a job that is already terminal.
    fn update_job(&self, job: BatchAnalysisJob) -> Result<()>;
    fn job(&self, job_id: &str) -> Result<Option<BatchAnalysisJob>>;
    fn jobs(&self) -> Result<Vec<BatchAnalysisJob>>;
}

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Default)]
struct EventLedger {
    by_time:      BTreeMap<EventCursor, FollowerEvent>,
    natural_keys: HashSet<String>,
    inbound:      HashMap<String, Vec<EventCursor>>,
    outbound:     HashMap<String, Vec<EventCursor>>,
    latest_edge:  HashMap<(String, String), EventCursor>,
}

impl EventLedger {
    fn resolve(&self, keys: Option<&Vec<EventCursor>>) -> Vec<FollowerEvent> {
        let mut keys: Vec<&EventCursor> = keys.map(|k| k.iter().collect()).unwrap_or_default();
        keys.sort();
        keys.into_iter().filter_map(|k| self.by_time.get(k).cloned()).collect()
    }
}

#[derive(Default)]
struct SignalLog {
    all:          Vec<BotDetectionSignal>,
    by_subject:   HashMap<String, Vec<usize>>,
    fingerprints: HashSet<String>,
}

#[derive(Default, Clone)]
struct UserRow {
    score:    Option<UserRiskScore>,
    badge:    Option<UserBadgeStatus>,
    reviews:  Vec<AdminReview>,
    revision: u64,
}

impl UserRow {
    fn put_badge(&mut self, badge: UserBadgeStatus) {
        self.revision += 1;
        if let Some(score) = self.score.as_mut() {
            score.badge_status = badge.status;
            score.version      = self.revision;
        }
        self.badge = Some(badge);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    events:            RwLock<EventLedger>,
    signals:           RwLock<SignalLog>,
    users:             DashMap<String, UserRow>,
    notifications:     DashMap<String, BotFollowerNotification>,
    notification_keys: DashMap<String, String>,
    jobs:              DashMap<String, BatchAnalysisJob>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn n_events(&self) -> usize { self.events.read().by_time.len() }

    pub fn n_signals(&self) -> usize { self.signals.read().all.len() }
}

impl FraudStore for MemoryStore {
    fn append_event(&self, event: FollowerEvent, natural_key: &str) -> Result<InsertOutcome> {
        let mut ledger = self.events.write();
        if ledger.natural_keys.contains(natural_key) {
            return Ok(InsertOutcome::Duplicate);
        }
        let key = EventCursor::of(&event);
        if ledger.by_time.contains_key(&key) {
            return Err(FraudError::Conflict(format!(
                "event id {} at {} is already taken",
                key.event_id,
                key.occurred_at.to_rfc3339()
            )));
        }
        ledger.natural_keys.insert(natural_key.to_string());
        let edge = (event.follower_user_id.clone(), event.followed_user_id.clone());
        ledger.inbound.entry(event.followed_user_id.clone()).or_default().push(key.clone());
        ledger.outbound.entry(event.follower_user_id.clone()).or_default().push(key.clone());
        let newer = ledger.latest_edge.get(&edge).map(|cur| key > *cur).unwrap_or(true);
        if newer {
            ledger.latest_edge.insert(edge, key.clone());
        }
        ledger.by_time.insert(key, event);
        Ok(InsertOutcome::Inserted)
    }

    fn has_event_key(&self, natural_key: &str) -> Result<bool> {
        Ok(self.events.read().natural_keys.contains(natural_key))
    }

    fn latest_edge_event(&self, follower_id: &str, followed_id: &str) -> Result<Option<FollowerEvent>> {
        let ledger = self.events.read();
        Ok(ledger
            .latest_edge
            .get(&(follower_id.to_string(), followed_id.to_string()))
            .and_then(|k| ledger.by_time.get(k).cloned()))
    }

    fn events_page(
        &self,
        from:  DateTime<Utc>,
        to:    DateTime<Utc>,
        after: Option<&EventCursor>,
        limit: usize,
    ) -> Result<Vec<FollowerEvent>> {
        let ledger = self.events.read();
        let lower = match after {
            Some(c) => Bound::Excluded(c.clone()),
            None    => Bound::Included(EventCursor { occurred_at: from, event_id: String::new() }),
        };
        Ok(ledger
            .by_time
            .range((lower, Bound::Unbounded))
            .map(|(_, e)| e)
            .filter(|e| e.occurred_at >= from)
            .take_while(|e| e.occurred_at <= to)
            .take(limit)
            .cloned()
            .collect())
    }

    fn events_for_followed(&self, user_id: &str) -> Result<Vec<FollowerEvent>> {
        let ledger = self.events.read();
        Ok(ledger.resolve(ledger.inbound.get(user_id)))
    }

    fn events_by_follower(&self, follower_id: &str) -> Result<Vec<FollowerEvent>> {
        let ledger = self.events.read();
        Ok(ledger.resolve(ledger.outbound.get(follower_id)))
    }

    fn insert_signal(&self, signal: BotDetectionSignal) -> Result<InsertOutcome> {
        let mut log = self.signals.write();
        if !log.fingerprints.insert(signal.fingerprint.clone()) {
            return Ok(InsertOutcome::Duplicate);
        }
        let idx = log.all.len();
        log.by_subject.entry(signal.subject_user_id.clone()).or_default().push(idx);
        log.all.push(signal);
        Ok(InsertOutcome::Inserted)
    }

    fn signals_for_subject(&self, subject_id: &str) -> Result<Vec<BotDetectionSignal>> {
        let log = self.signals.read();
        Ok(log
            .by_subject
            .get(subject_id)
            .map(|idx| idx.iter().map(|&i| log.all[i].clone()).collect())
            .unwrap_or_default())
    }

    fn signals_between(&self, from: Option<DateTime<Utc>>, to: DateTime<Utc>) -> Result<Vec<BotDetectionSignal>> {
        let log = self.signals.read();
        Ok(log
            .all
            .iter()
            .filter(|s| from.map(|f| s.detected_at >= f).unwrap_or(true) && s.detected_at <= to)
            .cloned()
            .collect())
    }

    fn risk_score(&self, user_id: &str) -> Result<Option<UserRiskScore>> {
        Ok(self.users.get(user_id).and_then(|r| r.score.clone()))
    }

    fn all_risk_scores(&self) -> Result<Vec<UserRiskScore>> {
        Ok(self.users.iter().filter_map(|r| r.score.clone()).collect())
    }

    fn badge(&self, user_id: &str) -> Result<Option<UserBadgeStatus>> {
        Ok(self.users.get(user_id).and_then(|r| r.badge.clone()))
    }

    fn user_state(&self, user_id: &str) -> Result<UserState> {
        Ok(self
            .users
            .get(user_id)
            .map(|r| UserState { score: r.score.clone(), badge: r.badge.clone(), revision: r.revision })
            .unwrap_or_default())
    }

    fn commit_score(
        &self,
        mut score:         UserRiskScore,
        badge:             UserBadgeStatus,
        expected_revision: u64,
    ) -> Result<UserRiskScore> {
        let mut row = self.users.entry(score.user_id.clone()).or_default();
        if row.revision != expected_revision {
            return Err(FraudError::Conflict(format!(
                "user row {} moved: expected revision {}, found {}",
                score.user_id, expected_revision, row.revision
            )));
        }
        row.revision      += 1;
        score.version      = row.revision;
        score.badge_status = badge.status;
        row.score = Some(score.clone());
        row.badge = Some(badge);
        Ok(score)
    }

    fn commit_review(&self, review: AdminReview, badge: Option<UserBadgeStatus>) -> Result<()> {
        let mut row = self.users.entry(review.user_id.clone()).or_default();
        if let Some(badge) = badge {
            row.put_badge(badge);
        }
        row.reviews.push(review);
        Ok(())
    }

    fn commit_badge(&self, badge: UserBadgeStatus) -> Result<()> {
        self.users.entry(badge.user_id.clone()).or_default().put_badge(badge);
        Ok(())
    }

    fn reviews_for_user(&self, user_id: &str) -> Result<Vec<AdminReview>> {
        Ok(self.users.get(user_id).map(|r| r.reviews.clone()).unwrap_or_default())
    }

    fn reviews_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<AdminReview>> {
        let mut out: Vec<AdminReview> = self
            .users
            .iter()
            .flat_map(|r| {
                r.reviews
                    .iter()
                    .filter(|rv| rv.created_at >= from && rv.created_at <= to)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn insert_notification(&self, n: BotFollowerNotification) -> Result<InsertOutcome> {
        let key = format!("{}|{}|{}", n.recipient_user_id, n.bot_follower_id, n.signal_type);
        match self.notification_keys.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(n.id.clone());
                self.notifications.insert(n.id.clone(), n);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    fn notifications_for(&self, recipient_id: &str, unread_only: bool) -> Result<Vec<BotFollowerNotification>> {
        let mut out: Vec<BotFollowerNotification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient_user_id == recipient_id)
            .filter(|n| !unread_only || n.read_at.is_none())
            .map(|n| n.clone())
            .collect();
        out.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn mark_notification_read(&self, id: &str, at: DateTime<Utc>) -> Result<BotFollowerNotification> {
        let mut n = self
            .notifications
            .get_mut(id)
            .ok_or_else(|| FraudError::NotFound(format!("notification {id}")))?;
        if n.read_at.is_none() {
            n.read_at = Some(at);
        }
        Ok(n.clone())
    }

    fn insert_job(&self, job: BatchAnalysisJob) -> Result<()> {
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn update_job(&self, job: BatchAnalysisJob) -> Result<()> {
        let mut row = self
            .jobs
            .get_mut(&job.job_id)
            .ok_or_else(|| FraudError::NotFound(format!("job {}", job.job_id)))?;
        if row.status.is_terminal() {
            return Err(FraudError::Conflict(format!(
                "job {} is already {}",
                job.job_id, row.status
            )));
        }
        *row = job;
        Ok(())
    }

    fn job(&self, job_id: &str) -> Result<Option<BatchAnalysisJob>> {
        Ok(self.jobs.get(job_id).map(|j| j.clone()))
    }

    fn jobs(&self) -> Result<Vec<BatchAnalysisJob>> {
        let mut out: Vec<BatchAnalysisJob> = self.jobs.iter().map(|j| j.clone()).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BadgeStatus, FollowEventKind};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap() }

    fn ev(id: &str, follower: &str, followed: &str, secs: i64) -> FollowerEvent {
        let mut e = FollowerEvent::new(follower, followed, FollowEventKind::Follow, t0() + Duration::seconds(secs));
        e.id = id.into();
        e
    }

    fn score(user: &str) -> UserRiskScore {
        UserRiskScore {
            user_id: user.into(),
            overall_score: 70.0,
            follower_authenticity_score: 70.0,
            engagement_quality_score: 70.0,
            account_age_factor: 0.5,
            badge_status: BadgeStatus::None,
            follower_count: 0,
            bot_follower_count: 0,
            last_calculated_at: t0(),
            version: 0,
        }
    }

    #[test]
    fn keyset_pages_do_not_skip_events_inserted_behind_the_cursor() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let e = ev(&format!("e{i}"), &format!("f{i}"), "alice", i * 10);
            store.append_event(e.clone(), &e.id).unwrap();
        }
        let page1 = store.events_page(t0(), t0() + Duration::hours(1), None, 2).unwrap();
        assert_eq!(page1.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["e0", "e1"]);

        // Late insert before the cursor must not shift the next page.
        let late = ev("late", "fx", "alice", 5);
        store.append_event(late.clone(), &late.id).unwrap();

        let cursor = EventCursor::of(page1.last().unwrap());
        let page2 = store.events_page(t0(), t0() + Duration::hours(1), Some(&cursor), 2).unwrap();
        assert_eq!(page2.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["e2", "e3"]);
    }

    #[test]
    fn duplicate_natural_key_is_ignored() {
        let store = MemoryStore::new();
        let e = ev("a", "bot", "alice", 0);
        assert_eq!(store.append_event(e.clone(), "k").unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.append_event(e, "k").unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.n_events(), 1);
        assert!(store.has_event_key("k").unwrap());
    }

    #[test]
    fn reused_event_id_at_same_instant_is_a_conflict() {
        let store = MemoryStore::new();
        let a = ev("evt-1", "f1", "alice", 0);
        let b = ev("evt-1", "f2", "bob", 0);
        assert_eq!(store.append_event(a, "ka").unwrap(), InsertOutcome::Inserted);
        assert!(matches!(store.append_event(b, "kb"), Err(FraudError::Conflict(_))));

        assert_eq!(store.n_events(), 1);
        assert!(!store.has_event_key("kb").unwrap());
        let inbound = store.events_for_followed("alice").unwrap();
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].follower_user_id, "f1");
        assert!(store.events_for_followed("bob").unwrap().is_empty());
    }

    #[test]
    fn commit_score_rejects_stale_version() {
        let store = MemoryStore::new();
        let badge = UserBadgeStatus::initial("alice", t0());
        let first = store.commit_score(score("alice"), badge.clone(), 0).unwrap();
        assert_eq!(first.version, 1);
        let err = store.commit_score(score("alice"), badge.clone(), 0).unwrap_err();
        assert!(matches!(err, FraudError::Conflict(_)));
        assert_eq!(store.commit_score(score("alice"), badge, 1).unwrap().version, 2);
    }

    #[test]
    fn badge_write_before_first_score_moves_the_revision() {
        let store = MemoryStore::new();
        let mut revoked = UserBadgeStatus::initial("alice", t0());
        revoked.status = BadgeStatus::Revoked;
        store.commit_badge(revoked).unwrap();

        let state = store.user_state("alice").unwrap();
        assert!(state.score.is_none());
        assert_eq!(state.revision, 1);
        let stale = store.commit_score(score("alice"), UserBadgeStatus::initial("alice", t0()), 0);
        assert!(matches!(stale, Err(FraudError::Conflict(_))));
        assert_eq!(store.badge("alice").unwrap().unwrap().status, BadgeStatus::Revoked);
    }

    #[test]
    fn review_with_badge_bumps_score_version() {
        let store = MemoryStore::new();
        store.commit_score(score("alice"), UserBadgeStatus::initial("alice", t0()), 0).unwrap();
        let mut revoked = UserBadgeStatus::initial("alice", t0());
        revoked.status = BadgeStatus::Revoked;
        let review = AdminReview {
            id: "r1".into(),
            user_id: "alice".into(),
            admin_id: "admin".into(),
            action: crate::events::ReviewAction::Banned,
            reason: Some("fake followers".into()),
            notes: String::new(),
            created_at: t0(),
        };
        store.commit_review(review, Some(revoked)).unwrap();
        let s = store.risk_score("alice").unwrap().unwrap();
        assert_eq!(s.badge_status, BadgeStatus::Revoked);
        assert_eq!(s.version, 2);
        assert_eq!(store.reviews_for_user("alice").unwrap().len(), 1);
    }

    #[test]
    fn terminal_job_is_frozen() {
        let store = MemoryStore::new();
        let mut job = BatchAnalysisJob {
            job_id: "j".into(),
            status: crate::events::JobStatus::Completed,
            date_from: t0(),
            date_to: t0(),
            started_at: t0(),
            completed_at: Some(t0()),
            updated_at: t0(),
            processed_followers: 0,
            new_signals_detected: 0,
            users_scored: 0,
            users_failed: 0,
            message: String::new(),
        };
        store.insert_job(job.clone()).unwrap();
        job.users_scored = 9;
        assert!(matches!(store.update_job(job), Err(FraudError::Conflict(_))));
    }
}
