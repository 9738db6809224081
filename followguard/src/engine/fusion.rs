// followguard/src/engine/fusion.rs
//
// Risk scoring: fuse follower signals, engagement and account age into one
// 0–100 score per user.
//
// Components:
//   follower_authenticity  100 × (1 − mean follower suspicion)
//   engagement_quality     interactions per post against a target, or neutral
//   account_age_factor     age / full_trust_age, saturating at 1.0
//
// overall = weighted mean of the three (age scaled to 0–100), weights from
// ScoringConfig normalised to sum 1.0.
//
// A follower's suspicion folds its signals: the newest signal per
// (type, context) stands, the strongest context per type wins, and types
// combine as a noisy-OR. Signals below `bot_confidence_floor` are ignored.
// A stronger signal can therefore only raise suspicion and only lower the
// score.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::ScoringConfig;
use crate::engine::badge::BadgeMachine;
use crate::error::{FraudError, Result};
use crate::events::{BotDetectionSignal, SignalKind, UserBadgeStatus, UserRiskScore};
use crate::profiles::{AccountProfile, ProfileReader};
use crate::state::graph::current_followers;
use crate::state::{FraudStore, UserLocks};

const MAX_CAS_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreComponents {
    pub overall:            f64,
    pub authenticity:       f64,
    pub engagement:         f64,
    pub account_age_factor: f64,
    pub follower_count:     u64,
    pub bot_follower_count: u64,
}

/// Per-type confidence still standing for one follower: the newest signal per
/// (type, context), the strongest context per type, floor applied.
pub fn standing_signals(signals: &[BotDetectionSignal], floor: f64) -> BTreeMap<SignalKind, f64> {
    let mut latest: BTreeMap<(&SignalKind, Option<&str>), &BotDetectionSignal> = BTreeMap::new();
    for s in signals {
        let key = (&s.signal_type, s.context_user_id.as_deref());
        let newer = latest
            .get(&key)
            .map(|cur| (s.detected_at, s.confidence_score) > (cur.detected_at, cur.confidence_score))
            .unwrap_or(true);
        if newer {
            latest.insert(key, s);
        }
    }

    let mut per_type: BTreeMap<SignalKind, f64> = BTreeMap::new();
    for ((kind, _), s) in latest {
        if s.confidence_score < floor { continue; }
        let slot = per_type.entry(kind.clone()).or_insert(0.0);
        *slot = slot.max(s.confidence_score.clamp(0.0, 1.0));
    }
    per_type
}

/// Suspicion in [0, 1] for one follower, from every signal about it.
pub fn follower_suspicion(signals: &[BotDetectionSignal], floor: f64) -> f64 {
    let clean = standing_signals(signals, floor).values().fold(1.0, |acc, c| acc * (1.0 - c));
    (1.0 - clean).clamp(0.0, 1.0)
}

/// Pure scoring. `suspicions` holds one entry per current follower.
pub fn compute(
    cfg:        &ScoringConfig,
    profile:    Option<&AccountProfile>,
    suspicions: &[f64],
    now:        DateTime<Utc>,
) -> ScoreComponents {
    let n = suspicions.len();
    let authenticity = if n == 0 {
        100.0
    } else {
        100.0 * (1.0 - suspicions.iter().sum::<f64>() / n as f64)
    };
    let bot_follower_count = suspicions.iter().filter(|s| **s >= cfg.bot_follower_threshold).count();

    let engagement = profile
        .and_then(|p| p.engagement.as_ref())
        .filter(|m| m.posts > 0)
        .map(|m| {
            let per_post = m.interactions() as f64 / m.posts as f64;
            (100.0 * per_post / cfg.target_interactions_per_post).min(100.0)
        })
        .unwrap_or(cfg.neutral_engagement_score);

    let account_age_factor = profile
        .and_then(|p| p.age_days(now))
        .map(|d| (d as f64 / cfg.full_trust_age_days).clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let w_total = cfg.authenticity_weight + cfg.engagement_weight + cfg.account_age_weight;
    let overall = (cfg.authenticity_weight * authenticity
        + cfg.engagement_weight * engagement
        + cfg.account_age_weight * account_age_factor * 100.0)
        / w_total;

    ScoreComponents {
        overall:            round2(overall.clamp(0.0, 100.0)),
        authenticity:       round2(authenticity.clamp(0.0, 100.0)),
        engagement:         round2(engagement.clamp(0.0, 100.0)),
        account_age_factor: round2(account_age_factor),
        follower_count:     n as u64,
        bot_follower_count: bot_follower_count as u64,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct RiskScorer {
    store:    Arc<dyn FraudStore>,
    profiles: Arc<dyn ProfileReader>,
    locks:    Arc<UserLocks>,
    clock:    Arc<dyn Clock>,
    cfg:      ScoringConfig,
    badges:   BadgeMachine,
}

impl RiskScorer {
    pub fn new(
        store:    Arc<dyn FraudStore>,
        profiles: Arc<dyn ProfileReader>,
        locks:    Arc<UserLocks>,
        clock:    Arc<dyn Clock>,
        cfg:      ScoringConfig,
        badges:   BadgeMachine,
    ) -> Self {
        Self { store, profiles, locks, clock, cfg, badges }
    }

    /// Components for `user_id` from current store contents, without writing.
    pub fn evaluate(&self, user_id: &str, now: DateTime<Utc>) -> Result<ScoreComponents> {
        let inbound   = self.store.events_for_followed(user_id)?;
        let followers = current_followers(&inbound, None);
        let mut suspicions = Vec::with_capacity(followers.len());
        for f in &followers {
            let signals = self.store.signals_for_subject(f)?;
            suspicions.push(follower_suspicion(&signals, self.cfg.bot_confidence_floor));
        }
        let profile = self.profiles.profile(user_id);
        Ok(compute(&self.cfg, profile.as_ref(), &suspicions, now))
    }

    /// Recompute and persist the score (and any automatic badge transition).
    /// Serialized per user; a lost compare-and-set is retried against fresh
    /// state so a concurrent admin write is never overwritten.
    pub fn recompute(&self, user_id: &str) -> Result<UserRiskScore> {
        if user_id.trim().is_empty() {
            return Err(FraudError::Validation("user_id must not be empty".into()));
        }
        self.locks.with_user(user_id, || {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.recompute_once(user_id) {
                    Err(FraudError::Conflict(msg)) if attempt < MAX_CAS_ATTEMPTS => {
                        debug!(user_id, attempt, error = %msg, "Score commit raced, retrying");
                    }
                    Err(e) => {
                        warn!(user_id, stage = "score", attempt, error = %e, "Score recompute failed");
                        return Err(e);
                    }
                    Ok(s) => return Ok(s),
                }
            }
        })
    }

    fn recompute_once(&self, user_id: &str) -> Result<UserRiskScore> {
        let now        = self.clock.now();
        let state      = self.store.user_state(user_id)?;
        let components = self.evaluate(user_id, now)?;
        let badge_now  = state.badge.unwrap_or_else(|| UserBadgeStatus::initial(user_id, now));
        let age_days   = self.profiles.profile(user_id).and_then(|p| p.age_days(now));
        let badge_next = self.badges.on_score(&badge_now, components.overall, age_days, now);

        let score = UserRiskScore {
            user_id:                     user_id.to_string(),
            overall_score:               components.overall,
            follower_authenticity_score: components.authenticity,
            engagement_quality_score:    components.engagement,
            account_age_factor:          components.account_age_factor,
            badge_status:                badge_next.status,
            follower_count:              components.follower_count,
            bot_follower_count:          components.bot_follower_count,
            last_calculated_at:          now,
            version:                     0,
        };
        let committed = self.store.commit_score(score, badge_next, state.revision)?;
        debug!(
            user_id,
            overall   = committed.overall_score,
            followers = committed.follower_count,
            bots      = committed.bot_follower_count,
            badge     = %committed.badge_status,
            "Risk score committed"
        );
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::BadgeConfig;
    use crate::events::{AdminReview, BadgeStatus, DetectedSignal, ReviewAction};
    use crate::profiles::{EngagementMetrics, ProfileDirectory};
    use crate::state::testing::FaultyStore;
    use crate::state::MemoryStore;
    use crate::workers::testutil::{at, follow, unfollow};
    use chrono::Duration;

    fn signal(subject: &str, kind: SignalKind, conf: f64, context: &str, secs: i64) -> BotDetectionSignal {
        BotDetectionSignal::from_detected(
            DetectedSignal {
                subject_user_id: subject.into(),
                signal_type:     kind,
                confidence:      conf,
                evidence:        vec![format!("t{secs}")],
                context_user_id: Some(context.into()),
            },
            at(secs),
        )
    }

    fn profile(age_days: i64, posts: u64, likes: u64) -> AccountProfile {
        AccountProfile {
            user_id:              "alice".into(),
            created_at:           Some(at(0) - Duration::days(age_days)),
            profile_completeness: Some(1.0),
            engagement:           Some(EngagementMetrics { posts, likes_received: likes, comments_received: 0 }),
        }
    }

    #[test]
    fn suspicion_keeps_newest_per_type_and_context() {
        let s = vec![
            signal("b", SignalKind::FollowChurn, 0.9, "alice", 0),
            signal("b", SignalKind::FollowChurn, 0.6, "alice", 10),
        ];
        assert!((follower_suspicion(&s, 0.05) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn suspicion_combines_types_as_noisy_or() {
        let s = vec![
            signal("b", SignalKind::BurstFollowing, 0.5, "alice", 0),
            signal("b", SignalKind::MassFollowing, 0.5, "alice", 0),
            signal("b", SignalKind::SuspiciousProfile, 0.01, "alice", 0),
        ];
        assert!((follower_suspicion(&s, 0.05) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn scores_stay_in_bounds() {
        let cfg = ScoringConfig::default();
        let p = profile(10_000, 1, 10_000);
        for susp in [vec![], vec![0.0; 3], vec![1.0; 7], vec![0.3, 0.9, 0.0]] {
            let c = compute(&cfg, Some(&p), &susp, at(0));
            assert!((0.0..=100.0).contains(&c.overall));
            assert!((0.0..=100.0).contains(&c.authenticity));
            assert!((0.0..=100.0).contains(&c.engagement));
            assert!((0.0..=1.0).contains(&c.account_age_factor));
        }
        let c = compute(&cfg, None, &[], at(0));
        assert_eq!(c.authenticity, 100.0);
        assert_eq!(c.engagement, cfg.neutral_engagement_score);
        assert_eq!(c.account_age_factor, 0.0);
    }

    #[test]
    fn stronger_signal_never_raises_score() {
        let cfg = ScoringConfig::default();
        let p = profile(200, 10, 50);
        let base = vec![signal("b", SignalKind::BurstFollowing, 0.4, "alice", 0)];
        let mut stronger = base.clone();
        stronger.push(signal("b", SignalKind::MassFollowing, 0.8, "x", 5));

        let before = compute(&cfg, Some(&p), &[follower_suspicion(&base, 0.05), 0.0], at(0));
        let after  = compute(&cfg, Some(&p), &[follower_suspicion(&stronger, 0.05), 0.0], at(0));
        assert!(after.overall <= before.overall);
    }

    #[test]
    fn ten_burst_followers_score_low() {
        let cfg = ScoringConfig::default();
        let c = compute(&cfg, Some(&profile(400, 10, 100)), &[0.9; 10], at(0));
        assert_eq!(c.bot_follower_count, 10);
        assert!(c.overall < 40.0, "overall = {}", c.overall);
    }

    fn scorer(store: Arc<dyn FraudStore>, profiles: Arc<ProfileDirectory>) -> RiskScorer {
        RiskScorer::new(
            store,
            profiles,
            Arc::new(UserLocks::new()),
            Arc::new(ManualClock::new(at(3600))),
            ScoringConfig::default(),
            BadgeMachine::new(BadgeConfig::default()),
        )
    }

    #[test]
    fn recompute_is_idempotent_and_counts_live_followers_only() {
        let store = Arc::new(MemoryStore::new());
        for e in [follow("b1", "alice", 0), follow("b2", "alice", 1), unfollow("b2", "alice", 2), follow("c", "alice", 3)] {
            let key = e.id.clone();
            store.append_event(e, &key).unwrap();
        }
        store.insert_signal(signal("b1", SignalKind::BurstFollowing, 0.9, "alice", 5)).unwrap();
        store.insert_signal(signal("b2", SignalKind::BurstFollowing, 0.9, "alice", 5)).unwrap();

        let s = scorer(store.clone(), Arc::new(ProfileDirectory::new()));
        let first  = s.recompute("alice").unwrap();
        let second = s.recompute("alice").unwrap();
        assert_eq!(first.follower_count, 2);
        assert_eq!(first.bot_follower_count, 1);
        assert_eq!(first.overall_score, second.overall_score);
        assert_eq!(first.follower_authenticity_score, second.follower_authenticity_score);
        assert_eq!(second.version, first.version + 1);
    }

    #[test]
    fn recompute_respects_revoked_badge() {
        let store = Arc::new(MemoryStore::new());
        let mut revoked = UserBadgeStatus::initial("alice", at(0));
        revoked.status = BadgeStatus::Revoked;
        store.commit_badge(revoked).unwrap();

        let profiles = Arc::new(ProfileDirectory::new());
        profiles.upsert(profile(900, 10, 200));
        let s = scorer(store, profiles).recompute("alice").unwrap();
        assert!(s.overall_score >= 80.0);
        assert_eq!(s.badge_status, BadgeStatus::Revoked);
    }

    #[test]
    fn admin_ban_landing_mid_recompute_wins() {
        let store = Arc::new(FaultyStore::new());
        let e = follow("fan", "alice", 0);
        let key = e.id.clone();
        store.inner.append_event(e, &key).unwrap();
        let profiles = Arc::new(ProfileDirectory::new());
        profiles.upsert(profile(900, 10, 200));

        store.before_score_commit(|inner| {
            let mut revoked = UserBadgeStatus::initial("alice", at(10));
            revoked.status     = BadgeStatus::Revoked;
            revoked.revoked_at = Some(at(10));
            let ban = AdminReview {
                id:         "r1".into(),
                user_id:    "alice".into(),
                admin_id:   "mod-7".into(),
                action:     ReviewAction::Banned,
                reason:     Some("fake followers".into()),
                notes:      String::new(),
                created_at: at(10),
            };
            inner.commit_review(ban, Some(revoked)).unwrap();
        });

        let s = scorer(store.clone(), profiles).recompute("alice").unwrap();
        assert!(s.overall_score >= 80.0, "overall = {}", s.overall_score);
        assert_eq!(s.badge_status, BadgeStatus::Revoked);
        assert_eq!(s.version, 2);
        assert_eq!(store.badge("alice").unwrap().unwrap().status, BadgeStatus::Revoked);
    }
}
