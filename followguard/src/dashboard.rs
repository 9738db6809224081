// followguard/src/dashboard.rs
//
// Read-only admin views over stored scores, signals and reviews.
//
//   dashboard  paginated user list, ordered by overall score desc then
//              user id asc so page boundaries stay put under concurrent writes
//   trends     aggregate counts over a period or explicit range, with a score
//              histogram and a per-day breakdown
//
// Sparse or empty data always yields zero aggregates, never an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::ScoringConfig;
use crate::error::{FraudError, Result};
use crate::events::{AdminReview, BadgeStatus, BotDetectionSignal, ReviewAction, SignalKind, UserRiskScore};
use crate::engine::fusion::standing_signals;
use crate::state::graph::current_followers;
use crate::state::FraudStore;

pub const MAX_PAGE_SIZE: usize = 200;
const MAX_TREND_DAYS: i64 = 366;

// ── Dashboard ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatusFilter {
    /// No review on record.
    Unreviewed,
    /// Most recent review action.
    Reviewed,
    Banned,
    Cleared,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardFilter {
    pub min_risk_score: Option<f64>,
    pub max_risk_score: Option<f64>,
    /// Users with at least one active follower signal of any listed type.
    pub signal_types:   Vec<SignalKind>,
    pub review_status:  Option<ReviewStatusFilter>,
    /// Bounds on `last_calculated_at`.
    pub date_from:      Option<DateTime<Utc>>,
    pub date_to:        Option<DateTime<Utc>>,
    /// 1-based.
    pub page:           usize,
    pub page_size:      usize,
}

impl Default for DashboardFilter {
    fn default() -> Self {
        Self {
            min_risk_score: None,
            max_risk_score: None,
            signal_types:   Vec::new(),
            review_status:  None,
            date_from:      None,
            date_to:        None,
            page:           1,
            page_size:      20,
        }
    }
}

impl DashboardFilter {
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("min_risk_score", self.min_risk_score), ("max_risk_score", self.max_risk_score)] {
            if let Some(v) = v {
                if !(0.0..=100.0).contains(&v) {
                    return Err(FraudError::Validation(format!("{name} must lie in [0, 100], got {v}")));
                }
            }
        }
        if let (Some(lo), Some(hi)) = (self.min_risk_score, self.max_risk_score) {
            if lo > hi {
                return Err(FraudError::Validation("min_risk_score exceeds max_risk_score".into()));
            }
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(FraudError::Validation("date_from is after date_to".into()));
            }
        }
        if self.page == 0 {
            return Err(FraudError::Validation("page is 1-based".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(FraudError::Validation(format!("page_size must lie in 1..={MAX_PAGE_SIZE}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveSignal {
    pub signal_type:       SignalKind,
    /// Followers currently carrying this signal type.
    pub followers_flagged: u64,
    pub max_confidence:    f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewSummary {
    pub action:     ReviewAction,
    pub admin_id:   String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardEntry {
    pub user_id:                     String,
    pub overall_score:               f64,
    pub follower_authenticity_score: f64,
    pub engagement_quality_score:    f64,
    pub account_age_factor:          f64,
    pub badge_status:                BadgeStatus,
    pub follower_count:              u64,
    pub bot_follower_count:          u64,
    pub active_signals:              Vec<ActiveSignal>,
    pub last_review:                 Option<ReviewSummary>,
    pub last_calculated_at:          DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginatedDashboardResult {
    pub entries:     Vec<DashboardEntry>,
    pub page:        usize,
    pub page_size:   usize,
    pub total_count: usize,
    pub total_pages: usize,
}

// ── Trends ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendPeriod {
    Day,
    Week,
    Month,
    Quarter,
}

impl TrendPeriod {
    fn span(self) -> Duration {
        match self {
            Self::Day     => Duration::days(1),
            Self::Week    => Duration::days(7),
            Self::Month   => Duration::days(30),
            Self::Quarter => Duration::days(90),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendsFilter {
    /// Trailing period ending now; ignored when an explicit range is given.
    pub period:    Option<TrendPeriod>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyTrend {
    pub date:                    NaiveDate,
    pub bot_signals:             u64,
    pub new_suspicious_accounts: u64,
    pub reviewed:                u64,
    pub banned:                  u64,
    pub cleared:                 u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendsResult {
    pub date_from:               DateTime<Utc>,
    pub date_to:                 DateTime<Utc>,
    pub total_bot_signals:       u64,
    pub signal_type_histogram:   BTreeMap<String, u64>,
    pub new_suspicious_accounts: u64,
    pub banned_count:            u64,
    pub reviewed_count:          u64,
    pub cleared_count:           u64,
    pub average_risk_score:      f64,
    pub score_distribution:      Vec<ScoreBucket>,
    pub daily:                   Vec<DailyTrend>,
}

const SCORE_BUCKETS: [(&str, f64); 5] = [
    ("0-20", 20.0),
    ("21-40", 40.0),
    ("41-60", 60.0),
    ("61-80", 80.0),
    ("81-100", 100.0),
];

fn score_bucket(score: f64) -> usize {
    SCORE_BUCKETS
        .iter()
        .position(|(_, upper)| score <= *upper)
        .unwrap_or(SCORE_BUCKETS.len() - 1)
}

// ── Aggregator ────────────────────────────────────────────────────────────────

pub struct DashboardService {
    store: Arc<dyn FraudStore>,
    clock: Arc<dyn Clock>,
    floor: f64,
}

impl DashboardService {
    pub fn new(store: Arc<dyn FraudStore>, clock: Arc<dyn Clock>, scoring: &ScoringConfig) -> Self {
        Self { store, clock, floor: scoring.bot_confidence_floor }
    }

    pub fn dashboard(&self, filter: &DashboardFilter) -> Result<PaginatedDashboardResult> {
        filter.validate()?;

        let mut rows: Vec<(UserRiskScore, Option<AdminReview>)> = Vec::new();
        for score in self.store.all_risk_scores()? {
            if filter.min_risk_score.map(|lo| score.overall_score < lo).unwrap_or(false)
                || filter.max_risk_score.map(|hi| score.overall_score > hi).unwrap_or(false)
                || filter.date_from.map(|f| score.last_calculated_at < f).unwrap_or(false)
                || filter.date_to.map(|t| score.last_calculated_at > t).unwrap_or(false)
            {
                continue;
            }
            let last_review = self.last_review(&score.user_id)?;
            if let Some(wanted) = filter.review_status {
                let matches = match (&last_review, wanted) {
                    (None, ReviewStatusFilter::Unreviewed)    => true,
                    (Some(r), ReviewStatusFilter::Reviewed)   => r.action == ReviewAction::Reviewed,
                    (Some(r), ReviewStatusFilter::Banned)     => r.action == ReviewAction::Banned,
                    (Some(r), ReviewStatusFilter::Cleared)    => r.action == ReviewAction::Cleared,
                    _                                         => false,
                };
                if !matches { continue; }
            }
            rows.push((score, last_review));
        }

        let mut signals_by_user: HashMap<String, Vec<ActiveSignal>> = HashMap::new();
        if !filter.signal_types.is_empty() {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                let active = self.active_signals(&row.0.user_id)?;
                if active.iter().any(|a| filter.signal_types.contains(&a.signal_type)) {
                    signals_by_user.insert(row.0.user_id.clone(), active);
                    kept.push(row);
                }
            }
            rows = kept;
        }

        rows.sort_by(|a, b| {
            b.0.overall_score
                .total_cmp(&a.0.overall_score)
                .then_with(|| a.0.user_id.cmp(&b.0.user_id))
        });

        let total_count = rows.len();
        let total_pages = total_count.div_ceil(filter.page_size);
        let start = (filter.page - 1).saturating_mul(filter.page_size);

        let mut entries = Vec::new();
        for (score, review) in rows.into_iter().skip(start).take(filter.page_size) {
            let active_signals = match signals_by_user.remove(&score.user_id) {
                Some(a) => a,
                None    => self.active_signals(&score.user_id)?,
            };
            entries.push(DashboardEntry {
                user_id:                     score.user_id,
                overall_score:               score.overall_score,
                follower_authenticity_score: score.follower_authenticity_score,
                engagement_quality_score:    score.engagement_quality_score,
                account_age_factor:          score.account_age_factor,
                badge_status:                score.badge_status,
                follower_count:              score.follower_count,
                bot_follower_count:          score.bot_follower_count,
                active_signals,
                last_review:                 review.map(|r| ReviewSummary {
                    action:     r.action,
                    admin_id:   r.admin_id,
                    created_at: r.created_at,
                }),
                last_calculated_at:          score.last_calculated_at,
            });
        }

        Ok(PaginatedDashboardResult {
            entries,
            page: filter.page,
            page_size: filter.page_size,
            total_count,
            total_pages,
        })
    }

    fn last_review(&self, user_id: &str) -> Result<Option<AdminReview>> {
        Ok(self
            .store
            .reviews_for_user(user_id)?
            .into_iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))))
    }

    /// Signal types currently carried by the user's live followers. A newer
    /// signal in the same (type, context) supersedes an older one, as in scoring.
    fn active_signals(&self, user_id: &str) -> Result<Vec<ActiveSignal>> {
        let followers = current_followers(&self.store.events_for_followed(user_id)?, None);
        let mut by_type: BTreeMap<SignalKind, (u64, f64)> = BTreeMap::new();
        for f in &followers {
            let history = self.store.signals_for_subject(f)?;
            for (kind, conf) in standing_signals(&history, self.floor) {
                let slot = by_type.entry(kind).or_insert((0, 0.0));
                slot.0 += 1;
                slot.1 = slot.1.max(conf);
            }
        }
        Ok(by_type
            .into_iter()
            .map(|(signal_type, (followers_flagged, max_confidence))| ActiveSignal {
                signal_type,
                followers_flagged,
                max_confidence,
            })
            .collect())
    }

    pub fn trends(&self, filter: &TrendsFilter) -> Result<TrendsResult> {
        let now = self.clock.now();
        let (from, to) = match (filter.date_from, filter.date_to) {
            (None, None) => (now - filter.period.unwrap_or(TrendPeriod::Week).span(), now),
            (Some(f), None) => (f, now),
            (None, Some(t)) => (t - filter.period.unwrap_or(TrendPeriod::Week).span(), t),
            (Some(f), Some(t)) => (f, t),
        };
        if from > to {
            return Err(FraudError::Validation("date_from is after date_to".into()));
        }
        if to - from > Duration::days(MAX_TREND_DAYS) {
            return Err(FraudError::Validation(format!("trend range exceeds {MAX_TREND_DAYS} days")));
        }

        let mut daily: BTreeMap<NaiveDate, DailyTrend> = BTreeMap::new();
        let mut day = from.date_naive();
        while day <= to.date_naive() {
            daily.insert(day, DailyTrend {
                date: day,
                bot_signals: 0,
                new_suspicious_accounts: 0,
                reviewed: 0,
                banned: 0,
                cleared: 0,
            });
            match day.succ_opt() {
                Some(next) => day = next,
                None       => break,
            }
        }

        // Signals in range, plus first-ever detection per subject.
        let history = self.store.signals_between(None, to)?;
        let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for s in &history {
            let slot = first_seen.entry(s.subject_user_id.as_str()).or_insert(s.detected_at);
            if s.detected_at < *slot {
                *slot = s.detected_at;
            }
        }
        let in_range: Vec<&BotDetectionSignal> =
            history.iter().filter(|s| s.detected_at >= from).collect();

        let mut signal_type_histogram = BTreeMap::new();
        for s in &in_range {
            *signal_type_histogram.entry(s.signal_type.to_string()).or_insert(0u64) += 1;
            if let Some(d) = daily.get_mut(&s.detected_at.date_naive()) {
                d.bot_signals += 1;
            }
        }

        let new_suspicious: BTreeSet<&str> = first_seen
            .iter()
            .filter(|(_, t)| **t >= from && **t <= to)
            .map(|(u, t)| {
                if let Some(d) = daily.get_mut(&t.date_naive()) {
                    d.new_suspicious_accounts += 1;
                }
                *u
            })
            .collect();

        let (mut banned_count, mut reviewed_count, mut cleared_count) = (0u64, 0u64, 0u64);
        for r in self.store.reviews_between(from, to)? {
            let d = daily.get_mut(&r.created_at.date_naive());
            match r.action {
                ReviewAction::Reviewed => { reviewed_count += 1; if let Some(d) = d { d.reviewed += 1; } }
                ReviewAction::Banned   => { banned_count   += 1; if let Some(d) = d { d.banned   += 1; } }
                ReviewAction::Cleared  => { cleared_count  += 1; if let Some(d) = d { d.cleared  += 1; } }
            }
        }

        let scores: Vec<f64> = self
            .store
            .all_risk_scores()?
            .into_iter()
            .filter(|s| s.last_calculated_at >= from && s.last_calculated_at <= to)
            .map(|s| s.overall_score)
            .collect();
        let average_risk_score = if scores.is_empty() {
            0.0
        } else {
            (scores.iter().sum::<f64>() / scores.len() as f64 * 100.0).round() / 100.0
        };
        let mut bins = [0u64; SCORE_BUCKETS.len()];
        for s in &scores {
            bins[score_bucket(*s)] += 1;
        }
        let score_distribution = SCORE_BUCKETS
            .iter()
            .zip(bins)
            .map(|((label, _), count)| ScoreBucket { label: label.to_string(), count })
            .collect();

        Ok(TrendsResult {
            date_from: from,
            date_to: to,
            total_bot_signals: in_range.len() as u64,
            signal_type_histogram,
            new_suspicious_accounts: new_suspicious.len() as u64,
            banned_count,
            reviewed_count,
            cleared_count,
            average_risk_score,
            score_distribution,
            daily: daily.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{DetectedSignal, UserBadgeStatus};
    use crate::state::MemoryStore;
    use crate::workers::testutil::{at, follow};

    fn put_score(store: &MemoryStore, user: &str, overall: f64) {
        let score = UserRiskScore {
            user_id: user.into(),
            overall_score: overall,
            follower_authenticity_score: overall,
            engagement_quality_score: 50.0,
            account_age_factor: 0.5,
            badge_status: BadgeStatus::None,
            follower_count: 0,
            bot_follower_count: 0,
            last_calculated_at: at(0),
            version: 0,
        };
        store.commit_score(score, UserBadgeStatus::initial(user, at(0)), 0).unwrap();
    }

    fn service(store: Arc<MemoryStore>) -> DashboardService {
        DashboardService::new(store, Arc::new(ManualClock::new(at(3600))), &ScoringConfig::default())
    }

    #[test]
    fn score_range_is_ordered_with_id_tiebreak() {
        let store = Arc::new(MemoryStore::new());
        for (u, s) in [("dave", 85.0), ("bob", 92.0), ("carol", 85.0), ("eve", 40.0), ("al", 100.0)] {
            put_score(&store, u, s);
        }
        let filter = DashboardFilter { min_risk_score: Some(80.0), max_risk_score: Some(100.0), ..Default::default() };
        let page = service(store).dashboard(&filter).unwrap();
        let ids: Vec<_> = page.entries.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, ["al", "bob", "carol", "dave"]);
        assert_eq!(page.total_count, 4);
    }

    #[test]
    fn pages_partition_the_ordering() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            put_score(&store, &format!("u{i}"), 50.0);
        }
        let svc = service(store);
        let p1 = svc.dashboard(&DashboardFilter { page_size: 2, ..Default::default() }).unwrap();
        let p3 = svc.dashboard(&DashboardFilter { page: 3, page_size: 2, ..Default::default() }).unwrap();
        assert_eq!(p1.total_pages, 3);
        assert_eq!(p1.entries[0].user_id, "u0");
        assert_eq!(p3.entries.len(), 1);
        assert_eq!(p3.entries[0].user_id, "u4");
    }

    #[test]
    fn malformed_filters_are_rejected() {
        let svc = service(Arc::new(MemoryStore::new()));
        let bad = [
            DashboardFilter { min_risk_score: Some(90.0), max_risk_score: Some(10.0), ..Default::default() },
            DashboardFilter { min_risk_score: Some(-1.0), ..Default::default() },
            DashboardFilter { page: 0, ..Default::default() },
            DashboardFilter { date_from: Some(at(10)), date_to: Some(at(0)), ..Default::default() },
        ];
        for f in bad {
            assert!(matches!(svc.dashboard(&f), Err(FraudError::Validation(_))));
        }
    }

    #[test]
    fn signal_type_filter_uses_live_followers() {
        let store = Arc::new(MemoryStore::new());
        put_score(&store, "alice", 30.0);
        put_score(&store, "bob", 30.0);
        let e = follow("bot", "alice", 0);
        let key = e.id.clone();
        store.append_event(e, &key).unwrap();
        store
            .insert_signal(BotDetectionSignal::from_detected(
                DetectedSignal {
                    subject_user_id: "bot".into(),
                    signal_type:     SignalKind::BurstFollowing,
                    confidence:      0.9,
                    evidence:        vec![],
                    context_user_id: Some("alice".into()),
                },
                at(5),
            ))
            .unwrap();

        let filter = DashboardFilter { signal_types: vec![SignalKind::BurstFollowing], ..Default::default() };
        let page = service(store).dashboard(&filter).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].user_id, "alice");
        assert_eq!(page.entries[0].active_signals[0].followers_flagged, 1);
    }

    fn churn(confidence: f64, detected_secs: i64) -> BotDetectionSignal {
        BotDetectionSignal::from_detected(
            DetectedSignal {
                subject_user_id: "bot".into(),
                signal_type:     SignalKind::FollowChurn,
                confidence,
                evidence:        vec![format!("churn:{confidence}")],
                context_user_id: Some("alice".into()),
            },
            at(detected_secs),
        )
    }

    #[test]
    fn superseded_signals_are_not_active() {
        let store = Arc::new(MemoryStore::new());
        put_score(&store, "alice", 80.0);
        let e = follow("bot", "alice", 0);
        let key = e.id.clone();
        store.append_event(e, &key).unwrap();
        store.insert_signal(churn(0.9, 5)).unwrap();
        store.insert_signal(churn(0.2, 50)).unwrap();

        let page = service(store.clone()).dashboard(&DashboardFilter::default()).unwrap();
        let active = &page.entries[0].active_signals;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].signal_type, SignalKind::FollowChurn);
        assert_eq!(active[0].max_confidence, 0.2);

        // Below the confidence floor the superseding signal clears the type.
        store.insert_signal(churn(0.01, 90)).unwrap();
        let svc = service(store);
        assert!(svc.dashboard(&DashboardFilter::default()).unwrap().entries[0].active_signals.is_empty());
        let filter = DashboardFilter { signal_types: vec![SignalKind::FollowChurn], ..Default::default() };
        assert_eq!(svc.dashboard(&filter).unwrap().total_count, 0);
    }

    #[test]
    fn empty_period_yields_zeros() {
        let t = service(Arc::new(MemoryStore::new()))
            .trends(&TrendsFilter { period: Some(TrendPeriod::Week), ..Default::default() })
            .unwrap();
        assert_eq!(t.total_bot_signals, 0);
        assert!(t.signal_type_histogram.is_empty());
        assert_eq!(t.average_risk_score, 0.0);
        assert!(t.score_distribution.iter().all(|b| b.count == 0));
        assert_eq!(t.score_distribution.len(), 5);
        assert!(t.daily.iter().all(|d| d.bot_signals == 0));
        assert_eq!(t.daily.len(), 8);
    }

    #[test]
    fn score_buckets_split_on_upper_bounds() {
        assert_eq!(score_bucket(0.0), 0);
        assert_eq!(score_bucket(20.0), 0);
        assert_eq!(score_bucket(20.5), 1);
        assert_eq!(score_bucket(80.0), 3);
        assert_eq!(score_bucket(100.0), 4);
    }
}
