// followguard/src/events.rs
//
// Shared record types flowing through Followguard.
//
//   FollowerEvent            : append-only follow/unfollow ledger entry
//   BotDetectionSignal       : immutable heuristic evidence against one account
//   UserRiskScore            : one current row per user, upserted by the scorer
//   UserBadgeStatus          : badge lifecycle row, one per user
//   AdminReview              : append-only moderation audit trail
//   BotFollowerNotification  : alert record; only `read_at` may change
//   BatchAnalysisJob         : trackable batch run with progress counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ── Follower events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FollowEventKind {
    Follow,
    Unfollow,
}

impl std::fmt::Display for FollowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follow => write!(f, "follow"),
            Self::Unfollow => write!(f, "unfollow"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowerEvent {
    /// Assigned on ingestion when the collector leaves it empty.
    #[serde(default)]
    pub id: String,
    pub followed_user_id: String,
    pub follower_user_id: String,
    pub event_type: FollowEventKind,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub source_metadata: HashMap<String, serde_json::Value>,
}

impl FollowerEvent {
    pub fn new(
        follower_user_id: impl Into<String>,
        followed_user_id: impl Into<String>,
        event_type: FollowEventKind,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: String::new(),
            followed_user_id: followed_user_id.into(),
            follower_user_id: follower_user_id.into(),
            event_type,
            occurred_at,
            source_metadata: HashMap::new(),
        }
    }

    /// Natural key used to drop redelivered events: the follow edge, the
    /// event type and the occurrence time truncated to `bucket_secs`.
    pub fn natural_key(&self, bucket_secs: i64) -> String {
        let bucket = self.occurred_at.timestamp().div_euclid(bucket_secs.max(1));
        let mut h = Sha256::new();
        h.update(self.follower_user_id.as_bytes());
        h.update(b"|");
        h.update(self.followed_user_id.as_bytes());
        h.update(b"|");
        h.update(self.event_type.to_string().as_bytes());
        h.update(b"|");
        h.update(bucket.to_le_bytes());
        hex::encode(&h.finalize()[..16])
    }
}

// ── Detection signals ─────────────────────────────────────────────────────────

/// Signal type. Known heuristics have their own variant; anything else a
/// plugged-in rule reports round-trips through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalKind {
    BurstFollowing,
    FollowChurn,
    MassFollowing,
    SuspiciousProfile,
    Custom(String),
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::BurstFollowing => "burst_following",
            Self::FollowChurn => "follow_churn",
            Self::MassFollowing => "mass_following",
            Self::SuspiciousProfile => "suspicious_profile",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl From<String> for SignalKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "burst_following" => Self::BurstFollowing,
            "follow_churn" => Self::FollowChurn,
            "mass_following" => Self::MassFollowing,
            "suspicious_profile" => Self::SuspiciousProfile,
            _ => Self::Custom(s),
        }
    }
}

impl From<SignalKind> for String {
    fn from(k: SignalKind) -> Self {
        k.as_str().to_string()
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule emits. Carries no id or timestamp so detection stays a pure
/// function of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSignal {
    pub subject_user_id: String,
    pub signal_type: SignalKind,
    pub confidence: f64,
    pub evidence: Vec<String>,
    /// The followed account whose follower stream produced this signal.
    pub context_user_id: Option<String>,
}

impl DetectedSignal {
    /// Deterministic identity of a detection. Re-detecting the same evidence
    /// yields the same fingerprint, which makes signal emission idempotent.
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.subject_user_id.as_bytes());
        h.update(b"|");
        h.update(self.signal_type.as_str().as_bytes());
        h.update(b"|");
        h.update(self.context_user_id.as_deref().unwrap_or("").as_bytes());
        for e in &self.evidence {
            h.update(b"|");
            h.update(e.as_bytes());
        }
        h.update(self.confidence.to_bits().to_le_bytes());
        hex::encode(&h.finalize()[..16])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotDetectionSignal {
    pub id: String,
    pub subject_user_id: String,
    pub signal_type: SignalKind,
    pub confidence_score: f64,
    pub detected_at: DateTime<Utc>,
    pub evidence: Vec<String>,
    pub context_user_id: Option<String>,
    pub fingerprint: String,
}

impl BotDetectionSignal {
    pub fn from_detected(detected: DetectedSignal, detected_at: DateTime<Utc>) -> Self {
        let fingerprint = detected.fingerprint();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_user_id: detected.subject_user_id,
            signal_type: detected.signal_type,
            confidence_score: detected.confidence.clamp(0.0, 1.0),
            detected_at,
            evidence: detected.evidence,
            context_user_id: detected.context_user_id,
            fingerprint,
        }
    }
}

// ── Risk score + badge ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BadgeStatus {
    #[default]
    None,
    Eligible,
    Active,
    Revoked,
}

impl std::fmt::Display for BadgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Eligible => write!(f, "eligible"),
            Self::Active => write!(f, "active"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBadgeStatus {
    pub user_id: String,
    pub status: BadgeStatus,
    pub eligible_since: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl UserBadgeStatus {
    pub fn initial(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            status: BadgeStatus::None,
            eligible_since: None,
            activated_at: None,
            revoked_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRiskScore {
    pub user_id: String,
    pub overall_score: f64,
    pub follower_authenticity_score: f64,
    pub engagement_quality_score: f64,
    pub account_age_factor: f64,
    pub badge_status: BadgeStatus,
    pub follower_count: u64,
    pub bot_follower_count: u64,
    pub last_calculated_at: DateTime<Utc>,
    /// Bumped on every committed write; used for compare-and-set.
    pub version: u64,
}

// ── Admin reviews ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Reviewed,
    Banned,
    Cleared,
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reviewed => write!(f, "reviewed"),
            Self::Banned => write!(f, "banned"),
            Self::Cleared => write!(f, "cleared"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminReview {
    pub id: String,
    pub user_id: String,
    pub admin_id: String,
    pub action: ReviewAction,
    pub reason: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

// ── Notifications ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotFollowerNotification {
    pub id: String,
    pub recipient_user_id: String,
    pub bot_follower_id: String,
    pub signal_type: SignalKind,
    pub confidence_score: f64,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

// ── Batch jobs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Started)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAnalysisJob {
    pub job_id: String,
    pub status: JobStatus,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Heartbeat. A `started` job whose heartbeat goes stale is reaped.
    pub updated_at: DateTime<Utc>,
    pub processed_followers: u64,
    pub new_signals_detected: u64,
    pub users_scored: u64,
    pub users_failed: u64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signal_kind_round_trips_custom_names() {
        let k: SignalKind = serde_json::from_str("\"burst_following\"").unwrap();
        assert_eq!(k, SignalKind::BurstFollowing);
        let k: SignalKind = serde_json::from_str("\"shared_avatar\"").unwrap();
        assert_eq!(k, SignalKind::Custom("shared_avatar".into()));
        assert_eq!(serde_json::to_string(&k).unwrap(), "\"shared_avatar\"");
    }

    #[test]
    fn natural_key_buckets_nearby_redeliveries() {
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();
        let a = FollowerEvent::new("bot", "alice", FollowEventKind::Follow, t);
        let mut b = a.clone();
        b.occurred_at = t + chrono::Duration::milliseconds(300);
        let c = FollowerEvent::new("bot", "alice", FollowEventKind::Unfollow, t);
        assert_eq!(a.natural_key(1), b.natural_key(1));
        assert_ne!(a.natural_key(1), c.natural_key(1));
    }

    #[test]
    fn fingerprint_tracks_confidence() {
        let s = DetectedSignal {
            subject_user_id: "bot".into(),
            signal_type: SignalKind::BurstFollowing,
            confidence: 0.9,
            evidence: vec!["burst:10_followers_in_60s".into()],
            context_user_id: Some("alice".into()),
        };
        let mut t = s.clone();
        assert_eq!(s.fingerprint(), t.fingerprint());
        t.confidence = 0.8;
        assert_ne!(s.fingerprint(), t.fingerprint());
    }
}
