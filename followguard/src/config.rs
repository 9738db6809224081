// followguard/src/config.rs
//
// Business parameters: detection heuristics, scoring weights, badge
// thresholds, alert cutoff and batch pool sizing. Everything is injected;
// nothing downstream reads a numeric policy constant directly.
//
// Loaded from a JSON file. Missing sections and fields fall back to the
// defaults below.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FraudError, Result};

// ── Detection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Width of the follow-burst window.
    pub burst_window_secs: i64,
    /// Distinct followers inside one window needed to call it a burst.
    pub burst_min_followers: usize,
    pub burst_confidence: f64,
    /// A follow undone within this many seconds counts as one churn cycle.
    pub churn_window_secs: i64,
    pub churn_min_cycles: usize,
    pub mass_follow_window_secs: i64,
    pub mass_follow_min_targets: usize,
    /// Accounts younger than this are "new" for the profile rule.
    pub new_account_days: i64,
    pub completeness_floor: f64,
    /// Multiplier applied to a rule's confidence when profile data is missing.
    pub unknown_profile_penalty: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            burst_window_secs:       60,
            burst_min_followers:     5,
            burst_confidence:        0.9,
            churn_window_secs:       24 * 3600,
            churn_min_cycles:        2,
            mass_follow_window_secs: 3600,
            mass_follow_min_targets: 50,
            new_account_days:        7,
            completeness_floor:      0.3,
            unknown_profile_penalty: 0.5,
        }
    }
}

// ── Scoring ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoringConfig {
    pub authenticity_weight: f64,
    pub engagement_weight:   f64,
    pub account_age_weight:  f64,
    /// Follower signals below this confidence are ignored by the scorer.
    pub bot_confidence_floor: f64,
    /// A follower whose strongest signal reaches this counts as a bot follower.
    pub bot_follower_threshold: f64,
    /// Account age at which `account_age_factor` saturates at 1.0.
    pub full_trust_age_days: f64,
    /// Interactions per post that earn a full engagement score.
    pub target_interactions_per_post: f64,
    /// Engagement score used when no engagement metrics are available.
    pub neutral_engagement_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            authenticity_weight:          0.70,
            engagement_weight:            0.20,
            account_age_weight:           0.10,
            bot_confidence_floor:         0.05,
            bot_follower_threshold:       0.50,
            full_trust_age_days:          365.0,
            target_interactions_per_post: 10.0,
            neutral_engagement_score:     50.0,
        }
    }
}

// ── Badge ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BadgeConfig {
    pub eligible_threshold:   f64,
    pub revoke_threshold:     f64,
    pub min_account_age_days: i64,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self { eligible_threshold: 80.0, revoke_threshold: 50.0, min_account_age_days: 30 }
    }
}

// ── Alerts ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Only signals strictly above this confidence notify followed users.
    pub confidence_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self { Self { confidence_threshold: 0.7 } }
}

// ── Ingestion ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Redeliveries within the same bucket collapse onto one event.
    pub dedup_bucket_secs: i64,
    /// Events stamped further than this into the future are rejected.
    pub max_clock_skew_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self { Self { dedup_bucket_secs: 1, max_clock_skew_secs: 300 } }
}

// ── Batch ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub worker_pool_size:        usize,
    pub page_size:               usize,
    pub max_user_retries:        u32,
    pub retry_backoff_ms:        u64,
    /// Progress counters are flushed to the job row every N users.
    pub progress_flush_every:    u64,
    pub stall_timeout_secs:      i64,
    /// Range start for the very first job, when no completed job exists.
    pub default_lookback_hours:  i64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            worker_pool_size:       8,
            page_size:              500,
            max_user_retries:       3,
            retry_backoff_ms:       50,
            progress_flush_every:   25,
            stall_timeout_secs:     900,
            default_lookback_hours: 24,
        }
    }
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FraudConfig {
    pub detection: DetectionConfig,
    pub scoring:   ScoringConfig,
    pub badge:     BadgeConfig,
    pub alert:     AlertConfig,
    pub ingest:    IngestConfig,
    pub batch:     BatchConfig,
}

impl FraudConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        let weights = [s.authenticity_weight, s.engagement_weight, s.account_age_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(FraudError::Validation("scoring weights must be non-negative".into()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(FraudError::Validation("scoring weights must not all be zero".into()));
        }
        if s.full_trust_age_days <= 0.0 || s.target_interactions_per_post <= 0.0 {
            return Err(FraudError::Validation(
                "full_trust_age_days and target_interactions_per_post must be positive".into(),
            ));
        }
        check_score("neutral_engagement_score", s.neutral_engagement_score)?;
        check_score("eligible_threshold", self.badge.eligible_threshold)?;
        check_score("revoke_threshold", self.badge.revoke_threshold)?;
        if self.badge.revoke_threshold > self.badge.eligible_threshold {
            return Err(FraudError::Validation(
                "revoke_threshold must not exceed eligible_threshold".into(),
            ));
        }
        check_confidence("burst_confidence", self.detection.burst_confidence)?;
        check_confidence("completeness_floor", self.detection.completeness_floor)?;
        check_confidence("unknown_profile_penalty", self.detection.unknown_profile_penalty)?;
        check_confidence("bot_confidence_floor", s.bot_confidence_floor)?;
        check_confidence("bot_follower_threshold", s.bot_follower_threshold)?;
        check_confidence("alert.confidence_threshold", self.alert.confidence_threshold)?;
        if self.detection.burst_window_secs <= 0 || self.detection.burst_min_followers < 2 {
            return Err(FraudError::Validation(
                "burst rule needs a positive window and at least 2 followers".into(),
            ));
        }
        if self.batch.worker_pool_size == 0 || self.batch.page_size == 0 {
            return Err(FraudError::Validation("batch pool and page size must be > 0".into()));
        }
        if self.ingest.dedup_bucket_secs <= 0 {
            return Err(FraudError::Validation("dedup_bucket_secs must be > 0".into()));
        }
        // Durations below feed chrono arithmetic, which panics out of range.
        check_span("batch.stall_timeout_secs", self.batch.stall_timeout_secs, 1, MAX_SPAN_SECS)?;
        check_span("batch.default_lookback_hours", self.batch.default_lookback_hours, 1, MAX_SPAN_SECS / 3600)?;
        check_span("ingest.max_clock_skew_secs", self.ingest.max_clock_skew_secs, 0, MAX_SPAN_SECS)?;
        Ok(())
    }
}

/// Ten years.
const MAX_SPAN_SECS: i64 = 10 * 366 * 86_400;

fn check_span(name: &str, v: i64, min: i64, max: i64) -> Result<()> {
    if !(min..=max).contains(&v) {
        return Err(FraudError::Validation(format!("{name} must lie in [{min}, {max}], got {v}")));
    }
    Ok(())
}

fn check_score(name: &str, v: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&v) {
        return Err(FraudError::Validation(format!("{name} must lie in [0, 100], got {v}")));
    }
    Ok(())
}

fn check_confidence(name: &str, v: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&v) {
        return Err(FraudError::Validation(format!("{name} must lie in [0, 1], got {v}")));
    }
    Ok(())
}
