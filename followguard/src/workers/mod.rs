// followguard/src/workers/mod.rs
//
// Signal detector: a pluggable set of independent rules.
//
// Every rule sees the same read-only input (one follower account, its own
// outbound history, and the inbound history of the followed account being
// scanned) and either concludes with a signal or stays silent. A rule never
// errors; missing profile data lowers confidence instead of aborting.
//
// Detection is pure: no clock, no store, no randomness. Everything time
// dependent is measured against `DetectionInput::as_of`, and events after
// `as_of` are ignored, so replaying the same history reproduces the same set.

pub mod burst_following;
pub mod follow_churn;
pub mod mass_following;
pub mod suspicious_profile;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::config::DetectionConfig;
use crate::events::{DetectedSignal, FollowerEvent};
use crate::profiles::AccountProfile;

pub struct DetectionInput<'a> {
    /// The account under suspicion (a follower of `context_user_id`).
    pub subject_id:      &'a str,
    pub profile:         Option<&'a AccountProfile>,
    /// Events where the subject is the follower.
    pub subject_events:  &'a [FollowerEvent],
    /// The followed account whose follower stream is being scanned.
    pub context_user_id: &'a str,
    /// Events where `context_user_id` is the followed account.
    pub context_events:  &'a [FollowerEvent],
    pub as_of:           DateTime<Utc>,
}

impl DetectionInput<'_> {
    /// Subject's own events up to `as_of`, oldest first.
    pub fn subject_history(&self) -> Vec<&FollowerEvent> {
        history(self.subject_events, self.as_of)
    }

    /// Context account's inbound events up to `as_of`, oldest first.
    pub fn context_history(&self) -> Vec<&FollowerEvent> {
        history(self.context_events, self.as_of)
    }
}

fn history(events: &[FollowerEvent], as_of: DateTime<Utc>) -> Vec<&FollowerEvent> {
    let mut out: Vec<&FollowerEvent> = events.iter().filter(|e| e.occurred_at <= as_of).collect();
    out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then_with(|| a.id.cmp(&b.id)));
    out
}

pub trait DetectionRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<DetectedSignal>;
}

pub struct SignalDetector {
    rules: Vec<Box<dyn DetectionRule>>,
}

impl SignalDetector {
    /// The built-in rule set.
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self::with_rules(vec![
            Box::new(burst_following::BurstFollowing::new(cfg)),
            Box::new(follow_churn::FollowChurn::new(cfg)),
            Box::new(mass_following::MassFollowing::new(cfg)),
            Box::new(suspicious_profile::SuspiciousProfile::new(cfg)),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn DetectionRule>>) -> Self {
        Self { rules }
    }

    pub fn push_rule(&mut self, rule: Box<dyn DetectionRule>) {
        self.rules.push(rule);
    }

    /// Run every rule. Output is clamped and sorted so it is independent of
    /// rule registration order.
    pub fn detect(&self, input: &DetectionInput<'_>) -> Vec<DetectedSignal> {
        let mut out: Vec<DetectedSignal> = self
            .rules
            .iter()
            .filter_map(|r| {
                let s = r.evaluate(input)?;
                trace!(rule = r.name(), subject = input.subject_id, confidence = s.confidence, "rule fired");
                Some(s)
            })
            .filter(|s| s.confidence.is_finite() && s.confidence > 0.0)
            .map(|mut s| {
                s.confidence = round4(s.confidence.clamp(0.0, 1.0));
                s
            })
            .collect();
        out.sort_by(|a, b| {
            a.signal_type
                .cmp(&b.signal_type)
                .then_with(|| a.fingerprint().cmp(&b.fingerprint()))
        });
        out
    }
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10000.0).round() / 10000.0
}

/// Slide a window of `width_secs` across `points` (sorted by timestamp),
/// one window per starting point, calling `visit(start, distinct_keys)`.
/// Linear in the number of points.
pub(crate) fn sliding_distinct(points: &[(i64, &str)], width_secs: i64, mut visit: impl FnMut(i64, usize)) {
    let mut inside: HashMap<&str, usize> = HashMap::new();
    let mut end = 0;
    for &(start, key) in points {
        while end < points.len() && points[end].0 - start <= width_secs {
            *inside.entry(points[end].1).or_insert(0) += 1;
            end += 1;
        }
        visit(start, inside.len());

        let left = inside.get_mut(key).map(|n| { *n -= 1; *n }).unwrap_or(0);
        if left == 0 {
            inside.remove(key);
        }
    }
}

/// Largest number of distinct keys falling inside any window of
/// `width_secs` that starts at one of the given timestamps. `points` must be
/// sorted by timestamp.
pub(crate) fn max_distinct_in_window(points: &[(i64, &str)], width_secs: i64) -> usize {
    let mut best = 0usize;
    sliding_distinct(points, width_secs, |_, n| best = best.max(n));
    best
}

pub(crate) fn mean_and_cv(vals: &[f64]) -> (f64, f64) {
    if vals.is_empty() {
        return (0.0, 0.0);
    }
    let mean = vals.iter().sum::<f64>() / vals.len() as f64;
    if mean == 0.0 {
        return (0.0, 0.0);
    }
    let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / vals.len() as f64;
    (mean, var.sqrt() / mean)
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::events::{FollowEventKind, FollowerEvent};

    pub fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap() }

    pub fn at(secs: i64) -> DateTime<Utc> { t0() + Duration::seconds(secs) }

    pub fn follow(follower: &str, followed: &str, secs: i64) -> FollowerEvent {
        let mut e = FollowerEvent::new(follower, followed, FollowEventKind::Follow, at(secs));
        e.id = format!("{follower}>{followed}@{secs}");
        e
    }

    pub fn unfollow(follower: &str, followed: &str, secs: i64) -> FollowerEvent {
        let mut e = FollowerEvent::new(follower, followed, FollowEventKind::Unfollow, at(secs));
        e.id = format!("{follower}x{followed}@{secs}");
        e
    }
}
