// followguard/src/workers/suspicious_profile.rs
//
// Throwaway-account profile check: freshly created AND mostly empty.
//
// Both facts known        → conclude, confidence 0.4–0.7 by emptiness
// One fact known, bad     → conclude weakly, scaled by unknown_profile_penalty
// Nothing known / healthy → no signal

use crate::config::DetectionConfig;
use crate::events::{DetectedSignal, SignalKind};
use crate::workers::{DetectionInput, DetectionRule};

const PARTIAL_BASE: f64 = 0.55;

pub struct SuspiciousProfile {
    new_account_days: i64,
    completeness_floor: f64,
    unknown_penalty: f64,
}

impl SuspiciousProfile {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self {
            new_account_days: cfg.new_account_days,
            completeness_floor: cfg.completeness_floor,
            unknown_penalty: cfg.unknown_profile_penalty,
        }
    }
}

impl DetectionRule for SuspiciousProfile {
    fn name(&self) -> &'static str { "suspicious_profile" }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<DetectedSignal> {
        let profile = input.profile?;
        let age = profile.age_days(input.as_of);
        let completeness = profile.profile_completeness.map(|c| c.clamp(0.0, 1.0));

        let young = age.map(|d| d < self.new_account_days);
        let empty = completeness.map(|c| c < self.completeness_floor);

        let (confidence, mut evidence) = match (young, empty) {
            (Some(true), Some(true)) => {
                let c = completeness.unwrap_or(0.0);
                let emptiness = if self.completeness_floor > 0.0 { 1.0 - c / self.completeness_floor } else { 1.0 };
                (0.4 + 0.3 * emptiness, vec!["new_account".to_string(), "sparse_profile".to_string()])
            }
            (Some(true), None) => (PARTIAL_BASE * self.unknown_penalty, vec!["new_account".to_string()]),
            (None, Some(true)) => (PARTIAL_BASE * self.unknown_penalty, vec!["sparse_profile".to_string()]),
            _ => return None,
        };

        if let Some(t) = profile.created_at { evidence.push(format!("created_at:{}", t.to_rfc3339())); }
        if let Some(c) = completeness { evidence.push(format!("completeness:{:.2}", c)); }

        Some(DetectedSignal {
            subject_user_id: input.subject_id.to_string(),
            signal_type:     SignalKind::SuspiciousProfile,
            confidence,
            evidence,
            context_user_id: Some(input.context_user_id.to_string()),
        })
    }
}
