// followguard/src/workers/mass_following.rs
//
// Mass following: one account following many targets in a short window.
// Runs over the subject's own outbound history. O(n²) in the number of
// outbound follows inside the window scan, which stays small in practice.
//
// Confidence starts at 0.5 when the window count reaches the minimum and
// rises linearly to 1.0 at twice the minimum. Clock-like spacing between
// follows (low coefficient of variation) adds 0.1.

use crate::config::DetectionConfig;
use crate::events::{DetectedSignal, FollowEventKind, SignalKind};
use crate::workers::{max_distinct_in_window, mean_and_cv, DetectionInput, DetectionRule};

pub struct MassFollowing {
    window_secs: i64,
    min_targets: usize,
}

impl MassFollowing {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self { window_secs: cfg.mass_follow_window_secs, min_targets: cfg.mass_follow_min_targets.max(1) }
    }
}

impl DetectionRule for MassFollowing {
    fn name(&self) -> &'static str { "mass_following" }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<DetectedSignal> {
        let history = input.subject_history();
        let points: Vec<(i64, &str)> = history
            .iter()
            .filter(|e| e.event_type == FollowEventKind::Follow)
            .map(|e| (e.occurred_at.timestamp(), e.followed_user_id.as_str()))
            .collect();
        if points.len() < self.min_targets { return None; }

        let n = max_distinct_in_window(&points, self.window_secs);
        if n < self.min_targets { return None; }

        let excess = (n - self.min_targets) as f64 / self.min_targets as f64;
        let mut confidence = 0.5 + 0.5 * excess.min(1.0);
        let mut evidence = vec![format!("mass_follow:{}_targets_in_{}s", n, self.window_secs)];

        // Interarrival regularity (CV of gaps)
        let gaps: Vec<f64> = points.windows(2).map(|w| (w[1].0 - w[0].0) as f64).filter(|g| *g > 0.0).collect();
        if gaps.len() >= 3 {
            let (mean, cv) = mean_and_cv(&gaps);
            if cv < 0.10 {
                confidence += 0.10;
                evidence.push(format!("scripted_spacing:{:.0}s_cv={:.3}", mean, cv));
            }
        }

        Some(DetectedSignal {
            subject_user_id: input.subject_id.to_string(),
            signal_type:     SignalKind::MassFollowing,
            confidence:      confidence.min(1.0),
            evidence,
            context_user_id: Some(input.context_user_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::testutil::*;

    fn cfg() -> DetectionConfig {
        DetectionConfig { mass_follow_min_targets: 10, ..DetectionConfig::default() }
    }

    fn run(own: &[crate::events::FollowerEvent]) -> Option<DetectedSignal> {
        let input = DetectionInput {
            subject_id: "bot",
            profile: None,
            subject_events: own,
            context_user_id: "alice",
            context_events: &[],
            as_of: at(86_400),
        };
        MassFollowing::new(&cfg()).evaluate(&input)
    }

    #[test]
    fn scripted_mass_follow_gets_spacing_bonus() {
        let own: Vec<_> = (0..20).map(|i| follow("bot", &format!("t{i}"), i * 30)).collect();
        let s = run(&own).unwrap();
        assert_eq!(s.signal_type, SignalKind::MassFollowing);
        assert_eq!(s.confidence, 1.0);
        assert!(s.evidence.iter().any(|e| e.starts_with("scripted_spacing")));
    }

    #[test]
    fn irregular_mass_follow_has_base_confidence() {
        let offsets = [0, 7, 9, 40, 41, 300, 310, 900, 1500, 1510];
        let own: Vec<_> = offsets.iter().enumerate().map(|(i, s)| follow("bot", &format!("t{i}"), *s)).collect();
        let s = run(&own).unwrap();
        assert_eq!(s.confidence, 0.5);
    }

    #[test]
    fn following_the_same_account_repeatedly_is_not_mass_following() {
        let own: Vec<_> = (0..30).map(|i| follow("bot", "alice", i)).collect();
        assert!(run(&own).is_none());
    }
}
