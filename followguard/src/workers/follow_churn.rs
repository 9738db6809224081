// followguard/src/workers/follow_churn.rs
//
// Follow/unfollow churn: the "follow for follow-back" pattern.
//
// Growth bots follow a target, wait for a follow-back, then unfollow within
// hours. Humans unfollow too, but rarely within a day of following and
// rarely across several targets.
//
// A churn cycle is a follow followed by an unfollow of the same target within
// `churn_window_secs`. Confidence grows with the number of cycles and the
// number of distinct targets churned.

use std::collections::{HashMap, HashSet};

use crate::config::DetectionConfig;
use crate::events::{DetectedSignal, FollowEventKind, SignalKind};
use crate::workers::{DetectionInput, DetectionRule};

pub struct FollowChurn {
    window_secs: i64,
    min_cycles:  usize,
}

impl FollowChurn {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self { window_secs: cfg.churn_window_secs, min_cycles: cfg.churn_min_cycles }
    }
}

impl DetectionRule for FollowChurn {
    fn name(&self) -> &'static str { "follow_churn" }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<DetectedSignal> {
        // Open follow per target, waiting for its unfollow.
        let mut open: HashMap<&str, i64> = HashMap::new();
        let mut cycles  = 0usize;
        let mut targets = HashSet::new();

        for e in input.subject_history() {
            let target = e.followed_user_id.as_str();
            let ts     = e.occurred_at.timestamp();
            match e.event_type {
                FollowEventKind::Follow => { open.insert(target, ts); }
                FollowEventKind::Unfollow => {
                    if let Some(followed_at) = open.remove(target) {
                        if ts - followed_at <= self.window_secs {
                            cycles += 1;
                            targets.insert(target);
                        }
                    }
                }
            }
        }

        if cycles < self.min_cycles { return None; }

        let confidence = (0.4 + 0.1 * cycles as f64 + 0.05 * targets.len() as f64).min(0.95);

        Some(DetectedSignal {
            subject_user_id: input.subject_id.to_string(),
            signal_type:     SignalKind::FollowChurn,
            confidence,
            evidence:        vec![format!("churn:{}_cycles_{}_targets", cycles, targets.len())],
            context_user_id: Some(input.context_user_id.to_string()),
        })
    }
}
