// followguard/src/workers/burst_following.rs
//
// Synchronized follow bursts against one account.
//
// Purchased followers are delivered by a scheduler: many distinct accounts
// follow the same target within seconds of each other. Individually each
// follow looks organic; the cluster does not.
//
// A window of `burst_window_secs` slides over the context account's follows;
// among the windows that contain one of the subject's follows we take the one
// with the most distinct followers. At least `burst_min_followers` → every
// member of the burst gets a signal at `burst_confidence`.

use crate::config::DetectionConfig;
use crate::events::{DetectedSignal, FollowEventKind, SignalKind};
use crate::workers::{sliding_distinct, DetectionInput, DetectionRule};

pub struct BurstFollowing {
    window_secs:   i64,
    min_followers: usize,
    confidence:    f64,
}

impl BurstFollowing {
    pub fn new(cfg: &DetectionConfig) -> Self {
        Self {
            window_secs:   cfg.burst_window_secs,
            min_followers: cfg.burst_min_followers,
            confidence:    cfg.burst_confidence,
        }
    }
}

impl DetectionRule for BurstFollowing {
    fn name(&self) -> &'static str { "burst_following" }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Option<DetectedSignal> {
        let follows: Vec<(i64, &str)> = input
            .context_history()
            .into_iter()
            .filter(|e| e.event_type == FollowEventKind::Follow)
            .map(|e| (e.occurred_at.timestamp(), e.follower_user_id.as_str()))
            .collect();

        let subject_times: Vec<i64> = follows
            .iter()
            .filter(|(_, f)| *f == input.subject_id)
            .map(|(t, _)| *t)
            .collect();
        if subject_times.is_empty() { return None; }

        // Only windows holding one of the subject's own follows count.
        let mut best = 0usize;
        let mut best_start = 0i64;
        sliding_distinct(&follows, self.window_secs, |start, n| {
            let next = subject_times.partition_point(|&t| t < start);
            let covers_subject = subject_times.get(next).is_some_and(|&t| t - start <= self.window_secs);
            if covers_subject && n > best {
                best = n;
                best_start = start;
            }
        });

        if best < self.min_followers { return None; }

        Some(DetectedSignal {
            subject_user_id: input.subject_id.to_string(),
            signal_type:     SignalKind::BurstFollowing,
            confidence:      self.confidence,
            evidence:        vec![
                format!("burst:{}_followers_in_{}s", best, self.window_secs),
                format!("burst_start:{}", best_start),
            ],
            context_user_id: Some(input.context_user_id.to_string()),
        })
    }
}
