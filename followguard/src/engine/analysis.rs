// followguard/src/engine/analysis.rs
//
// One user's full pass: scan every account that ever followed them, persist
// new signals, alert on strong ones, then recompute the user's score.
//
// Every step is idempotent (signals dedupe on fingerprint, notifications on
// recipient/bot/type, scoring is a pure function of stored state), so a
// failed pass can simply be run again.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::dispatcher::NotificationDispatcher;
use crate::engine::fusion::RiskScorer;
use crate::error::FraudError;
use crate::events::{BotDetectionSignal, UserRiskScore};
use crate::profiles::ProfileReader;
use crate::state::graph::all_followers;
use crate::state::{FraudStore, InsertOutcome};
use crate::workers::{DetectionInput, SignalDetector};

#[derive(Debug, Clone)]
pub struct UserOutcome {
    pub followers_scanned: u64,
    pub new_signals:       u64,
    pub notifications:     u64,
    pub score:             UserRiskScore,
}

/// A failure tagged with the pipeline stage it happened in.
#[derive(Debug)]
pub struct StageError {
    pub stage: &'static str,
    pub error: FraudError,
}

impl StageError {
    fn at(stage: &'static str) -> impl FnOnce(FraudError) -> Self {
        move |error| Self { stage, error }
    }

    pub fn is_retryable(&self) -> bool { self.error.is_retryable() }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

pub struct UserAnalyzer {
    store:      Arc<dyn FraudStore>,
    profiles:   Arc<dyn ProfileReader>,
    detector:   Arc<SignalDetector>,
    dispatcher: Arc<NotificationDispatcher>,
    scorer:     Arc<RiskScorer>,
}

impl UserAnalyzer {
    pub fn new(
        store:      Arc<dyn FraudStore>,
        profiles:   Arc<dyn ProfileReader>,
        detector:   Arc<SignalDetector>,
        dispatcher: Arc<NotificationDispatcher>,
        scorer:     Arc<RiskScorer>,
    ) -> Self {
        Self { store, profiles, detector, dispatcher, scorer }
    }

    /// Analyze `user_id` with everything up to `as_of`. Signals are stamped
    /// with `as_of`, so replaying a range reproduces the same records.
    pub fn analyze_user(&self, user_id: &str, as_of: DateTime<Utc>) -> Result<UserOutcome, StageError> {
        let inbound = self
            .store
            .events_for_followed(user_id)
            .map_err(StageError::at("load"))?;
        let followers = all_followers(&inbound, Some(as_of));

        let mut new_signals   = 0u64;
        let mut notifications = 0u64;
        for follower in &followers {
            let outbound = self
                .store
                .events_by_follower(follower)
                .map_err(StageError::at("load"))?;
            let profile = self.profiles.profile(follower);
            let input = DetectionInput {
                subject_id:      follower,
                profile:         profile.as_ref(),
                subject_events:  &outbound,
                context_user_id: user_id,
                context_events:  &inbound,
                as_of,
            };
            for detected in self.detector.detect(&input) {
                let signal = BotDetectionSignal::from_detected(detected, as_of);
                let outcome = self
                    .store
                    .insert_signal(signal.clone())
                    .map_err(StageError::at("detect"))?;
                if outcome == InsertOutcome::Inserted {
                    new_signals += 1;
                }
                notifications += self.dispatcher.notify(&signal).map_err(StageError::at("notify"))? as u64;
            }
        }

        let score = self.scorer.recompute(user_id).map_err(StageError::at("score"))?;
        Ok(UserOutcome {
            followers_scanned: followers.len() as u64,
            new_signals,
            notifications,
            score,
        })
    }
}
