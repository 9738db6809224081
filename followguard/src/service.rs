// followguard/src/service.rs
//
// FraudService: the public operation surface, wired once from config.
//
//   ingest ─▶ ledger ─▶ recompute queue ─▶ analyzer ─▶ signals / notifications / score
//   trigger ─▶ batch orchestrator ─▶ analyzer (bounded pool)
//   admins ─▶ review desk / badge manager
//   reads  ─▶ dashboard / trends / notifications

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::config::FraudConfig;
use crate::dashboard::{DashboardFilter, DashboardService, PaginatedDashboardResult, TrendsFilter, TrendsResult};
use crate::engine::analysis::UserAnalyzer;
use crate::engine::badge::{BadgeManager, BadgeMachine};
use crate::engine::batch::{BatchOrchestrator, JobHandle};
use crate::engine::dispatcher::NotificationDispatcher;
use crate::engine::fusion::RiskScorer;
use crate::engine::recompute::RecomputeQueue;
use crate::engine::review::ReviewDesk;
use crate::error::{FraudError, Result};
use crate::events::{
    AdminReview, BatchAnalysisJob, BotFollowerNotification, FollowerEvent, UserBadgeStatus, UserRiskScore,
};
use crate::ingest::{EventIngestor, IngestOutcome};
use crate::profiles::ProfileReader;
use crate::state::{FraudStore, UserLocks};
use crate::workers::SignalDetector;

/// Optional wiring beyond the store, profile source and clock.
#[derive(Default)]
pub struct ServiceOptions {
    /// Receives every newly created notification.
    pub notification_outbox: Option<mpsc::Sender<BotFollowerNotification>>,
    /// Schedules live recomputation for users touched by ingested events.
    pub recompute_queue:     Option<Arc<RecomputeQueue>>,
}

pub struct FraudService {
    pub config:     FraudConfig,
    store:          Arc<dyn FraudStore>,
    locks:          Arc<UserLocks>,
    clock:          Arc<dyn Clock>,
    ingestor:       Arc<EventIngestor>,
    analyzer:       Arc<UserAnalyzer>,
    scorer:         Arc<RiskScorer>,
    dispatcher:     Arc<NotificationDispatcher>,
    reviews:        ReviewDesk,
    badges:         BadgeManager,
    batch:          Arc<BatchOrchestrator>,
    dashboard:      DashboardService,
}

impl FraudService {
    pub fn new(
        config:   FraudConfig,
        store:    Arc<dyn FraudStore>,
        profiles: Arc<dyn ProfileReader>,
        clock:    Arc<dyn Clock>,
        options:  ServiceOptions,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let locks   = Arc::new(UserLocks::new());
        let machine = BadgeMachine::new(config.badge.clone());

        let scorer = Arc::new(RiskScorer::new(
            store.clone(),
            profiles.clone(),
            locks.clone(),
            clock.clone(),
            config.scoring.clone(),
            machine.clone(),
        ));
        let mut dispatcher = NotificationDispatcher::new(store.clone(), clock.clone(), config.alert.confidence_threshold);
        if let Some(tx) = options.notification_outbox {
            dispatcher = dispatcher.with_outbox(tx);
        }
        let dispatcher = Arc::new(dispatcher);
        let analyzer = Arc::new(UserAnalyzer::new(
            store.clone(),
            profiles,
            Arc::new(SignalDetector::new(&config.detection)),
            dispatcher.clone(),
            scorer.clone(),
        ));
        let mut ingestor = EventIngestor::new(store.clone(), clock.clone(), config.ingest.clone());
        if let Some(q) = options.recompute_queue {
            ingestor = ingestor.with_queue(q);
        }

        Ok(Arc::new(Self {
            reviews:   ReviewDesk::new(store.clone(), locks.clone(), clock.clone(), machine.clone()),
            badges:    BadgeManager::new(store.clone(), locks.clone(), clock.clone(), machine),
            batch:     BatchOrchestrator::new(store.clone(), analyzer.clone(), clock.clone(), config.batch.clone()),
            dashboard: DashboardService::new(store.clone(), clock.clone(), &config.scoring),
            ingestor:  Arc::new(ingestor),
            config,
            store,
            locks,
            clock,
            analyzer,
            scorer,
            dispatcher,
        }))
    }

    pub fn locks(&self) -> &Arc<UserLocks> { &self.locks }

    pub fn ingestor(&self) -> &Arc<EventIngestor> { &self.ingestor }

    pub fn analyzer(&self) -> &Arc<UserAnalyzer> { &self.analyzer }

    pub fn batch(&self) -> &Arc<BatchOrchestrator> { &self.batch }

    // ── Events + scoring ──────────────────────────────────────────────────────

    pub fn ingest_event(&self, event: FollowerEvent) -> Result<IngestOutcome> {
        self.ingestor.ingest(event)
    }

    /// Current score. `NotFound` until the user has been scored once, which is
    /// distinct from a computed score of zero.
    pub fn get_user_risk_score(&self, user_id: &str) -> Result<UserRiskScore> {
        self.store
            .risk_score(user_id)?
            .ok_or_else(|| FraudError::NotFound(format!("no risk score computed for {user_id}")))
    }

    /// Score recomputation from stored signals, without running detection.
    pub fn recompute_user(&self, user_id: &str) -> Result<UserRiskScore> {
        self.scorer.recompute(user_id)
    }

    /// Detection, alerts and scoring for one user, as of now.
    pub fn analyze_user(&self, user_id: &str) -> Result<UserRiskScore> {
        self.analyzer
            .analyze_user(user_id, self.clock.now())
            .map(|o| o.score)
            .map_err(|e| e.error)
    }

    // ── Admin review ──────────────────────────────────────────────────────────

    pub fn review_user(&self, admin_id: &str, user_id: &str, notes: &str) -> Result<AdminReview> {
        self.reviews.review_user(admin_id, user_id, notes)
    }

    pub fn ban_user(&self, admin_id: &str, user_id: &str, reason: &str, notes: &str) -> Result<AdminReview> {
        self.reviews.ban_user(admin_id, user_id, reason, notes)
    }

    pub fn clear_user(&self, admin_id: &str, user_id: &str, notes: &str) -> Result<AdminReview> {
        self.reviews.clear_user(admin_id, user_id, notes)
    }

    pub fn get_user_reviews(&self, user_id: &str) -> Result<Vec<AdminReview>> {
        self.reviews.reviews_for(user_id)
    }

    // ── Badge ─────────────────────────────────────────────────────────────────

    pub fn get_user_badge_status(&self, user_id: &str) -> Result<UserBadgeStatus> {
        self.badges.status(user_id)
    }

    pub fn activate_badge(&self, user_id: &str) -> Result<UserBadgeStatus> {
        self.badges.activate(user_id)
    }

    // ── Notifications ─────────────────────────────────────────────────────────

    pub fn get_user_bot_notifications(&self, user_id: &str, unread_only: bool) -> Result<Vec<BotFollowerNotification>> {
        self.dispatcher.list(user_id, unread_only)
    }

    pub fn mark_notification_as_read(&self, notification_id: &str) -> Result<BotFollowerNotification> {
        self.dispatcher.mark_as_read(notification_id)
    }

    // ── Batch ─────────────────────────────────────────────────────────────────

    pub fn trigger_batch_analysis(
        &self,
        date_from: Option<DateTime<Utc>>,
        date_to:   Option<DateTime<Utc>>,
    ) -> Result<JobHandle> {
        self.batch.trigger(date_from, date_to)
    }

    pub fn get_batch_job(&self, job_id: &str) -> Result<BatchAnalysisJob> {
        self.batch.job(job_id)
    }

    pub fn list_batch_jobs(&self) -> Result<Vec<BatchAnalysisJob>> {
        self.batch.jobs()
    }

    pub fn cancel_batch_job(&self, job_id: &str) -> Result<()> {
        self.batch.cancel(job_id)
    }

    // ── Dashboard ─────────────────────────────────────────────────────────────

    pub fn get_fraud_dashboard(&self, filter: &DashboardFilter) -> Result<PaginatedDashboardResult> {
        self.dashboard.dashboard(filter)
    }

    pub fn get_fraud_trends(&self, filter: &TrendsFilter) -> Result<TrendsResult> {
        self.dashboard.trends(filter)
    }
}
