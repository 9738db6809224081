// followguard/src/engine/review.rs
//
// Admin moderation. Every action appends an immutable review row; ban and
// clear also rewrite the badge in the same commit. Actions on one user are
// serialized with score recomputation through the per-user lock, and the
// committed badge bumps the score version so an in-flight recompute loses its
// compare-and-set instead of overwriting the admin decision.

use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::engine::badge::BadgeMachine;
use crate::error::{FraudError, Result};
use crate::events::{AdminReview, ReviewAction, UserBadgeStatus};
use crate::state::{FraudStore, UserLocks};

pub struct ReviewDesk {
    store:   Arc<dyn FraudStore>,
    locks:   Arc<UserLocks>,
    clock:   Arc<dyn Clock>,
    machine: BadgeMachine,
}

impl ReviewDesk {
    pub fn new(
        store:   Arc<dyn FraudStore>,
        locks:   Arc<UserLocks>,
        clock:   Arc<dyn Clock>,
        machine: BadgeMachine,
    ) -> Self {
        Self { store, locks, clock, machine }
    }

    /// Record that `admin_id` looked at `user_id`. Changes nothing else.
    pub fn review_user(&self, admin_id: &str, user_id: &str, notes: &str) -> Result<AdminReview> {
        self.act(admin_id, user_id, ReviewAction::Reviewed, None, notes)
    }

    /// Revoke the badge unconditionally, whatever the score says.
    pub fn ban_user(&self, admin_id: &str, user_id: &str, reason: &str, notes: &str) -> Result<AdminReview> {
        if reason.trim().is_empty() {
            return Err(FraudError::Validation("a ban needs a reason".into()));
        }
        self.act(admin_id, user_id, ReviewAction::Banned, Some(reason.to_string()), notes)
    }

    /// Reset the badge to `none`; the next recomputation decides afresh.
    pub fn clear_user(&self, admin_id: &str, user_id: &str, notes: &str) -> Result<AdminReview> {
        self.act(admin_id, user_id, ReviewAction::Cleared, None, notes)
    }

    /// Review history, oldest first.
    pub fn reviews_for(&self, user_id: &str) -> Result<Vec<AdminReview>> {
        let mut out = self.store.reviews_for_user(user_id)?;
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn act(
        &self,
        admin_id: &str,
        user_id:  &str,
        action:   ReviewAction,
        reason:   Option<String>,
        notes:    &str,
    ) -> Result<AdminReview> {
        if admin_id.trim().is_empty() {
            return Err(FraudError::Unauthorized("admin identity required".into()));
        }
        if user_id.trim().is_empty() {
            return Err(FraudError::Validation("user_id must not be empty".into()));
        }

        self.locks.with_user(user_id, || {
            let now = self.clock.now();
            let current = self
                .store
                .badge(user_id)?
                .unwrap_or_else(|| UserBadgeStatus::initial(user_id, now));
            let badge = match action {
                ReviewAction::Reviewed => None,
                ReviewAction::Banned   => Some(self.machine.ban(&current, now)),
                ReviewAction::Cleared  => Some(self.machine.clear(&current, now)),
            };
            let review = AdminReview {
                id:         uuid::Uuid::new_v4().to_string(),
                user_id:    user_id.to_string(),
                admin_id:   admin_id.to_string(),
                action,
                reason,
                notes:      notes.to_string(),
                created_at: now,
            };
            self.store.commit_review(review.clone(), badge)?;
            info!(user_id, admin_id, action = %action, "Admin review recorded");
            Ok(review)
        })
    }
}
