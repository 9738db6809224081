// followguard/src/engine/badge.rs
//
// Authenticity badge lifecycle.
//
//   none ──score ≥ eligible & age ok──▶ eligible ──activate──▶ active
//    ▲                                     │                     │
//    │                      score < revoke │      score < revoke │ or ban
//    │                                     ▼                     ▼
//    └──────────── admin clear ◀────────────────────────────  revoked
//
// `revoked` only leaves through an explicit admin clear. The machine is pure;
// callers persist whatever it returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::clock::Clock;
use crate::config::BadgeConfig;
use crate::error::{FraudError, Result};
use crate::events::{BadgeStatus, UserBadgeStatus};
use crate::state::{FraudStore, UserLocks};

#[derive(Debug, Clone)]
pub struct BadgeMachine {
    cfg: BadgeConfig,
}

impl BadgeMachine {
    pub fn new(cfg: BadgeConfig) -> Self { Self { cfg } }

    /// Automatic transition after a score recomputation. Returns `current`
    /// untouched when nothing changes.
    pub fn on_score(
        &self,
        current:          &UserBadgeStatus,
        overall_score:    f64,
        account_age_days: Option<i64>,
        now:              DateTime<Utc>,
    ) -> UserBadgeStatus {
        let mut next = current.clone();
        match current.status {
            BadgeStatus::None => {
                let old_enough = account_age_days.map(|d| d >= self.cfg.min_account_age_days).unwrap_or(false);
                if overall_score >= self.cfg.eligible_threshold && old_enough {
                    next.status         = BadgeStatus::Eligible;
                    next.eligible_since = Some(now);
                }
            }
            BadgeStatus::Eligible => {
                if overall_score < self.cfg.revoke_threshold {
                    next.status         = BadgeStatus::None;
                    next.eligible_since = None;
                }
            }
            BadgeStatus::Active => {
                if overall_score < self.cfg.revoke_threshold {
                    next.status     = BadgeStatus::Revoked;
                    next.revoked_at = Some(now);
                }
            }
            BadgeStatus::Revoked => {}
        }
        if next.status != current.status {
            next.updated_at = now;
        }
        next
    }

    /// `eligible → active`. Any other starting state is a conflict.
    pub fn activate(&self, current: &UserBadgeStatus, now: DateTime<Utc>) -> Result<UserBadgeStatus> {
        if current.status != BadgeStatus::Eligible {
            return Err(FraudError::Conflict(format!(
                "badge for {} is {}, only an eligible badge can be activated",
                current.user_id, current.status
            )));
        }
        let mut next = current.clone();
        next.status       = BadgeStatus::Active;
        next.activated_at = Some(now);
        next.updated_at   = now;
        Ok(next)
    }

    /// Admin ban: unconditional, from any state.
    pub fn ban(&self, current: &UserBadgeStatus, now: DateTime<Utc>) -> UserBadgeStatus {
        let mut next = current.clone();
        next.status     = BadgeStatus::Revoked;
        next.revoked_at = Some(now);
        next.updated_at = now;
        next
    }

    /// Admin clear: back to `none` so the next recomputation starts fresh.
    pub fn clear(&self, current: &UserBadgeStatus, now: DateTime<Utc>) -> UserBadgeStatus {
        let mut next = UserBadgeStatus::initial(&current.user_id, now);
        next.revoked_at = current.revoked_at;
        next
    }
}

/// User- or admin-initiated badge activation.
pub struct BadgeManager {
    store:   Arc<dyn FraudStore>,
    locks:   Arc<UserLocks>,
    clock:   Arc<dyn Clock>,
    machine: BadgeMachine,
}

impl BadgeManager {
    pub fn new(
        store:   Arc<dyn FraudStore>,
        locks:   Arc<UserLocks>,
        clock:   Arc<dyn Clock>,
        machine: BadgeMachine,
    ) -> Self {
        Self { store, locks, clock, machine }
    }

    pub fn status(&self, user_id: &str) -> Result<UserBadgeStatus> {
        self.store
            .badge(user_id)?
            .ok_or_else(|| FraudError::NotFound(format!("no badge status for {user_id}")))
    }

    pub fn activate(&self, user_id: &str) -> Result<UserBadgeStatus> {
        self.locks.with_user(user_id, || {
            let current = self.status(user_id)?;
            let next    = self.machine.activate(&current, self.clock.now())?;
            self.store.commit_badge(next.clone())?;
            info!(user_id, "Badge activated");
            Ok(next)
        })
    }
}
