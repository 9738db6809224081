// followguard/src/profiles.rs
//
// Read-only account/profile reader. Account age, profile completeness and
// engagement metrics come from the wider platform; any of them may be
// missing, in which case detection and scoring degrade rather than fail.

use std::path::Path;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub posts:             u64,
    pub likes_received:    u64,
    pub comments_received: u64,
}

impl EngagementMetrics {
    pub fn interactions(&self) -> u64 {
        self.likes_received + self.comments_received
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub user_id:              String,
    #[serde(default)]
    pub created_at:           Option<DateTime<Utc>>,
    /// Fraction of profile fields filled in, 0..=1.
    #[serde(default)]
    pub profile_completeness: Option<f64>,
    #[serde(default)]
    pub engagement:           Option<EngagementMetrics>,
}

impl AccountProfile {
    /// Profile with nothing known beyond the id.
    pub fn unknown(user_id: &str) -> Self {
        Self {
            user_id:              user_id.to_string(),
            created_at:           None,
            profile_completeness: None,
            engagement:           None,
        }
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|c| (now - c).num_days().max(0))
    }
}

pub trait ProfileReader: Send + Sync {
    fn profile(&self, user_id: &str) -> Option<AccountProfile>;
}

/// In-memory profile table. The daemon fills it from a JSONL export.
#[derive(Default)]
pub struct ProfileDirectory {
    profiles: DashMap<String, AccountProfile>,
}

impl ProfileDirectory {
    pub fn new() -> Self { Self::default() }

    pub fn upsert(&self, profile: AccountProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn len(&self) -> usize { self.profiles.len() }

    pub fn is_empty(&self) -> bool { self.profiles.is_empty() }

    /// Load one `AccountProfile` per line. Unparseable lines are skipped.
    pub fn load_jsonl(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let mut loaded = 0usize;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() { continue; }
            match serde_json::from_str::<AccountProfile>(line) {
                Ok(p) => { self.upsert(p); loaded += 1; }
                Err(e) => warn!("Profile parse error: {}", e),
            }
        }
        info!("Loaded {} profiles from {}", loaded, path.display());
        Ok(loaded)
    }
}

impl ProfileReader for ProfileDirectory {
    fn profile(&self, user_id: &str) -> Option<AccountProfile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }
}
