// followguard/src/state/graph.rs
//
// Current follow edges, folded from the event ledger. An edge is live when the
// latest event on it is a follow.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::events::{FollowEventKind, FollowerEvent};

/// Accounts currently following `events`' followed user. `events` is one
/// user's inbound history.
pub fn current_followers(events: &[FollowerEvent], as_of: Option<DateTime<Utc>>) -> Vec<String> {
    live_edges(events, as_of, |e| &e.follower_user_id)
}

/// Accounts currently followed, given one follower's outbound history.
pub fn current_followees(events: &[FollowerEvent], as_of: Option<DateTime<Utc>>) -> Vec<String> {
    live_edges(events, as_of, |e| &e.followed_user_id)
}

/// Every distinct account that appears as a follower, live or not.
pub fn all_followers(events: &[FollowerEvent], as_of: Option<DateTime<Utc>>) -> Vec<String> {
    let mut out: Vec<String> = events
        .iter()
        .filter(|e| as_of.map(|t| e.occurred_at <= t).unwrap_or(true))
        .map(|e| e.follower_user_id.clone())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn live_edges<F>(events: &[FollowerEvent], as_of: Option<DateTime<Utc>>, key: F) -> Vec<String>
where
    F: Fn(&FollowerEvent) -> &String,
{
    let mut latest: BTreeMap<&str, &FollowerEvent> = BTreeMap::new();
    for e in events {
        if as_of.map(|t| e.occurred_at > t).unwrap_or(false) {
            continue;
        }
        let slot = latest.entry(key(e).as_str()).or_insert(e);
        if (e.occurred_at, &e.id) >= (slot.occurred_at, &slot.id) {
            *slot = e;
        }
    }
    latest
        .into_iter()
        .filter(|(_, e)| e.event_type == FollowEventKind::Follow)
        .map(|(k, _)| k.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::testutil::{at, follow, unfollow};

    #[test]
    fn latest_event_decides_the_edge() {
        let events = vec![
            follow("a", "alice", 0),
            follow("b", "alice", 1),
            unfollow("a", "alice", 5),
            follow("c", "alice", 6),
            unfollow("c", "alice", 9),
            follow("c", "alice", 12),
        ];
        assert_eq!(current_followers(&events, None), ["b", "c"]);
        assert_eq!(current_followers(&events, Some(at(10))), ["b"]);
        assert_eq!(all_followers(&events, None), ["a", "b", "c"]);
    }

    #[test]
    fn followees_fold_outbound_history() {
        let events = vec![follow("bot", "x", 0), follow("bot", "y", 1), unfollow("bot", "x", 2)];
        assert_eq!(current_followees(&events, None), ["y"]);
    }
}
