//! Per-user conversation history.
//!
//! A bounded in-process cache: each user keeps their last N turns, and a
//! whole conversation expires after a TTL of inactivity. Only successful
//! answers are recorded, so a failed attempt never pollutes follow-up
//! refinement.

use crate::types::Turn;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct UserHistory {
    turns: VecDeque<Turn>,
    touched: Instant,
}

/// In-memory history store, keyed by user id.
pub struct HistoryStore {
    max_turns: usize,
    ttl: Duration,
    inner: Mutex<HashMap<String, UserHistory>>,
}

impl HistoryStore {
    pub fn new(max_turns: usize, ttl: Duration) -> Self {
        Self {
            max_turns,
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Recent turns for a user, oldest first. An expired conversation is
    /// evicted and comes back empty.
    pub fn get(&self, user_id: &str) -> Vec<Turn> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match map.get(user_id) {
            Some(history) if history.touched.elapsed() <= self.ttl => {
                history.turns.iter().cloned().collect()
            }
            Some(_) => {
                map.remove(user_id);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    /// Record one completed turn, trimming to the per-user bound.
    pub fn append(&self, user_id: &str, turn: Turn) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let history = map.entry(user_id.to_string()).or_insert_with(|| UserHistory {
            turns: VecDeque::new(),
            touched: Instant::now(),
        });
        if history.touched.elapsed() > self.ttl {
            history.turns.clear();
        }
        history.turns.push_back(turn);
        while history.turns.len() > self.max_turns {
            history.turns.pop_front();
        }
        history.touched = Instant::now();
    }

    /// Drop a user's conversation.
    pub fn clear(&self, user_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HistoryStore {
        HistoryStore::new(3, Duration::from_secs(60))
    }

    #[test]
    fn test_append_and_get_in_order() {
        let store = store();
        store.append("u1", Turn::new("q1", "a1"));
        store.append("u1", Turn::new("q2", "a2"));
        let turns = store.get("u1");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].query, "q1");
        assert_eq!(turns[1].query, "q2");
    }

    #[test]
    fn test_bounded_to_max_turns() {
        let store = store();
        for i in 0..5 {
            store.append("u1", Turn::new(format!("q{i}"), "a"));
        }
        let turns = store.get("u1");
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].query, "q2");
    }

    #[test]
    fn test_users_are_isolated() {
        let store = store();
        store.append("u1", Turn::new("q1", "a1"));
        assert!(store.get("u2").is_empty());
        store.clear("u1");
        assert!(store.get("u1").is_empty());
    }

    #[test]
    fn test_ttl_expires_conversation() {
        let store = HistoryStore::new(3, Duration::from_millis(0));
        store.append("u1", Turn::new("q1", "a1"));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("u1").is_empty());
    }
}
