//! Bounded conversation window for one thread
//!
//! Keeps the most recent `window` turns in arrival order, dropping the
//! oldest first.

use crate::models::{ConversationTurn, TurnRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ordered window of the latest turns exchanged on one thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    window: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationThread {
    pub fn new(thread_id: impl Into<String>, window: usize) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            created_at: now,
            updated_at: now,
            window,
            turns: VecDeque::with_capacity(window.saturating_add(1)),
        }
    }

    /// Append and truncate to the window. Returns how many turns were dropped.
    pub fn push(&mut self, turn: ConversationTurn) -> usize {
        self.turns.push_back(turn);
        self.updated_at = Utc::now();

        let mut dropped = 0;
        while self.turns.len() > self.window {
            self.turns.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn to_vec(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Most recent user message, if any.
    pub fn last_user_turn(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == TurnRole::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_latest_in_order() {
        let mut thread = ConversationThread::new("t-1", 4);

        let mut dropped = 0;
        for i in 0..6 {
            dropped += thread.push(ConversationTurn::user(format!("message {}", i)));
        }

        assert_eq!(dropped, 2);
        let contents: Vec<&str> = thread.turns().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["message 2", "message 3", "message 4", "message 5"]
        );
    }

    #[test]
    fn test_last_user_turn() {
        let mut thread = ConversationThread::new("t-1", 4);
        assert!(thread.last_user_turn().is_none());

        thread.push(ConversationTurn::user("news about TSLA"));
        thread.push(ConversationTurn::assistant("Latest headlines..."));

        assert_eq!(thread.last_user_turn().unwrap().content, "news about TSLA");
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn test_zero_window_retains_nothing() {
        let mut thread = ConversationThread::new("t-1", 0);
        thread.push(ConversationTurn::user("hello"));
        assert!(thread.is_empty());
    }
}
