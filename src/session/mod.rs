//! Per-conversation turn history.
//!
//! A [`Session`] is a cheap, cloneable handle. Every operation takes the
//! session's own lock exactly once, so concurrent submissions against one
//! session see a consistent history and sessions never contend with each
//! other.

pub mod prompt;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use prompt::PromptTemplate;

/// Number of prior turns used when building the next prompt.
pub const HISTORY_WINDOW: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Shared, append-only turn log
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Arc<Mutex<Vec<ConversationTurn>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the prior-turn window and append `input` as a user turn.
    pub fn begin_turn(&self, input: &str) -> Vec<ConversationTurn> {
        let mut turns = self.turns.lock();
        let window = window_of(&turns);
        turns.push(ConversationTurn::user(input));
        window
    }

    /// Append the assistant's reply.
    pub fn record_reply(&self, reply: &str) {
        self.turns.lock().push(ConversationTurn::assistant(reply.trim()));
    }

    pub fn push(&self, turn: ConversationTurn) {
        self.turns.lock().push(turn);
    }

    /// The turns the next prompt would include.
    pub fn window(&self) -> Vec<ConversationTurn> {
        window_of(&self.turns.lock())
    }

    pub fn clear(&self) {
        self.turns.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.turns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.lock().is_empty()
    }

    /// Number of turns per role: (user, assistant).
    pub fn turn_counts(&self) -> (usize, usize) {
        let turns = self.turns.lock();
        let user = turns.iter().filter(|t| t.role == Role::User).count();
        (user, turns.len() - user)
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.lock().clone()
    }
}

fn window_of(turns: &[ConversationTurn]) -> Vec<ConversationTurn> {
    let start = turns.len().saturating_sub(HISTORY_WINDOW);
    turns[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_last_six() {
        let session = Session::new();
        for i in 0..10 {
            if i % 2 == 0 {
                session.push(ConversationTurn::user(format!("q{}", i)));
            } else {
                session.push(ConversationTurn::assistant(format!("a{}", i)));
            }
        }
        let window = session.window();
        assert_eq!(window.len(), HISTORY_WINDOW);
        assert_eq!(window[0].content, "q4");
        assert_eq!(window[5].content, "a9");
    }

    #[test]
    fn test_begin_turn_returns_prior_window() {
        let session = Session::new();
        assert!(session.begin_turn("first").is_empty());
        session.record_reply("  reply  ");
        let window = session.begin_turn("second");
        assert_eq!(
            window,
            vec![ConversationTurn::user("first"), ConversationTurn::assistant("reply")]
        );
        assert_eq!(session.len(), 3);
        assert_eq!(session.turn_counts(), (2, 1));
    }

    #[test]
    fn test_clear_empties_history() {
        let session = Session::new();
        session.begin_turn("hello");
        session.record_reply("hi");
        session.clear();
        assert!(session.is_empty());
        assert!(session.begin_turn("again").is_empty());
    }

    #[test]
    fn test_clones_share_history() {
        let session = Session::new();
        let other = session.clone();
        other.begin_turn("shared");
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_concurrent_appends_and_clear() {
        let session = Session::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let s = session.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        s.begin_turn(&format!("{}-{}", i, j));
                        if j % 25 == 0 {
                            s.clear();
                        }
                        assert!(s.window().len() <= HISTORY_WINDOW);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(session.len() <= 8 * 100);
    }
}
