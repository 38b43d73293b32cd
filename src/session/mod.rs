// Conversation sessions
// Per-session history and active source, with idle expiry


use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::User => write!(f, "User"),
            Self::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
struct Session {
    turns: VecDeque<Turn>,
    source: Option<String>,
    last_access: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            turns: VecDeque::new(),
            source: None,
            last_access: now,
        }
    }
}

/// Explicit store of conversation sessions keyed by id
///
/// Every access first evicts sessions idle for longer than the TTL.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    max_turns: usize,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    #[inline]
    pub fn new(ttl: Duration, max_turns: usize) -> Self {
        Self {
            ttl,
            max_turns: max_turns.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_seconds), config.max_turns)
    }

    /// Ordered turns of a session, creating it when absent
    #[inline]
    pub fn history(&self, id: &str) -> Vec<Turn> {
        self.history_at(id, Instant::now())
    }

    #[inline]
    pub fn history_at(&self, id: &str, now: Instant) -> Vec<Turn> {
        self.with_session(id, now, |session| session.turns.iter().cloned().collect())
    }

    /// Append a turn, dropping the oldest ones beyond the history bound
    #[inline]
    pub fn push_turn(&self, id: &str, turn: Turn) {
        self.push_turn_at(id, turn, Instant::now());
    }

    #[inline]
    pub fn push_turn_at(&self, id: &str, turn: Turn, now: Instant) {
        let max_turns = self.max_turns;
        self.with_session(id, now, |session| {
            session.turns.push_back(turn);
            while session.turns.len() > max_turns {
                session.turns.pop_front();
            }
        });
    }

    /// Record a question and its answer as two consecutive turns
    #[inline]
    pub fn record_exchange(&self, id: &str, question: &str, answer: &str) {
        let now = Instant::now();
        self.push_turn_at(id, Turn::user(question), now);
        self.push_turn_at(id, Turn::assistant(answer), now);
    }

    #[inline]
    pub fn source(&self, id: &str) -> Option<String> {
        self.with_session(id, Instant::now(), |session| session.source.clone())
    }

    /// Point a session at a source; a different source clears its history
    ///
    /// Returns whether the source changed.
    #[inline]
    pub fn set_source(&self, id: &str, source: &str) -> bool {
        self.set_source_at(id, source, Instant::now())
    }

    #[inline]
    pub fn set_source_at(&self, id: &str, source: &str, now: Instant) -> bool {
        self.with_session(id, now, |session| {
            if session.source.as_deref() == Some(source) {
                return false;
            }
            debug!("Session {} switched source to {}", id, source);
            session.source = Some(source.to_string());
            session.turns.clear();
            true
        })
    }

    /// Drop a session; returns whether it existed
    #[inline]
    pub fn close(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        Self::evict_expired(&mut sessions, self.ttl, Instant::now());
        sessions.remove(id).is_some()
    }

    /// Number of live sessions
    #[inline]
    pub fn len(&self) -> usize {
        self.len_at(Instant::now())
    }

    #[inline]
    pub fn len_at(&self, now: Instant) -> usize {
        let mut sessions = self.lock();
        Self::evict_expired(&mut sessions, self.ttl, now);
        sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_session<T>(&self, id: &str, now: Instant, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut sessions = self.lock();
        Self::evict_expired(&mut sessions, self.ttl, now);

        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(now));
        session.last_access = now;
        f(session)
    }

    fn evict_expired(sessions: &mut HashMap<String, Session>, ttl: Duration, now: Instant) {
        sessions.retain(|id, session| {
            let live = now.saturating_duration_since(session.last_access) <= ttl;
            if !live {
                debug!("Evicting idle session {}", id);
            }
            live
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionStore {
    #[inline]
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}
