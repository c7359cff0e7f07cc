//! Bounded, TTL-expiring per-session chat history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A session's live history with its lifetime bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionHistory {
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        *now = add_saturating(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn add_saturating(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug)]
struct Slot {
    messages: VecDeque<ChatMessage>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    /// Set once the slot is unlinked from the map; writers must re-resolve.
    evicted: bool,
}

impl Slot {
    fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.expires_at <= now {
            self.messages.clear();
            self.created_at = now;
            true
        } else {
            false
        }
    }
}

type SlotRef = Arc<tokio::sync::Mutex<Slot>>;

/// Per-session memory with FIFO truncation and sliding TTL.
///
/// Each session has its own async mutex; the map lock is held only to look up or
/// insert a slot, never across an await.
pub struct SessionMemoryStore {
    sessions: RwLock<HashMap<String, SlotRef>>,
    max_messages: usize,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMemoryStore")
            .field("max_messages", &self.max_messages)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for SessionMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_TTL)
    }
}

impl SessionMemoryStore {
    #[must_use]
    pub fn new(max_messages: usize, ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_messages,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    fn lookup(&self, session_id: &str) -> Option<SlotRef> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn lookup_or_create(&self, session_id: &str) -> SlotRef {
        if let Some(slot) = self.lookup(session_id) {
            return slot;
        }
        let now = self.clock.now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(session_id.to_owned()).or_insert_with(|| {
            Arc::new(tokio::sync::Mutex::new(Slot {
                messages: VecDeque::new(),
                created_at: now,
                expires_at: add_saturating(now, self.ttl),
                evicted: false,
            }))
        }))
    }

    /// Append one message. See [`append_batch`](Self::append_batch).
    pub async fn append(&self, session_id: &str, role: ChatRole, content: impl Into<String>) {
        self.append_batch(session_id, vec![(role, content.into())])
            .await;
    }

    /// Timestamp and append `messages` in order as one atomic step, keep the newest
    /// `max_messages`, and restart the session TTL.
    pub async fn append_batch(&self, session_id: &str, messages: Vec<(ChatRole, String)>) {
        loop {
            let slot = self.lookup_or_create(session_id);
            let mut guard = slot.lock().await;
            if guard.evicted {
                continue;
            }
            let now = self.clock.now();
            if guard.expire_if_due(now) {
                tracing::debug!(session_id, "session expired, starting fresh");
            }
            for (role, content) in messages {
                guard.messages.push_back(ChatMessage {
                    role,
                    content,
                    timestamp: now,
                });
            }
            while guard.messages.len() > self.max_messages {
                guard.messages.pop_front();
            }
            guard.expires_at = add_saturating(now, self.ttl);
            return;
        }
    }

    /// Current history, oldest first. Empty for unknown or expired sessions.
    pub async fn read(&self, session_id: &str) -> Vec<ChatMessage> {
        self.history(session_id)
            .await
            .map(|h| h.messages)
            .unwrap_or_default()
    }

    /// Like [`read`](Self::read), with the session bounds. `None` for unknown or expired
    /// sessions.
    pub async fn history(&self, session_id: &str) -> Option<SessionHistory> {
        let slot = self.lookup(session_id)?;
        let mut guard = slot.lock().await;
        if guard.evicted || guard.expire_if_due(self.clock.now()) {
            return None;
        }
        Some(SessionHistory {
            started_at: guard.created_at,
            expires_at: guard.expires_at,
            messages: guard.messages.iter().cloned().collect(),
        })
    }

    /// Remove a session. Returns whether it existed.
    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        match removed {
            Some(slot) => {
                slot.lock().await.evicted = true;
                true
            }
            None => false,
        }
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let candidates: Vec<(String, SlotRef)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut purged = 0;
        for (id, slot) in candidates {
            let mut guard = slot.lock().await;
            if guard.evicted || guard.expires_at > self.clock.now() {
                continue;
            }
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            if sessions.get(&id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                sessions.remove(&id);
                guard.evicted = true;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(purged, "purged expired sessions");
        }
        purged
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
