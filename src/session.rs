//! Session management for in-progress calls
//!
//! Holds one progress record per call, keyed by the platform's call SID.
//! Events for different calls never contend; events for the same call are
//! serialized by the session's own lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Where a call is in the interview
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Init,
    /// Live speech recognition outstanding
    AwaitingSpeech,
    /// Fallback recording outstanding
    AwaitingRecording,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Complete,
}

/// Result of storing an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Ask the question at this index next
    NextQuestion(usize),
    /// Every question has an answer
    Finished,
}

/// Progress record for a single call
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Call SID
    pub id: String,
    /// Index of the question currently being asked
    pub question_index: usize,
    /// Answers in question order
    pub answers: Vec<String>,
    pub state: CallState,
    /// Unusable recordings for the current question
    pub failed_recordings: u32,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl CallSession {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            question_index: 0,
            answers: Vec::new(),
            state: CallState::Init,
            failed_recordings: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.state {
            CallState::Complete => SessionStatus::Complete,
            _ => SessionStatus::Active,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Store the answer to the current question and move on
    pub fn record_answer(&mut self, answer: String, question_count: usize) -> Progress {
        debug_assert_eq!(self.answers.len(), self.question_index);

        if self.question_index < question_count {
            self.answers.push(answer);
            self.question_index += 1;
        }
        self.failed_recordings = 0;

        if self.question_index >= question_count {
            Progress::Finished
        } else {
            Progress::NextQuestion(self.question_index)
        }
    }

    /// Count an unusable recording, returning the running total
    pub fn record_failed_recording(&mut self) -> u32 {
        self.failed_recordings += 1;
        self.failed_recordings
    }

    pub fn is_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> bool {
        (now - self.last_activity)
            .to_std()
            .map(|idle| idle > max_idle)
            .unwrap_or(false)
    }
}

/// Exclusive access to one session for the duration of an event
pub type SessionGuard = OwnedMutexGuard<CallSession>;

/// All in-progress calls
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<CallSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for a call, creating it if unseen
    pub fn get_or_create(&self, call_id: &str) -> (Arc<Mutex<CallSession>>, bool) {
        let mut created = false;
        let session = self
            .sessions
            .entry(call_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(CallSession::new(call_id)))
            })
            .value()
            .clone();

        if created {
            debug!("[{}] New call session", call_id);
        }
        (session, created)
    }

    /// Lock the live session for a call.
    ///
    /// A session completed by an earlier event, or drained by the idle sweep
    /// while this event waited, is never handed out; the loop moves on to
    /// the entry currently stored for the call.
    pub async fn acquire(&self, call_id: &str) -> (SessionGuard, bool) {
        loop {
            let (session, created) = self.get_or_create(call_id);
            if let Some(guard) = self.lock_if_current(call_id, session).await {
                return (guard, created);
            }
        }
    }

    /// Lock `session` and check that it is still the stored entry for `call_id`
    async fn lock_if_current(&self, call_id: &str, session: Arc<Mutex<CallSession>>) -> Option<SessionGuard> {
        let guard = session.clone().lock_owned().await;

        let current = self
            .sessions
            .get(call_id)
            .map(|entry| Arc::ptr_eq(entry.value(), &session))
            .unwrap_or(false);
        if !current {
            debug!("[{}] Session was replaced while waiting for its lock", call_id);
            return None;
        }

        if guard.status() == SessionStatus::Complete {
            drop(guard);
            self.sessions
                .remove_if(call_id, |_, current| Arc::ptr_eq(current, &session));
            return None;
        }
        Some(guard)
    }

    /// Remove the session held by `guard`, unless a newer one took its place
    pub fn remove_locked(&self, guard: &SessionGuard) -> bool {
        let locked = OwnedMutexGuard::mutex(guard);
        self.sessions
            .remove_if(&guard.id, |_, current| Arc::ptr_eq(current, locked))
            .is_some()
    }

    #[cfg(test)]
    pub fn get(&self, call_id: &str) -> Option<Arc<Mutex<CallSession>>> {
        self.sessions.get(call_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Remove sessions idle for longer than `max_idle` and return them.
    ///
    /// Sessions locked by an in-flight event are left alone.
    pub fn drain_idle(&self, max_idle: Duration) -> Vec<CallSession> {
        let now = Utc::now();
        let mut drained = Vec::new();

        self.sessions.retain(|_, session| match session.try_lock() {
            Ok(mut guard) if guard.is_idle(now, max_idle) => {
                drained.push((*guard).clone());
                // Anyone still holding this Arc must not resume it
                guard.state = CallState::Complete;
                false
            }
            _ => true,
        });

        drained
    }
}
