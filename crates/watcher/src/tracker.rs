//! Per-session status tracking
//!
//! Pure, synchronous bookkeeping: `observe(session, status, now) -> Transition`.
//! No IO, no timers; the runtime decides what to do with each transition.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use idlenotify_protocol::{SessionStatus, StatusTag};

/// Entries not seen for this long are reclaimed by [`SessionTracker::sweep`].
pub const RETENTION: Duration = Duration::from_secs(60 * 60);
/// How often the runtime runs the sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What an observation means for notification purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First event for this session. Recorded, never notifies (even if idle).
    NewSession,
    /// Same status as before.
    Unchanged,
    /// Non-idle → idle. Candidate for a notification.
    BecameIdle,
    /// Changed to a non-idle status. Any pending notification must be cancelled.
    BecameBusy,
}

#[derive(Debug, Clone)]
struct TrackedSession {
    status: StatusTag,
    directory: String,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct SessionTracker {
    sessions: HashMap<String, TrackedSession>,
    retention: Duration,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(RETENTION)
    }
}

impl SessionTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            retention,
        }
    }

    /// Record a status observation and classify it. Always refreshes `last_seen`.
    pub fn observe(
        &mut self,
        session_id: &str,
        status: &SessionStatus,
        directory: &str,
        now: Instant,
    ) -> Transition {
        let tag = status.tag();
        let Some(entry) = self.sessions.get_mut(session_id) else {
            self.sessions.insert(
                session_id.to_string(),
                TrackedSession {
                    status: tag,
                    directory: directory.to_string(),
                    last_seen: now,
                },
            );
            return Transition::NewSession;
        };

        let previous = entry.status;
        entry.status = tag;
        entry.last_seen = entry.last_seen.max(now);
        if entry.directory != directory {
            entry.directory = directory.to_string();
        }

        if previous == tag {
            Transition::Unchanged
        } else if tag == StatusTag::Idle {
            Transition::BecameIdle
        } else {
            Transition::BecameBusy
        }
    }

    pub fn status(&self, session_id: &str) -> Option<StatusTag> {
        self.sessions.get(session_id).map(|s| s.status)
    }

    pub fn is_idle(&self, session_id: &str) -> bool {
        self.status(session_id) == Some(StatusTag::Idle)
    }

    pub fn directory(&self, session_id: &str) -> Option<&str> {
        self.sessions.get(session_id).map(|s| s.directory.as_str())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drop every entry whose age exceeds the retention window.
    /// Returns the removed session ids so dependent state can follow.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let retention = self.retention;
        let mut removed = Vec::new();
        self.sessions.retain(|id, session| {
            let stale = now.saturating_duration_since(session.last_seen) > retention;
            if stale {
                removed.push(id.clone());
            }
            !stale
        });
        removed
    }
}
