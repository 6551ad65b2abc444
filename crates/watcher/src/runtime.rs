//! Notifier runtime: the single owner of all session state.
//!
//! Stream events and timer expiries arrive as `RuntimeMessage`s on one
//! channel and are handled strictly in order by one task, so the tracker,
//! the timers, the subagent set and the question dedup set never need a lock.
//! Finalized notifications leave through `notify_tx` to the dispatcher.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use idlenotify_protocol::{Notification, SessionInfo, SessionStatus, StreamEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scheduler::{DebounceScheduler, TimerId};
use crate::session_info::SessionInfoCache;
use crate::tracker::{SessionTracker, Transition, RETENTION, SWEEP_INTERVAL};

/// Questions are deduplicated per session by this many leading characters.
const QUESTION_KEY_CHARS: usize = 80;

#[derive(Debug)]
pub enum RuntimeMessage {
    Stream(StreamEvent),
    IdleElapsed {
        session_id: String,
        timer: TimerId,
    },
    QuestionElapsed {
        timer_key: String,
        session_id: String,
        directory: String,
        part_id: String,
        question: String,
        timer: TimerId,
    },
}

/// A question waiting out its debounce window, indexed by tool part id
#[derive(Debug)]
struct PendingQuestion {
    session_id: String,
    key: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub debounce: Duration,
    pub desktop_url: Option<String>,
    pub notify_idle: bool,
    pub notify_question: bool,
}

pub fn create_runtime_channel() -> (
    mpsc::UnboundedSender<RuntimeMessage>,
    mpsc::UnboundedReceiver<RuntimeMessage>,
) {
    mpsc::unbounded_channel()
}

/// Stream listener that forwards every event into the runtime channel.
pub fn stream_listener(
    tx: mpsc::UnboundedSender<RuntimeMessage>,
) -> impl Fn(&StreamEvent) + Send + Sync + 'static {
    move |event| {
        if tx.send(RuntimeMessage::Stream(event.clone())).is_err() {
            debug!(
                component = "runtime",
                event = "runtime.channel_closed",
                "Runtime gone, dropping stream event"
            );
        }
    }
}

pub struct NotifierRuntime {
    settings: RuntimeSettings,
    tracker: SessionTracker,
    idle_timers: DebounceScheduler<RuntimeMessage>,
    question_timers: DebounceScheduler<RuntimeMessage>,
    subagents: HashSet<String>,
    notified_questions: HashMap<String, HashSet<String>>,
    pending_questions: HashMap<String, PendingQuestion>,
    /// Last question activity per session; sessions that never report a
    /// status are reclaimed from this instead of the tracker.
    question_seen: HashMap<String, Instant>,
    info: SessionInfoCache,
    notify_tx: mpsc::Sender<Notification>,
}

impl NotifierRuntime {
    pub fn new(
        settings: RuntimeSettings,
        info: SessionInfoCache,
        tx: mpsc::UnboundedSender<RuntimeMessage>,
        notify_tx: mpsc::Sender<Notification>,
    ) -> Self {
        Self {
            settings,
            tracker: SessionTracker::default(),
            idle_timers: DebounceScheduler::new(tx.clone()),
            question_timers: DebounceScheduler::new(tx),
            subagents: HashSet::new(),
            notified_questions: HashMap::new(),
            pending_questions: HashMap::new(),
            question_seen: HashMap::new(),
            info,
            notify_tx,
        }
    }

    /// Process messages until cancelled or every sender is gone.
    /// Pending timers are abandoned on exit.
    ///
    /// Messages are handled one at a time, so a slow session lookup holds up
    /// every other session for at most `LOOKUP_TIMEOUT`. Cancellation still
    /// interrupts it.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RuntimeMessage>,
        cancel: CancellationToken,
    ) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick.
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.handle(msg) => {}
                    },
                    None => break,
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        info!(
            component = "runtime",
            event = "runtime.stopped",
            tracked_sessions = self.tracked_sessions(),
            pending_timers = self.idle_timers.len() + self.question_timers.len(),
            "Notifier runtime stopped"
        );
    }

    pub async fn handle(&mut self, msg: RuntimeMessage) {
        match msg {
            RuntimeMessage::Stream(StreamEvent::SessionStatus {
                directory,
                session_id,
                status,
            }) => {
                self.observe_status(&session_id, &status, &directory, Instant::now());
            }
            RuntimeMessage::Stream(StreamEvent::QuestionAsked {
                directory,
                session_id,
                part_id,
                question,
            }) => {
                self.observe_question(session_id, directory, part_id, question, Instant::now());
            }
            RuntimeMessage::Stream(StreamEvent::QuestionResolved {
                session_id,
                part_id,
                ..
            }) => {
                self.observe_question_resolved(&session_id, &part_id, Instant::now());
            }
            RuntimeMessage::IdleElapsed { session_id, timer } => {
                self.idle_elapsed(session_id, timer).await;
            }
            RuntimeMessage::QuestionElapsed {
                timer_key,
                session_id,
                directory,
                part_id,
                question,
                timer,
            } => {
                self.pending_questions.remove(&part_id);
                self.question_elapsed(&timer_key, session_id, directory, question, timer)
                    .await;
            }
        }
    }

    pub(crate) fn observe_status(
        &mut self,
        session_id: &str,
        status: &SessionStatus,
        directory: &str,
        now: Instant,
    ) -> Transition {
        let transition = self.tracker.observe(session_id, status, directory, now);
        debug!(
            component = "runtime",
            event = "runtime.status",
            session_id = %session_id,
            status = status.tag().as_str(),
            transition = ?transition,
            "Session status observed"
        );

        if !status.is_idle() {
            if self.idle_timers.cancel(session_id) {
                info!(
                    component = "runtime",
                    event = "runtime.idle_cancelled",
                    session_id = %session_id,
                    status = status.tag().as_str(),
                    "Session became busy again, idle notification cancelled"
                );
            }
            return transition;
        }

        if transition != Transition::BecameIdle || !self.settings.notify_idle {
            return transition;
        }
        if self.subagents.contains(session_id) {
            debug!(
                component = "runtime",
                event = "runtime.subagent_skipped",
                session_id = %session_id,
                "Known subagent went idle, not scheduling"
            );
            return transition;
        }

        let sid = session_id.to_string();
        let scheduled = self
            .idle_timers
            .schedule(session_id, self.settings.debounce, move |timer| {
                RuntimeMessage::IdleElapsed {
                    session_id: sid,
                    timer,
                }
            });
        if scheduled.is_some() {
            debug!(
                component = "runtime",
                event = "runtime.idle_scheduled",
                session_id = %session_id,
                debounce_ms = self.settings.debounce.as_millis() as u64,
                "Idle notification scheduled"
            );
        }
        transition
    }

    fn observe_question(
        &mut self,
        session_id: String,
        directory: String,
        part_id: String,
        question: String,
        now: Instant,
    ) {
        self.question_seen.insert(session_id.clone(), now);
        if !self.settings.notify_question || self.subagents.contains(&session_id) {
            return;
        }

        let key = question_key(&question);
        let seen = self
            .notified_questions
            .entry(session_id.clone())
            .or_default();
        if !seen.insert(key.clone()) {
            debug!(
                component = "runtime",
                event = "runtime.question_duplicate",
                session_id = %session_id,
                part_id = %part_id,
                "Question already notified"
            );
            return;
        }

        let timer_key = question_timer_key(&session_id, &key);
        let message_key = timer_key.clone();
        let message_part = part_id.clone();
        let message_session = session_id.clone();
        let delay = self.settings.debounce;
        let scheduled = self.question_timers.schedule(&timer_key, delay, move |timer| {
            RuntimeMessage::QuestionElapsed {
                timer_key: message_key,
                session_id: message_session,
                directory,
                part_id: message_part,
                question,
                timer,
            }
        });
        if scheduled.is_some() {
            self.pending_questions
                .insert(part_id, PendingQuestion { session_id, key });
        }
    }

    /// A question answered inside its debounce window never notifies. Its
    /// dedup key is released so the same question asked again later does.
    fn observe_question_resolved(&mut self, session_id: &str, part_id: &str, now: Instant) {
        self.question_seen.insert(session_id.to_string(), now);
        let Some(pending) = self.pending_questions.remove(part_id) else {
            return;
        };

        let timer_key = question_timer_key(&pending.session_id, &pending.key);
        if self.question_timers.cancel(&timer_key) {
            if let Some(keys) = self.notified_questions.get_mut(&pending.session_id) {
                keys.remove(&pending.key);
            }
            info!(
                component = "runtime",
                event = "runtime.question_cancelled",
                session_id = %pending.session_id,
                part_id = %part_id,
                "Question answered within the debounce window, notification cancelled"
            );
        }
    }

    async fn idle_elapsed(&mut self, session_id: String, timer: TimerId) {
        if !self.idle_timers.complete(&session_id, timer) {
            return;
        }
        if !self.tracker.is_idle(&session_id) {
            debug!(
                component = "runtime",
                event = "runtime.idle_aborted",
                session_id = %session_id,
                "Session no longer idle at expiry"
            );
            return;
        }

        let directory = self
            .tracker
            .directory(&session_id)
            .unwrap_or_default()
            .to_string();
        let Some(info) = self.resolve_top_level(&session_id, &directory).await else {
            return;
        };

        let notification = Notification::idle(
            &session_id,
            &directory,
            info.as_ref(),
            self.settings.desktop_url.as_deref(),
        );
        self.dispatch(notification).await;
    }

    async fn question_elapsed(
        &mut self,
        timer_key: &str,
        session_id: String,
        directory: String,
        question: String,
        timer: TimerId,
    ) {
        if !self.question_timers.complete(timer_key, timer) {
            return;
        }
        let Some(info) = self.resolve_top_level(&session_id, &directory).await else {
            return;
        };

        let notification = Notification::question(
            &session_id,
            &directory,
            info.as_ref(),
            self.settings.desktop_url.as_deref(),
            question,
        );
        self.dispatch(notification).await;
    }

    /// `None` if the session is a subagent (and must not notify);
    /// `Some(None)` if the lookup failed and fallback fields should be used.
    async fn resolve_top_level(
        &mut self,
        session_id: &str,
        directory: &str,
    ) -> Option<Option<SessionInfo>> {
        if self.subagents.contains(session_id) {
            return None;
        }

        let info = self.info.fetch(session_id, directory).await;
        if let Some(parent) = info.as_ref().and_then(|i| i.parent_session_id.as_deref()) {
            info!(
                component = "runtime",
                event = "runtime.subagent_detected",
                session_id = %session_id,
                parent_session_id = %parent,
                "Subagent session, notifications suppressed"
            );
            self.subagents.insert(session_id.to_string());
            return None;
        }
        Some(info)
    }

    async fn dispatch(&self, notification: Notification) {
        info!(
            component = "runtime",
            event = "runtime.notify",
            session_id = %notification.session_id,
            kind = notification.kind.as_str(),
            title = %notification.session_title,
            "Dispatching notification"
        );
        if self.notify_tx.send(notification).await.is_err() {
            warn!(
                component = "runtime",
                event = "runtime.dispatcher_closed",
                "Dispatcher channel closed, notification dropped"
            );
        }
    }

    /// Reclaim sessions not seen within the retention window, together with
    /// their timers, subagent marker, question dedup keys and cached info.
    ///
    /// A session is live while either its last status or its last question
    /// activity is within `RETENTION`.
    pub(crate) fn sweep(&mut self, now: Instant) {
        let removed = self.tracker.sweep(now);
        for session_id in &removed {
            self.idle_timers.cancel(session_id);
        }
        let questions_before = self.question_seen.len();
        self.question_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) <= RETENTION);
        let questions_expired = questions_before - self.question_seen.len();

        let tracker = &self.tracker;
        let question_seen = &self.question_seen;
        let live = |id: &str| tracker.status(id).is_some() || question_seen.contains_key(id);
        self.subagents.retain(|id| live(id.as_str()));
        self.notified_questions.retain(|id, _| live(id.as_str()));
        self.pending_questions
            .retain(|_, pending| live(pending.session_id.as_str()));
        self.info.retain(live);

        if !removed.is_empty() || questions_expired > 0 {
            info!(
                component = "runtime",
                event = "runtime.sweep",
                removed = removed.len(),
                questions_expired = questions_expired,
                remaining = self.tracker.len(),
                cached_info = self.info.len(),
                "Reclaimed stale sessions"
            );
        }
    }

    pub fn tracked_sessions(&self) -> usize {
        self.tracker.len()
    }

    #[cfg(test)]
    pub fn has_pending_idle(&self, session_id: &str) -> bool {
        self.idle_timers.is_pending(session_id)
    }

    #[cfg(test)]
    pub fn is_known_subagent(&self, session_id: &str) -> bool {
        self.subagents.contains(session_id)
    }
}

fn question_key(question: &str) -> String {
    question.trim().chars().take(QUESTION_KEY_CHARS).collect()
}

fn question_timer_key(session_id: &str, key: &str) -> String {
    format!("{session_id}:{key}")
}
