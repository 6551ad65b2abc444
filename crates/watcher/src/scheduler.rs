//! Keyed debounce timers.
//!
//! Each timer is a sleeper task that posts a message back to the runtime
//! channel when it elapses. At most one timer exists per key. Cancel aborts
//! the sleeper and forgets it; a message that was already in flight is
//! recognised as stale by its [`TimerId`] and ignored.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identifies one scheduled timer. Ids are never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct PendingTimer {
    id: TimerId,
    handle: JoinHandle<()>,
}

pub struct DebounceScheduler<M> {
    tx: mpsc::UnboundedSender<M>,
    pending: HashMap<String, PendingTimer>,
    next_id: u64,
}

impl<M: Send + 'static> DebounceScheduler<M> {
    pub fn new(tx: mpsc::UnboundedSender<M>) -> Self {
        Self {
            tx,
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Start a timer for `key` unless one is already pending.
    ///
    /// `message` builds what gets posted on expiry; it receives the timer id
    /// so the receiver can hand it back to [`complete`](Self::complete).
    /// Returns `None` when a timer for `key` already exists.
    pub fn schedule<F>(&mut self, key: &str, delay: Duration, message: F) -> Option<TimerId>
    where
        F: FnOnce(TimerId) -> M + Send + 'static,
    {
        if self.pending.contains_key(key) {
            return None;
        }

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message(id));
        });

        self.pending
            .insert(key.to_string(), PendingTimer { id, handle });
        Some(id)
    }

    /// Cancel the pending timer for `key`. Returns whether one existed.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Claim an elapsed timer. Returns `true` only if `id` is still the live
    /// timer for `key`; stale or cancelled timers return `false`.
    pub fn complete(&mut self, key: &str, id: TimerId) -> bool {
        match self.pending.get(key) {
            Some(timer) if timer.id == id => {
                self.pending.remove(key);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct Elapsed(String, TimerId);

    fn scheduler() -> (DebounceScheduler<Elapsed>, mpsc::UnboundedReceiver<Elapsed>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DebounceScheduler::new(tx), rx)
    }

    #[tokio::test]
    async fn elapsed_timer_posts_message_and_completes_once() {
        let (mut scheduler, mut rx) = scheduler();
        let id = scheduler
            .schedule("s1", Duration::from_millis(10), |id| Elapsed("s1".into(), id))
            .expect("scheduled");

        let msg = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(msg, Elapsed("s1".into(), id));
        assert!(scheduler.complete("s1", id));
        assert!(!scheduler.complete("s1", id));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn second_schedule_for_same_key_is_refused() {
        let (mut scheduler, _rx) = scheduler();
        assert!(scheduler
            .schedule("s1", Duration::from_secs(60), |id| Elapsed("s1".into(), id))
            .is_some());
        assert!(scheduler
            .schedule("s1", Duration::from_secs(60), |id| Elapsed("s1".into(), id))
            .is_none());
        assert!(scheduler
            .schedule("s2", Duration::from_secs(60), |id| Elapsed("s2".into(), id))
            .is_some());
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (mut scheduler, mut rx) = scheduler();
        scheduler.schedule("s1", Duration::from_millis(20), |id| Elapsed("s1".into(), id));
        assert!(scheduler.cancel("s1"));
        assert!(!scheduler.cancel("s1"));
        assert!(!scheduler.is_pending("s1"));

        let res = timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(res.is_err(), "cancelled timer must not post");
    }

    #[tokio::test]
    async fn stale_message_does_not_claim_a_newer_timer() {
        let (mut scheduler, mut rx) = scheduler();
        let first = scheduler
            .schedule("s1", Duration::ZERO, |id| Elapsed("s1".into(), id))
            .unwrap();
        // Let the first timer post before it gets cancelled.
        let stale = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(scheduler.cancel("s1"));

        let second = scheduler
            .schedule("s1", Duration::from_secs(60), |id| Elapsed("s1".into(), id))
            .unwrap();
        assert_ne!(first, second);
        assert!(!scheduler.complete("s1", stale.1));
        assert!(scheduler.is_pending("s1"));
    }
}
