//! Notification dispatcher. Drains finalized notifications into the fan-out.
//!
//! The runtime hands notifications over a bounded channel so state
//! processing never waits on webhook latency. Each notification is
//! delivered on its own task; `run` returns only after the channel has
//! closed and every started delivery has finished.

use std::sync::Arc;

use idlenotify_notifiers::FanOut;
use idlenotify_protocol::Notification;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 64;

pub fn create_notification_channel() -> (mpsc::Sender<Notification>, mpsc::Receiver<Notification>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

pub struct NotificationDispatcher {
    rx: mpsc::Receiver<Notification>,
    fanout: Arc<FanOut>,
}

impl NotificationDispatcher {
    pub fn new(rx: mpsc::Receiver<Notification>, fanout: Arc<FanOut>) -> Self {
        Self { rx, fanout }
    }

    pub async fn run(mut self) {
        let deliveries = TaskTracker::new();
        while let Some(notification) = self.rx.recv().await {
            let fanout = self.fanout.clone();
            deliveries.spawn(async move {
                let report = fanout.dispatch(&notification).await;
                if report.failed > 0 {
                    warn!(
                        component = "dispatcher",
                        event = "dispatcher.partial_failure",
                        session_id = %notification.session_id,
                        kind = notification.kind.as_str(),
                        attempted = report.attempted,
                        failed = report.failed,
                        "Notification delivered with failures"
                    );
                } else {
                    info!(
                        component = "dispatcher",
                        event = "dispatcher.delivered",
                        session_id = %notification.session_id,
                        kind = notification.kind.as_str(),
                        attempted = report.attempted,
                        "Notification delivered"
                    );
                }
            });
        }

        deliveries.close();
        if !deliveries.is_empty() {
            info!(
                component = "dispatcher",
                event = "dispatcher.draining",
                in_flight = deliveries.len(),
                "Waiting for in-flight notifications"
            );
        }
        deliveries.wait().await;
    }
}
