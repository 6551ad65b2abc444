//! idlenotify notifiers
//!
//! Webhook destinations for finalized notifications.
//! Each destination renders its own payload, POSTs it, and treats any 2xx
//! status as delivered. Fan-out delivers to every enabled destination
//! independently; one failing destination never blocks the others.

pub mod discord;
pub mod slack;
pub mod teams;
pub mod webhook;

use std::collections::HashMap;
use std::fmt;

use futures::future::join_all;
use idlenotify_protocol::Notification;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while delivering to one destination
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("destination returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Supported destination payload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    Slack,
    Discord,
    Teams,
    Webhook,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::Slack => "slack",
            DestinationKind::Discord => "discord",
            DestinationKind::Teams => "teams",
            DestinationKind::Webhook => "webhook",
        }
    }

    /// Render the wire payload for this destination type.
    pub fn render(&self, notification: &Notification) -> Value {
        match self {
            DestinationKind::Slack => slack::render(notification),
            DestinationKind::Discord => discord::render(notification),
            DestinationKind::Teams => teams::render(notification),
            DestinationKind::Webhook => webhook::render(notification),
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured webhook target
#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub enabled: bool,
}

impl Destination {
    pub fn new(name: impl Into<String>, kind: DestinationKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            url: url.into(),
            headers: HashMap::new(),
            enabled: true,
        }
    }

    /// POST the rendered payload. Any non-2xx status is a failure.
    pub async fn deliver(
        &self,
        client: &reqwest::Client,
        notification: &Notification,
    ) -> Result<(), NotifyError> {
        let mut request = client.post(&self.url).json(&self.kind.render(notification));
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn delivered(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Delivers a notification to every enabled destination concurrently
#[derive(Clone)]
pub struct FanOut {
    client: reqwest::Client,
    destinations: Vec<Destination>,
}

impl FanOut {
    pub fn new(client: reqwest::Client, destinations: Vec<Destination>) -> Self {
        Self {
            client,
            destinations,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn enabled_count(&self) -> usize {
        self.destinations.iter().filter(|d| d.enabled).count()
    }

    /// Attempt delivery once per enabled destination. Failures are logged
    /// and counted, never returned.
    pub async fn dispatch(&self, notification: &Notification) -> DispatchReport {
        let deliveries = self
            .destinations
            .iter()
            .filter(|d| d.enabled)
            .map(|destination| async move {
                let result = destination.deliver(&self.client, notification).await;
                (destination, result)
            });

        let mut report = DispatchReport::default();
        for (destination, result) in join_all(deliveries).await {
            report.attempted += 1;
            match result {
                Ok(()) => {
                    debug!(
                        component = "fanout",
                        event = "fanout.delivered",
                        destination = %destination.name,
                        kind = %destination.kind,
                        session_id = %notification.session_id,
                        "Notification delivered"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        component = "fanout",
                        event = "fanout.delivery_failed",
                        destination = %destination.name,
                        kind = %destination.kind,
                        session_id = %notification.session_id,
                        error = %err,
                        "Notification delivery failed"
                    );
                }
            }
        }
        report
    }
}

/// Short human label used by the chat renderers
pub(crate) fn headline(notification: &Notification) -> String {
    match notification.kind {
        idlenotify_protocol::NotificationKind::Idle => {
            format!("Session idle: {}", notification.session_title)
        }
        idlenotify_protocol::NotificationKind::Question => {
            format!("Input needed: {}", notification.session_title)
        }
    }
}
