//! Reconnecting event-stream client.
//!
//! Holds one streaming `GET {base}/global/event` open at a time, decodes it
//! and hands every event to the registered listeners in registration order.
//! Any failure (connect error, non-2xx, read error, end of body) waits out an
//! exponential backoff and reconnects. `stop()` cancels whatever is in flight.

use std::time::Duration;

use bytes::Bytes;
use idlenotify_protocol::StreamEvent;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::endpoint;
use crate::sse::SseDecoder;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
pub const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Callback invoked synchronously for each decoded event
pub type EventListener = Box<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("server returned {0}")]
    Status(StatusCode),

    #[error("stream read failed: {0}")]
    Read(#[source] reqwest::Error),

    #[error("stream ended")]
    Ended,
}

/// Doubling reconnect delay with a cap. Reset on every successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct StreamClient {
    client: reqwest::Client,
    url: Url,
    auth: Option<HeaderValue>,
    listeners: Vec<EventListener>,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl StreamClient {
    /// `client` must not carry a total request timeout; the stream is unbounded.
    pub fn new(
        client: reqwest::Client,
        base_url: &Url,
        auth: Option<HeaderValue>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            url: endpoint(base_url, &["global", "event"]),
            auth,
            listeners: Vec::new(),
            backoff: Backoff::default(),
            cancel,
        }
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Register a listener. Listeners run in registration order for every event.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Abort the current connection and prevent reconnects. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until [`stop`](Self::stop) is called.
    pub async fn start(&self) {
        let mut backoff = self.backoff.clone();
        info!(
            component = "stream_client",
            event = "stream_client.started",
            url = %self.url,
            "Event stream client started"
        );

        while !self.cancel.is_cancelled() {
            let Some(delay) = self.attempt(&mut backoff).await else {
                break;
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            component = "stream_client",
            event = "stream_client.stopped",
            "Event stream client stopped"
        );
    }

    /// One connection attempt. Returns the delay to wait before reconnecting,
    /// or `None` once stopped.
    async fn attempt(&self, backoff: &mut Backoff) -> Option<Duration> {
        let err = match self.connect_and_stream(backoff).await {
            Ok(()) => return None,
            Err(err) => err,
        };

        let delay = backoff.next_delay();
        warn!(
            component = "stream_client",
            event = "stream_client.disconnected",
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "Event stream disconnected, reconnecting"
        );
        Some(delay)
    }

    /// One connection. `Ok(())` means stopped; every other exit is an error.
    async fn connect_and_stream(&self, backoff: &mut Backoff) -> Result<(), StreamError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth.clone());
        }

        let mut resp = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            resp = request.send() => resp.map_err(StreamError::Connect)?,
        };
        let status = resp.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }

        backoff.reset();
        info!(
            component = "stream_client",
            event = "stream_client.connected",
            url = %self.url,
            "Event stream connected"
        );

        let mut decoder = SseDecoder::new();
        loop {
            let chunk: Option<Bytes> = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                chunk = resp.chunk() => chunk.map_err(StreamError::Read)?,
            };
            let Some(chunk) = chunk else {
                return Err(StreamError::Ended);
            };

            for event in decoder.push(&chunk) {
                debug!(
                    component = "stream_client",
                    event = "stream_client.event",
                    session_id = %event.session_id(),
                    "Event received"
                );
                self.emit(&event);
            }
        }
    }

    fn emit(&self, event: &StreamEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }
}
