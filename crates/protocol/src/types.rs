//! Core types shared across the protocol

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Session status as reported by the session server.
///
/// Only the variant drives transition logic; retry details are passed through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    #[serde(alias = "retrying")]
    Retry {
        #[serde(default)]
        attempt: u32,
        #[serde(default)]
        message: String,
        #[serde(default)]
        next: u64,
    },
}

/// Payload-free view of [`SessionStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    Idle,
    Busy,
    Retry,
}

impl SessionStatus {
    pub fn tag(&self) -> StatusTag {
        match self {
            SessionStatus::Idle => StatusTag::Idle,
            SessionStatus::Busy => StatusTag::Busy,
            SessionStatus::Retry { .. } => StatusTag::Retry,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionStatus::Idle)
    }
}

impl StatusTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTag::Idle => "idle",
            StatusTag::Busy => "busy",
            StatusTag::Retry => "retry",
        }
    }
}

/// Session metadata returned by `GET /session/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "projectID")]
    pub project_id: String,
    #[serde(rename = "parentID", default)]
    pub parent_session_id: Option<String>,
}

impl SessionInfo {
    /// Title to show to humans; falls back to the session id.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title,
            _ => &self.id,
        }
    }

    /// Sessions spawned by another session never notify.
    pub fn is_subagent(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

/// Why a notification was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Idle,
    Question,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Idle => "idle",
            NotificationKind::Question => "question",
        }
    }
}

/// A finalized notification, built once per dispatch and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub session_id: String,
    pub session_title: String,
    pub project_id: String,
    pub project_directory: String,
    pub desktop_url: Option<String>,
    pub timestamp: String,
    pub question: Option<String>,
}

impl Notification {
    /// Build an idle notification. `info` is `None` when the lookup failed;
    /// the session id then stands in for the title and no link is produced.
    pub fn idle(
        session_id: &str,
        directory: &str,
        info: Option<&SessionInfo>,
        desktop_base: Option<&str>,
    ) -> Self {
        Self::build(NotificationKind::Idle, session_id, directory, info, desktop_base, None)
    }

    pub fn question(
        session_id: &str,
        directory: &str,
        info: Option<&SessionInfo>,
        desktop_base: Option<&str>,
        question: String,
    ) -> Self {
        Self::build(
            NotificationKind::Question,
            session_id,
            directory,
            info,
            desktop_base,
            Some(question),
        )
    }

    fn build(
        kind: NotificationKind,
        session_id: &str,
        directory: &str,
        info: Option<&SessionInfo>,
        desktop_base: Option<&str>,
        question: Option<String>,
    ) -> Self {
        let session_title = info
            .map(|i| i.display_title().to_string())
            .unwrap_or_else(|| session_id.to_string());
        let project_id = info.map(|i| i.project_id.clone()).unwrap_or_default();
        let desktop_url = match desktop_base {
            Some(base) if !project_id.is_empty() => {
                Some(desktop_url(base, &project_id, session_id))
            }
            _ => None,
        };

        Self {
            kind,
            session_id: session_id.to_string(),
            session_title,
            project_id,
            project_directory: directory.to_string(),
            desktop_url,
            timestamp: now_rfc3339(),
            question,
        }
    }
}

/// `{base}/{project_id}/session/{session_id}` with any trailing slash on base stripped
pub fn desktop_url(base: &str, project_id: &str, session_id: &str) -> String {
    format!(
        "{}/{}/session/{}",
        base.trim_end_matches('/'),
        project_id,
        session_id
    )
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
