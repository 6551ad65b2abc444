//! Server → watcher event-stream frames

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::SessionStatus;

/// `payload.type` of a session status change.
pub const SESSION_STATUS: &str = "session.status";
/// `payload.type` of a message part update (tool execution state lives here).
pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";

const QUESTION_TOOL: &str = "question";

/// One decoded frame of the global event stream.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub directory: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub properties: Option<Value>,
}

/// Errors raised when a recognised event carries unexpected properties
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{event_type} event has no properties")]
    MissingProperties { event_type: String },

    #[error("invalid {event_type} properties: {source}")]
    InvalidProperties {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Events the watcher acts on
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Session status changed (idle / busy / retry)
    SessionStatus {
        directory: String,
        session_id: String,
        status: SessionStatus,
    },

    /// The question tool started asking the user something
    QuestionAsked {
        directory: String,
        session_id: String,
        part_id: String,
        question: String,
    },

    /// A question tool part finished (answered, dismissed or failed)
    QuestionResolved {
        directory: String,
        session_id: String,
        part_id: String,
    },
}

impl StreamEvent {
    pub fn session_id(&self) -> &str {
        match self {
            StreamEvent::SessionStatus { session_id, .. }
            | StreamEvent::QuestionAsked { session_id, .. }
            | StreamEvent::QuestionResolved { session_id, .. } => session_id,
        }
    }

    pub fn directory(&self) -> &str {
        match self {
            StreamEvent::SessionStatus { directory, .. }
            | StreamEvent::QuestionAsked { directory, .. }
            | StreamEvent::QuestionResolved { directory, .. } => directory,
        }
    }

    /// Map an envelope to an actionable event.
    ///
    /// Returns `Ok(None)` for payload types the watcher ignores and for part
    /// updates that are not a question tool.
    pub fn from_envelope(envelope: Envelope) -> Result<Option<Self>, EventError> {
        let Envelope { directory, payload } = envelope;
        match payload.event_type.as_str() {
            SESSION_STATUS => {
                let props: StatusProperties = parse_properties(&payload)?;
                Ok(Some(StreamEvent::SessionStatus {
                    directory,
                    session_id: props.session_id,
                    status: props.status,
                }))
            }
            MESSAGE_PART_UPDATED => {
                let props: PartProperties = parse_properties(&payload)?;
                Ok(question_from_part(directory, props.part))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct StatusProperties {
    #[serde(rename = "sessionID")]
    session_id: String,
    status: SessionStatus,
}

#[derive(Deserialize)]
struct PartProperties {
    part: Part,
}

#[derive(Deserialize)]
struct Part {
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "type")]
    part_type: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    state: Option<ToolState>,
}

#[derive(Deserialize)]
struct ToolState {
    status: String,
    #[serde(default)]
    input: Option<Value>,
}

fn parse_properties<T: for<'de> Deserialize<'de>>(payload: &Payload) -> Result<T, EventError> {
    let props = payload
        .properties
        .clone()
        .ok_or_else(|| EventError::MissingProperties {
            event_type: payload.event_type.clone(),
        })?;
    serde_json::from_value(props).map_err(|source| EventError::InvalidProperties {
        event_type: payload.event_type.clone(),
        source,
    })
}

fn question_from_part(directory: String, part: Part) -> Option<StreamEvent> {
    if part.part_type != "tool" || part.tool.as_deref() != Some(QUESTION_TOOL) {
        return None;
    }
    let state = part.state?;
    match state.status.as_str() {
        "pending" | "running" => {}
        "completed" | "error" => {
            return Some(StreamEvent::QuestionResolved {
                directory,
                session_id: part.session_id,
                part_id: part.id,
            });
        }
        _ => return None,
    }
    let input = state.input?;
    let question = input
        .get("questions")
        .and_then(|q| q.as_array())
        .and_then(|q| q.first())
        .and_then(|q| q.get("question"))
        .and_then(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())?;
    Some(StreamEvent::QuestionAsked {
        directory,
        session_id: part.session_id,
        part_id: part.id,
        question: question.to_string(),
    })
}
