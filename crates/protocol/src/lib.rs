//! idlenotify protocol
//!
//! Shared types for the event stream consumed from the session server
//! and the notification records handed to webhook destinations.

pub mod event;
pub mod types;

pub use event::{Envelope, EventError, Payload, StreamEvent};
pub use types::*;
