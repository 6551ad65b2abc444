//! Generic JSON webhook envelope

use idlenotify_protocol::Notification;
use serde_json::{json, Value};

/// `{ event, session:{id,title}, project:{id,directory}, desktopUrl, timestamp, question? }`
pub fn render(notification: &Notification) -> Value {
    let mut payload = json!({
        "event": notification.kind.as_str(),
        "session": {
            "id": notification.session_id,
            "title": notification.session_title
        },
        "project": {
            "id": notification.project_id,
            "directory": notification.project_directory
        },
        "desktopUrl": notification.desktop_url,
        "timestamp": notification.timestamp
    });
    if let Some(question) = &notification.question {
        payload["question"] = json!(question);
    }
    payload
}

#[cfg(test)]
mod tests {
    use idlenotify_protocol::NotificationKind;

    use super::*;
    use crate::test_support::notification;

    #[test]
    fn idle_envelope_shape() {
        let payload = render(&notification(NotificationKind::Idle));
        assert_eq!(
            payload,
            json!({
                "event": "idle",
                "session": { "id": "ses_1", "title": "Refactor parser" },
                "project": { "id": "prj_1", "directory": "/home/dev/repo" },
                "desktopUrl": "http://localhost:4096/prj_1/session/ses_1",
                "timestamp": "2026-01-02T03:04:05.000Z"
            })
        );
    }

    #[test]
    fn question_envelope_includes_question() {
        let payload = render(&notification(NotificationKind::Question));
        assert_eq!(payload["event"], "question");
        assert_eq!(payload["question"], "Ship it?");
    }
}
