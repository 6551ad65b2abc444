//! Discord webhook payload (single embed)

use idlenotify_protocol::{Notification, NotificationKind};
use serde_json::{json, Value};

use crate::headline;

const IDLE_COLOR: u32 = 0x2E_CC_71;
const QUESTION_COLOR: u32 = 0xF3_9C_12;

pub fn render(notification: &Notification) -> Value {
    let color = match notification.kind {
        NotificationKind::Idle => IDLE_COLOR,
        NotificationKind::Question => QUESTION_COLOR,
    };

    let description = match &notification.question {
        Some(question) => question.clone(),
        None => "Waiting for your next prompt.".to_string(),
    };

    let mut embed = json!({
        "title": headline(notification),
        "description": description,
        "color": color,
        "timestamp": notification.timestamp,
        "fields": [
            { "name": "Directory", "value": notification.project_directory, "inline": false },
            { "name": "Session", "value": notification.session_id, "inline": true }
        ]
    });
    if let Some(url) = &notification.desktop_url {
        embed["url"] = json!(url);
    }

    json!({ "embeds": [embed] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::notification;

    #[test]
    fn embed_carries_link_and_color() {
        let payload = render(&notification(NotificationKind::Idle));
        let embed = &payload["embeds"][0];
        assert_eq!(embed["url"], "http://localhost:4096/prj_1/session/ses_1");
        assert_eq!(embed["color"], IDLE_COLOR);
        assert_eq!(embed["timestamp"], "2026-01-02T03:04:05.000Z");
    }

    #[test]
    fn question_goes_in_description() {
        let payload = render(&notification(NotificationKind::Question));
        let embed = &payload["embeds"][0];
        assert_eq!(embed["description"], "Ship it?");
        assert_eq!(embed["color"], QUESTION_COLOR);
    }
}
