//! Microsoft Teams workflow webhook payload (Adaptive Card)

use idlenotify_protocol::Notification;
use serde_json::{json, Value};

use crate::headline;

const CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

pub fn render(notification: &Notification) -> Value {
    let mut body = vec![
        json!({
            "type": "TextBlock",
            "text": headline(notification),
            "weight": "Bolder",
            "size": "Medium",
            "wrap": true
        }),
        json!({
            "type": "FactSet",
            "facts": [
                { "title": "Session", "value": notification.session_title },
                { "title": "Directory", "value": notification.project_directory },
                { "title": "Time", "value": notification.timestamp }
            ]
        }),
    ];
    if let Some(question) = &notification.question {
        body.push(json!({ "type": "TextBlock", "text": question, "wrap": true, "isSubtle": false }));
    }

    let actions: Vec<Value> = notification
        .desktop_url
        .iter()
        .map(|url| json!({ "type": "Action.OpenUrl", "title": "Open session", "url": url }))
        .collect();

    json!({
        "type": "message",
        "attachments": [
            {
                "contentType": CARD_CONTENT_TYPE,
                "content": {
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "type": "AdaptiveCard",
                    "version": "1.4",
                    "body": body,
                    "actions": actions
                }
            }
        ]
    })
}

#[cfg(test)]
mod tests {
    use idlenotify_protocol::NotificationKind;

    use super::*;
    use crate::test_support::notification;

    #[test]
    fn wraps_card_in_message_attachment() {
        let payload = render(&notification(NotificationKind::Idle));
        assert_eq!(payload["type"], "message");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["contentType"], CARD_CONTENT_TYPE);
        assert_eq!(attachment["content"]["type"], "AdaptiveCard");
        assert_eq!(
            attachment["content"]["actions"][0]["url"],
            "http://localhost:4096/prj_1/session/ses_1"
        );
    }

    #[test]
    fn question_adds_text_block() {
        let payload = render(&notification(NotificationKind::Question));
        let body = payload["attachments"][0]["content"]["body"].as_array().unwrap();
        assert_eq!(body.len(), 3);
        assert_eq!(body[2]["text"], "Ship it?");
    }
}
