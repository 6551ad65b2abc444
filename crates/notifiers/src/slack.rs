//! Slack incoming-webhook payload (Block Kit)

use idlenotify_protocol::Notification;
use serde_json::{json, Value};

use crate::headline;

pub fn render(notification: &Notification) -> Value {
    let title = headline(notification);
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": title, "emoji": true }
        }),
        json!({
            "type": "section",
            "fields": [
                { "type": "mrkdwn", "text": format!("*Session*\n{}", notification.session_title) },
                { "type": "mrkdwn", "text": format!("*Directory*\n`{}`", notification.project_directory) }
            ]
        }),
    ];

    if let Some(question) = &notification.question {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("*Question*\n>{question}") }
        }));
    }

    if let Some(url) = &notification.desktop_url {
        blocks.push(json!({
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": { "type": "plain_text", "text": "Open session" },
                    "url": url
                }
            ]
        }));
    }

    blocks.push(json!({
        "type": "context",
        "elements": [
            { "type": "mrkdwn", "text": format!("`{}` · {}", notification.session_id, notification.timestamp) }
        ]
    }));

    json!({ "text": title, "blocks": blocks })
}
