//! Configuration file loading and validation.
//!
//! Resolved once at startup: `--config` > `IDLENOTIFY_CONFIG` env >
//! `<config dir>/idlenotify/config.toml`. CLI/env overrides for the server
//! connection are applied on top of the file before validation. Any error
//! here is fatal; nothing connects until the config is usable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use idlenotify_notifiers::{Destination, DestinationKind};
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::auth::basic_auth_header;

pub const DEFAULT_DEBOUNCE_MS: u64 = 3000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    notify: NotifySection,
    #[serde(default)]
    destinations: Vec<DestinationSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NotifySection {
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    desktop_url: Option<String>,
    #[serde(default = "default_true")]
    idle: bool,
    #[serde(default = "default_true")]
    question: bool,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            desktop_url: None,
            idle: true,
            question: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationSection {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: DestinationKind,
    url: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    headers: HashMap<String, String>,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_true() -> bool {
    true
}

/// Validated, ready-to-use configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: Url,
    pub auth: Option<HeaderValue>,
    pub debounce: Duration,
    pub desktop_url: String,
    pub notify_idle: bool,
    pub notify_question: bool,
    pub destinations: Vec<Destination>,
}

/// `<config dir>/idlenotify/config.toml`, if a config dir exists on this platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("idlenotify").join("config.toml"))
}

pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, overrides)
}

pub fn parse(text: &str, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    validate(file, overrides)
}

fn validate(file: FileConfig, overrides: &ConfigOverrides) -> Result<Config, ConfigError> {
    let raw_url = overrides
        .server_url
        .clone()
        .or(file.server.url)
        .ok_or_else(|| ConfigError::Invalid("server.url is required".into()))?;
    let server_url = parse_http_url("server.url", &raw_url)?;

    let username = overrides.username.clone().or(file.server.username);
    let password = overrides.password.clone().or(file.server.password);
    let auth = match (username, password) {
        (Some(user), password) => Some(
            basic_auth_header(&user, password.as_deref().unwrap_or_default()).map_err(|_| {
                ConfigError::Invalid("server credentials contain invalid characters".into())
            })?,
        ),
        (None, Some(_)) => {
            return Err(ConfigError::Invalid(
                "server.password is set but server.username is missing".into(),
            ))
        }
        (None, None) => None,
    };

    let debounce_ms = overrides.debounce_ms.unwrap_or(file.notify.debounce_ms);

    let desktop_url = match file.notify.desktop_url {
        Some(url) => parse_http_url("notify.desktop_url", &url)?.to_string(),
        None => server_url.to_string(),
    };

    let mut destinations = Vec::with_capacity(file.destinations.len());
    for (index, section) in file.destinations.into_iter().enumerate() {
        let name = section
            .name
            .unwrap_or_else(|| format!("{}-{}", section.kind, index + 1));
        parse_http_url(&format!("destinations[{index}].url"), &section.url)?;
        if !section.headers.is_empty() && section.kind != DestinationKind::Webhook {
            return Err(ConfigError::Invalid(format!(
                "destination {name}: headers are only supported for webhook destinations"
            )));
        }
        destinations.push(Destination {
            name,
            kind: section.kind,
            url: section.url,
            headers: section.headers,
            enabled: section.enabled,
        });
    }

    if !destinations.iter().any(|d| d.enabled) {
        return Err(ConfigError::Invalid(
            "at least one enabled destination is required".into(),
        ));
    }

    Ok(Config {
        server_url,
        auth,
        debounce: Duration::from_millis(debounce_ms),
        desktop_url,
        notify_idle: file.notify.idle,
        notify_question: file.notify.question,
        destinations,
    })
}

/// Append path segments to the server base URL, keeping any path prefix.
pub fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn parse_http_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw)
        .map_err(|err| ConfigError::Invalid(format!("{field}: {err} ({raw})")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid(format!(
            "{field}: unsupported scheme {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"
        [server]
        url = "http://127.0.0.1:4096"

        [[destinations]]
        type = "slack"
        url = "https://hooks.slack.com/services/T/B/X"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(MINIMAL, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.server_url.as_str(), "http://127.0.0.1:4096/");
        assert!(config.auth.is_none());
        assert_eq!(config.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(config.desktop_url, "http://127.0.0.1:4096/");
        assert!(config.notify_idle);
        assert!(config.notify_question);
        assert_eq!(config.destinations.len(), 1);
        assert_eq!(config.destinations[0].name, "slack-1");
        assert!(config.destinations[0].enabled);
    }

    #[test]
    fn full_config_round_trips_fields() {
        let text = r#"
            [server]
            url = "https://opencode.internal:4096"
            username = "opencode"
            password = "hunter2"

            [notify]
            debounce_ms = 0
            desktop_url = "https://desktop.example/"
            question = false

            [[destinations]]
            name = "ops"
            type = "webhook"
            url = "https://example.com/hook"
            headers = { "X-Token" = "abc" }

            [[destinations]]
            type = "teams"
            url = "https://example.com/teams"
            enabled = false
        "#;
        let config = parse(text, &ConfigOverrides::default()).unwrap();
        assert_eq!(
            config.auth.as_ref().unwrap().to_str().unwrap(),
            "Basic b3BlbmNvZGU6aHVudGVyMg=="
        );
        assert_eq!(config.debounce, Duration::ZERO);
        assert_eq!(config.desktop_url, "https://desktop.example/");
        assert!(!config.notify_question);
        assert_eq!(config.destinations[0].name, "ops");
        assert_eq!(config.destinations[0].headers["X-Token"], "abc");
        assert_eq!(config.destinations[1].name, "teams-2");
        assert!(!config.destinations[1].enabled);
    }

    #[test]
    fn overrides_win_over_file() {
        let overrides = ConfigOverrides {
            server_url: Some("http://10.0.0.5:4096".into()),
            username: Some("me".into()),
            password: None,
            debounce_ms: Some(50),
        };
        let config = parse(MINIMAL, &overrides).unwrap();
        assert_eq!(config.server_url.host_str(), Some("10.0.0.5"));
        assert_eq!(config.auth.unwrap().to_str().unwrap(), "Basic bWU6");
        assert_eq!(config.debounce, Duration::from_millis(50));
    }

    #[test]
    fn missing_server_url_is_rejected() {
        let text = r#"
            [[destinations]]
            type = "discord"
            url = "https://discord.com/api/webhooks/1/x"
        "#;
        let err = parse(text, &ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("server.url is required"));
    }

    #[test]
    fn no_enabled_destination_is_rejected() {
        let text = r#"
            [server]
            url = "http://127.0.0.1:4096"

            [[destinations]]
            type = "discord"
            url = "https://discord.com/api/webhooks/1/x"
            enabled = false
        "#;
        let err = parse(text, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn bad_urls_and_headers_are_rejected() {
        let bad_scheme = r#"
            [server]
            url = "ftp://127.0.0.1"
            [[destinations]]
            type = "slack"
            url = "https://hooks.slack.com/x"
        "#;
        assert!(parse(bad_scheme, &ConfigOverrides::default()).is_err());

        let headers_on_slack = r#"
            [server]
            url = "http://127.0.0.1:4096"
            [[destinations]]
            type = "slack"
            url = "https://hooks.slack.com/x"
            headers = { "X-A" = "b" }
        "#;
        let err = parse(headers_on_slack, &ConfigOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("only supported for webhook"));

        let unknown_kind = r#"
            [server]
            url = "http://127.0.0.1:4096"
            [[destinations]]
            type = "pager"
            url = "https://example.com"
        "#;
        assert!(matches!(
            parse(unknown_kind, &ConfigOverrides::default()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn password_without_username_is_rejected() {
        let overrides = ConfigOverrides {
            password: Some("secret".into()),
            ..Default::default()
        };
        let err = parse(MINIMAL, &overrides).unwrap_err();
        assert!(err.to_string().contains("username is missing"));
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        let base = Url::parse("http://proxy.local/opencode").unwrap();
        assert_eq!(
            endpoint(&base, &["global", "event"]).as_str(),
            "http://proxy.local/opencode/global/event"
        );
        let root = Url::parse("http://127.0.0.1:4096/").unwrap();
        assert_eq!(
            endpoint(&root, &["global", "event"]).as_str(),
            "http://127.0.0.1:4096/global/event"
        );
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load(file.path(), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.destinations.len(), 1);

        let missing = load(Path::new("/nonexistent/idlenotify.toml"), &ConfigOverrides::default());
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
