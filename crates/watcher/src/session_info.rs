//! Session metadata lookups with an in-memory cache.
//!
//! `GET {base}/session/{id}?directory=...` resolves title, project and parent
//! linkage. Failures never escape: they are logged and reported as "no info".

use std::collections::HashMap;
use std::time::Duration;

use idlenotify_protocol::SessionInfo;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::endpoint;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
}

pub struct SessionInfoCache {
    client: reqwest::Client,
    base_url: Url,
    auth: Option<HeaderValue>,
    cache: HashMap<String, SessionInfo>,
}

impl SessionInfoCache {
    pub fn new(client: reqwest::Client, base_url: Url, auth: Option<HeaderValue>) -> Self {
        Self {
            client,
            base_url,
            auth,
            cache: HashMap::new(),
        }
    }

    /// Cached info, or a fresh lookup on miss. Only successful lookups are cached.
    pub async fn fetch(&mut self, session_id: &str, directory: &str) -> Option<SessionInfo> {
        if let Some(info) = self.cache.get(session_id) {
            return Some(info.clone());
        }

        match self.lookup(session_id, directory).await {
            Ok(info) => {
                debug!(
                    component = "session_info",
                    event = "session_info.fetched",
                    session_id = %session_id,
                    project_id = %info.project_id,
                    subagent = info.is_subagent(),
                    "Fetched session info"
                );
                self.cache.insert(session_id.to_string(), info.clone());
                Some(info)
            }
            Err(err) => {
                warn!(
                    component = "session_info",
                    event = "session_info.lookup_failed",
                    session_id = %session_id,
                    error = %err,
                    "Session info lookup failed"
                );
                None
            }
        }
    }

    /// Seed or replace a cache entry.
    #[cfg(test)]
    pub fn insert(&mut self, info: SessionInfo) {
        self.cache.insert(info.id.clone(), info);
    }

    /// Keep only entries whose session id passes `keep`.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.cache.retain(|id, _| keep(id));
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    async fn lookup(&self, session_id: &str, directory: &str) -> Result<SessionInfo, LookupError> {
        let url = session_url(&self.base_url, session_id, directory);
        let mut request = self.client.get(url).timeout(LOOKUP_TIMEOUT);
        if let Some(auth) = &self.auth {
            request = request.header(AUTHORIZATION, auth.clone());
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status(status));
        }
        Ok(resp.json::<SessionInfo>().await?)
    }
}

/// `{base}/session/{id}[?directory=...]`, percent-encoding both parts
pub fn session_url(base: &Url, session_id: &str, directory: &str) -> Url {
    let mut url = endpoint(base, &["session", session_id]);
    if !directory.is_empty() {
        url.query_pairs_mut().append_pair("directory", directory);
    }
    url
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;
    use crate::auth::basic_auth_header;

    async fn start_test_server(hits: Arc<AtomicUsize>) -> Url {
        let app = Router::new().route(
            "/session/{id}",
            get(
                move |Path(id): Path<String>,
                      Query(query): Query<HashMap<String, String>>,
                      headers: HeaderMap| {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        if headers.get("authorization").and_then(|v| v.to_str().ok())
                            != Some("Basic dTpw")
                        {
                            return StatusCode::UNAUTHORIZED.into_response();
                        }
                        match id.as_str() {
                            "ses_top" => Json(json!({
                                "id": id,
                                "title": "Top level",
                                "projectID": "prj_1",
                                "directory": query.get("directory").cloned().unwrap_or_default()
                            }))
                            .into_response(),
                            "ses_child" => Json(json!({
                                "id": id,
                                "projectID": "prj_1",
                                "parentID": "ses_top"
                            }))
                            .into_response(),
                            _ => StatusCode::NOT_FOUND.into_response(),
                        }
                    }
                },
            ),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn cache(base: Url) -> SessionInfoCache {
        SessionInfoCache::new(
            reqwest::Client::new(),
            base,
            Some(basic_auth_header("u", "p").unwrap()),
        )
    }

    #[test]
    fn session_url_encodes_directory() {
        let base = Url::parse("http://localhost:4096").unwrap();
        let url = session_url(&base, "ses_1", "/home/dev/my repo");
        assert_eq!(
            url.as_str(),
            "http://localhost:4096/session/ses_1?directory=%2Fhome%2Fdev%2Fmy+repo"
        );

        let prefixed = Url::parse("http://proxy/opencode/").unwrap();
        assert_eq!(
            session_url(&prefixed, "ses_1", "").as_str(),
            "http://proxy/opencode/session/ses_1"
        );
    }

    #[tokio::test]
    async fn fetch_caches_successful_lookups() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut cache = cache(start_test_server(hits.clone()).await);

        let info = cache.fetch("ses_top", "/repo").await.expect("info");
        assert_eq!(info.display_title(), "Top level");
        assert!(!info.is_subagent());
        cache.fetch("ses_top", "/repo").await.expect("cached");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let child = cache.fetch("ses_child", "/repo").await.expect("info");
        assert_eq!(child.parent_session_id.as_deref(), Some("ses_top"));
        assert_eq!(child.display_title(), "ses_child");
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut cache = cache(start_test_server(hits.clone()).await);

        assert!(cache.fetch("ses_missing", "/repo").await.is_none());
        assert!(cache.fetch("ses_missing", "/repo").await.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn wrong_credentials_yield_none() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = start_test_server(hits).await;
        let mut cache = SessionInfoCache::new(reqwest::Client::new(), base, None);
        assert!(cache.fetch("ses_top", "/repo").await.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_yields_none() {
        let mut cache = SessionInfoCache::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/").unwrap(),
            None,
        );
        assert!(cache.fetch("ses_top", "/repo").await.is_none());
    }

    #[test]
    fn retain_drops_rejected_entries() {
        let mut cache = cache(Url::parse("http://127.0.0.1:9/").unwrap());
        for id in ["ses_1", "ses_2"] {
            cache.insert(SessionInfo {
                id: id.into(),
                title: None,
                project_id: "prj".into(),
                parent_session_id: None,
            });
        }
        assert_eq!(cache.len(), 2);
        cache.retain(|id| id == "ses_2");
        assert_eq!(cache.len(), 1);
    }
}
