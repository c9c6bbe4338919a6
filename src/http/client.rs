//! The [`HttpClient`] trait and a deterministic test double.
//!
//! Every orchestration component (C5-C12) is generic/parametrized over an
//! `Arc<dyn HttpClient>` rather than talking to a concrete transport
//! directly, so the full supervisor/poller/pipeline logic can be exercised
//! in tests without a socket -- the same shape as the teacher's
//! `Connector` trait (`src/connectors/mod.rs`) sitting in front of a real
//! network call.

use crate::error::{Error, Result};
use crate::http::normalize_error_body;
use async_trait::async_trait;
use asupersync::http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Timeout policy (spec §4.1). Polling requests pass `None`: their total
/// budget is owned by the calling supervisor, not by a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    LightRead,
    SynchronousBulk,
    Poll,
}

impl RequestKind {
    pub fn timeout(self) -> Option<Duration> {
        match self {
            Self::LightRead => Some(Duration::from_secs(10)),
            Self::SynchronousBulk => Some(Duration::from_secs(600)),
            Self::Poll => None,
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, path: &str, kind: RequestKind) -> Result<Value>;
    async fn post(&self, path: &str, body: Value, kind: RequestKind) -> Result<Value>;
    async fn put(&self, path: &str, body: Value, kind: RequestKind) -> Result<Value>;
    async fn delete(&self, path: &str, kind: RequestKind) -> Result<Value>;
}

/// A recorded request, kept for assertions in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// A scripted response: either a success body or an `(status, body)` pair
/// that gets run through [`normalize_error_body`] to produce a classified
/// [`Error`], exactly as a real backend response would be.
enum Scripted {
    Ok(Value),
    Err(u16, Value),
}

/// Deterministic [`HttpClient`] double: routes are matched in FIFO order per
/// `(method, path)` key, so a test can push several responses for the same
/// endpoint (e.g. "generating" then "completed" across successive polls).
pub struct StaticHttpClient {
    routes: Mutex<HashMap<(&'static str, String), Vec<Scripted>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Default for StaticHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticHttpClient {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_ok(&self, method: &'static str, path: impl Into<String>, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.into()))
            .or_default()
            .push(Scripted::Ok(body));
    }

    pub fn push_err(&self, method: &'static str, path: impl Into<String>, status: u16, body: Value) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.into()))
            .or_default()
            .push(Scripted::Err(status, body));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, method: &'static str, path: &str, body: Option<Value>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
    }

    fn dispatch(&self, method: &'static str, path: &str) -> Result<Value> {
        let mut routes = self.routes.lock().unwrap();
        let key = (method, path.to_string());
        let queue = routes.get_mut(&key).ok_or_else(|| {
            Error::transient(format!("no scripted response for {method} {path}"))
        })?;
        if queue.is_empty() {
            return Err(Error::transient(format!(
                "scripted responses exhausted for {method} {path}"
            )));
        }
        match queue.remove(0) {
            Scripted::Ok(body) => Ok(body),
            Scripted::Err(status, body) => {
                Err(Error::from_envelope(normalize_error_body(status, &body)))
            }
        }
    }
}

#[async_trait]
impl HttpClient for StaticHttpClient {
    async fn get(&self, path: &str, _kind: RequestKind) -> Result<Value> {
        self.record("GET", path, None);
        self.dispatch("GET", path)
    }

    async fn post(&self, path: &str, body: Value, _kind: RequestKind) -> Result<Value> {
        self.record("POST", path, Some(body));
        self.dispatch("POST", path)
    }

    async fn put(&self, path: &str, body: Value, _kind: RequestKind) -> Result<Value> {
        self.record("PUT", path, Some(body));
        self.dispatch("PUT", path)
    }

    async fn delete(&self, path: &str, _kind: RequestKind) -> Result<Value> {
        self.record("DELETE", path, None);
        self.dispatch("DELETE", path)
    }
}

/// Production [`HttpClient`]: talks to the real backend over `asupersync`'s
/// HTTP surface (the `tls-native-roots` feature gives it a TLS stack without
/// pulling in a second HTTP dependency). Every request carries the session
/// cookie and is subject to the [`RequestKind`] timeout policy; non-2xx
/// responses are run through [`normalize_error_body`] exactly like
/// [`StaticHttpClient`]'s scripted errors, so callers can't tell the two
/// apart by error shape.
pub struct AsupersyncHttpClient {
    inner: asupersync::http::Client,
    base_url: Url,
    session_cookie: String,
}

impl AsupersyncHttpClient {
    /// `session_token` is the signed session credential issued at login;
    /// it's attached to every outgoing request as a `Cookie` header.
    pub fn new(base_url: Url, session_token: impl Into<String>) -> Self {
        Self {
            inner: asupersync::http::Client::new(),
            base_url,
            session_cookie: format!("session={}", session_token.into()),
        }
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::validation(format!("invalid request path '{path}': {e}")))
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>, kind: RequestKind) -> Result<Value> {
        let url = self.resolve(path)?;
        let mut builder = self
            .inner
            .request(method, url.as_str())
            .header("Cookie", &self.session_cookie)
            .header("Accept", "application/json");
        if let Some(body) = &body {
            builder = builder.json(body);
        }

        let send_fut = builder.send();
        let response = match kind.timeout() {
            Some(budget) => asupersync::time::timeout(asupersync::time::wall_now(), budget, Box::pin(send_fut))
                .await
                .map_err(|_| Error::transient(format!("request to {path} timed out after {budget:?}")))?
                .map_err(|e| Error::transient(format!("request to {path} failed: {e}")))?,
            None => send_fut
                .await
                .map_err(|e| Error::transient(format!("request to {path} failed: {e}")))?,
        };

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::transient(format!("invalid response body from {path}: {e}")))?;

        if !(200..300).contains(&status) {
            return Err(Error::from_envelope(normalize_error_body(status, &body)));
        }
        Ok(body)
    }
}

#[async_trait]
impl HttpClient for AsupersyncHttpClient {
    async fn get(&self, path: &str, kind: RequestKind) -> Result<Value> {
        self.send(Method::Get, path, None, kind).await
    }

    async fn post(&self, path: &str, body: Value, kind: RequestKind) -> Result<Value> {
        self.send(Method::Post, path, Some(body), kind).await
    }

    async fn put(&self, path: &str, body: Value, kind: RequestKind) -> Result<Value> {
        self.send(Method::Put, path, Some(body), kind).await
    }

    async fn delete(&self, path: &str, kind: RequestKind) -> Result<Value> {
        self.send(Method::Delete, path, None, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_paths_against_the_base_url() {
        let client = AsupersyncHttpClient::new(
            Url::parse("https://api.example.com/").unwrap(),
            "tok-123",
        );
        let resolved = client.resolve("/projects/p1/format").unwrap();
        assert_eq!(resolved.as_str(), "https://api.example.com/projects/p1/format");
        assert_eq!(client.session_cookie, "session=tok-123");
    }

    fn run<F: std::future::Future>(fut: F) -> F::Output {
        futures::executor::block_on(fut)
    }

    #[test]
    fn replays_scripted_responses_in_order() {
        let client = StaticHttpClient::new();
        client.push_ok("GET", "/projects/1", json!({"status": "generating"}));
        client.push_ok("GET", "/projects/1", json!({"status": "completed"}));

        let first = run(client.get("/projects/1", RequestKind::Poll)).unwrap();
        assert_eq!(first["status"], "generating");
        let second = run(client.get("/projects/1", RequestKind::Poll)).unwrap();
        assert_eq!(second["status"], "completed");
        assert_eq!(client.requests().len(), 2);
    }

    #[test]
    fn classifies_scripted_error() {
        let client = StaticHttpClient::new();
        client.push_err(
            "POST",
            "/projects/1/format",
            409,
            json!({"error": {"code": "CONCURRENT_LIMIT", "message": "busy"}}),
        );
        let err = run(client.post("/projects/1/format", json!({}), RequestKind::LightRead))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn missing_route_is_transient_not_a_panic() {
        let client = StaticHttpClient::new();
        let err = run(client.get("/nope", RequestKind::Poll)).unwrap_err();
        assert!(err.is_transient());
    }
}
