//! A local HTTP server standing in for the GitHub REST API.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use github::{GithubConfig, GithubContentStore};
use portal::{BranchName, ContentPath, Record, RepositoryId};
use serde_json::Value;

pub const CONTENTS: &str = "/repos/smith-lab/website/contents/data";

pub fn rec(value: Value) -> Record {
    Record::from_value(value).unwrap()
}

/// Unix time an hour from now, for rate-limit reset headers.
pub fn reset_in_an_hour() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    (now + Duration::from_secs(3600)).as_secs() as i64
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::text(status, body.to_string()).header("content-type", "application/json")
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// `name` must be lower case.
    pub fn header(mut self, name: &'static str, value: impl ToString) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn rate_limit(self, remaining: u32, reset: i64) -> Self {
        self.header("x-ratelimit-limit", 5000)
            .header("x-ratelimit-remaining", remaining)
            .header("x-ratelimit-used", 5000 - remaining)
            .header("x-ratelimit-reset", reset)
            .header("x-ratelimit-resource", "core")
    }

    fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.insert(HeaderName::from_static(*name), HeaderValue::from_str(value).unwrap());
        }
        (self.status, headers, self.body.clone()).into_response()
    }
}

/// A request the stub received.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Exchange {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

struct Route {
    method: Method,
    path: String,
    accept: Option<&'static str>,
    reply: Reply,
}

#[derive(Default)]
struct Script {
    routes: Vec<Route>,
    seen: Vec<Exchange>,
}

/// Answers from registered routes, first match wins, and records every request.
pub struct StubGithub {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
}

impl StubGithub {
    pub async fn start() -> Self {
        let script = Arc::new(Mutex::new(Script::default()));
        let app = Router::new().fallback(answer).with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, script }
    }

    pub fn on(&self, method: Method, path: &str, reply: Reply) {
        self.route(method, path, None, reply);
    }

    /// Only matches requests whose `Accept` header is exactly `accept`.
    pub fn on_accept(&self, method: Method, path: &str, accept: &'static str, reply: Reply) {
        self.route(method, path, Some(accept), reply);
    }

    fn route(&self, method: Method, path: &str, accept: Option<&'static str>, reply: Reply) {
        self.script.lock().unwrap().routes.push(Route {
            method,
            path: path.to_string(),
            accept,
            reply,
        });
    }

    pub fn seen(&self) -> Vec<Exchange> {
        self.script.lock().unwrap().seen.clone()
    }

    pub fn config(&self) -> GithubConfig {
        GithubConfig {
            api_base: format!("http://{}", self.addr),
            repository: RepositoryId::new("smith-lab/website").unwrap(),
            branch: BranchName::new("main").unwrap(),
            data_dir: ContentPath::new("data").unwrap(),
            user_agent: "labportal-test".to_string(),
            low_rate_limit_warning: 10,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn client(&self, token: Option<&str>) -> GithubContentStore {
        GithubContentStore::new(self.config(), token.map(str::to_string)).unwrap()
    }
}

async fn answer(
    State(script): State<Arc<Mutex<Script>>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut script = script.lock().unwrap();
    let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok()).map(str::to_string);
    script.seen.push(Exchange {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
    });
    let route = script.routes.iter().find(|r| {
        r.method == method && r.path == uri.path() && r.accept.map_or(true, |a| accept.as_deref() == Some(a))
    });
    match route {
        Some(route) => route.reply.to_response(),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            [(CONTENT_TYPE, "text/plain")],
            format!("no route for {method} {uri}"),
        )
            .into_response(),
    }
}
