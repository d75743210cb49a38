//! [`GithubContentStore`]: the [`RemoteStore`] implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use portal::{
    BlobSha, BranchName, CollectionKind, ContentPath, RateLimitSnapshot, Record, RemoteSnapshot,
    RemoteStore, RepositoryId, StoreError, Timestamp,
};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info};

use crate::contents::{
    decode_records, encode_records, ApiErrorBody, AuthenticatedUser, ContentsFile, FileBody,
    PutFile, PutResponse,
};
use crate::errors::{classify_status, transport_error};
use crate::rate_limit::RateLimitTracker;

/// Public GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

/// Where the collection files live and how to reach them.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// REST API root, without a trailing slash.
    pub api_base: String,
    /// Repository holding the data files.
    pub repository: RepositoryId,
    /// Branch to read from and commit to.
    pub branch: BranchName,
    /// Directory of the collection files, relative to the repository root.
    pub data_dir: ContentPath,
    /// Value of the `User-Agent` header (GitHub rejects requests without one).
    pub user_agent: String,
    /// Remaining-request count at which a warning is logged.
    pub low_rate_limit_warning: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Reads and writes collection files through the REST Contents API.
///
/// Every response updates a [`RateLimitTracker`]; once the window is
/// exhausted, requests fail locally with [`StoreError::RateLimited`] until it
/// resets.
pub struct GithubContentStore {
    http: reqwest::Client,
    config: GithubConfig,
    token: Option<String>,
    rate_limit: RateLimitTracker,
}

impl std::fmt::Debug for GithubContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubContentStore")
            .field("config", &self.config)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl GithubContentStore {
    /// Creates a store. Without a token only reads of public repositories work.
    pub fn new(config: GithubConfig, token: Option<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| transport_error(&e))?;
        let rate_limit = RateLimitTracker::new(config.low_rate_limit_warning);
        Ok(Self {
            http,
            config,
            token: token.filter(|t| !t.trim().is_empty()),
            rate_limit,
        })
    }

    /// Returns `true` if requests are authenticated.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Checks the token and returns the login of its owner.
    #[tracing::instrument(skip(self))]
    pub async fn verify_token(&self) -> Result<String, StoreError> {
        if self.token.is_none() {
            return Err(StoreError::Unauthorized);
        }
        let url = format!("{}/user", self.api_base());
        let response = self.send(self.request(Method::GET, &url), "user").await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, "user").await);
        }
        let user: AuthenticatedUser = response.json().await.map_err(|e| StoreError::InvalidContent {
            path: "user".to_string(),
            message: e.to_string(),
        })?;
        info!(login = %user.login, "access token verified");
        Ok(user.login)
    }

    /// Asks `GET /rate_limit` for the current window.
    ///
    /// That endpoint does not count against the limit, so it is sent even
    /// while the tracker reports the window exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_rate_limit(&self) -> Result<Option<RateLimitSnapshot>, StoreError> {
        let url = format!("{}/rate_limit", self.api_base());
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        if let Some(snapshot) = rate_limit_from(response.headers()) {
            self.rate_limit.observe(snapshot);
        }
        if !response.status().is_success() {
            return Err(self.error_for(response, "rate_limit").await);
        }
        Ok(self.rate_limit.current())
    }

    /// Repository path of a collection file (e.g. `data/students.json`).
    pub fn file_path(&self, kind: CollectionKind) -> String {
        self.config.data_dir.join(&kind.file_name())
    }

    fn api_base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_base(),
            self.config.repository.owner(),
            self.config.repository.name(),
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_accepting(method, url, JSON_MEDIA_TYPE)
    }

    /// Like [`Self::request`] with a different media type. `RequestBuilder::header`
    /// appends, so the `Accept` value has to be chosen here, once.
    fn request_accepting(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        let request = self
            .http
            .request(method, url)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a request after consulting the rate-limit tracker, and records
    /// the rate-limit headers of whatever comes back.
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, StoreError> {
        self.rate_limit.check(Timestamp::now())?;
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        if let Some(snapshot) = rate_limit_from(response.headers()) {
            self.rate_limit.observe(snapshot);
        }
        debug!(path, status = response.status().as_u16(), "GitHub response");
        Ok(response)
    }

    async fn error_for(&self, response: Response, path: &str) -> StoreError {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(text);
        classify_status(
            status,
            |name| headers.get(name).and_then(|v| v.to_str().ok()),
            message,
            path,
            Timestamp::now(),
        )
    }

    async fn fetch_raw(&self, url: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let request = self
            .request_accepting(Method::GET, url, RAW_MEDIA_TYPE)
            .query(&[("ref", self.config.branch.as_str())]);
        let response = self.send(request, path).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, path).await);
        }
        let bytes = response.bytes().await.map_err(|e| transport_error(&e))?;
        Ok(bytes.to_vec())
    }
}

fn rate_limit_from(headers: &HeaderMap) -> Option<RateLimitSnapshot> {
    let values: HashMap<&str, &str> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ratelimit-"))
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    RateLimitSnapshot::from_headers(|name| values.get(name).copied())
}

#[async_trait]
impl RemoteStore for GithubContentStore {
    #[tracing::instrument(skip(self), fields(repo = %self.config.repository, branch = %self.config.branch))]
    async fn fetch(&self, kind: CollectionKind) -> Result<Option<RemoteSnapshot>, StoreError> {
        let path = self.file_path(kind);
        let url = self.contents_url(&path);
        let request = self
            .request(Method::GET, &url)
            .query(&[("ref", self.config.branch.as_str())]);
        let response = self.send(request, &path).await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "collection file does not exist yet");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.error_for(response, &path).await);
        }

        let file: ContentsFile = response.json().await.map_err(|e| StoreError::InvalidContent {
            path: path.clone(),
            message: format!("expected a file: {e}"),
        })?;
        let body = match file.body(&path)? {
            FileBody::Inline(bytes) => bytes,
            FileBody::Omitted => {
                debug!(path, "inline content omitted; fetching raw");
                self.fetch_raw(&url, &path).await?
            }
        };
        let records = decode_records(&body, &path)?;
        let sha = BlobSha::new(file.sha).ok_or_else(|| StoreError::InvalidContent {
            path: path.clone(),
            message: "response carried an empty sha".to_string(),
        })?;

        debug!(path, sha = %sha, records = records.len(), "collection fetched");
        Ok(Some(RemoteSnapshot { records, sha }))
    }

    #[tracing::instrument(
        skip_all,
        fields(kind = %kind, repo = %self.config.repository, records = records.len(), base_sha = ?base_sha.map(BlobSha::as_str))
    )]
    async fn store(
        &self,
        kind: CollectionKind,
        records: &[Record],
        base_sha: Option<&BlobSha>,
        message: &str,
    ) -> Result<BlobSha, StoreError> {
        if self.token.is_none() {
            return Err(StoreError::Unauthorized);
        }
        let path = self.file_path(kind);
        let url = self.contents_url(&path);
        let body = PutFile {
            message,
            content: encode_records(records),
            branch: self.config.branch.as_str(),
            sha: base_sha.map(BlobSha::as_str),
        };
        let response = self.send(self.request(Method::PUT, &url).json(&body), &path).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, &path).await);
        }

        let put: PutResponse = response.json().await.map_err(|e| StoreError::InvalidContent {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let sha = BlobSha::new(put.content.sha).ok_or_else(|| StoreError::InvalidContent {
            path: path.clone(),
            message: "response carried an empty sha".to_string(),
        })?;
        info!(path, sha = %sha, "collection committed");
        Ok(sha)
    }

    fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        self.rate_limit.current()
    }
}
