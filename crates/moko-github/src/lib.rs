use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

mod actions;
mod repos;

pub use actions::{tail_lines, FailureLogExtract, DEFAULT_TAIL_LINES, UNKNOWN_STEP};
pub use repos::{RepoSummary, MAX_PAGES, REPOS_PER_PAGE};

// ── Config ──

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const USER_AGENT: &str = "moko-events";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Connection settings for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_base: String,
    /// Personal access token. Requests go out unauthenticated without one.
    pub token: Option<String>,
    /// Per-request timeout, covering redirects and the response body.
    pub timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ── Errors ──

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("GitHub API error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected GitHub response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("invalid repository owner or name {0:?}")]
    InvalidName(String),
    #[error("repository listing did not finish within {0} pages")]
    TooManyPages(u32),
    #[error("GitHub token is not a valid header value")]
    InvalidToken,
}

// ── Client ──

/// Thin GitHub REST client. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_GITHUB_JSON));
        headers.insert(
            HeaderName::from_static(API_VERSION_HEADER),
            HeaderValue::from_static(API_VERSION),
        );
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GithubError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    /// `{base}/repos/{owner}/{repo}`. Both parts must be plain GitHub
    /// names so they stay single path segments.
    fn repo_url(&self, owner: &str, repo: &str) -> Result<String, GithubError> {
        for name in [owner, repo] {
            if !is_valid_name(name) {
                return Err(GithubError::InvalidName(name.to_string()));
            }
        }
        Ok(self.url(&format!("/repos/{owner}/{repo}")))
    }
}

/// GitHub owner and repository names: ASCII alphanumerics plus `-`, `_`
/// and `.`, excluding `.` and `..`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Check the status, then decode the body as JSON.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, GithubError> {
    let body = check_status(response).await?.bytes().await?;
    serde_json::from_slice(&body).map_err(GithubError::Decode)
}

/// Turn a non-success response into `GithubError::Status`, keeping the body
/// for diagnosis.
async fn check_status(response: Response) -> Result<Response, GithubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GithubError::Status { status, body })
}
