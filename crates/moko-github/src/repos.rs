use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{read_json, GithubClient, GithubError};

/// Page size requested from `/user/repos`.
pub const REPOS_PER_PAGE: usize = 100;
/// Upper bound on pages fetched by one listing.
pub const MAX_PAGES: u32 = 100;

/// Repository as served to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSummary {
    pub name: String,
    pub full_name: String,
    pub description: String,
    pub default_branch: String,
    pub last_pushed: Option<String>,
    pub private: bool,
    pub clone_url: String,
    pub ssh_url: String,
}

/// The fields of a GitHub repository resource we keep.
#[derive(Deserialize)]
struct RepoResource {
    name: String,
    full_name: String,
    description: Option<String>,
    default_branch: String,
    pushed_at: Option<String>,
    private: bool,
    clone_url: String,
    ssh_url: String,
}

impl From<RepoResource> for RepoSummary {
    fn from(r: RepoResource) -> Self {
        Self {
            name: r.name,
            full_name: r.full_name,
            description: r.description.unwrap_or_default(),
            default_branch: r.default_branch,
            last_pushed: r.pushed_at,
            private: r.private,
            clone_url: r.clone_url,
            ssh_url: r.ssh_url,
        }
    }
}

impl GithubClient {
    /// List every repository of the authenticated user, most recently pushed
    /// first. Any failed page fails the whole listing.
    pub async fn list_repos(&self) -> Result<Vec<RepoSummary>, GithubError> {
        let url = self.url("/user/repos");
        let per_page = REPOS_PER_PAGE.to_string();
        let mut repos = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_param = page.to_string();
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("per_page", per_page.as_str()),
                    ("page", page_param.as_str()),
                    ("sort", "pushed"),
                    ("direction", "desc"),
                ])
                .send()
                .await?;
            let batch: Vec<RepoResource> = read_json(response).await?;

            if batch.is_empty() {
                debug!(page, total = repos.len(), "repository listing ended on empty page");
                return Ok(repos);
            }
            let last_page = batch.len() < REPOS_PER_PAGE;
            repos.extend(batch.into_iter().map(RepoSummary::from));
            if last_page {
                debug!(page, total = repos.len(), "repository listing complete");
                return Ok(repos);
            }
        }

        Err(GithubError::TooManyPages(MAX_PAGES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::client_for;
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo_json(i: usize) -> Value {
        let description = if i % 2 == 0 {
            json!(format!("Repo {i}"))
        } else {
            Value::Null
        };
        json!({
            "id": i,
            "name": format!("repo-{i}"),
            "full_name": format!("octo/repo-{i}"),
            "description": description,
            "default_branch": "main",
            "pushed_at": "2026-01-02T03:04:05Z",
            "private": i % 3 == 0,
            "clone_url": format!("https://github.com/octo/repo-{i}.git"),
            "ssh_url": format!("git@github.com:octo/repo-{i}.git"),
            "owner": { "login": "octo" }
        })
    }

    async fn mount_page(server: &MockServer, page: u32, items: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(query_param("page", page.to_string()))
            .and(query_param("per_page", "100"))
            .and(query_param("sort", "pushed"))
            .and(query_param("direction", "desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items)))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn pages_until_short_page() {
        let server = MockServer::start().await;
        let all: Vec<Value> = (0..250).map(repo_json).collect();
        mount_page(&server, 1, all[0..100].to_vec()).await;
        mount_page(&server, 2, all[100..200].to_vec()).await;
        mount_page(&server, 3, all[200..250].to_vec()).await;

        let repos = client_for(&server, None).list_repos().await.unwrap();

        assert_eq!(repos.len(), 250);
        let names: Vec<String> = repos.iter().map(|r| r.full_name.clone()).collect();
        let expected: Vec<String> = (0..250).map(|i| format!("octo/repo-{i}")).collect();
        assert_eq!(names, expected);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stops_on_empty_page_after_full_pages() {
        let server = MockServer::start().await;
        mount_page(&server, 1, (0..100).map(repo_json).collect()).await;
        mount_page(&server, 2, Vec::new()).await;

        let repos = client_for(&server, None).list_repos().await.unwrap();
        assert_eq!(repos.len(), 100);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_page_discards_partial_results() {
        let server = MockServer::start().await;
        mount_page(&server, 1, (0..100).map(repo_json).collect()).await;
        Mock::given(method("GET"))
            .and(path("/user/repos"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = client_for(&server, None).list_repos().await.unwrap_err();
        match err {
            GithubError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn normalizes_repository_fields() {
        let server = MockServer::start().await;
        let mut never_pushed = repo_json(1);
        never_pushed["pushed_at"] = Value::Null;
        mount_page(&server, 1, vec![repo_json(0), never_pushed]).await;

        let repos = client_for(&server, None).list_repos().await.unwrap();
        assert_eq!(
            repos[0],
            RepoSummary {
                name: "repo-0".into(),
                full_name: "octo/repo-0".into(),
                description: "Repo 0".into(),
                default_branch: "main".into(),
                last_pushed: Some("2026-01-02T03:04:05Z".into()),
                private: true,
                clone_url: "https://github.com/octo/repo-0.git".into(),
                ssh_url: "git@github.com:octo/repo-0.git".into(),
            }
        );
        assert_eq!(repos[1].description, "");
        assert_eq!(repos[1].last_pushed, None);
    }

    #[test]
    fn summary_serializes_camel_case() {
        let summary = RepoSummary {
            name: "a".into(),
            full_name: "o/a".into(),
            description: String::new(),
            default_branch: "main".into(),
            last_pushed: None,
            private: false,
            clone_url: "c".into(),
            ssh_url: "s".into(),
        };
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["fullName"], "o/a");
        assert_eq!(v["defaultBranch"], "main");
        assert_eq!(v["lastPushed"], Value::Null);
        assert_eq!(v["cloneUrl"], "c");
        assert_eq!(v["sshUrl"], "s");
    }
}
