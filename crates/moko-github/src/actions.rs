use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{check_status, read_json, GithubClient, GithubError};

pub const DEFAULT_TAIL_LINES: usize = 50;
/// Step name reported when the failed job has no failed step.
pub const UNKNOWN_STEP: &str = "unknown";

const FAILURE: &str = "failure";

/// Where a workflow run failed and the end of the failing job's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureLogExtract {
    pub failing_job: String,
    pub failing_step: String,
    pub log_tail: String,
}

#[derive(Deserialize)]
struct JobsPage {
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct Job {
    id: u64,
    name: String,
    conclusion: Option<String>,
    #[serde(default)]
    steps: Option<Vec<Step>>,
}

#[derive(Deserialize)]
struct Step {
    name: String,
    conclusion: Option<String>,
}

fn failed(conclusion: &Option<String>) -> bool {
    conclusion.as_deref() == Some(FAILURE)
}

impl Job {
    fn failing_step(&self) -> &str {
        self.steps
            .iter()
            .flatten()
            .find(|s| failed(&s.conclusion))
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_STEP)
    }
}

impl GithubClient {
    /// Find the first failed job of a workflow run and return the last
    /// `tail` lines of its log. `Ok(None)` when no job failed.
    pub async fn failure_logs(
        &self,
        owner: &str,
        repo: &str,
        run_id: u64,
        tail: usize,
    ) -> Result<Option<FailureLogExtract>, GithubError> {
        let repo_url = self.repo_url(owner, repo)?;
        let jobs_url = format!("{repo_url}/actions/runs/{run_id}/jobs");
        let response = self.http.get(&jobs_url).send().await?;
        let page: JobsPage = read_json(response).await?;

        let Some(job) = page.jobs.iter().find(|j| failed(&j.conclusion)) else {
            debug!(owner, repo, run_id, "no failed job in run");
            return Ok(None);
        };

        // Redirects to signed blob storage are followed by the client.
        let logs_url = format!("{repo_url}/actions/jobs/{}/logs", job.id);
        let response = self.http.get(&logs_url).send().await?;
        let text = check_status(response).await?.text().await?;

        Ok(Some(FailureLogExtract {
            failing_job: job.name.clone(),
            failing_step: job.failing_step().to_string(),
            log_tail: tail_lines(&text, tail),
        }))
    }
}

/// Last `n` `'\n'`-separated lines of `text`, rejoined with `'\n'`.
/// Shorter input is returned whole.
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
