use moko_github::{FailureLogExtract, GithubClient, RepoSummary};

use crate::config::Config;

pub async fn repos(config: &Config, json: bool) -> anyhow::Result<()> {
    let client = GithubClient::new(&config.github)?;
    let repos = client.list_repos().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
    } else {
        print!("{}", render_repos(&repos));
    }
    Ok(())
}

pub async fn failure_log(
    config: &Config,
    owner: &str,
    repo: &str,
    run_id: u64,
    tail: usize,
    json: bool,
) -> anyhow::Result<()> {
    let client = GithubClient::new(&config.github)?;
    match client.failure_logs(owner, repo, run_id, tail).await? {
        Some(extract) if json => println!("{}", serde_json::to_string_pretty(&extract)?),
        Some(extract) => print!("{}", render_extract(&extract)),
        None if json => println!("null"),
        None => println!("No failed job in run {run_id} of {owner}/{repo}."),
    }
    Ok(())
}

fn render_repos(repos: &[RepoSummary]) -> String {
    if repos.is_empty() {
        return "No repositories.\n".to_string();
    }
    let width = repos.iter().map(|r| r.full_name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for r in repos {
        let visibility = if r.private { "private" } else { "public" };
        let pushed = r.last_pushed.as_deref().unwrap_or("never");
        out.push_str(&format!(
            "{:<width$}  {:<7}  {}",
            r.full_name, visibility, pushed
        ));
        if !r.description.is_empty() {
            out.push_str(&format!("  {}", r.description));
        }
        out.push('\n');
    }
    out
}

fn render_extract(extract: &FailureLogExtract) -> String {
    format!(
        "Job:  {}\nStep: {}\n---\n{}\n",
        extract.failing_job, extract.failing_step, extract.log_tail
    )
}
