use anyhow::Context;
use moko_github::{GithubConfig, DEFAULT_API_BASE, DEFAULT_TIMEOUT};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "/data";
const DEFAULT_BIND: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3001;

/// Process configuration, read once at startup and handed to each component.
///
/// | Variable | Default |
/// |----------|---------|
/// | `DATA_DIR` | `/data` |
/// | `GITHUB_PAT` | unset (unauthenticated) |
/// | `GITHUB_API_URL` | `https://api.github.com` |
/// | `MOKO_HTTP_TIMEOUT_SECS` | `30` |
/// | `MOKO_BIND` | `0.0.0.0` |
/// | `PORT` | `3001` |
/// | `MOKO_PRUNE_INTERVAL_SECS` | `0` (startup only) |
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub github: GithubConfig,
    pub bind: String,
    pub port: u16,
    pub prune_interval: Option<Duration>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timeout = match var("MOKO_HTTP_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_secs("MOKO_HTTP_TIMEOUT_SECS", &v)?),
            None => DEFAULT_TIMEOUT,
        };
        let port = match var("PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid PORT value {v:?}"))?,
            None => DEFAULT_PORT,
        };
        let prune_interval = match var("MOKO_PRUNE_INTERVAL_SECS") {
            Some(v) => match parse_secs("MOKO_PRUNE_INTERVAL_SECS", &v)? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };

        Ok(Self {
            data_dir: var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            github: GithubConfig {
                api_base: var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                token: var("GITHUB_PAT"),
                timeout,
            },
            bind: var("MOKO_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port,
            prune_interval,
        })
    }
}

fn parse_secs(key: &str, value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("invalid {key} value {value:?} (expected whole seconds)"))
}
