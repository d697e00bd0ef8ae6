use moko_github::GithubClient;
use moko_serve::{AppState, ServeConfig};
use moko_store::DocumentStore;
use tracing::info;

use crate::config::Config;

pub async fn execute(config: Config) -> anyhow::Result<()> {
    let store = DocumentStore::new(&config.data_dir);
    let report = store.ensure().await?;
    info!(
        data_dir = %config.data_dir.display(),
        seeded = report.seeded,
        pruned = report.pruned,
        "data directory ready"
    );
    if config.github.token.is_none() {
        info!("GITHUB_PAT not set, GitHub requests are unauthenticated");
    }

    let github = GithubClient::new(&config.github)?;
    let serve_config = ServeConfig {
        bind: config.bind,
        port: config.port,
        prune_interval: config.prune_interval,
    };
    moko_serve::serve(serve_config, AppState { store, github }).await
}
