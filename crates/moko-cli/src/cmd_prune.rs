use moko_store::DocumentStore;

use crate::config::Config;

pub async fn execute(config: &Config) -> anyhow::Result<()> {
    let store = DocumentStore::new(&config.data_dir);
    let removed = moko_store::prune_failures(&store).await;
    println!("Pruned {removed} stale failure record(s) from {}", store.root().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn prune_on_empty_dir_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.data_dir = PathBuf::from(tmp.path());
        execute(&config).await.unwrap();
    }
}
