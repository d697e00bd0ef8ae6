use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

mod prune;

pub use prune::{prune_failures, prune_failures_at, FAILURE_RETENTION};

/// Namespace holding time-stamped failure records.
pub const FAILURES_DIR: &str = "failures";
pub const REPOS_JSON: &str = "repos.json";
pub const PUSH_SUBSCRIPTIONS_JSON: &str = "push_subscriptions.json";
pub const ACTIVE_SESSION_JSON: &str = "active_session.json";

/// Well-known documents and the content they start with.
const SEEDS: [(&str, &str); 3] = [
    (REPOS_JSON, "{}"),
    (PUSH_SUBSCRIPTIONS_JSON, "[]"),
    (ACTIVE_SESSION_JSON, "null"),
];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid document key {0:?}")]
    InvalidKey(String),
    #[error("failed to serialize document {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("background write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// What `DocumentStore::ensure` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitReport {
    /// Well-known documents created because they were missing.
    pub seeded: usize,
    /// Failure records removed by the startup prune.
    pub pruned: usize,
}

/// Key → JSON document persistence rooted at a data directory.
///
/// Reads never fail: a missing, unreadable or malformed document is simply
/// absent. Writes replace the target atomically via a sibling temp file.
/// Concurrent writers to one key are not ordered; the last rename wins.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative key under the root. Rejects empty keys and any
    /// component other than a plain name (`..`, `.`, absolute roots).
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let plain = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    /// Create the root, the failure namespace and any missing well-known
    /// documents, then prune stale failure records once. Existing documents
    /// are never overwritten, so repeated calls are no-ops.
    pub async fn ensure(&self) -> Result<InitReport, StoreError> {
        let failures = self.root.join(FAILURES_DIR);
        tokio::fs::create_dir_all(&failures)
            .await
            .map_err(|e| StoreError::io(&failures, e))?;

        let mut report = InitReport::default();
        for (key, seed) in SEEDS {
            let path = self.root.join(key);
            let created =
                tokio::task::spawn_blocking(move || seed_atomic(&path, seed.as_bytes())).await??;
            if created {
                debug!(key, "seeded document");
                report.seeded += 1;
            }
        }

        report.pruned = prune_failures(self).await;
        Ok(report)
    }

    /// Read a document as raw JSON.
    pub async fn read(&self, key: &str) -> Option<serde_json::Value> {
        self.read_as(key).await
    }

    /// Read a document into `T`. Any failure, including a shape mismatch,
    /// yields `None`.
    pub async fn read_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key).ok()?;
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(key, error = %e, "document unreadable");
                }
                return None;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(key, error = %e, "ignoring malformed document");
                None
            }
        }
    }

    /// Upsert a document. Intermediate directories are created as needed.
    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let data = serde_json::to_vec_pretty(doc).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &data)).await?
    }

    /// Delete a document. Returns `false` if it did not exist.
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Keys of the `.json` documents directly under `namespace`, sorted.
    /// A namespace that does not exist is empty.
    pub async fn list(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.path_for(namespace)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".json") {
                continue;
            }
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => keys.push(format!("{namespace}/{name}")),
                _ => continue,
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Atomic write: write to a temp file in the same dir, fsync, then rename.
///
/// If the rename fails the target is overwritten in place. That path is not
/// crash-safe and is logged as a warning.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    let tmp = staged_temp(parent, data)?;
    match tmp.persist(path) {
        Ok(_) => Ok(()),
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err.error,
                "atomic rename failed, overwriting document in place"
            );
            overwrite_in_place(path, data, err.file)
        }
    }
}

/// Degraded write after a failed rename: overwrite `path` directly, then
/// drop the staged temp file.
fn overwrite_in_place(
    path: &Path,
    data: &[u8],
    staged: tempfile::NamedTempFile,
) -> Result<(), StoreError> {
    fs::write(path, data).map_err(|e| StoreError::io(path, e))?;
    // A leftover temp file is harmless.
    if let Err(e) = staged.close() {
        debug!(path = %path.display(), error = %e, "could not remove staged temp file");
    }
    Ok(())
}

/// Like `write_atomic`, but never replaces an existing file.
/// Returns `true` if the file was created.
fn seed_atomic(path: &Path, data: &[u8]) -> Result<bool, StoreError> {
    if path.exists() {
        return Ok(false);
    }
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
    let tmp = staged_temp(parent, data)?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(StoreError::io(path, err.error)),
    }
}

fn staged_temp(dir: &Path, data: &[u8]) -> Result<tempfile::NamedTempFile, StoreError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".moko-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(data)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    Ok(tmp)
}
