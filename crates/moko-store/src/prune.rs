use serde::Deserialize;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime};
use tracing::{debug, info, warn};

use crate::{DocumentStore, FAILURES_DIR};

/// Failure records older than this are removed.
pub const FAILURE_RETENTION: Duration = Duration::hours(48);

/// The only field of a failure record the pruner looks at.
#[derive(Deserialize)]
struct FailureStamp {
    #[serde(rename = "capturedAt")]
    captured_at: Option<String>,
}

/// Remove failure records whose `capturedAt` is older than
/// [`FAILURE_RETENTION`]. Returns how many were removed.
pub async fn prune_failures(store: &DocumentStore) -> usize {
    prune_failures_at(store, OffsetDateTime::now_utc()).await
}

/// [`prune_failures`] against an explicit clock.
///
/// Records that cannot be parsed, or whose `capturedAt` is missing or not an
/// ISO 8601 timestamp, are kept. Individual failures never abort the pass.
pub async fn prune_failures_at(store: &DocumentStore, now: OffsetDateTime) -> usize {
    let cutoff = now - FAILURE_RETENTION;
    let keys = match store.list(FAILURES_DIR).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "skipping failure pruning");
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys {
        let Some(captured_at) = captured_at(store, &key).await else {
            debug!(key = %key, "keeping failure record without a usable capturedAt");
            continue;
        };
        if captured_at >= cutoff {
            continue;
        }
        match store.remove(&key).await {
            Ok(true) => {
                info!(key = %key, "pruned stale failure record");
                removed += 1;
            }
            // Deleted concurrently.
            Ok(false) => {}
            Err(e) => warn!(key = %key, error = %e, "failed to prune failure record"),
        }
    }
    removed
}

async fn captured_at(store: &DocumentStore, key: &str) -> Option<OffsetDateTime> {
    let stamp: FailureStamp = store.read_as(key).await?;
    parse_timestamp(&stamp.captured_at?)
}

/// Parse an ISO 8601 timestamp. Date-times without an offset and bare
/// dates are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT))
        .or_else(|_| PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT).map(|at| at.assume_utc()))
        .or_else(|_| Date::parse(raw, &Iso8601::DEFAULT).map(|d| d.midnight().assume_utc()))
        .ok()
        .or_else(|| {
            let extended = with_extended_offset(raw)?;
            OffsetDateTime::parse(&extended, &Rfc3339).ok()
        })
}

/// `...T00:00:00+0000` → `...T00:00:00+00:00`.
fn with_extended_offset(raw: &str) -> Option<String> {
    let split = raw.len().checked_sub(5)?;
    let (head, offset) = (raw.get(..split)?, raw.get(split..)?);
    let digits = offset.strip_prefix(|c: char| c == '+' || c == '-')?;
    let valid = head.contains('T') && digits.bytes().all(|b| b.is_ascii_digit());
    valid.then(|| format!("{head}{}{}:{}", &offset[..1], &digits[..2], &digits[2..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stamp(at: OffsetDateTime) -> String {
        at.format(&Rfc3339).unwrap()
    }

    #[tokio::test]
    async fn prunes_only_past_horizon() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let now = OffsetDateTime::now_utc();

        store
            .write(
                "failures/old.json",
                &json!({ "capturedAt": stamp(now - Duration::hours(49)), "repo": "a/b" }),
            )
            .await
            .unwrap();
        store
            .write(
                "failures/recent.json",
                &json!({ "capturedAt": stamp(now - Duration::hours(47)) }),
            )
            .await
            .unwrap();
        store
            .write("failures/unstamped.json", &json!({ "repo": "a/b" }))
            .await
            .unwrap();

        assert_eq!(prune_failures_at(&store, now).await, 1);
        assert_eq!(store.read("failures/old.json").await, None);
        assert!(store.read("failures/recent.json").await.is_some());
        assert!(store.read("failures/unstamped.json").await.is_some());
    }

    #[tokio::test]
    async fn malformed_records_do_not_block_pruning() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let now = OffsetDateTime::now_utc();
        let expired = stamp(now - Duration::days(5));

        for i in 0..4 {
            store
                .write(&format!("failures/run-{i}.json"), &json!({ "capturedAt": expired }))
                .await
                .unwrap();
        }
        std::fs::write(tmp.path().join("failures/broken.json"), "{ \"capturedAt\": ").unwrap();
        store
            .write("failures/garbled.json", &json!({ "capturedAt": "last tuesday" }))
            .await
            .unwrap();
        store
            .write("failures/array.json", &json!([1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(prune_failures_at(&store, now).await, 4);
        assert_eq!(
            store.list(FAILURES_DIR).await.unwrap(),
            vec![
                "failures/array.json".to_string(),
                "failures/broken.json".to_string(),
                "failures/garbled.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn ignores_non_json_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let now = OffsetDateTime::now_utc();
        let dir = tmp.path().join(FAILURES_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let body = json!({ "capturedAt": stamp(now - Duration::days(30)) }).to_string();
        std::fs::write(dir.join("old.json.bak"), body).unwrap();

        assert_eq!(prune_failures_at(&store, now).await, 0);
        assert!(dir.join("old.json.bak").exists());
    }

    #[tokio::test]
    async fn missing_namespace_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path().join("never-created"));
        assert_eq!(prune_failures(&store).await, 0);
    }

    #[tokio::test]
    async fn accepts_fractional_and_offset_timestamps() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let now = OffsetDateTime::parse("2026-03-10T12:00:00Z", &Rfc3339).unwrap();

        store
            .write("failures/js.json", &json!({ "capturedAt": "2026-03-07T08:15:30.123Z" }))
            .await
            .unwrap();
        store
            .write("failures/offset.json", &json!({ "capturedAt": "2026-03-09T09:00:00+02:00" }))
            .await
            .unwrap();

        assert_eq!(prune_failures_at(&store, now).await, 1);
        assert_eq!(
            store.list(FAILURES_DIR).await.unwrap(),
            vec!["failures/offset.json".to_string()]
        );
    }

    #[test]
    fn parses_iso8601_variants_as_utc() {
        let utc = |s: &str| OffsetDateTime::parse(s, &Rfc3339).unwrap();
        assert_eq!(parse_timestamp("2020-01-01T00:00:00"), Some(utc("2020-01-01T00:00:00Z")));
        assert_eq!(parse_timestamp("2020-01-01"), Some(utc("2020-01-01T00:00:00Z")));
        assert_eq!(
            parse_timestamp("2020-01-01T00:00:00.000+0000"),
            Some(utc("2020-01-01T00:00:00Z"))
        );
        assert_eq!(
            parse_timestamp("2020-01-01T02:30:00-0130"),
            Some(utc("2020-01-01T04:00:00Z"))
        );
        assert_eq!(parse_timestamp("last tuesday"), None);
        assert_eq!(parse_timestamp("2020-13-01"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[tokio::test]
    async fn prunes_records_stamped_without_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let now = OffsetDateTime::parse("2026-03-10T12:00:00Z", &Rfc3339).unwrap();

        for (name, at) in [
            ("local", "2020-01-01T00:00:00"),
            ("date", "2020-01-01"),
            ("basic-offset", "2020-01-01T00:00:00.000+0000"),
            ("recent-local", "2026-03-09T18:00:00"),
            ("recent-date", "2026-03-09"),
        ] {
            store
                .write(&format!("failures/{name}.json"), &json!({ "capturedAt": at }))
                .await
                .unwrap();
        }

        assert_eq!(prune_failures_at(&store, now).await, 3);
        assert_eq!(
            store.list(FAILURES_DIR).await.unwrap(),
            vec![
                "failures/recent-date.json".to_string(),
                "failures/recent-local.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn ensure_prunes_on_startup() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(tmp.path());
        let long_ago = stamp(OffsetDateTime::now_utc() - Duration::days(3));
        store
            .write("failures/stale.json", &json!({ "capturedAt": long_ago }))
            .await
            .unwrap();

        let report = store.ensure().await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(store.read("failures/stale.json").await, None);
    }
}
