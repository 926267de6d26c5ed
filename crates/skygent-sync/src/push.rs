//! Long-lived firehose ("jetstream") subscription sync (spec.md §4.8,
//! C8): batches commits, prepares (parses + filters) them with bounded
//! concurrency while preserving arrival order, then applies them to the
//! store in that order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use skygent_core::FilterExpr;
use skygent_filter::runtime::EffectProvider;
use skygent_filter::Predicate;
use skygent_report::{Progress, Reporter};
use skygent_store::tables::SyncCheckpointRecord;
use skygent_store::{DeleteEvent, Store, UpsertEvent};
use snafu::ResultExt;
use tokio::time::{sleep_until, Instant};
use tracing::{info, instrument, warn};

use crate::adapter::{BskyAdapter, Commit, CommitKind, JetstreamSubscription};
use crate::error::{CompileSnafu, PipelineSnafu, StoreSnafu, SyncError, SyncResult, SyncStage};
use crate::pull::SourceKey;

const LOG_TARGET: &str = "skygent::sync::push";

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub dry_run: bool,
    pub strict: bool,
    /// Total prepare-error budget for the whole run; exceeding it aborts
    /// the pipeline (spec.md §4.8 "max_errors").
    pub max_errors: u64,
    pub batch_size: usize,
    pub batch_window: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self { dry_run: false, strict: false, max_errors: 50, batch_size: 100, batch_window: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    pub processed: u64,
    pub stored: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// One arrival-ordered batch member after prepare: either a ready-to-apply
/// post (with whether it passed the filter) or a parse/filter error.
enum Prepared {
    Upsert { post: skygent_core::Post, matched: bool },
    Delete { uri: skygent_core::Uri },
    Error(String),
}

pub struct PushEngine {
    store: Arc<Store>,
    adapter: Arc<dyn BskyAdapter>,
    reporter: Arc<dyn Reporter>,
}

impl PushEngine {
    pub fn new(store: Arc<Store>, adapter: Arc<dyn BskyAdapter>, reporter: Arc<dyn Reporter>) -> Self {
        Self { store, adapter, reporter }
    }

    /// Drives one jetstream subscription until the stream ends, a fatal
    /// error occurs, or `max_errors` is exceeded (spec.md §4.8). Always
    /// persists a final checkpoint and calls the adapter's `shutdown`
    /// before returning, regardless of outcome.
    #[instrument(skip_all, fields(endpoint = %subscription.endpoint))]
    pub async fn run(
        &self,
        mut subscription: JetstreamSubscription,
        filter: FilterExpr,
        effects: &dyn EffectProvider,
        options: PushOptions,
    ) -> SyncResult<PushSummary> {
        let predicate = Predicate::compile(&filter).context(CompileSnafu)?;
        let signature = predicate.signature().to_string();
        let source_key = jetstream_source_key(&subscription);
        let checkpoint_key = source_key.checkpoint_key();

        let existing = self.store.sync_checkpoint_get(&checkpoint_key).await.context(StoreSnafu)?;
        subscription.cursor = match &existing {
            Some(checkpoint) if checkpoint.filter_hash == signature => checkpoint.cursor.clone(),
            _ => None,
        };

        let mut stream = self.adapter.stream(subscription).await?;
        let mut summary = PushSummary::default();
        let mut max_time_ms: Option<i64> = None;
        let mut seen_in_dry_run = std::collections::HashSet::new();
        let start = Instant::now();

        let result = 'outer: loop {
            let Some(batch) = next_batch(&mut stream, options.batch_size, options.batch_window).await else {
                break Ok(());
            };

            let prepared = self.prepare_batch(&batch, &predicate, effects, options.strict).await;

            for (commit, outcome) in batch.iter().zip(prepared.into_iter()) {
                summary.processed += 1;
                max_time_ms = Some(max_time_ms.unwrap_or(0).max(commit.time_us / 1000));

                match outcome {
                    Ok(Prepared::Upsert { post, matched }) => {
                        if !matched {
                            summary.skipped += 1;
                            continue;
                        }
                        if options.dry_run {
                            if seen_in_dry_run.insert(post.uri.as_str().to_string()) {
                                summary.stored += 1;
                            }
                            continue;
                        }
                        let event = UpsertEvent { post, source: checkpoint_key.clone() };
                        let applied = match commit.kind {
                            CommitKind::Create => {
                                let inserted = self.store.append_upsert_if_missing(event).await.context(StoreSnafu)?;
                                inserted.is_some()
                            }
                            CommitKind::Update => {
                                self.store.append_upsert(event).await.context(StoreSnafu)?;
                                true
                            }
                            CommitKind::Delete => unreachable!("deletes never carry a record"),
                        };
                        if applied {
                            match commit.kind {
                                CommitKind::Create => summary.stored += 1,
                                CommitKind::Update => summary.updated += 1,
                                CommitKind::Delete => {}
                            }
                        }
                    }
                    Ok(Prepared::Delete { uri }) => {
                        if options.dry_run {
                            continue;
                        }
                        if self.store.uri_index_get(&uri).await.context(StoreSnafu)?.is_some() {
                            self.store
                                .append_delete(DeleteEvent { uri, source: checkpoint_key.clone(), created_at: commit.time_us / 1000 })
                                .await
                                .context(StoreSnafu)?;
                            summary.deleted += 1;
                        }
                    }
                    Err((stage, message)) => {
                        summary.errors += 1;
                        self.reporter.warn("skipped malformed jetstream commit", &[("cause", &message)]);
                        warn!(target: LOG_TARGET, cause = %message, "skipped malformed jetstream commit");
                        if options.strict {
                            break 'outer Err(PipelineSnafu { stage, message }.build());
                        }
                        if summary.errors > options.max_errors {
                            break 'outer Err(PipelineSnafu {
                                stage,
                                message: format!("exceeded max_errors ({}): last cause {message}", options.max_errors),
                            }
                            .build());
                        }
                    }
                }
            }

            self.emit_progress(&checkpoint_key, &summary, start.elapsed());

            if !options.dry_run {
                self.flush_checkpoint(&checkpoint_key, &signature, max_time_ms).await?;
            }
        };

        self.adapter_shutdown_with_timeout().await;
        self.emit_progress(&checkpoint_key, &summary, start.elapsed());
        info!(target: LOG_TARGET, ?summary, "jetstream sync pass ended");

        match result {
            Ok(()) => Ok(summary),
            Err(err) => Err(err),
        }
    }

    /// Parses + filters every commit in `batch` concurrently (bounded by
    /// the store's default fan-out), then returns the outcomes back in
    /// arrival order so the caller applies writes in that order (spec.md
    /// §4.8 "in-order prepare... then apply in arrival order").
    async fn prepare_batch(
        &self,
        batch: &[Commit],
        predicate: &Predicate,
        effects: &dyn EffectProvider,
        strict: bool,
    ) -> Vec<Result<Prepared, (SyncStage, String)>> {
        const PREPARE_CONCURRENCY: usize = 16;
        let mut indexed: Vec<(usize, Result<Prepared, (SyncStage, String)>)> = futures::stream::iter(batch.iter().enumerate())
            .map(|(i, commit)| async move { (i, self.prepare_one(commit, predicate, effects, strict).await) })
            .buffer_unordered(PREPARE_CONCURRENCY)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn prepare_one(
        &self,
        commit: &Commit,
        predicate: &Predicate,
        effects: &dyn EffectProvider,
        strict: bool,
    ) -> Result<Prepared, (SyncStage, String)> {
        match commit.kind {
            CommitKind::Delete => Ok(Prepared::Delete { uri: skygent_core::Uri::from(commit.uri.clone()) }),
            CommitKind::Create | CommitKind::Update => {
                let Some(record) = &commit.record else {
                    return Err((SyncStage::Parse, format!("commit for {} is missing a record body", commit.uri)));
                };
                let envelope = serde_json::json!({
                    "uri": commit.uri,
                    "cid": commit.cid.clone().unwrap_or_default(),
                    "author": { "handle": "", "did": author_did_from_uri(&commit.uri) },
                    "indexedAt": record.get("createdAt").cloned().unwrap_or(serde_json::Value::Null),
                    "record": record,
                });
                match skygent_post::parse_post(&envelope, strict) {
                    Ok(post) => match predicate.eval(&post, effects).await {
                        Ok(matched) => Ok(Prepared::Upsert { post, matched }),
                        Err(err) => Err((SyncStage::Filter, err.to_string())),
                    },
                    Err(err) => Err((SyncStage::Parse, err.to_string())),
                }
            }
        }
    }

    async fn flush_checkpoint(&self, checkpoint_key: &str, signature: &str, max_time_ms: Option<i64>) -> SyncResult<()> {
        let Some(max_time_ms) = max_time_ms else { return Ok(()) };
        self.store
            .sync_checkpoint_put(
                checkpoint_key,
                SyncCheckpointRecord {
                    cursor: Some(max_time_ms.to_string()),
                    last_event_seq: Some(self.store.latest_event_seq().await.context(StoreSnafu)?.0),
                    filter_hash: signature.to_string(),
                    updated_at: now_millis(),
                },
            )
            .await
            .context(StoreSnafu)?;
        Ok(())
    }

    /// Shuts the adapter down with a bounded timeout, ignoring errors
    /// (spec.md §4.8 "On shutdown"). A hung adapter must never keep a
    /// cancelled sync alive indefinitely.
    async fn adapter_shutdown_with_timeout(&self) {
        if tokio::time::timeout(Duration::from_secs(5), self.adapter.shutdown()).await.is_err() {
            warn!(target: LOG_TARGET, "adapter shutdown timed out after 5s, proceeding anyway");
        }
    }

    fn emit_progress(&self, source_key: &str, summary: &PushSummary, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let rate = if elapsed_ms > 0 { summary.processed as f64 / (elapsed_ms as f64 / 1000.0) } else { 0.0 };
        self.reporter.report(&Progress {
            processed: summary.processed,
            stored: summary.stored + summary.updated,
            deleted: summary.deleted,
            skipped: summary.skipped,
            errors: summary.errors,
            elapsed_ms,
            rate,
            total: None,
            eta_ms: None,
            store: self.store.root().display().to_string(),
            source: source_key.to_string(),
        });
    }
}

/// `SourceKey::Jetstream` normalized for stable checkpoint identity
/// regardless of the order the caller lists collections/DIDs in.
fn jetstream_source_key(subscription: &JetstreamSubscription) -> SourceKey {
    let mut collections = subscription.collections.clone();
    collections.sort();
    let mut dids = subscription.dids.clone();
    dids.sort();
    SourceKey::Jetstream { endpoint: subscription.endpoint.clone(), collections, dids }
}

/// `at://did/collection/rkey` — the DID is the first path segment after
/// the scheme, which is all the envelope built in `prepare_one` needs.
fn author_did_from_uri(uri: &str) -> String {
    uri.strip_prefix("at://").and_then(|rest| rest.split('/').next()).unwrap_or_default().to_string()
}

/// Pulls from `stream` until either `batch_size` items accumulate or
/// `window` elapses since the first item of this batch arrived,
/// whichever comes first (spec.md §4.8 "grouped_within"). Returns
/// `None` once the stream is exhausted and no items remain buffered.
async fn next_batch(stream: &mut BoxStream<'static, Commit>, batch_size: usize, window: Duration) -> Option<Vec<Commit>> {
    let first = stream.next().await?;
    let mut batch = vec![first];
    let deadline = Instant::now() + window;

    while batch.len() < batch_size {
        tokio::select! {
            biased;
            item = stream.next() => {
                match item {
                    Some(commit) => batch.push(commit),
                    None => break,
                }
            }
            _ = sleep_until(deadline) => break,
        }
    }
    Some(batch)
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BskyResult, Page, Profile};
    use async_trait::async_trait;
    use futures::stream;
    use skygent_filter::runtime::NoEffects;
    use std::collections::HashSet;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeAdapter {
        commits: AsyncMutex<Option<Vec<Commit>>>,
    }

    #[async_trait]
    impl BskyAdapter for FakeAdapter {
        async fn paginated(&self, _source: &SourceKey, _cursor: Option<String>, _limit: Option<u32>) -> BskyResult<Page> {
            unimplemented!("not exercised by push tests")
        }

        async fn stream(&self, _subscription: JetstreamSubscription) -> BskyResult<BoxStream<'static, Commit>> {
            let commits = self.commits.lock().await.take().unwrap_or_default();
            Ok(stream::iter(commits).boxed())
        }

        async fn shutdown(&self) {}

        async fn resolve_identity(&self, _handle: &str) -> BskyResult<String> {
            unimplemented!()
        }

        async fn profile(&self, _did: &str) -> BskyResult<Profile> {
            unimplemented!()
        }

        async fn trending_topics(&self) -> BskyResult<HashSet<String>> {
            unimplemented!()
        }

        async fn head(&self, _url: &str) -> BskyResult<u16> {
            unimplemented!()
        }
    }

    fn create_commit(rkey: &str, text: &str, time_us: i64) -> Commit {
        Commit {
            kind: CommitKind::Create,
            uri: format!("at://did:plc:abc/app.bsky.feed.post/{rkey}"),
            cid: Some(format!("c{rkey}")),
            record: Some(serde_json::json!({ "text": text, "createdAt": "2024-01-15T10:29:00.000Z" })),
            time_us,
        }
    }

    #[tokio::test]
    async fn s5_push_stream_and_max_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let mut commits = vec![
            create_commit("1", "loving #ai", 1_000_000),
            create_commit("2", "more #ai content", 2_000_000),
        ];
        for bad in ["3", "4", "5"] {
            commits.push(Commit {
                kind: CommitKind::Create,
                uri: format!("at://did:plc:abc/app.bsky.feed.post/{bad}"),
                cid: Some(format!("c{bad}")),
                record: None, // malformed: no record body
                time_us: 3_000_000,
            });
        }
        let adapter = Arc::new(FakeAdapter { commits: AsyncMutex::new(Some(commits)) });
        let reporter = Arc::new(skygent_report::NoopReporter);
        let engine = PushEngine::new(store.clone(), adapter, reporter);

        let filter = FilterExpr::Hashtag { tag: "ai".into() };
        let subscription = JetstreamSubscription {
            endpoint: "wss://jetstream.example".into(),
            collections: vec!["app.bsky.feed.post".into()],
            dids: vec![],
            cursor: None,
        };
        let options = PushOptions { max_errors: 2, batch_size: 100, batch_window: Duration::from_millis(50), ..Default::default() };
        let result = engine.run(subscription, filter, &NoEffects, options).await;

        assert!(matches!(result, Err(SyncError::Pipeline { stage: SyncStage::Parse, .. })));

        let rows = store.list_uri_index().await.unwrap();
        assert!(rows.len() >= 2, "the two valid commits before overflow must be committed");

        let checkpoint = store
            .sync_checkpoint_get(
                &SourceKey::Jetstream {
                    endpoint: "wss://jetstream.example".into(),
                    collections: vec!["app.bsky.feed.post".into()],
                    dids: vec![],
                }
                .checkpoint_key(),
            )
            .await
            .unwrap();
        assert!(checkpoint.is_some(), "a final checkpoint covering committed work must be present");
    }

    #[tokio::test]
    async fn delete_mirrors_only_when_uri_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        store
            .append_upsert(UpsertEvent {
                post: sample_post("at://did:plc:abc/app.bsky.feed.post/1", "c1"),
                source: "s".into(),
            })
            .await
            .unwrap();

        let commits = vec![Commit {
            kind: CommitKind::Delete,
            uri: "at://did:plc:abc/app.bsky.feed.post/1".into(),
            cid: None,
            record: None,
            time_us: 5_000_000,
        }];
        let adapter = Arc::new(FakeAdapter { commits: AsyncMutex::new(Some(commits)) });
        let reporter = Arc::new(skygent_report::NoopReporter);
        let engine = PushEngine::new(store.clone(), adapter, reporter);

        let subscription = JetstreamSubscription {
            endpoint: "wss://jetstream.example".into(),
            collections: vec!["app.bsky.feed.post".into()],
            dids: vec![],
            cursor: None,
        };
        let summary = engine
            .run(subscription, FilterExpr::All, &NoEffects, PushOptions { batch_window: Duration::from_millis(20), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(summary.deleted, 1);

        let (record, cid) = store.uri_index_get(&skygent_core::Uri::from("at://did:plc:abc/app.bsky.feed.post/1")).await.unwrap().unwrap();
        assert!(record.tombstoned);
        assert!(cid.is_none());
    }

    fn sample_post(uri: &str, cid: &str) -> skygent_core::Post {
        use skygent_core::types::{Cid, Did, Handle, Timestamp};
        skygent_core::Post {
            uri: skygent_core::Uri::from(uri),
            cid: Cid::from(cid),
            author_handle: Handle::from("alice.bsky.social"),
            author_did: Did::from("did:plc:abc"),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            indexed_at: Timestamp::from_millis(1_700_000_000_000),
            text: "hello".into(),
            hashtags: vec![],
            links: vec![],
            langs: vec![],
            embed: None,
            reply: None,
            feed_reason: None,
            metrics: skygent_core::Metrics::default(),
            labels: vec![],
        }
    }
}
