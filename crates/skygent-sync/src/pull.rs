//! Cursor-paged pull sync: timeline/feed/list/author/thread/notification
//! sources (spec.md §4.7, C7).

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use skygent_core::config::SkygentConfig;
use skygent_core::FilterExpr;
use skygent_filter::runtime::EffectProvider;
use skygent_filter::Predicate;
use skygent_report::{Progress, Reporter};
use skygent_store::tables::SyncCheckpointRecord;
use skygent_store::{Store, UpsertEvent};
use snafu::ResultExt;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::adapter::BskyAdapter;
use crate::error::{CompileSnafu, PipelineSnafu, StoreSnafu, SyncResult, SyncStage};
use crate::rate_limit::{with_retry, RateLimiter};

const LOG_TARGET: &str = "skygent::sync::pull";

/// Identifies a pull source (spec.md §4.7 "Source parameterization").
/// `Hash`-derived so it can key `sync_checkpoint` directly, the way the
/// teacher keys its own tables by compound tuples rather than
/// stringly-typed lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Timeline,
    Feed { uri: String },
    List { uri: String },
    Author { did: String, filter: String, include_pins: bool },
    Thread { uri: String, depth: u32, parent_height: u32 },
    Notifications,
    /// The push engine's checkpoint identity (spec.md §3 "Sync
    /// checkpoint" `jetstream(endpoint,collections,dids)`). Lives on
    /// this enum rather than a separate one so both engines share the
    /// one `sync_checkpoint` table through the same key type.
    Jetstream { endpoint: String, collections: Vec<String>, dids: Vec<String> },
}

impl SourceKey {
    /// Canonical string form used as the `sync_checkpoint` table key —
    /// `redb_bincode` wants a stable `Key` type, and `String` is already
    /// used for every other store-table key in this workspace.
    pub fn checkpoint_key(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{}:{:016x}", self.kind_label(), hasher.finish())
    }

    fn kind_label(&self) -> &'static str {
        match self {
            SourceKey::Timeline => "timeline",
            SourceKey::Feed { .. } => "feed",
            SourceKey::List { .. } => "list",
            SourceKey::Author { .. } => "author",
            SourceKey::Thread { .. } => "thread",
            SourceKey::Notifications => "notifications",
            SourceKey::Jetstream { .. } => "jetstream",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub processed: u64,
    pub stored: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub dry_run: bool,
    pub strict: bool,
    /// Upper bound on items processed this run; `None` means "drain the
    /// source to its natural end" (spec.md §4.7 "Termination").
    pub limit: Option<u64>,
    pub page_limit: Option<u32>,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self { dry_run: false, strict: false, limit: None, page_limit: None }
    }
}

/// Drives one pull-sync pass over a single source (spec.md §4.7 steps
/// 1-5). Watch-mode scheduling (interval/max_cycles/until) is the
/// caller's loop around repeated `run_once` calls — kept as a thin
/// wrapper here rather than owning a scheduler.
pub struct PullEngine {
    store: Arc<Store>,
    adapter: Arc<dyn BskyAdapter>,
    reporter: Arc<dyn Reporter>,
    rate_limiter: RateLimiter,
    config: SkygentConfig,
}

impl PullEngine {
    pub fn new(store: Arc<Store>, adapter: Arc<dyn BskyAdapter>, reporter: Arc<dyn Reporter>, config: SkygentConfig) -> Self {
        let rate_limiter = RateLimiter::new(config.bsky_rate_limit);
        Self { store, adapter, reporter, rate_limiter, config }
    }

    #[instrument(skip_all, fields(source = source_key.checkpoint_key()))]
    pub async fn run_once(
        &self,
        source_key: SourceKey,
        filter: FilterExpr,
        effects: &dyn EffectProvider,
        options: PullOptions,
    ) -> SyncResult<PullSummary> {
        let predicate = Predicate::compile(&filter).context(CompileSnafu)?;
        let signature = predicate.signature().to_string();
        let key = source_key.checkpoint_key();

        let existing = self.store.sync_checkpoint_get(&key).await.context(StoreSnafu)?;
        let mut cursor = match &existing {
            // Filter semantics changed since the last run: the cursor's
            // meaning is tied to what was being filtered, so discard it
            // (spec.md §4.7 step 1).
            Some(checkpoint) if checkpoint.filter_hash == signature => checkpoint.cursor.clone(),
            _ => None,
        };

        let mut summary = PullSummary::default();
        let mut seen_in_dry_run = std::collections::HashSet::new();
        let start = Instant::now();
        let mut last_report = Instant::now();
        let mut last_page_cursor = cursor.clone();

        loop {
            self.rate_limiter.acquire().await;
            let page = {
                let source_key = &source_key;
                let cursor = cursor.clone();
                with_retry(self.config.bsky_retry_base, self.config.bsky_retry_max, "paginated", || {
                    let cursor = cursor.clone();
                    async move { self.adapter.paginated(source_key, cursor, options.page_limit).await }
                })
                .await?
            };

            for item in &page.items {
                summary.processed += 1;
                match skygent_post::parse_post(item, options.strict) {
                    Ok(post) => match predicate.eval(&post, effects).await {
                        Ok(true) => {
                            if options.dry_run {
                                if seen_in_dry_run.insert(post.uri.as_str().to_string()) {
                                    summary.stored += 1;
                                }
                            } else {
                                let inserted = self
                                    .store
                                    .append_upsert_if_missing(UpsertEvent { post, source: key.clone() })
                                    .await
                                    .context(StoreSnafu)?;
                                if inserted.is_some() {
                                    summary.stored += 1;
                                }
                            }
                        }
                        Ok(false) => summary.skipped += 1,
                        Err(err) => {
                            summary.errors += 1;
                            self.reporter.warn("filter evaluation failed", &[("cause", &err.to_string())]);
                            warn!(target: LOG_TARGET, cause = %err, "filter evaluation failed");
                            if options.strict {
                                return PipelineSnafu { stage: SyncStage::Filter, message: err.to_string() }.fail();
                            }
                        }
                    },
                    Err(err) => {
                        summary.errors += 1;
                        self.reporter.warn("skipped malformed pull item", &[("cause", &err.to_string())]);
                        warn!(target: LOG_TARGET, cause = %err, "skipped malformed pull item");
                    }
                }

                if summary.processed % 100 == 0 || last_report.elapsed() >= Duration::from_secs(5) {
                    self.emit_progress(&key, &summary, start.elapsed());
                    last_report = Instant::now();
                }

                if let Some(limit) = options.limit {
                    if summary.processed >= limit {
                        break;
                    }
                }
            }

            cursor = page.next_cursor;
            // Persist the last non-`None` cursor rather than overwriting it
            // with the terminal empty page's `None` (spec.md §8 S3:
            // "sync_checkpoint.cursor equals the cursor returned by the
            // last non-empty page").
            if cursor.is_some() {
                last_page_cursor = cursor.clone();
            }

            if !options.dry_run {
                let last_event_seq = self.store.latest_event_seq().await.context(StoreSnafu)?;
                self.store
                    .sync_checkpoint_put(
                        &key,
                        SyncCheckpointRecord {
                            cursor: last_page_cursor.clone(),
                            last_event_seq: Some(last_event_seq.0),
                            filter_hash: signature.clone(),
                            updated_at: now_millis(),
                        },
                    )
                    .await
                    .context(StoreSnafu)?;
            }

            let limit_reached = options.limit.is_some_and(|limit| summary.processed >= limit);
            if cursor.is_none() || limit_reached {
                break;
            }
        }

        self.emit_progress(&key, &summary, start.elapsed());
        debug!(target: LOG_TARGET, ?summary, "pull sync pass complete");
        Ok(summary)
    }

    fn emit_progress(&self, source_key: &str, summary: &PullSummary, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        let rate = if elapsed_ms > 0 { summary.processed as f64 / (elapsed_ms as f64 / 1000.0) } else { 0.0 };
        self.reporter.report(&Progress {
            processed: summary.processed,
            stored: summary.stored,
            deleted: 0,
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

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BskyResult, Commit, JetstreamSubscription, Page, Profile};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use skygent_filter::runtime::NoEffects;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeAdapter {
        pages: AsyncMutex<Vec<Page>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BskyAdapter for FakeAdapter {
        async fn paginated(&self, _source: &SourceKey, _cursor: Option<String>, _limit: Option<u32>) -> BskyResult<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().await;
            if pages.is_empty() {
                Ok(Page { items: vec![], next_cursor: None })
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn stream(&self, _subscription: JetstreamSubscription) -> BskyResult<BoxStream<'static, Commit>> {
            unimplemented!("not exercised by pull tests")
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

    fn sample_item(rkey: &str, text: &str) -> serde_json::Value {
        serde_json::json!({
            "uri": format!("at://did:plc:abc/app.bsky.feed.post/{rkey}"),
            "cid": format!("c{rkey}"),
            "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
            "indexedAt": "2024-01-15T10:30:00.000Z",
            "record": { "text": text, "createdAt": "2024-01-15T10:29:00.000Z" },
        })
    }

    #[tokio::test]
    async fn s3_pull_sync_and_idempotence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let adapter = Arc::new(FakeAdapter {
            pages: AsyncMutex::new(vec![
                Page { items: vec![sample_item("1", "loving #ai"), sample_item("2", "no tag here")], next_cursor: Some("c1".into()) },
                Page { items: vec![], next_cursor: None },
            ]),
            calls: AtomicUsize::new(0),
        });
        let reporter = Arc::new(skygent_report::NoopReporter);
        let engine = PullEngine::new(store.clone(), adapter, reporter, SkygentConfig { bsky_rate_limit: Duration::ZERO, ..Default::default() });

        let filter = FilterExpr::Hashtag { tag: "ai".into() };
        let first = engine
            .run_once(SourceKey::Timeline, filter.clone(), &NoEffects, PullOptions::default())
            .await
            .unwrap();
        assert_eq!(first.stored, 1);
        assert_eq!(first.processed, 2);

        let checkpoint = store.sync_checkpoint_get(&SourceKey::Timeline.checkpoint_key()).await.unwrap().unwrap();
        assert_eq!(checkpoint.cursor, Some("c1".to_string()));

        let second = engine.run_once(SourceKey::Timeline, filter, &NoEffects, PullOptions::default()).await.unwrap();
        assert_eq!(second.stored, 0);
        assert_eq!(second.processed, 0);
    }

    #[test]
    fn source_key_checkpoint_strings_are_distinct_per_kind() {
        let a = SourceKey::Feed { uri: "at://x".into() }.checkpoint_key();
        let b = SourceKey::List { uri: "at://x".into() }.checkpoint_key();
        assert_ne!(a, b);
    }
}
