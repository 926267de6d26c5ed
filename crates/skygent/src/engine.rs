//! Wires one store together with the sync, derive, and report engines
//! behind a single handle (spec.md §2 crate map, "facade"). Mirrors the
//! teacher's `Client`: plain `::new()`/`open()` construction, no
//! reflection, state handed out as `Arc<...>` clones to whatever drives
//! it concurrently.

use std::path::Path;
use std::sync::Arc;

use skygent_core::config::SkygentConfig;
use skygent_core::FilterExpr;
use skygent_derive::{derive, DeriveRequest, DeriveSummary};
use skygent_filter::runtime::EffectProvider;
use skygent_filter::Predicate;
use skygent_report::{materialize, Reporter, TracingReporter};
use skygent_store::Store;
use skygent_sync::adapter::{BskyAdapter, JetstreamSubscription};
use skygent_sync::{watch_pull, PullEngine, PullOptions, PullSummary, PushEngine, PushOptions, PushSummary, SourceKey, WatchOptions};
use snafu::ResultExt;
use tracing::instrument;

use crate::error::{SkygentResult, StoreIoSnafu};

const LOG_TARGET: &str = "skygent::engine";

/// One open store plus the configuration every engine built on top of
/// it shares.
pub struct Engine {
    store: Arc<Store>,
    config: SkygentConfig,
    reporter: Arc<dyn Reporter>,
}

impl Engine {
    /// Opens (creating if absent) the store at `root`, using
    /// [`TracingReporter`] until [`Engine::with_reporter`] overrides it.
    pub fn open(root: impl AsRef<Path>, config: SkygentConfig) -> SkygentResult<Self> {
        let store = Store::open(root).context(StoreIoSnafu)?;
        Ok(Self { store: Arc::new(store), config, reporter: Arc::new(TracingReporter) })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &SkygentConfig {
        &self.config
    }

    #[instrument(skip_all)]
    pub async fn pull(
        &self,
        adapter: Arc<dyn BskyAdapter>,
        source: SourceKey,
        filter: FilterExpr,
        effects: &dyn EffectProvider,
        options: PullOptions,
    ) -> SkygentResult<PullSummary> {
        let engine = PullEngine::new(self.store.clone(), adapter, self.reporter.clone(), self.config.clone());
        Ok(engine.run_once(source, filter, effects, options).await?)
    }

    #[instrument(skip_all)]
    pub async fn watch(
        &self,
        adapter: Arc<dyn BskyAdapter>,
        source: SourceKey,
        filter: FilterExpr,
        effects: &dyn EffectProvider,
        options: PullOptions,
        watch_options: WatchOptions,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> SkygentResult<Vec<PullSummary>> {
        let engine = PullEngine::new(self.store.clone(), adapter, self.reporter.clone(), self.config.clone());
        Ok(watch_pull(&engine, source, filter, effects, options, watch_options, cancel).await?)
    }

    #[instrument(skip_all)]
    pub async fn push(
        &self,
        adapter: Arc<dyn BskyAdapter>,
        subscription: JetstreamSubscription,
        filter: FilterExpr,
        effects: &dyn EffectProvider,
        options: PushOptions,
    ) -> SkygentResult<PushSummary> {
        let engine = PushEngine::new(self.store.clone(), adapter, self.reporter.clone());
        Ok(engine.run(subscription, filter, effects, options).await?)
    }

    /// Replays `source`'s event log into this store through `filter`
    /// (spec.md §4.6, C9). `source_name` identifies the pair for the
    /// view checkpoint, since two stores may share an instant but not a
    /// name.
    #[instrument(skip_all, fields(source_name = %source_name))]
    pub async fn derive_from(
        &self,
        source: Arc<Store>,
        source_name: impl Into<String>,
        filter: FilterExpr,
        mode: skygent_derive::EvaluationMode,
        reset: bool,
        effects: &dyn EffectProvider,
    ) -> SkygentResult<DeriveSummary> {
        let request = DeriveRequest { source, source_name: source_name.into(), target: self.store.clone(), filter, mode, reset };
        Ok(derive(request, effects, self.config.derive_batch_size).await?)
    }

    /// Writes every currently-matching, non-tombstoned post in this
    /// store to `output_path` as newline-delimited JSON (spec.md §4.11
    /// "Materializer").
    pub async fn materialize(&self, predicate: &Predicate, effects: &dyn EffectProvider, output_path: &Path) -> SkygentResult<usize> {
        Ok(materialize(&self.store, predicate, effects, output_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use skygent_filter::runtime::NoEffects;
    use skygent_sync::adapter::{BskyResult, Commit, Page, Profile};
    use std::collections::HashSet;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeAdapter {
        pages: AsyncMutex<Vec<Page>>,
    }

    #[async_trait]
    impl BskyAdapter for FakeAdapter {
        async fn paginated(&self, _source: &SourceKey, _cursor: Option<String>, _limit: Option<u32>) -> BskyResult<Page> {
            let mut pages = self.pages.lock().await;
            Ok(if pages.is_empty() { Page { items: vec![], next_cursor: None } } else { pages.remove(0) })
        }

        async fn stream(&self, _subscription: JetstreamSubscription) -> BskyResult<BoxStream<'static, Commit>> {
            unimplemented!()
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

    #[tokio::test]
    async fn pull_through_the_engine_handle_stores_matches() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path(), SkygentConfig { bsky_rate_limit: std::time::Duration::ZERO, ..Default::default() }).unwrap();
        let adapter = Arc::new(FakeAdapter {
            pages: AsyncMutex::new(vec![Page {
                items: vec![serde_json::json!({
                    "uri": "at://did:plc:abc/app.bsky.feed.post/1",
                    "cid": "c1",
                    "author": { "handle": "alice.bsky.social", "did": "did:plc:abc" },
                    "indexedAt": "2024-01-15T10:30:00.000Z",
                    "record": { "text": "loving #ai", "createdAt": "2024-01-15T10:29:00.000Z" },
                })],
                next_cursor: None,
            }]),
        });

        let summary = engine
            .pull(adapter, SourceKey::Timeline, FilterExpr::Hashtag { tag: "ai".into() }, &NoEffects, PullOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.stored, 1);
    }
}
