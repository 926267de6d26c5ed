//! Watch mode (spec.md §4.7 "Watch mode"): repeats a pull sync on a
//! fixed interval until `max_cycles`, a wall-clock `until` budget, or
//! external cancellation ends it.

use std::time::Duration;

use skygent_core::FilterExpr;
use skygent_filter::runtime::EffectProvider;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::error::SyncResult;
use crate::pull::{PullEngine, PullOptions, PullSummary, SourceKey};

const LOG_TARGET: &str = "skygent::sync::watch";

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub interval: Duration,
    /// Stop after this many cycles have run; `None` runs indefinitely
    /// (subject to `until`/cancellation).
    pub max_cycles: Option<u64>,
    /// Total wall-clock budget across all cycles; exceeding it ends the
    /// watch after the in-flight cycle persists its checkpoint.
    pub until: Option<Duration>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { interval: Duration::from_secs(60), max_cycles: None, until: None }
    }
}

/// Drives repeated [`PullEngine::run_once`] cycles. `cancel` is a
/// `tokio::sync::watch` receiver the caller flips to `true` to request
/// a graceful stop between (never mid-) cycles — each cycle already
/// persists its own checkpoint on every page, so stopping between
/// cycles never loses committed work.
#[instrument(skip_all)]
pub async fn watch_pull(
    engine: &PullEngine,
    source_key: SourceKey,
    filter: FilterExpr,
    effects: &dyn EffectProvider,
    options: PullOptions,
    watch: WatchOptions,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) -> SyncResult<Vec<PullSummary>> {
    let deadline = watch.until.map(|until| Instant::now() + until);
    let mut summaries = Vec::new();
    let mut cycle = 0u64;

    loop {
        if *cancel.borrow() {
            info!(target: LOG_TARGET, cycle, "watch cancelled before starting a cycle");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!(target: LOG_TARGET, cycle, "watch duration elapsed");
            break;
        }

        let summary = engine.run_once(source_key.clone(), filter.clone(), effects, options.clone()).await?;
        cycle += 1;
        info!(target: LOG_TARGET, cycle, ?summary, "watch cycle complete");
        summaries.push(summary);

        if watch.max_cycles.is_some_and(|max| cycle >= max) {
            break;
        }

        let sleep_until = match deadline {
            Some(deadline) => deadline.min(Instant::now() + watch.interval),
            None => Instant::now() + watch.interval,
        };
        tokio::select! {
            _ = tokio::time::sleep_until(sleep_until) => {}
            result = cancel.changed() => {
                if result.is_err() || *cancel.borrow() {
                    info!(target: LOG_TARGET, cycle, "watch cancelled during interval sleep");
                    break;
                }
            }
        }
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BskyAdapter, BskyResult, Commit, JetstreamSubscription, Page, Profile};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use skygent_core::config::SkygentConfig;
    use skygent_filter::runtime::NoEffects;
    use skygent_store::Store;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;

    struct EmptyAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BskyAdapter for EmptyAdapter {
        async fn paginated(&self, _source: &SourceKey, _cursor: Option<String>, _limit: Option<u32>) -> BskyResult<Page> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Page { items: vec![], next_cursor: None })
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
    async fn stops_after_max_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let adapter = Arc::new(EmptyAdapter { calls: AtomicUsize::new(0) });
        let reporter = Arc::new(skygent_report::NoopReporter);
        let engine = PullEngine::new(
            store,
            adapter,
            reporter,
            SkygentConfig { bsky_rate_limit: Duration::ZERO, ..Default::default() },
        );
        let (_tx, rx) = tokio::sync::watch::channel(false);

        let summaries = watch_pull(
            &engine,
            SourceKey::Timeline,
            FilterExpr::All,
            &NoEffects,
            PullOptions::default(),
            WatchOptions { interval: Duration::from_millis(1), max_cycles: Some(3), until: None },
            rx,
        )
        .await
        .unwrap();

        assert_eq!(summaries.len(), 3);
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let adapter = Arc::new(EmptyAdapter { calls: AtomicUsize::new(0) });
        let reporter = Arc::new(skygent_report::NoopReporter);
        let engine = PullEngine::new(
            store,
            adapter,
            reporter,
            SkygentConfig { bsky_rate_limit: Duration::ZERO, ..Default::default() },
        );
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();

        let summaries = watch_pull(
            &engine,
            SourceKey::Timeline,
            FilterExpr::All,
            &NoEffects,
            PullOptions::default(),
            WatchOptions::default(),
            rx,
        )
        .await
        .unwrap();

        assert!(summaries.is_empty());
    }
}
