//! Replays one store's event log through a filter into another, with a
//! checkpointed incremental continuation (spec.md §4.6, C9).

pub mod error;

use std::fmt;
use std::sync::Arc;

use skygent_core::{EventSeq, FilterExpr, Uri};
use skygent_filter::runtime::EffectProvider;
use skygent_filter::Predicate;
use skygent_store::tables::EventKind;
use skygent_store::{DeleteEvent, Store, UpsertEvent};
use tracing::{debug, info, instrument};

pub use error::{DeriveError, DeriveResult};

const LOG_TARGET: &str = "skygent::derive";

/// Whether the filter sees a source event's fields as they were at
/// append time, or re-evaluates effectful atoms live (spec.md §4.6
/// step 4, GLOSSARY "Event-time vs derive-time").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    EventTime,
    DeriveTime,
}

impl EvaluationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationMode::EventTime => "event_time",
            EvaluationMode::DeriveTime => "derive_time",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to replay and where, matching spec.md §4.6's `(source, target,
/// filter, mode, reset?)` parameter tuple.
pub struct DeriveRequest {
    pub source: Arc<Store>,
    /// Key under which `target`'s view checkpoint is recorded — the
    /// source store's name (spec.md §3 "View checkpoint" is keyed by
    /// `(target_store, source_store)`; the target side is `self`, so
    /// only the source name needs threading through).
    pub source_name: String,
    pub target: Arc<Store>,
    pub filter: FilterExpr,
    pub mode: EvaluationMode,
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeriveSummary {
    pub processed: u64,
    pub stored: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub last_source_seq: u64,
}

/// Runs one derivation pass: compatibility check, optional reset,
/// replay, evaluate, commit, periodic checkpoint (spec.md §4.6 steps
/// 1-6).
#[instrument(skip_all, fields(source = %request.source_name, mode = %request.mode, reset = request.reset))]
pub async fn derive(
    request: DeriveRequest,
    effects: &dyn EffectProvider,
    batch_size: usize,
) -> DeriveResult<DeriveSummary> {
    let predicate = Predicate::compile(&request.filter)?;

    if request.mode == EvaluationMode::EventTime && predicate.is_effectful() {
        return error::EffectfulInEventTimeSnafu.fail();
    }

    let signature = predicate.signature();
    let signature_str = signature.to_string();
    let existing = request.target.view_checkpoint_get(&request.source_name).await?;

    if request.reset {
        info!(target: LOG_TARGET, "resetting target store before derivation");
        request.target.clear_all_rows().await?;
        request.target.view_checkpoint_clear(&request.source_name).await?;
    } else if let Some(checkpoint) = &existing {
        if checkpoint.filter_hash != signature_str || checkpoint.evaluation_mode != request.mode.as_str() {
            return error::SettingsChangedSnafu.fail();
        }
    }

    let after_seq = if request.reset {
        EventSeq::NONE
    } else {
        existing.map(|c| EventSeq(c.last_source_seq)).unwrap_or(EventSeq::NONE)
    };

    let events = request.source.scan_events_after(after_seq).await?;
    debug!(target: LOG_TARGET, after_seq = after_seq.0, pending = events.len(), "replaying source events");

    let mut summary = DeriveSummary { last_source_seq: after_seq.0, ..Default::default() };
    let batch_size = batch_size.max(1);

    for appended in events {
        match appended.record.event_type {
            EventKind::Upsert => {
                let post: skygent_core::Post = serde_json::from_str(&appended.record.payload_json)
                    .expect("event_log payload_json invariant: decodes back to the typed event");
                if predicate.eval(&post, effects).await? {
                    let inserted = request
                        .target
                        .append_upsert_if_missing(UpsertEvent { post, source: format!("derive:{}", request.source_name) })
                        .await?;
                    if inserted.is_some() {
                        summary.stored += 1;
                    }
                } else {
                    summary.skipped += 1;
                }
            }
            EventKind::Delete => {
                let uri = Uri::from(appended.record.post_uri.clone());
                if request.target.uri_index_get(&uri).await?.is_some() {
                    request
                        .target
                        .append_delete(DeleteEvent {
                            uri,
                            source: format!("derive:{}", request.source_name),
                            created_at: appended.record.created_at,
                        })
                        .await?;
                    summary.deleted += 1;
                }
            }
        }

        summary.processed += 1;
        summary.last_source_seq = appended.seq.0;

        if summary.processed % batch_size as u64 == 0 {
            flush_checkpoint(&request, signature, summary.last_source_seq).await?;
        }
    }

    flush_checkpoint(&request, signature, summary.last_source_seq).await?;

    info!(
        target: LOG_TARGET,
        processed = summary.processed,
        stored = summary.stored,
        deleted = summary.deleted,
        skipped = summary.skipped,
        "derivation pass complete"
    );

    Ok(summary)
}

async fn flush_checkpoint(
    request: &DeriveRequest,
    signature: skygent_core::FilterSignature,
    last_source_seq: u64,
) -> DeriveResult<()> {
    request
        .target
        .view_checkpoint_put(&request.source_name, EventSeq(last_source_seq), signature, request.mode.as_str(), now_millis())
        .await?;
    Ok(())
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
    use skygent_core::types::{Cid, Did, Handle, Timestamp};
    use skygent_core::{FilterExpr, Metrics, Post};
    use skygent_filter::runtime::NoEffects;

    fn sample_post(uri: &str, cid: &str) -> Post {
        Post {
            uri: Uri::from(uri),
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
            metrics: Metrics::default(),
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn s4_derivation_with_delete() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Store::open(source_dir.path()).unwrap());
        let target = Arc::new(Store::open(target_dir.path()).unwrap());

        let u1 = Uri::from("at://did/app.bsky.feed.post/1");
        source
            .append_upsert(UpsertEvent { post: sample_post(u1.as_str(), "cid1"), source: "s".into() })
            .await
            .unwrap();
        source
            .append_upsert(UpsertEvent { post: sample_post("at://did/app.bsky.feed.post/2", "cid2"), source: "s".into() })
            .await
            .unwrap();
        source
            .append_delete(DeleteEvent { uri: u1.clone(), source: "s".into(), created_at: 1_700_000_000_100 })
            .await
            .unwrap();

        let request = DeriveRequest {
            source: source.clone(),
            source_name: "source".into(),
            target: target.clone(),
            filter: FilterExpr::All,
            mode: EvaluationMode::EventTime,
            reset: false,
        };
        let summary = derive(request, &NoEffects, 256).await.unwrap();

        assert_eq!(summary.last_source_seq, 3);
        assert_eq!(summary.processed, 3);

        let (u1_record, u1_cid) = target.uri_index_get(&u1).await.unwrap().unwrap();
        assert!(u1_record.tombstoned);
        assert!(u1_cid.is_none());

        let u2 = Uri::from("at://did/app.bsky.feed.post/2");
        let (u2_record, u2_cid) = target.uri_index_get(&u2).await.unwrap().unwrap();
        assert!(!u2_record.tombstoned);
        assert_eq!(u2_cid.as_deref(), Some("cid2"));

        let checkpoint = target.view_checkpoint_get("source").await.unwrap().unwrap();
        assert_eq!(checkpoint.last_source_seq, 3);
    }

    #[tokio::test]
    async fn p4_rerun_with_no_new_events_is_a_no_op() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Store::open(source_dir.path()).unwrap());
        let target = Arc::new(Store::open(target_dir.path()).unwrap());

        source
            .append_upsert(UpsertEvent { post: sample_post("at://did/app.bsky.feed.post/1", "cid1"), source: "s".into() })
            .await
            .unwrap();

        let make_request = || DeriveRequest {
            source: source.clone(),
            source_name: "source".into(),
            target: target.clone(),
            filter: FilterExpr::All,
            mode: EvaluationMode::EventTime,
            reset: false,
        };

        let first = derive(make_request(), &NoEffects, 256).await.unwrap();
        assert_eq!(first.stored, 1);

        let second = derive(make_request(), &NoEffects, 256).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.stored, 0);
    }

    #[tokio::test]
    async fn p5_filter_hash_gate_blocks_without_reset() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Store::open(source_dir.path()).unwrap());
        let target = Arc::new(Store::open(target_dir.path()).unwrap());

        source
            .append_upsert(UpsertEvent { post: sample_post("at://did/app.bsky.feed.post/1", "cid1"), source: "s".into() })
            .await
            .unwrap();

        derive(
            DeriveRequest {
                source: source.clone(),
                source_name: "source".into(),
                target: target.clone(),
                filter: FilterExpr::All,
                mode: EvaluationMode::EventTime,
                reset: false,
            },
            &NoEffects,
            256,
        )
        .await
        .unwrap();

        let different_filter = FilterExpr::Hashtag { tag: "ai".into() };
        let result = derive(
            DeriveRequest {
                source,
                source_name: "source".into(),
                target,
                filter: different_filter,
                mode: EvaluationMode::EventTime,
                reset: false,
            },
            &NoEffects,
            256,
        )
        .await;

        assert!(matches!(result, Err(DeriveError::SettingsChanged { .. })));
    }

    #[tokio::test]
    async fn event_time_rejects_effectful_filter() {
        let source_dir = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        let source = Arc::new(Store::open(source_dir.path()).unwrap());
        let target = Arc::new(Store::open(target_dir.path()).unwrap());

        let filter = FilterExpr::And {
            left: Box::new(FilterExpr::Hashtag { tag: "ai".into() }),
            right: Box::new(FilterExpr::HasLinks),
        };
        let request = DeriveRequest {
            source,
            source_name: "source".into(),
            target,
            filter,
            mode: EvaluationMode::EventTime,
            reset: false,
        };
        let result = derive(request, &NoEffects, 256).await;
        assert!(result.is_ok(), "HasLinks is pure, only HasValidLinks/Trending are effectful");
    }
}
