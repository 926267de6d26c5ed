//! Writes a store's currently-matching posts to a newline-delimited
//! JSON file, atomically via write-to-temp + rename.

use std::path::Path;

use skygent_core::{EventSeq, Post};
use skygent_filter::runtime::EffectProvider;
use skygent_filter::Predicate;
use skygent_store::Store;
use snafu::ResultExt;
use tokio::io::AsyncWriteExt as _;
use tracing::{debug, instrument};

use crate::error::{DecodeSnafu, IoSnafu, MaterializeResult, StoreSnafu};

const LOG_TARGET: &str = "skygent::report::materializer";

/// Evaluates `predicate` against every non-tombstoned post currently in
/// `store` and writes the matches to `output_path` as one JSON document
/// per line. Returns the number of posts written.
#[instrument(skip_all, fields(output = %output_path.display()))]
pub async fn materialize(
    store: &Store,
    predicate: &Predicate,
    effects: &dyn EffectProvider,
    output_path: &Path,
) -> MaterializeResult<usize> {
    let rows = store.list_uri_index().await.context(StoreSnafu)?;
    let mut matched: Vec<Post> = Vec::new();

    for (_, record) in rows {
        if record.tombstoned {
            continue;
        }
        let Some(appended) = store.get_event(EventSeq(record.latest_seq)).await.context(StoreSnafu)? else {
            continue;
        };
        let post: Post = serde_json::from_str(&appended.record.payload_json)
            .context(DecodeSnafu { seq: record.latest_seq })?;
        if predicate.eval(&post, effects).await? {
            matched.push(post);
        }
    }

    write_ndjson_atomically(output_path, &matched).await?;
    debug!(target: LOG_TARGET, matched = matched.len(), "materialized filter output");
    Ok(matched.len())
}

async fn write_ndjson_atomically(path: &Path, posts: &[Post]) -> MaterializeResult<()> {
    let mut buf = Vec::new();
    for post in posts {
        serde_json::to_writer(&mut buf, post).expect("Post serialization cannot fail");
        buf.push(b'\n');
    }

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|_| IoSnafu { path: parent.display().to_string() })?;
    }

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("output"),
        rand::random::<u64>()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut file = tokio::fs::File::create(&temp_path)
        .await
        .with_context(|_| IoSnafu { path: temp_path.display().to_string() })?;
    file.write_all(&buf).await.with_context(|_| IoSnafu { path: temp_path.display().to_string() })?;
    file.sync_all().await.with_context(|_| IoSnafu { path: temp_path.display().to_string() })?;

    tokio::fs::rename(&temp_path, path).await.with_context(|_| IoSnafu { path: path.display().to_string() })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygent_core::types::{Cid, Did, Handle, Timestamp};
    use skygent_core::{FilterExpr, Metrics};
    use skygent_filter::runtime::NoEffects;
    use skygent_store::UpsertEvent;

    fn sample_post(uri: &str, cid: &str, hashtags: Vec<&str>) -> Post {
        Post {
            uri: skygent_core::Uri::from(uri),
            cid: Cid::from(cid),
            author_handle: Handle::from("alice.bsky.social"),
            author_did: Did::from("did:plc:abc"),
            created_at: Timestamp::from_millis(1_700_000_000_000),
            indexed_at: Timestamp::from_millis(1_700_000_000_000),
            text: "hello".into(),
            hashtags: hashtags.into_iter().map(Into::into).collect(),
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
    async fn materializes_only_matching_non_tombstoned_posts() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        store
            .append_upsert(UpsertEvent { post: sample_post("at://did/p/1", "c1", vec!["ai"]), source: "s".into() })
            .await
            .unwrap();
        store
            .append_upsert(UpsertEvent { post: sample_post("at://did/p/2", "c2", vec!["other"]), source: "s".into() })
            .await
            .unwrap();
        store
            .append_upsert(UpsertEvent { post: sample_post("at://did/p/3", "c3", vec!["ai"]), source: "s".into() })
            .await
            .unwrap();
        store
            .append_delete(skygent_store::DeleteEvent {
                uri: skygent_core::Uri::from("at://did/p/3"),
                source: "s".into(),
                created_at: 1,
            })
            .await
            .unwrap();

        let predicate = Predicate::compile(&FilterExpr::Hashtag { tag: "ai".into() }).unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let out_path = out_dir.path().join("ai.ndjson");

        let count = materialize(&store, &predicate, &NoEffects, &out_path).await.unwrap();
        assert_eq!(count, 1);

        let contents = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("at://did/p/1"));
    }
}
