//! The per-store event log, URI index, and checkpoint tables (spec.md
//! §4.4, C5), following the teacher's `Database` shape: a thin wrapper
//! around `redb_bincode::Database` with `read_with`/`write_with` helpers
//! that run a closure inside a transaction and commit on success.

use std::ops;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use redb_bincode::{ReadTransaction, WriteTransaction};
use serde::{Deserialize, Serialize};
use skygent_core::{EventSeq, FilterSignature, Post, Uri};
use snafu::{Location, ResultExt, Snafu};
use tracing::{debug, instrument};

use crate::tables::{
    self, db_version, event_log, event_log_by_uri, event_log_next_seq, uri_index, uri_index_cid,
    view_checkpoint, EventKind, EventLogRecord, UriIndexRecord, ViewCheckpointRecord,
    CURRENT_DB_VERSION,
};
use crate::ulid::UlidGenerator;

const LOG_TARGET: &str = "skygent::store";

#[derive(Debug, Snafu)]
pub enum StoreIoError {
    #[snafu(display("could not create store directory {path}: {source}"))]
    CreateDir {
        path: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("database error at {path}: {source}"))]
    Database {
        path: String,
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("store schema version {db_ver} is newer than this build's {code_ver}"))]
    VersionTooHigh { db_ver: u64, code_ver: u64 },
}

pub type StoreIoResult<T> = Result<T, StoreIoError>;

/// A write transaction, wrapping `redb_bincode::WriteTransaction` the
/// way the teacher's `WriteTransactionCtx` does, so callers write the
/// same `tx.open_table(&TABLE)?` idiom throughout this crate.
pub struct StoreWriteTx(WriteTransaction);

impl ops::Deref for StoreWriteTx {
    type Target = WriteTransaction;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ops::DerefMut for StoreWriteTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// An appended event log row, as handed back to the caller of
/// `append_*` (spec.md §4.4 "Append contract").
#[derive(Debug, Clone, PartialEq)]
pub struct Appended {
    pub seq: EventSeq,
    pub record: EventLogRecord,
}

/// What an `append_upsert`/`append_delete` call is asked to record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertEvent {
    pub post: Post,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub uri: Uri,
    pub source: String,
    pub created_at: i64,
}

/// An open store: one `redb` file plus the process-local write mutex
/// that, together with [`crate::lock::with_store_lock`], implements the
/// single-writer discipline of spec.md §5.
pub struct Store {
    root: PathBuf,
    inner: redb_bincode::Database,
    ulid: Mutex<UlidGenerator>,
    write_mutex: tokio::sync::Mutex<()>,
}

impl Store {
    /// Opens (creating if absent) the `db.sqlite`-equivalent file under
    /// `store_root`. Named `db.redb` here since spec.md §6 calls the
    /// `db.sqlite` name "illustrative" and explicitly allows "or
    /// equivalent embedded RDBMS" (SPEC_FULL.md §4.4).
    #[instrument(skip_all, fields(root = %store_root.as_ref().display()))]
    pub fn open(store_root: impl AsRef<Path>) -> StoreIoResult<Store> {
        let root = store_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).with_context(|_| CreateDirSnafu {
            path: root.display().to_string(),
        })?;
        let db_path = root.join("db.redb");
        let inner = redb::Database::create(&db_path).with_context(|_| DatabaseSnafu {
            path: db_path.display().to_string(),
        })?;
        let inner = redb_bincode::Database::from(inner);

        Self::write_with_inner(&inner, |tx| {
            init_tables(tx)?;
            check_version(tx)
        })?;

        debug!(target: LOG_TARGET, path = %db_path.display(), "opened store");
        Ok(Store { root, inner, ulid: Mutex::new(UlidGenerator::new()), write_mutex: tokio::sync::Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&StoreWriteTx) -> StoreIoResult<T>,
    ) -> StoreIoResult<T> {
        let dbtx = StoreWriteTx(inner.begin_write().context(TransactionSnafu)?);
        let result = f(&dbtx)?;
        dbtx.0.commit().context(CommitSnafu)?;
        Ok(result)
    }

    /// Runs `f` inside a write transaction, serialized against every
    /// other in-process writer via `write_mutex` (spec.md §5 "single
    /// writer... an in-process mutex enforces it across tasks").
    pub async fn write_with<T>(&self, f: impl FnOnce(&StoreWriteTx) -> StoreIoResult<T>) -> StoreIoResult<T> {
        let _permit = self.write_mutex.lock().await;
        tokio::task::block_in_place(|| Self::write_with_inner(&self.inner, f))
    }

    pub async fn read_with<T>(&self, f: impl FnOnce(&ReadTransaction) -> StoreIoResult<T>) -> StoreIoResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = self.inner.begin_read().context(TransactionSnafu)?;
            f(&dbtx)
        })
    }

    fn next_seq_tx(tx: &StoreWriteTx) -> StoreIoResult<u64> {
        let mut table = tx.open_table(&event_log_next_seq::TABLE)?;
        let next = table.get(&())?.map(|v| v.value()).unwrap_or(0) + 1;
        table.insert(&(), &next)?;
        Ok(next)
    }

    fn next_ulid(&self) -> [u8; 16] {
        *self.ulid.lock().expect("ulid mutex poisoned").generate_now().as_bytes()
    }

    fn append_tx(
        tx: &StoreWriteTx,
        ulid: [u8; 16],
        event_type: EventKind,
        post_uri: &str,
        cid: Option<String>,
        payload_json: String,
        created_at: i64,
        source: String,
    ) -> StoreIoResult<Appended> {
        let seq = Self::next_seq_tx(tx)?;
        let record = EventLogRecord {
            event_id: ulid,
            event_type,
            post_uri: post_uri.to_string(),
            cid,
            payload_json,
            created_at,
            source,
        };

        tx.open_table(&event_log::TABLE)?.insert(&seq, &record)?;
        tx.open_table(&event_log_by_uri::TABLE)?.insert(&(post_uri.to_string(), u64::MAX - seq), &())?;

        Ok(Appended { seq: EventSeq(seq), record })
    }

    /// Unconditionally appends an upsert event and updates `uri_index`
    /// to the new seq/cid (spec.md §4.4 step 1-3).
    pub async fn append_upsert(&self, event: UpsertEvent) -> StoreIoResult<Appended> {
        let ulid = self.next_ulid();
        let payload_json = serde_json::to_string(&event.post).expect("Post serialization cannot fail");
        let uri = event.post.uri.as_str().to_string();
        let cid = event.post.cid.as_str().to_string();
        let created_at = event.post.indexed_at.as_millis();

        self.write_with(move |tx| {
            let appended = Self::append_tx(
                tx,
                ulid,
                EventKind::Upsert,
                &uri,
                Some(cid.clone()),
                payload_json,
                created_at,
                event.source.clone(),
            )?;
            upsert_index_tx(tx, &uri, appended.seq.0, &cid)?;
            Ok(appended)
        })
        .await
    }

    /// Appends the upsert only if `uri_index` doesn't already carry a
    /// row with an equal CID (I3). Returns `None` on the no-op path.
    pub async fn append_upsert_if_missing(&self, event: UpsertEvent) -> StoreIoResult<Option<Appended>> {
        let ulid = self.next_ulid();
        let payload_json = serde_json::to_string(&event.post).expect("Post serialization cannot fail");
        let uri = event.post.uri.as_str().to_string();
        let cid = event.post.cid.as_str().to_string();
        let created_at = event.post.indexed_at.as_millis();

        self.write_with(move |tx| {
            let existing_cid = tx.open_table(&uri_index_cid::TABLE)?.get(&uri)?.map(|v| v.value());
            if existing_cid.as_deref() == Some(cid.as_str()) {
                return Ok(None);
            }
            let appended = Self::append_tx(
                tx,
                ulid,
                EventKind::Upsert,
                &uri,
                Some(cid.clone()),
                payload_json,
                created_at,
                event.source.clone(),
            )?;
            upsert_index_tx(tx, &uri, appended.seq.0, &cid)?;
            Ok(Some(appended))
        })
        .await
    }

    /// Appends a delete event; tombstones the URI in the index
    /// regardless of whether a row already existed (I4).
    pub async fn append_delete(&self, event: DeleteEvent) -> StoreIoResult<Appended> {
        let ulid = self.next_ulid();
        let uri = event.uri.as_str().to_string();

        self.write_with(move |tx| {
            let appended = Self::append_tx(
                tx,
                ulid,
                EventKind::Delete,
                &uri,
                None,
                "{}".to_string(),
                event.created_at,
                event.source.clone(),
            )?;
            tx.open_table(&uri_index::TABLE)?
                .insert(&uri, &UriIndexRecord { latest_seq: appended.seq.0, tombstoned: true })?;
            tx.open_table(&uri_index_cid::TABLE)?.remove(&uri)?;
            Ok(appended)
        })
        .await
    }

    /// `uri_index` lookup for a single URI, `None` if never seen.
    pub async fn uri_index_get(&self, uri: &Uri) -> StoreIoResult<Option<(UriIndexRecord, Option<String>)>> {
        let uri = uri.as_str().to_string();
        self.read_with(move |tx| {
            let Some(record) = tx.open_table(&uri_index::TABLE)?.get(&uri)?.map(|v| v.value()) else {
                return Ok(None);
            };
            let cid = tx.open_table(&uri_index_cid::TABLE)?.get(&uri)?.map(|v| v.value());
            Ok(Some((record, cid)))
        })
        .await
    }

    /// Scans `event_log` rows with `event_seq > after`, in ascending
    /// order — the primitive the derivation engine replays over
    /// (spec.md §4.6 step 3).
    pub async fn scan_events_after(&self, after: EventSeq) -> StoreIoResult<Vec<Appended>> {
        self.read_with(move |tx| {
            let table = tx.open_table(&event_log::TABLE)?;
            let mut out = Vec::new();
            for row in table.range(after.0 + 1..)? {
                let (seq, record) = row?;
                out.push(Appended { seq: EventSeq(seq.value()), record: record.value() });
            }
            Ok(out)
        })
        .await
    }

    /// Fetches a single `event_log` row by sequence number — used by the
    /// materializer (C11) to recover a URI's latest payload from
    /// `uri_index.latest_seq`.
    pub async fn get_event(&self, seq: EventSeq) -> StoreIoResult<Option<Appended>> {
        self.read_with(move |tx| {
            Ok(tx
                .open_table(&event_log::TABLE)?
                .get(&seq.0)?
                .map(|v| Appended { seq, record: v.value() }))
        })
        .await
    }

    /// Every `uri_index` row, for full-store scans (materialization,
    /// `store export`-style tooling). Unordered.
    pub async fn list_uri_index(&self) -> StoreIoResult<Vec<(Uri, UriIndexRecord)>> {
        self.read_with(|tx| {
            let table = tx.open_table(&uri_index::TABLE)?;
            let mut out = Vec::new();
            for row in table.range(..)? {
                let (key, value) = row?;
                out.push((Uri::from(key.value()), value.value()));
            }
            Ok(out)
        })
        .await
    }

    pub async fn latest_event_seq(&self) -> StoreIoResult<EventSeq> {
        self.read_with(|tx| {
            let table = tx.open_table(&event_log_next_seq::TABLE)?;
            Ok(EventSeq(table.get(&())?.map(|v| v.value()).unwrap_or(0)))
        })
        .await
    }

    pub async fn view_checkpoint_get(&self, source_store: &str) -> StoreIoResult<Option<ViewCheckpointRecord>> {
        let key = source_store.to_string();
        self.read_with(move |tx| Ok(tx.open_table(&view_checkpoint::TABLE)?.get(&key)?.map(|v| v.value())))
            .await
    }

    pub async fn view_checkpoint_put(
        &self,
        source_store: &str,
        last_source_seq: EventSeq,
        filter_hash: FilterSignature,
        evaluation_mode: &str,
        updated_at: i64,
    ) -> StoreIoResult<()> {
        let key = source_store.to_string();
        let mode = evaluation_mode.to_string();
        let hash = filter_hash.to_string();
        self.write_with(move |tx| {
            tx.open_table(&view_checkpoint::TABLE)?.insert(
                &key,
                &ViewCheckpointRecord {
                    last_source_seq: last_source_seq.0,
                    filter_hash: hash.clone(),
                    evaluation_mode: mode.clone(),
                    updated_at,
                },
            )?;
            Ok(())
        })
        .await
    }

    pub async fn view_checkpoint_clear(&self, source_store: &str) -> StoreIoResult<()> {
        let key = source_store.to_string();
        self.write_with(move |tx| {
            tx.open_table(&view_checkpoint::TABLE)?.remove(&key)?;
            Ok(())
        })
        .await
    }

    /// Looks up a sync checkpoint by its canonical `source_key` string
    /// (spec.md §3 "Sync checkpoint").
    pub async fn sync_checkpoint_get(&self, source_key: &str) -> StoreIoResult<Option<tables::SyncCheckpointRecord>> {
        let key = source_key.to_string();
        self.read_with(move |tx| Ok(tx.open_table(&tables::sync_checkpoint::TABLE)?.get(&key)?.map(|v| v.value())))
            .await
    }

    pub async fn sync_checkpoint_put(
        &self,
        source_key: &str,
        record: tables::SyncCheckpointRecord,
    ) -> StoreIoResult<()> {
        let key = source_key.to_string();
        self.write_with(move |tx| {
            tx.open_table(&tables::sync_checkpoint::TABLE)?.insert(&key, &record)?;
            Ok(())
        })
        .await
    }

    pub async fn sync_checkpoint_clear(&self, source_key: &str) -> StoreIoResult<()> {
        let key = source_key.to_string();
        self.write_with(move |tx| {
            tx.open_table(&tables::sync_checkpoint::TABLE)?.remove(&key)?;
            Ok(())
        })
        .await
    }

    /// Deletes every row in every table, leaving the schema intact —
    /// used by the derivation engine's `reset=true` path (spec.md §4.6
    /// step 2) and by `Store::wipe` for a from-scratch target store.
    pub async fn clear_all_rows(&self) -> StoreIoResult<()> {
        self.write_with(|tx| {
            let seqs: Vec<u64> = tx
                .open_table(&event_log::TABLE)?
                .range(..)?
                .map(|row| row.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            {
                let mut table = tx.open_table(&event_log::TABLE)?;
                for seq in &seqs {
                    table.remove(seq)?;
                }
            }

            let by_uri_keys: Vec<(String, u64)> = tx
                .open_table(&event_log_by_uri::TABLE)?
                .range(..)?
                .map(|row| row.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            {
                let mut table = tx.open_table(&event_log_by_uri::TABLE)?;
                for key in &by_uri_keys {
                    table.remove(key)?;
                }
            }

            tx.open_table(&event_log_next_seq::TABLE)?.remove(&())?;

            let uris: Vec<String> = tx
                .open_table(&uri_index::TABLE)?
                .range(..)?
                .map(|row| row.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            {
                let mut index = tx.open_table(&uri_index::TABLE)?;
                let mut cid_index = tx.open_table(&uri_index_cid::TABLE)?;
                for uri in &uris {
                    index.remove(uri)?;
                    cid_index.remove(uri)?;
                }
            }
            Ok(())
        })
        .await
    }
}

fn upsert_index_tx(tx: &StoreWriteTx, uri: &str, seq: u64, cid: &str) -> StoreIoResult<()> {
    tx.open_table(&uri_index::TABLE)?
        .insert(&uri.to_string(), &UriIndexRecord { latest_seq: seq, tombstoned: false })?;
    tx.open_table(&uri_index_cid::TABLE)?.insert(&uri.to_string(), &cid.to_string())?;
    Ok(())
}

fn init_tables(tx: &StoreWriteTx) -> StoreIoResult<()> {
    tx.open_table(&event_log::TABLE)?;
    tx.open_table(&event_log_next_seq::TABLE)?;
    tx.open_table(&event_log_by_uri::TABLE)?;
    tx.open_table(&uri_index::TABLE)?;
    tx.open_table(&uri_index_cid::TABLE)?;
    tx.open_table(&tables::sync_checkpoint::TABLE)?;
    tx.open_table(&view_checkpoint::TABLE)?;
    tx.open_table(&tables::filter_library::TABLE)?;
    let mut version_table = tx.open_table(&db_version::TABLE)?;
    if version_table.get(&())?.is_none() {
        version_table.insert(&(), &CURRENT_DB_VERSION)?;
    }
    Ok(())
}

fn check_version(tx: &StoreWriteTx) -> StoreIoResult<()> {
    let version_table = tx.open_table(&db_version::TABLE)?;
    let db_ver = version_table.get(&())?.map(|v| v.value()).unwrap_or(CURRENT_DB_VERSION);
    if db_ver > CURRENT_DB_VERSION {
        return VersionTooHighSnafu { db_ver, code_ver: CURRENT_DB_VERSION }.fail();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use skygent_core::types::{Cid, Did, Handle, Timestamp};
    use skygent_core::Metrics;

    use super::*;

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
    async fn p2_append_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let mut last = EventSeq::NONE;
        for i in 0..5 {
            let appended = store
                .append_upsert(UpsertEvent {
                    post: sample_post(&format!("at://did/app.bsky.feed.post/{i}"), "c1"),
                    source: "test".into(),
                })
                .await
                .unwrap();
            assert!(appended.seq > last);
            last = appended.seq;
        }
    }

    #[tokio::test]
    async fn i3_append_upsert_if_missing_is_a_no_op_on_equal_cid() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let post = sample_post("at://did/app.bsky.feed.post/1", "c1");
        let first = store
            .append_upsert_if_missing(UpsertEvent { post: post.clone(), source: "s".into() })
            .await
            .unwrap();
        assert!(first.is_some());
        let second = store
            .append_upsert_if_missing(UpsertEvent { post, source: "s".into() })
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn i4_delete_tombstones_and_clears_cid() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let uri = Uri::from("at://did/app.bsky.feed.post/1");
        store
            .append_upsert(UpsertEvent { post: sample_post(uri.as_str(), "c1"), source: "s".into() })
            .await
            .unwrap();
        store
            .append_delete(DeleteEvent { uri: uri.clone(), source: "s".into(), created_at: 1 })
            .await
            .unwrap();
        let (record, cid) = store.uri_index_get(&uri).await.unwrap().unwrap();
        assert!(record.tombstoned);
        assert!(cid.is_none());
    }

    #[tokio::test]
    async fn p3_idempotent_rerun_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let post = sample_post("at://did/app.bsky.feed.post/1", "c1");
        store
            .append_upsert_if_missing(UpsertEvent { post: post.clone(), source: "s".into() })
            .await
            .unwrap();
        let before = store.latest_event_seq().await.unwrap();
        store
            .append_upsert_if_missing(UpsertEvent { post, source: "s".into() })
            .await
            .unwrap();
        let after = store.latest_event_seq().await.unwrap();
        assert_eq!(before, after);
    }
}
