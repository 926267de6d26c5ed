//! `redb` table definitions for a single store.
//!
//! One `def_table!` per table, typed `K => V` via `redb_bincode`,
//! records as plain `bincode`+`serde` structs. Secondary indices (here,
//! the per-URI event history) are a second table populated in the same
//! transaction as the primary append.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

/// `event_log` row (spec.md §3 "Event log row", §6 schema). `event_seq`
/// is allocated by [`crate::store::NextSeq`] rather than a native
/// auto-increment — `redb` has no such feature, so the workspace grows
/// its own single-row counter table, bumped in the same transaction as
/// the append (I1).
#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub enum EventKind {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub event_id: [u8; 16],
    pub event_type: EventKind,
    pub post_uri: String,
    /// `Some` for `Upsert`, `None` for `Delete` — mirrors `uri_index`'s
    /// own `latest_cid` optionality (spec.md §6).
    pub cid: Option<String>,
    /// Canonical JSON of the typed event (the `Post` for an upsert;
    /// empty object for a delete). Invariant: decodes back to the typed
    /// event (spec.md §3).
    pub payload_json: String,
    pub created_at: i64,
    pub source: String,
}

def_table! {
    /// Append-only log, keyed by the monotonic `event_seq` counter.
    event_log: u64 => EventLogRecord
}

def_table! {
    /// Single-row counter backing `event_seq` allocation. Key is always
    /// `()`; absent means "no events appended yet" (next seq is 1).
    event_log_next_seq: () => u64
}

def_table! {
    /// Secondary index mirroring the illustrative SQL's
    /// `(post_uri, event_seq DESC)` index: every event_seq ever appended
    /// for a URI, for history/debugging reads that the primary
    /// `uri_index` (latest-only) can't answer. The second key component
    /// is `u64::MAX - event_seq` rather than `std::cmp::Reverse` (which
    /// `bincode`/`redb_bincode` don't know how to encode as a table
    /// key) so ascending key order still yields descending seq order.
    event_log_by_uri: (String, u64) => ()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct UriIndexRecord {
    pub latest_seq: u64,
    pub tombstoned: bool,
}

def_table! {
    /// `uri_index` — derived from `event_log` by replay, kept consistent
    /// via the same transaction that appends (spec.md §3, §4.4 I2).
    /// The CID lives alongside in [`uri_index_cid`] since `redb_bincode`
    /// values are fixed shape per table and `None`-vs-tombstoned needs
    /// independent tracking (I4: delete clears the CID but the row
    /// itself stays, so queries can tell "never existed" from
    /// "existed, now deleted").
    uri_index: String => UriIndexRecord
}

def_table! {
    /// Companion to [`uri_index`]: the latest CID, absent once
    /// tombstoned (I4).
    uri_index_cid: String => String
}

#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct SyncCheckpointRecord {
    pub cursor: Option<String>,
    pub last_event_seq: Option<u64>,
    pub filter_hash: String,
    pub updated_at: i64,
}

def_table! {
    /// Keyed by the canonical string form of `SourceKey` (spec.md §3
    /// "Sync checkpoint").
    sync_checkpoint: String => SyncCheckpointRecord
}

#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct ViewCheckpointRecord {
    pub last_source_seq: u64,
    pub filter_hash: String,
    pub evaluation_mode: String,
    pub updated_at: i64,
}

def_table! {
    /// Keyed by the source store's name — a target store derives from
    /// at most one source at a time per spec.md §3 "View checkpoint".
    view_checkpoint: String => ViewCheckpointRecord
}

#[derive(Debug, Clone, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct FilterLibraryRecord {
    pub expr_json: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

def_table! {
    /// Persisted `(name -> FilterExpr)` entries resolved by `@name`
    /// references during parsing (spec.md §4.5).
    filter_library: String => FilterLibraryRecord
}

def_table! {
    /// Schema version gate, same shape as the teacher's
    /// `tables::db_version` singleton.
    db_version: () => u64
}

pub const CURRENT_DB_VERSION: u64 = 1;
