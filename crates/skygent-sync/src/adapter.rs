//! The upstream protocol adapter boundary (spec.md §6 "Upstream protocol
//! adapter (consumed)"). No implementation ships here — callers (the CLI
//! collaborator, or a test double) provide one.
//!
//! This trait lives in `skygent-sync` rather than the facade crate: the
//! facade depends on `skygent-sync`, not the other way around, so the
//! trait the pull/push engines call through has to live on this side of
//! that dependency edge. The facade's `adapter` module re-exports it —
//! SPEC_FULL.md §6 names the module `skygent::adapter`, which still
//! holds from a caller's point of view.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::BoxStream;
use skygent_util_error::BoxedError;
use snafu::{Location, Snafu};

use crate::pull::SourceKey;

/// `BskyError` (spec.md §7): upstream HTTP/WS failure, carrying `status`
/// and `operation` so retry policy and logging can branch on them
/// without string-matching.
#[derive(Debug, Snafu)]
#[snafu(display("upstream {operation} failed{}: {source}", status.map(|s| format!(" (status {s})")).unwrap_or_default()))]
pub struct BskyError {
    pub operation: String,
    pub status: Option<u16>,
    pub source: BoxedError,
    #[snafu(implicit)]
    pub location: Location,
}

impl BskyError {
    /// Transient per spec.md §5 "Rate limiting": HTTP 429, 5xx, or no
    /// status at all (connection reset/timeout never reaches the HTTP
    /// layer to get a status).
    pub fn is_transient(&self) -> bool {
        match self.status {
            Some(status) => status == 429 || (500..600).contains(&status),
            None => true,
        }
    }
}

pub type BskyResult<T> = Result<T, BskyError>;

/// One page of raw (pre-decoded) items plus the adapter's opaque
/// pagination cursor.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<serde_json::Value>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Create,
    Update,
    Delete,
}

/// One firehose commit (spec.md §4.8). `record` is `None` for deletes.
#[derive(Debug, Clone)]
pub struct Commit {
    pub kind: CommitKind,
    pub uri: String,
    pub cid: Option<String>,
    pub record: Option<serde_json::Value>,
    /// Microseconds since the Unix epoch, as the protocol reports it;
    /// the push cursor is `time_us / 1000` (spec.md §4.8).
    pub time_us: i64,
}

#[derive(Debug, Clone, Default)]
pub struct JetstreamSubscription {
    pub endpoint: String,
    pub collections: Vec<String>,
    pub dids: Vec<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub handle: String,
    pub did: String,
}

/// Operations the engine core requires from the upstream protocol
/// (spec.md §6). Every method already accounts for the per-client rate
/// limit being applied by the caller (`RateLimiter`), not internally —
/// keeping this trait a thin transport boundary.
#[async_trait]
pub trait BskyAdapter: Send + Sync {
    async fn paginated(&self, source: &SourceKey, cursor: Option<String>, limit: Option<u32>) -> BskyResult<Page>;

    async fn stream(&self, subscription: JetstreamSubscription) -> BskyResult<BoxStream<'static, Commit>>;

    async fn shutdown(&self);

    async fn resolve_identity(&self, handle: &str) -> BskyResult<String>;

    async fn profile(&self, did: &str) -> BskyResult<Profile>;

    async fn trending_topics(&self) -> BskyResult<HashSet<String>>;

    /// HTTP HEAD-equivalent status check, for `HasValidLinks`.
    async fn head(&self, url: &str) -> BskyResult<u16>;
}
