//! Cursor-tracked pull and push ingestion of upstream posts into a store
//! (spec.md §4.7–§4.9, C7/C8), plus the shared rate-limiter and upstream
//! adapter boundary both engines drive through.

pub mod adapter;
pub mod error;
pub mod pull;
pub mod push;
pub mod rate_limit;
pub mod watch;

pub use adapter::{BskyAdapter, BskyError, BskyResult, Commit, CommitKind, JetstreamSubscription, Page, Profile};
pub use error::{SyncError, SyncResult, SyncStage};
pub use pull::{PullEngine, PullOptions, PullSummary, SourceKey};
pub use push::{PushEngine, PushOptions, PushSummary};
pub use rate_limit::{with_retry, RateLimiter};
pub use watch::{watch_pull, WatchOptions};
