//! The append-only per-store event log, its indexes, its checkpoints,
//! the named-filter library, and the cross-process store lock (spec.md
//! §4.4–§4.5, §4.10 — C5/C6/C10).

pub mod filter_library;
pub mod lock;
pub mod store;
pub mod tables;
pub mod ulid;

pub use filter_library::{FilterLibraryEntry, FilterLibraryError, FilterLibraryResult};
pub use lock::{with_store_lock, with_store_locks_sorted, StoreLockError, StoreLockGuard, StoreLockResult};
pub use store::{Appended, DeleteEvent, Store, StoreIoError, StoreIoResult, UpsertEvent};
pub use tables::{EventKind, EventLogRecord, SyncCheckpointRecord, UriIndexRecord, ViewCheckpointRecord};
pub use ulid::{Ulid, UlidGenerator};
