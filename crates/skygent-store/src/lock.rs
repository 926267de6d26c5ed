//! Cross-process file lock on a store root.
//!
//! Uses an `fs2`-based exclusive lock on a dedicated lock file, with
//! sorted-order multi-lock acquisition to avoid deadlock when a caller
//! needs more than one store locked at once.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt as _;
use snafu::{Location, ResultExt, Snafu};

const LOG_TARGET: &str = "skygent::store::lock";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Snafu)]
pub enum StoreLockError {
    #[snafu(display("could not open lock file at {path}: {source}"))]
    Open {
        path: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("could not acquire store lock at {path} within the wait budget"))]
    TimedOut { path: String },
    #[snafu(display("store lock error at {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type StoreLockResult<T> = Result<T, StoreLockError>;

/// A held exclusive lock on `{store_root}/.lock`. Release is unconditional
/// on drop, so every exit path (including panics unwinding through
/// `?`) releases it.
pub struct StoreLockGuard {
    file: File,
    path: PathBuf,
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(
                target: LOG_TARGET,
                path = %self.path.display(),
                %err,
                "failed to release store lock (process exit will release it anyway)"
            );
        }
    }
}

/// Acquires the exclusive lock on `store_root/.lock`.
///
/// Blocks polling up to `wait_for` if given; with `wait_for = None`,
/// tries once and fails immediately if already held (spec.md §4.10).
pub fn acquire(store_root: &Path, wait_for: Option<Duration>) -> StoreLockResult<StoreLockGuard> {
    let path = store_root.join(".lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|_| OpenSnafu { path: path.display().to_string() })?;

    match wait_for {
        None => {
            file.try_lock_exclusive().map_err(|_| StoreLockError::TimedOut {
                path: path.display().to_string(),
            })?;
        }
        Some(budget) => {
            let deadline = Instant::now() + budget;
            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(_) if Instant::now() < deadline => {
                        std::thread::sleep(POLL_INTERVAL);
                    }
                    Err(_) => {
                        return TimedOutSnafu { path: path.display().to_string() }.fail();
                    }
                }
            }
        }
    }

    Ok(StoreLockGuard { file, path })
}

/// Runs `op` while holding the exclusive lock on `store_root`. This is
/// the sole entry point callers should use — the guard is dropped (and
/// the lock released) when `op` returns, regardless of outcome.
pub fn with_store_lock<T>(
    store_root: &Path,
    wait_for: Option<Duration>,
    op: impl FnOnce() -> T,
) -> StoreLockResult<T> {
    let _guard = acquire(store_root, wait_for)?;
    Ok(op())
}

/// Acquires locks on several store roots in sorted-path order, to avoid
/// the deadlock that naive lock-in-request-order can produce when two
/// callers lock the same pair of stores in opposite orders (spec.md
/// §4.10, §5 "Cross-store").
pub fn with_store_locks_sorted<T>(
    mut store_roots: Vec<PathBuf>,
    wait_for: Option<Duration>,
    op: impl FnOnce() -> T,
) -> StoreLockResult<T> {
    store_roots.sort();
    store_roots.dedup();
    let mut guards = Vec::with_capacity(store_roots.len());
    for root in &store_roots {
        guards.push(acquire(root, wait_for)?);
    }
    let result = op();
    drop(guards);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p9_exclusive_lock_blocks_a_second_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let _first = acquire(dir.path(), None).unwrap();
        let second = acquire(dir.path(), None);
        assert!(matches!(second, Err(StoreLockError::TimedOut { .. })));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guard = acquire(dir.path(), None).unwrap();
        }
        let second = acquire(dir.path(), None);
        assert!(second.is_ok());
    }

    #[test]
    fn sorted_multi_lock_is_order_independent() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let result = with_store_locks_sorted(
            vec![b.path().to_path_buf(), a.path().to_path_buf()],
            None,
            || 42,
        )
        .unwrap();
        assert_eq!(result, 42);
    }
}
