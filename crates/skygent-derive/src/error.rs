use snafu::{Location, Snafu};

use skygent_filter::runtime::{CompileError, FilterEvalError};
use skygent_store::StoreIoError;

/// Errors from running a derivation (spec.md §4.6, §7 "pipeline-local
/// wrapper" shape, sized to this one component rather than
/// `SyncError`'s multi-stage tagging).
#[derive(Debug, Snafu)]
pub enum DeriveError {
    /// The view checkpoint's `(filter_hash, mode)` no longer matches the
    /// requested derivation and `reset` wasn't set (spec.md §4.6 step 1,
    /// P5).
    #[snafu(display(
        "derivation settings changed since the last run for this target/source pair \
         (filter or evaluation mode differs from the recorded checkpoint); \
         pass reset=true to rebuild from scratch, reuse the prior filter/mode, \
         or derive into a new target store"
    ))]
    SettingsChanged {
        #[snafu(implicit)]
        location: Location,
    },

    /// EventTime mode forbids effectful atoms (spec.md §4.2
    /// "Classification", §4.6 step 4, S2).
    #[snafu(display("EventTime mode does not allow effectful filter atoms (HasValidLinks, Trending)"))]
    EffectfulInEventTime {
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(transparent)]
    Compile {
        source: CompileError,
        #[snafu(implicit)]
        location: Location,
    },

    /// A `Retry` error policy exhausted its attempts while replaying a
    /// source event (spec.md §4.2, §7 `FilterEvalError`).
    #[snafu(transparent)]
    Filter {
        source: FilterEvalError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(transparent)]
    Store {
        source: StoreIoError,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type DeriveResult<T> = Result<T, DeriveError>;
