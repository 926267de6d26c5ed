use snafu::{Location, Snafu};

use skygent_filter::runtime::CompileError;
use skygent_post::ParseError;
use skygent_store::StoreIoError;

use crate::adapter::BskyError;

/// Which pipeline stage produced the error (spec.md §7
/// `SyncError{stage ∈ source|parse|filter|store, …}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Source,
    Parse,
    Filter,
    Store,
}

impl std::fmt::Display for SyncStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStage::Source => "source",
            SyncStage::Parse => "parse",
            SyncStage::Filter => "filter",
            SyncStage::Store => "store",
        };
        f.write_str(s)
    }
}

/// Pipeline-local wrapper (spec.md §7): `stage=store` is always fatal;
/// other stages obey `strict`/`maxErrors` at the call site.
#[derive(Debug, Snafu)]
pub enum SyncError {
    #[snafu(display("sync failed at stage {stage}: {message}"))]
    Pipeline { stage: SyncStage, message: String, #[snafu(implicit)] location: Location },

    #[snafu(transparent)]
    Bsky {
        source: BskyError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(transparent)]
    Parse {
        source: ParseError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(transparent)]
    Compile {
        source: CompileError,
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

pub type SyncResult<T> = Result<T, SyncError>;
