//! The top-level error type every public `Engine` method returns,
//! unifying each crate's own error enum: one `#[snafu(transparent)]`
//! variant per collaborator crate, no re-interpretation of their
//! messages.

use snafu::Snafu;

use crate::adapter::CredentialError;

#[derive(Debug, Snafu)]
pub enum SkygentError {
    #[snafu(transparent)]
    FilterParse { source: skygent_filter::FilterParseError },

    #[snafu(transparent)]
    FilterCompile { source: skygent_filter::runtime::CompileError },

    #[snafu(transparent)]
    PostParse { source: skygent_post::ParseError },

    #[snafu(transparent)]
    StoreIo { source: skygent_store::StoreIoError },

    #[snafu(transparent)]
    StoreLock { source: skygent_store::StoreLockError },

    #[snafu(transparent)]
    FilterLibrary { source: skygent_store::FilterLibraryError },

    #[snafu(transparent)]
    Sync { source: skygent_sync::SyncError },

    #[snafu(transparent)]
    Derive { source: skygent_derive::DeriveError },

    #[snafu(transparent)]
    Materialize { source: skygent_report::MaterializeError },

    #[snafu(transparent)]
    Credential { source: CredentialError },
}

pub type SkygentResult<T> = Result<T, SkygentError>;
