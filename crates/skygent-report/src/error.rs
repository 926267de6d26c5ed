use snafu::{Location, Snafu};

use skygent_filter::runtime::FilterEvalError;
use skygent_store::StoreIoError;

#[derive(Debug, Snafu)]
pub enum MaterializeError {
    #[snafu(transparent)]
    Store {
        source: StoreIoError,
        #[snafu(implicit)]
        location: Location,
    },

    /// A `Retry` error policy exhausted its attempts while evaluating a
    /// stored post (spec.md §4.2, §7 `FilterEvalError`).
    #[snafu(transparent)]
    Filter {
        source: FilterEvalError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("stored event payload at seq {seq} does not decode as a Post: {source}"))]
    Decode {
        seq: u64,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("could not write materialized output to {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type MaterializeResult<T> = Result<T, MaterializeError>;
