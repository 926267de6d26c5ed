//! The progress reporter interface and the filtered-output
//! materializer (spec.md §4.11, C11).

pub mod error;
pub mod materializer;
pub mod reporter;

pub use error::{MaterializeError, MaterializeResult};
pub use materializer::materialize;
pub use reporter::{NoopReporter, Progress, Reporter, TracingReporter};
