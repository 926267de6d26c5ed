//! The facade crate: one `Engine` wiring together the append-only store,
//! the pull/push sync engines, the derivation engine, and the reporter
//! and materializer (spec.md §2 crate map, C5–C11), plus the adapter
//! traits callers implement to plug in an actual upstream protocol
//! client and credentials source.

pub mod adapter;
pub mod engine;
pub mod error;

pub use engine::Engine;
pub use error::{SkygentError, SkygentResult};

pub use skygent_core::config::SkygentConfig;
pub use skygent_core::FilterExpr;
pub use skygent_derive::{derive, DeriveRequest, DeriveSummary, EvaluationMode};
pub use skygent_filter::runtime::{EffectProvider, NoEffects};
pub use skygent_filter::{parse, resolve_named, NamedFilterResolver, NoNamedFilters, Predicate};
pub use skygent_report::{NoopReporter, Progress, Reporter, TracingReporter};
pub use skygent_store::{Store, StoreIoError};
pub use skygent_sync::{PullOptions, PullSummary, PushOptions, PushSummary, SourceKey, WatchOptions};

/// Installs a `tracing-subscriber` `EnvFilter` subscriber reading
/// `RUST_LOG` (spec.md §1 ambient stack "Logging"). Call once at process
/// start; callers that already manage their own subscriber (an
/// embedding application, a test harness) should skip this and wire
/// `tracing` themselves instead.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().ok();
}
