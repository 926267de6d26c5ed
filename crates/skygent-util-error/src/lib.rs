//! Small, dependency-free helpers shared by every Skygent crate: a boxed
//! error alias for collaborator traits, and `Display` helpers for logging
//! values that don't implement it directly (or that we don't want to dump
//! with `{:#?}`).

mod fmt;

pub use self::fmt::*;

/// Type-erased error used at the boundary with collaborator traits (the
/// upstream protocol adapter, the credentials provider) that don't know
/// about Skygent's own error enums.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type BoxedErrorResult<T> = std::result::Result<T, BoxedError>;
