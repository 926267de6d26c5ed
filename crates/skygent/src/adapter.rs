//! External collaborator boundary (spec.md §6 "External interfaces").
//!
//! `BskyAdapter` itself lives in `skygent-sync` (the crate that actually
//! drives it); this module re-exports it so callers only ever need to
//! name `skygent::adapter`, plus defines the credentials collaborator
//! that §6's configuration table names but no engine crate depends on
//! directly.

use snafu::{Location, Snafu};

pub use skygent_sync::adapter::{
    BskyAdapter, BskyError, BskyResult, Commit, CommitKind, JetstreamSubscription, Page, Profile,
};

/// A resolved, already-redacted credential pair — never `Debug`-printed
/// with the password in view.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    password: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), password: password.into() }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("identifier", &self.identifier).field("password", &"<redacted>").finish()
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("could not resolve credentials for {identifier}"))]
pub struct CredentialError {
    pub identifier: String,
    pub source: skygent_util_error::BoxedError,
    #[snafu(implicit)]
    pub location: Location,
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// Looks up login credentials for an identifier (handle or DID). No
/// implementation ships here; callers supply one backed by whatever
/// secret store they use.
#[async_trait::async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn resolve(&self, identifier: &str) -> CredentialResult<Credentials>;
}
