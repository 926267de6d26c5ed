//! Newtypes for the primitive identifiers and values that flow through the
//! whole engine.
//!
//! Each type centralizes its own parsing/validation in a single
//! `FromStr`/`TryFrom` impl rather than scattering ad-hoc checks at call
//! sites, and derives the handful of traits ([`Ord`], [`Hash`], `Serialize`)
//! needed to use it directly as a storage-table key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

macro_rules! string_newtype {
    ($(#[$outer:meta])* $name:ident) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype!(
    /// A user-facing alias, e.g. `alice.bsky.social`. Comparisons are
    /// case-sensitive on the wire form; callers that need case-insensitive
    /// matching (the filter runtime) lowercase explicitly.
    struct Handle
);

string_newtype!(
    /// A stable decentralized identifier, e.g. `did:plc:abcd1234`.
    struct Did
);

string_newtype!(
    /// A lowercased hashtag, with or without the leading `#` stripped by the
    /// caller (both [`crate::filter_ast`] atoms and [`Post`] normalize to
    /// without-`#` form; see invariant in `Post::hashtags`).
    struct Hashtag
);

string_newtype!(
    /// An `at://did/collection/rkey` locator.
    struct Uri
);

string_newtype!(
    /// A content-addressed hash identifying an exact post revision.
    struct Cid
);

string_newtype!(
    /// The name of a store, also used as its on-disk directory name.
    struct StoreName
);

/// Milliseconds since the Unix epoch.
///
/// Invariant: always non-negative in practice (posts predate nothing), but
/// the field is signed to absorb clock skew without panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn checked_add_millis(self, millis: i64) -> Option<Self> {
        self.0.checked_add(millis).map(Timestamp)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A store's append-only event-log position. `0` is never assigned to a
/// real row; the first appended event gets seq `1`, strictly increasing,
/// so `0` doubles as "no events yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSeq(pub u64);

impl EventSeq {
    pub const NONE: EventSeq = EventSeq(0);

    pub fn next(self) -> EventSeq {
        EventSeq(self.0 + 1)
    }
}

impl fmt::Display for EventSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
pub enum StoreNameParseError {
    #[snafu(display("store name is empty"))]
    Empty,
    #[snafu(display("store name `{name}` contains a path separator"))]
    ContainsPathSeparator { name: String },
}

impl StoreName {
    /// Parses and validates a store name used as a directory component.
    pub fn parse(s: &str) -> Result<Self, StoreNameParseError> {
        if s.is_empty() {
            return Err(StoreNameParseError::Empty);
        }
        if s.contains('/') || s.contains('\\') {
            return Err(StoreNameParseError::ContainsPathSeparator { name: s.to_string() });
        }
        Ok(Self(s.to_string()))
    }
}
