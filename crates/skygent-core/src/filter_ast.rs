//! The filter expression AST (`FilterExpr`) and the `ErrorPolicy` that
//! wraps effectful atoms.
//!
//! This is a pure data type: no parsing (that's `skygent-filter::parser`)
//! and no evaluation (`skygent-filter::runtime`) lives here, only the
//! tagged union and the structural helpers (`is_effectful`, canonicalized
//! JSON for signature hashing) that both depend on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Handle;

/// How an effectful atom's evaluation error is handled.
///
/// Invariant: `Retry.base_delay` is finite and non-negative (enforced by
/// the parser/JSON deserializer, not re-checked here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "camelCase")]
pub enum ErrorPolicy {
    Include,
    Exclude,
    Retry {
        max_retries: u32,
        base_delay: Duration,
    },
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        ErrorPolicy::Exclude
    }
}

/// Regex compile options shared by `Regex`, `AltTextRegex`, `LinkRegex`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexFlags {
    pub case_insensitive: bool,
    pub multi_line: bool,
}

/// A boolean expression over a [`crate::post::Post`].
///
/// Named references (`@name`) are resolved during parsing (C2/C6) and
/// never appear in a stored `FilterExpr` — by the time an AST exists, it
/// is fully expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum FilterExpr {
    All,
    None,

    Author { handle: Handle },
    AuthorIn { handles: Vec<Handle> },
    Hashtag { tag: String },
    HashtagIn { tags: Vec<String> },
    Contains { text: String, case_sensitive: bool },
    Regex { patterns: Vec<String>, flags: RegexFlags },
    Language { langs: Vec<String> },
    DateRange { start: Option<i64>, end: Option<i64> },
    Engagement {
        min_likes: Option<u64>,
        min_reposts: Option<u64>,
        min_replies: Option<u64>,
    },

    IsReply,
    IsQuote,
    IsRepost,
    IsOriginal,

    HasImages,
    MinImages { n: usize },
    HasAltText,
    NoAltText,
    AltText { text: String },
    AltTextRegex { pattern: String, flags: RegexFlags },
    HasVideo,
    HasLinks,
    LinkContains { text: String, case_sensitive: bool },
    LinkRegex { pattern: String, flags: RegexFlags },
    HasMedia,
    HasEmbed,

    HasValidLinks { on_error: ErrorPolicy },
    Trending { tag: String, on_error: ErrorPolicy },

    And {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },
    Or {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },
    Not {
        expr: Box<FilterExpr>,
    },
}

impl FilterExpr {
    /// True iff the AST contains a `HasValidLinks` or `Trending` node
    /// anywhere.
    pub fn is_effectful(&self) -> bool {
        match self {
            FilterExpr::HasValidLinks { .. } | FilterExpr::Trending { .. } => true,
            FilterExpr::And { left, right } | FilterExpr::Or { left, right } => {
                left.is_effectful() || right.is_effectful()
            }
            FilterExpr::Not { expr } => expr.is_effectful(),
            _ => false,
        }
    }

    /// Every `Engagement` atom must specify at least one threshold.
    /// Checked once at build time rather than per-eval.
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            FilterExpr::Engagement {
                min_likes: None,
                min_reposts: None,
                min_replies: None,
            } => Err("Engagement requires at least one threshold"),
            FilterExpr::Regex { patterns, .. } if patterns.is_empty() => {
                Err("Regex requires at least one pattern")
            }
            FilterExpr::And { left, right } | FilterExpr::Or { left, right } => {
                left.validate()?;
                right.validate()
            }
            FilterExpr::Not { expr } => expr.validate(),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_effectful_propagates_through_combinators() {
        let expr = FilterExpr::And {
            left: Box::new(FilterExpr::Hashtag { tag: "ai".into() }),
            right: Box::new(FilterExpr::Not {
                expr: Box::new(FilterExpr::Trending {
                    tag: "ai".into(),
                    on_error: ErrorPolicy::Include,
                }),
            }),
        };
        assert!(expr.is_effectful());
        assert!(!FilterExpr::Hashtag { tag: "ai".into() }.is_effectful());
    }

    #[test]
    fn engagement_requires_a_threshold() {
        let bad = FilterExpr::Engagement {
            min_likes: None,
            min_reposts: None,
            min_replies: None,
        };
        assert!(bad.validate().is_err());
        let ok = FilterExpr::Engagement {
            min_likes: Some(10),
            min_reposts: None,
            min_replies: None,
        };
        assert!(ok.validate().is_ok());
    }
}
