//! Stable hash over a canonical encoding of a [`FilterExpr`] AST. Equal
//! signature implies equal semantics; the
//! reverse needn't hold (two differently-shaped ASTs can happen to decide
//! the same predicate), which is fine — signatures gate incremental
//! derivation/checkpoint reuse, they don't claim semantic equivalence.

use std::fmt;

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};

use crate::filter_ast::FilterExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterSignature([u8; 32]);

impl FilterSignature {
    /// Computes the signature of an AST via its canonical JSON encoding.
    /// `serde`'s `tag = "tag"` representation already puts the
    /// discriminant first and preserves the declared child order
    /// (`left` before `right`), so this is deterministic across the
    /// parse→serialize round trip required by P1.
    pub fn of(expr: &FilterExpr) -> Self {
        let canonical =
            serde_json::to_vec(expr).expect("FilterExpr serialization cannot fail");
        Self(*blake3::hash(&canonical).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for FilterSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_ast::{ErrorPolicy, FilterExpr};

    fn sample() -> FilterExpr {
        FilterExpr::And {
            left: Box::new(FilterExpr::Hashtag { tag: "ai".into() }),
            right: Box::new(FilterExpr::Or {
                left: Box::new(FilterExpr::Author {
                    handle: "alice.bsky.social".into(),
                }),
                right: Box::new(FilterExpr::HasImages),
            }),
        }
    }

    #[test]
    fn signature_stable_across_json_round_trip() {
        let expr = sample();
        let json = serde_json::to_string(&expr).unwrap();
        let round_tripped: FilterExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(
            FilterSignature::of(&expr),
            FilterSignature::of(&round_tripped)
        );
    }

    #[test]
    fn signature_differs_on_different_asts() {
        let a = sample();
        let b = FilterExpr::Trending {
            tag: "ai".into(),
            on_error: ErrorPolicy::Include,
        };
        assert_ne!(FilterSignature::of(&a), FilterSignature::of(&b));
    }

    proptest::proptest! {
        #[test]
        fn signature_is_deterministic(tag in "[a-z]{1,8}") {
            let expr = FilterExpr::Hashtag { tag };
            let a = FilterSignature::of(&expr);
            let b = FilterSignature::of(&expr);
            proptest::prop_assert_eq!(a, b);
        }
    }
}
