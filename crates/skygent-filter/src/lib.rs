//! The filter DSL parser and compiled predicate runtime (spec.md §3/§4).
//!
//! [`parser::parse`] turns DSL text into a [`skygent_core::FilterExpr`];
//! [`runtime::Predicate`] compiles that AST into something that can be
//! evaluated against posts, batched, and explained.

pub mod error;
pub mod lexer;
pub mod parser;
pub mod runtime;

pub use error::{render_caret, FilterParseError, FilterParseResult};
pub use parser::{parse, resolve_named, NamedFilterResolver, NoNamedFilters};
pub use runtime::{EvalError, EvalOutcome, Explanation, FilterEvalError, Predicate};
