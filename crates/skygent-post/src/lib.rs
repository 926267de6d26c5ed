//! Normalizes a pre-decoded protocol payload into the canonical
//! [`skygent_core::Post`] record (spec.md §4.3, C4).

pub mod error;
pub mod parser;

pub use error::{ParseError, ParseResult, ParseStage};
pub use parser::parse_post;
