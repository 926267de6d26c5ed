//! Primitive types, the filter AST, filter signatures, and shared
//! configuration for the Skygent engine — the leaf crate every other
//! crate in the workspace depends on.

pub mod config;
pub mod filter_ast;
pub mod post;
pub mod signature;
pub mod types;

pub use filter_ast::{ErrorPolicy, FilterExpr, RegexFlags};
pub use post::{Embed, FeedReason, ImageEmbed, Metrics, Post, ReplyRef};
pub use signature::FilterSignature;
pub use types::{Cid, Did, EventSeq, Handle, Hashtag, StoreName, Timestamp, Uri};
