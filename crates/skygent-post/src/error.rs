use snafu::{Location, Snafu};

/// Which normalization step rejected the payload — surfaced in the
/// `ParseError{stage, path, cause}` shape from spec.md §4.3/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Envelope,
    Author,
    Record,
    Embed,
    Reply,
    FeedReason,
}

impl std::fmt::Display for ParseStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseStage::Envelope => "envelope",
            ParseStage::Author => "author",
            ParseStage::Record => "record",
            ParseStage::Embed => "embed",
            ParseStage::Reply => "reply",
            ParseStage::FeedReason => "feed_reason",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("post parse failed at {stage} (field `{path}`): {cause}"))]
pub struct ParseError {
    pub stage: ParseStage,
    pub path: String,
    pub cause: String,
    #[snafu(implicit)]
    pub location: Location,
}

pub type ParseResult<T> = Result<T, ParseError>;

pub(crate) fn fail<T>(stage: ParseStage, path: impl Into<String>, cause: impl Into<String>) -> ParseResult<T> {
    ParseSnafu { stage, path: path.into(), cause: cause.into() }.fail()
}
