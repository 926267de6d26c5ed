use snafu::{Location, Snafu};

/// A parse error positioned at an absolute character offset into the
/// original input, so a UI collaborator can render a caret line.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FilterParseError {
    #[snafu(display("empty filter expression"))]
    Empty,

    #[snafu(display("unexpected trailing input at position {position}"))]
    TrailingInput { position: usize },

    #[snafu(display("unterminated quote starting at position {position}"))]
    UnterminatedQuote { position: usize },

    #[snafu(display("unterminated regex literal starting at position {position}"))]
    UnterminatedRegex { position: usize },

    #[snafu(display("expected `)` to close `(` opened at position {position}"))]
    UnmatchedOpenParen { position: usize },

    #[snafu(display("unexpected `)` at position {position}"))]
    UnmatchedCloseParen { position: usize },

    #[snafu(display("unexpected end of input, expected an expression"))]
    UnexpectedEof { position: usize },

    #[snafu(display("unknown atom `{keyword}` at position {position}"))]
    UnknownKeyword { position: usize, keyword: String },

    #[snafu(display("atom at position {position} is missing a value"))]
    MissingValue { position: usize },

    #[snafu(display("unknown option `{option}` at position {position}"))]
    UnknownOption { position: usize, option: String },

    #[snafu(display("duplicate option `{option}` at position {position}"))]
    DuplicateOption { position: usize, option: String },

    #[snafu(display("invalid value `{value}` for `{field}` at position {position}"))]
    InvalidValue {
        position: usize,
        field: String,
        value: String,
    },

    #[snafu(display("named filter `@{name}` not found"))]
    NamedFilterNotFound { position: usize, name: String },

    #[snafu(display(
        "named filter `@{name}` forms a cycle: {}",
        path.join(" -> ")
    ))]
    NamedFilterCycle {
        position: usize,
        name: String,
        path: Vec<String>,
    },

    #[snafu(display("named filter nesting exceeds the limit of {limit} at position {position}"))]
    NestingLimitExceeded { position: usize, limit: usize },

    #[snafu(display("expression nesting exceeds the limit of {limit} at position {position}"))]
    RecursionLimitExceeded { position: usize, limit: usize },

    #[snafu(display("invalid regex at position {position}: {source}"))]
    InvalidRegex {
        position: usize,
        source: regex::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

impl FilterParseError {
    /// Renders a two-line snippet with a caret under the error position,
    /// for the UI collaborator that owns terminal rendering.
    pub fn position(&self) -> Option<usize> {
        match self {
            FilterParseError::Empty => None,
            FilterParseError::TrailingInput { position }
            | FilterParseError::UnterminatedQuote { position }
            | FilterParseError::UnterminatedRegex { position }
            | FilterParseError::UnmatchedOpenParen { position }
            | FilterParseError::UnmatchedCloseParen { position }
            | FilterParseError::UnexpectedEof { position }
            | FilterParseError::UnknownKeyword { position, .. }
            | FilterParseError::MissingValue { position }
            | FilterParseError::UnknownOption { position, .. }
            | FilterParseError::DuplicateOption { position, .. }
            | FilterParseError::InvalidValue { position, .. }
            | FilterParseError::NamedFilterNotFound { position, .. }
            | FilterParseError::NamedFilterCycle { position, .. }
            | FilterParseError::NestingLimitExceeded { position, .. }
            | FilterParseError::RecursionLimitExceeded { position, .. }
            | FilterParseError::InvalidRegex { position, .. } => Some(*position),
        }
    }
}

/// Renders `input` with a caret line under `position`.
pub fn render_caret(input: &str, position: usize) -> String {
    let caret_line: String = (0..position).map(|_| ' ').chain(std::iter::once('^')).collect();
    format!("{input}\n{caret_line}")
}

pub type FilterParseResult<T> = Result<T, FilterParseError>;
