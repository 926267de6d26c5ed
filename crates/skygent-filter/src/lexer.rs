//! Splits filter-DSL input into top-level tokens: parens, boolean
//! keywords, and raw "atom text" segments. Atom text is interpreted by
//! [`crate::parser::parse_atom`] — the lexer's only job is finding where
//! one atom ends and the next token begins, which requires tracking quote
//! and regex-literal state so embedded whitespace/parens don't split a
//! token early (spec.md §4.1).

use crate::error::{FilterParseError, UnterminatedQuoteSnafu, UnterminatedRegexSnafu};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    And,
    Or,
    Not,
    /// Raw, unparsed atom text (bareword, `key:value`, or `@name`).
    Atom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Absolute character offset of the token's first character.
    pub position: usize,
}

const REGEX_KEYS: &[&str] = &["regex", "alttextregex", "linkregex"];

pub fn lex(input: &str) -> Result<Vec<Token>, FilterParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, position: i });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, position: i });
                i += 1;
            }
            '!' => {
                tokens.push(Token { kind: TokenKind::Not, position: i });
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token { kind: TokenKind::And, position: i });
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token { kind: TokenKind::Or, position: i });
                i += 2;
            }
            _ => {
                let start = i;
                let (text, next) = read_atom(&chars, i)?;
                i = next;
                match text.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token { kind: TokenKind::And, position: start }),
                    "OR" => tokens.push(Token { kind: TokenKind::Or, position: start }),
                    "NOT" => tokens.push(Token { kind: TokenKind::Not, position: start }),
                    _ => tokens.push(Token { kind: TokenKind::Atom(text), position: start }),
                }
            }
        }
    }

    Ok(tokens)
}

/// Reads one atom token starting at `chars[start]`, returning its raw text
/// (quotes/regex-delimiters kept, for the parser to strip) and the index
/// just past the token.
fn read_atom(chars: &[char], start: usize) -> Result<(String, usize), FilterParseError> {
    let mut i = start;
    let mut buf = String::new();
    let mut key_buf = String::new();
    let mut seen_colon = false;
    let mut regex_mode_eligible = false;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() || c == '(' || c == ')' {
            break;
        }

        if !seen_colon && c == ':' {
            seen_colon = true;
            let normalized: String = key_buf
                .to_ascii_lowercase()
                .chars()
                .filter(|ch| *ch != '-' && *ch != '_')
                .collect();
            regex_mode_eligible = REGEX_KEYS.contains(&normalized.as_str());
            buf.push(c);
            i += 1;
            // Immediately following the colon, a `/` begins a regex
            // literal for the keys in REGEX_KEYS.
            if regex_mode_eligible && chars.get(i) == Some(&'/') {
                let regex_start = i;
                let (regex_text, next) = read_regex_literal(chars, i)
                    .ok_or_else(|| UnterminatedRegexSnafu { position: regex_start }.build())?;
                buf.push_str(&regex_text);
                i = next;
            }
            continue;
        }

        if !seen_colon {
            key_buf.push(c);
        }

        if c == '"' || c == '\'' {
            let quote_start = i;
            let (quoted, next) = read_quoted(chars, i)
                .ok_or_else(|| UnterminatedQuoteSnafu { position: quote_start }.build())?;
            buf.push_str(&quoted);
            i = next;
            continue;
        }

        buf.push(c);
        i += 1;
    }

    Ok((buf, i))
}

/// Exposed for [`crate::parser::split_top_level`], which needs the same
/// quote-skipping rule when splitting an atom's option segments.
pub(crate) fn read_quoted_pub(chars: &[char], start: usize) -> Option<(String, usize)> {
    read_quoted(chars, start)
}

/// Exposed for [`crate::parser::split_top_level`]; see [`read_quoted_pub`].
pub(crate) fn read_regex_literal_pub(chars: &[char], start: usize) -> Option<(String, usize)> {
    read_regex_literal(chars, start)
}

/// Reads a quoted segment starting at the opening quote char, including
/// the surrounding quotes in the returned text. Supports `\\` and `\<quote>`
/// escapes.
fn read_quoted(chars: &[char], start: usize) -> Option<(String, usize)> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut buf = String::new();
    buf.push(quote);
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() && (chars[i + 1] == quote || chars[i + 1] == '\\') {
            buf.push(c);
            buf.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            buf.push(c);
            return Some((buf, i + 1));
        }
        buf.push(c);
        i += 1;
    }
    None
}

/// Reads a `/pattern/flags` regex literal starting at the opening `/`,
/// including delimiters and trailing flag letters. Supports `\/` and `\\`
/// escapes inside the pattern.
fn read_regex_literal(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let mut buf = String::new();
    buf.push('/');
    loop {
        if i >= chars.len() {
            return None;
        }
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() && (chars[i + 1] == '/' || chars[i + 1] == '\\') {
            buf.push(c);
            buf.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == '/' {
            buf.push(c);
            i += 1;
            break;
        }
        buf.push(c);
        i += 1;
    }
    while i < chars.len() && chars[i].is_ascii_alphabetic() {
        buf.push(chars[i]);
        i += 1;
    }
    Some((buf, i))
}
